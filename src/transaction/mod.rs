pub mod error;
pub mod lock_manager;
pub mod transaction;

pub use error::{AbortReason, TransactionAbort};
pub use lock_manager::{LockManager, LockMode};
pub use transaction::{IsolationLevel, Transaction, TransactionState};
