// Export public modules
pub mod common;
pub mod index;
pub mod storage;
pub mod transaction;

// Re-export key items for convenient access
pub use index::btree::BTreeIndex;
pub use storage::buffer::BufferPoolError;
pub use storage::buffer::BufferPoolManager;
pub use storage::disk::DiskManager;
pub use transaction::lock_manager::LockManager;
pub use transaction::Transaction;
