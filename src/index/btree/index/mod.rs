pub mod base;
pub mod insert;
pub mod iterator;
pub mod remove;

pub use base::BTreeIndex;
pub use iterator::BTreeIterator;
