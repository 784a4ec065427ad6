use thiserror::Error;

use crate::common::types::PageId;
use crate::storage::buffer::BufferPoolError;

#[derive(Error, Debug)]
pub enum BTreeError {
    #[error("Index name longer than the header page record field")]
    IndexNameTooLong,

    #[error("Node capacity {0} does not fit a page")]
    NodeTooLarge(usize),

    #[error("Node capacity {0} is below the minimum fanout")]
    NodeTooSmall(usize),

    #[error("Page {0} holds an unexpected node type")]
    InvalidNodeType(PageId),

    #[error("Header page directory is full")]
    HeaderPageFull,

    #[error("Tree structure invariant violated: {0}")]
    TreeCorrupted(&'static str),

    #[error("Buffer pool error: {0}")]
    BufferPoolError(#[from] BufferPoolError),
}
