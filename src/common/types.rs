use std::sync::Arc;

use parking_lot::lock_api::{ArcRwLockReadGuard, ArcRwLockWriteGuard};
use parking_lot::{RawRwLock, RwLock};

/// Page size in bytes (4KB)
pub const PAGE_SIZE: usize = 4096;

/// Page ID type
pub type PageId = u32;

/// Sentinel for "no page"
pub const INVALID_PAGE_ID: PageId = u32::MAX;

/// Page id 0 holds the index directory (index name -> root page id)
pub const HEADER_PAGE_ID: PageId = 0;

/// Transaction ID type
pub type TxnId = u32;

/// Table object ID type
pub type TableOid = u32;

/// Buffer pool frame ID type
pub type FrameId = usize;

/// LSN (Log Sequence Number) type
pub type Lsn = u32;

/// Record ID: location of a tuple on a heap page
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct Rid {
    pub page_id: PageId,
    pub slot_num: u32,
}

impl Rid {
    pub fn new(page_id: PageId, slot_num: u32) -> Self {
        Self { page_id, slot_num }
    }
}

impl std::fmt::Display for Rid {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.page_id, self.slot_num)
    }
}

/// Page structure: a fixed-size byte buffer plus its identity.
///
/// The surrounding `RwLock` in [`PagePtr`] is the page's own read-write
/// latch; pin count and dirty flag are frame metadata owned by the buffer
/// pool manager.
#[derive(Clone)]
pub struct Page {
    pub data: [u8; PAGE_SIZE],
    pub page_id: PageId,
}

impl Page {
    pub fn new(page_id: PageId) -> Self {
        Self {
            data: [0; PAGE_SIZE],
            page_id,
        }
    }
}

/// Smart pointer to a latched page
pub type PagePtr = Arc<RwLock<Page>>;

/// Owned read guard on a page latch, usable across stack frames
pub type PageReadGuard = ArcRwLockReadGuard<RawRwLock, Page>;

/// Owned write guard on a page latch, usable across stack frames
pub type PageWriteGuard = ArcRwLockWriteGuard<RawRwLock, Page>;
