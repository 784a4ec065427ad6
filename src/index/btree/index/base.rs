use std::collections::VecDeque;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::common::types::{
    PageId, PageReadGuard, PageWriteGuard, Rid, HEADER_PAGE_ID, INVALID_PAGE_ID, PAGE_SIZE,
};
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::IndexKey;
use crate::index::btree::node::{BTreeNode, NODE_HEADER_SIZE};
use crate::storage::buffer::{BufferPoolError, BufferPoolManager};
use crate::storage::page::HeaderPage;

/// Whether a crabbing descent is headed for an insert or a remove; decides
/// when a child is safe enough to release the ancestor latches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum AccessMode {
    Insert,
    Remove,
}

/// The per-call page set used by latch crabbing on the write paths: pages
/// latched and pinned along the descent, oldest ancestor first, plus the
/// pages scheduled for deletion once every latch is dropped.
pub(crate) struct WriteSet {
    pages: VecDeque<(PageId, PageWriteGuard)>,
    deleted: Vec<PageId>,
}

impl WriteSet {
    pub(crate) fn new() -> Self {
        Self {
            pages: VecDeque::new(),
            deleted: Vec::new(),
        }
    }

    pub(crate) fn push(&mut self, page_id: PageId, guard: PageWriteGuard) {
        self.pages.push_back((page_id, guard));
    }

    pub(crate) fn back(&self) -> Option<(PageId, &PageWriteGuard)> {
        self.pages.back().map(|(id, guard)| (*id, guard))
    }

    pub(crate) fn back_mut(&mut self) -> Option<(PageId, &mut PageWriteGuard)> {
        self.pages.back_mut().map(|(id, guard)| (*id, guard))
    }

    pub(crate) fn pop_back(&mut self) -> Option<(PageId, PageWriteGuard)> {
        self.pages.pop_back()
    }

    pub(crate) fn pages_mut(
        &mut self,
    ) -> impl Iterator<Item = (PageId, &mut PageWriteGuard)> + '_ {
        self.pages.iter_mut().map(|(id, guard)| (*id, guard))
    }

    pub(crate) fn mark_deleted(&mut self, page_id: PageId) {
        self.deleted.push(page_id);
    }

    /// Unlatch and unpin every retained page, front to back. Each page in
    /// the set is released exactly once.
    pub(crate) fn release_pages(
        &mut self,
        bpm: &BufferPoolManager,
        is_dirty: bool,
    ) -> Result<(), BufferPoolError> {
        while let Some((page_id, guard)) = self.pages.pop_front() {
            drop(guard);
            bpm.unpin_page(page_id, is_dirty)?;
        }
        Ok(())
    }

    /// Drop scheduled page deletions into the buffer pool. A page that a
    /// lagging reader still pins is skipped rather than failed.
    pub(crate) fn delete_pages(&mut self, bpm: &BufferPoolManager) {
        for page_id in self.deleted.drain(..) {
            if let Err(e) = bpm.delete_page(page_id) {
                log::debug!("deferred delete of page {page_id} skipped: {e}");
            }
        }
    }
}

/// A persistent ordered index `K -> Rid` with unique keys, backed by the
/// buffer pool. Leaf and internal fanout are configured per tree.
pub struct BTreeIndex<K: IndexKey> {
    name: String,
    pub(crate) bpm: Arc<BufferPoolManager>,
    root_page_id: AtomicU32,
    /// Guards installation of a new root page id
    pub(crate) root_latch: Mutex<()>,
    pub(crate) leaf_max_size: usize,
    pub(crate) internal_max_size: usize,
    _phantom: PhantomData<K>,
}

impl<K: IndexKey> BTreeIndex<K> {
    /// Open (or register) the index `name` against the buffer pool. The
    /// root page id is loaded from the header page directory, so an index
    /// persisted earlier resumes where it left off.
    pub fn new(
        name: impl Into<String>,
        bpm: Arc<BufferPoolManager>,
        leaf_max_size: usize,
        internal_max_size: usize,
    ) -> Result<Self, BTreeError> {
        let name = name.into();
        if leaf_max_size < 2 || internal_max_size < 3 {
            return Err(BTreeError::NodeTooSmall(leaf_max_size.min(internal_max_size)));
        }
        // Nodes overflow to max_size + 1 entries before they split, so a
        // page must fit one extra record.
        if NODE_HEADER_SIZE + (leaf_max_size + 1) * (K::ENCODED_SIZE + 8) > PAGE_SIZE {
            return Err(BTreeError::NodeTooLarge(leaf_max_size));
        }
        if NODE_HEADER_SIZE + (internal_max_size + 1) * (K::ENCODED_SIZE + 4) > PAGE_SIZE {
            return Err(BTreeError::NodeTooLarge(internal_max_size));
        }

        let header_ptr = bpm.fetch_page(HEADER_PAGE_ID)?;
        let (root, registered) = {
            let mut page = header_ptr.write();
            match HeaderPage::find_record(&page, &name) {
                Some(root) => (root, false),
                None => {
                    if name.len() > 32 {
                        drop(page);
                        bpm.unpin_page(HEADER_PAGE_ID, false)?;
                        return Err(BTreeError::IndexNameTooLong);
                    }
                    if !HeaderPage::insert_record(&mut page, &name, INVALID_PAGE_ID) {
                        drop(page);
                        bpm.unpin_page(HEADER_PAGE_ID, false)?;
                        return Err(BTreeError::HeaderPageFull);
                    }
                    (INVALID_PAGE_ID, true)
                }
            }
        };
        bpm.unpin_page(HEADER_PAGE_ID, registered)?;

        Ok(Self {
            name,
            bpm,
            root_page_id: AtomicU32::new(root),
            root_latch: Mutex::new(()),
            leaf_max_size,
            internal_max_size,
            _phantom: PhantomData,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_empty(&self) -> bool {
        self.root_page_id() == INVALID_PAGE_ID
    }

    pub fn root_page_id(&self) -> PageId {
        self.root_page_id.load(Ordering::Acquire)
    }

    /// Install a new root page id and persist it in the header page
    /// directory. Callers hold the tree's root latch.
    pub(crate) fn set_root_page_id(&self, page_id: PageId) -> Result<(), BTreeError> {
        self.root_page_id.store(page_id, Ordering::Release);
        let header_ptr = self.bpm.fetch_page(HEADER_PAGE_ID)?;
        {
            let mut page = header_ptr.write();
            HeaderPage::update_record(&mut page, &self.name, page_id);
        }
        self.bpm.unpin_page(HEADER_PAGE_ID, true)?;
        Ok(())
    }

    /// Point lookup. The read path crabs down with read latches, holding
    /// at most parent and child at a time.
    pub fn get_value(&self, key: &K) -> Result<Option<Rid>, BTreeError> {
        let Some((mut page_id, mut guard)) = self.latch_root_read()? else {
            return Ok(None);
        };
        loop {
            let node = BTreeNode::<K>::decode(&guard)?;
            if node.is_leaf() {
                let result = node.leaf_lookup(key);
                drop(guard);
                self.bpm.unpin_page(page_id, false)?;
                return Ok(result);
            }
            let child_id = node
                .find_child(key)
                .ok_or(BTreeError::InvalidNodeType(page_id))?;
            let child_ptr = self.bpm.fetch_page(child_id)?;
            let child_guard = child_ptr.read_arc();
            drop(guard);
            self.bpm.unpin_page(page_id, false)?;
            page_id = child_id;
            guard = child_guard;
        }
    }

    /// Latch the root for reading, retrying when a root split swaps the
    /// root out between the unlatched lookup and the latch acquisition.
    pub(crate) fn latch_root_read(&self) -> Result<Option<(PageId, PageReadGuard)>, BTreeError> {
        loop {
            let root = self.root_page_id();
            if root == INVALID_PAGE_ID {
                return Ok(None);
            }
            let ptr = self.bpm.fetch_page(root)?;
            let guard = ptr.read_arc();
            if self.root_page_id() == root {
                return Ok(Some((root, guard)));
            }
            drop(guard);
            self.bpm.unpin_page(root, false)?;
        }
    }

    /// Latch the root for writing into the page set. Returns false when
    /// the tree is empty.
    pub(crate) fn latch_root_write(&self, ctx: &mut WriteSet) -> Result<bool, BTreeError> {
        loop {
            let root = self.root_page_id();
            if root == INVALID_PAGE_ID {
                return Ok(false);
            }
            let ptr = self.bpm.fetch_page(root)?;
            let guard = ptr.write_arc();
            if self.root_page_id() == root {
                ctx.push(root, guard);
                return Ok(true);
            }
            drop(guard);
            self.bpm.unpin_page(root, false)?;
        }
    }

    /// Crab from the latched root down to the leaf responsible for `key`,
    /// releasing all ancestors as soon as the newly latched child cannot
    /// split (insert) or merge (remove). A remove descent also retains
    /// the path below a node whose separator equals the key, so the
    /// separator can be refreshed after the leaf's first entry goes.
    pub(crate) fn descend_to_leaf(
        &self,
        key: &K,
        ctx: &mut WriteSet,
        mode: AccessMode,
    ) -> Result<BTreeNode<K>, BTreeError> {
        let mut pin_path = false;
        loop {
            let (page_id, guard) = ctx
                .back()
                .ok_or(BTreeError::TreeCorrupted("descent without a latched root"))?;
            let node = BTreeNode::<K>::decode(guard)?;
            if node.is_leaf() {
                return Ok(node);
            }
            let slot = node
                .find_child_slot(key)
                .ok_or(BTreeError::InvalidNodeType(page_id))?;
            let child_id = node
                .child_at(slot)
                .ok_or(BTreeError::InvalidNodeType(page_id))?;
            if mode == AccessMode::Remove && slot >= 1 && node.key_at(slot) == Some(key) {
                pin_path = true;
            }
            let child_ptr = self.bpm.fetch_page(child_id)?;
            let child_guard = child_ptr.write_arc();
            let child = BTreeNode::<K>::decode(&child_guard)?;
            let safe = match mode {
                AccessMode::Insert => child.size() < child.max_size,
                AccessMode::Remove => child.size() > child.min_size(),
            };
            if safe && !pin_path {
                ctx.release_pages(&self.bpm, false)?;
            }
            ctx.push(child_id, child_guard);
        }
    }
}
