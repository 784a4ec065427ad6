use std::collections::VecDeque;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::common::types::{FrameId, Page, PageId, PagePtr, INVALID_PAGE_ID};
use crate::storage::buffer::error::BufferPoolError;
use crate::storage::buffer::page_table::ExtendibleHashTable;
use crate::storage::buffer::replacer::LruKReplacer;
use crate::storage::disk::DiskManager;

const PAGE_TABLE_BUCKET_SIZE: usize = 8;

/// Buffer pool manager: caches fixed-size pages in a bounded set of
/// frames, pinning frames on behalf of callers and flushing dirty frames
/// back to disk.
///
/// All pool mutation is serialized by a single mutex over [`PoolState`];
/// the page data itself lives behind per-frame page latches that callers
/// acquire only while holding a pin, after the pool mutex is released.
pub struct BufferPoolManager {
    pool_size: usize,
    frames: Vec<PagePtr>,
    disk_manager: Arc<DiskManager>,
    state: Mutex<PoolState>,
}

struct PoolState {
    page_table: ExtendibleHashTable<PageId, FrameId>,
    replacer: LruKReplacer,
    free_list: VecDeque<FrameId>,
    next_page_id: PageId,
    metas: Vec<FrameMeta>,
}

/// Per-frame bookkeeping, guarded by the pool mutex
struct FrameMeta {
    page_id: PageId,
    pin_count: u32,
    is_dirty: bool,
}

impl FrameMeta {
    fn reset(&mut self) {
        self.page_id = INVALID_PAGE_ID;
        self.pin_count = 0;
        self.is_dirty = false;
    }
}

impl BufferPoolManager {
    pub fn new(pool_size: usize, replacer_k: usize, disk_manager: Arc<DiskManager>) -> Self {
        let mut frames = Vec::with_capacity(pool_size);
        let mut metas = Vec::with_capacity(pool_size);
        let mut free_list = VecDeque::with_capacity(pool_size);
        for frame_id in 0..pool_size {
            frames.push(Arc::new(RwLock::new(Page::new(INVALID_PAGE_ID))));
            metas.push(FrameMeta {
                page_id: INVALID_PAGE_ID,
                pin_count: 0,
                is_dirty: false,
            });
            free_list.push_back(frame_id);
        }

        Self {
            pool_size,
            frames,
            disk_manager,
            state: Mutex::new(PoolState {
                page_table: ExtendibleHashTable::new(PAGE_TABLE_BUCKET_SIZE),
                replacer: LruKReplacer::new(pool_size, replacer_k),
                free_list,
                // Page id 0 is reserved for the header page.
                next_page_id: 1,
                metas,
            }),
        }
    }

    pub fn pool_size(&self) -> usize {
        self.pool_size
    }

    /// Allocate a fresh page id, place it in a free or evicted frame and
    /// pin it. Fails with `NoEvictableFrame` iff every frame is pinned.
    pub fn new_page(&self) -> Result<(PagePtr, PageId), BufferPoolError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let frame_id = self.allocate_frame(state)?;
        let page_id = state.next_page_id;
        state.next_page_id += 1;

        state.page_table.insert(page_id, frame_id);
        state.replacer.record_access(frame_id);
        state.replacer.set_evictable(frame_id, false);

        let meta = &mut state.metas[frame_id];
        meta.page_id = page_id;
        meta.pin_count = 1;
        meta.is_dirty = false;

        {
            let mut page = self.frames[frame_id].write();
            page.data.fill(0);
            page.page_id = page_id;
        }

        Ok((self.frames[frame_id].clone(), page_id))
    }

    /// Return the frame holding `page_id`, loading it from disk if absent,
    /// and increment its pin count.
    pub fn fetch_page(&self, page_id: PageId) -> Result<PagePtr, BufferPoolError> {
        if page_id == INVALID_PAGE_ID {
            return Err(BufferPoolError::InvalidPageId(page_id));
        }
        let mut guard = self.state.lock();
        let state = &mut *guard;

        if let Some(frame_id) = state.page_table.find(&page_id) {
            state.metas[frame_id].pin_count += 1;
            state.replacer.record_access(frame_id);
            state.replacer.set_evictable(frame_id, false);
            return Ok(self.frames[frame_id].clone());
        }

        let frame_id = self.allocate_frame(state)?;
        state.page_table.insert(page_id, frame_id);
        state.replacer.record_access(frame_id);
        state.replacer.set_evictable(frame_id, false);

        let meta = &mut state.metas[frame_id];
        meta.page_id = page_id;
        meta.pin_count = 1;
        meta.is_dirty = false;

        {
            let mut page = self.frames[frame_id].write();
            self.disk_manager.read_page(page_id, &mut page.data)?;
            page.page_id = page_id;
        }

        Ok(self.frames[frame_id].clone())
    }

    /// Decrement the pin count, OR-merging `is_dirty` into the frame's
    /// dirty flag. A frame reaching pin count 0 becomes evictable.
    pub fn unpin_page(&self, page_id: PageId, is_dirty: bool) -> Result<(), BufferPoolError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let frame_id = state
            .page_table
            .find(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;
        let meta = &mut state.metas[frame_id];
        if meta.pin_count == 0 {
            return Err(BufferPoolError::PageNotPinned(page_id));
        }
        meta.pin_count -= 1;
        meta.is_dirty |= is_dirty;
        if meta.pin_count == 0 {
            state.replacer.set_evictable(frame_id, true);
        }
        Ok(())
    }

    /// Unconditionally write the page to disk and clear its dirty flag
    pub fn flush_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let frame_id = state
            .page_table
            .find(&page_id)
            .ok_or(BufferPoolError::PageNotFound(page_id))?;
        self.write_frame_to_disk(state, frame_id)?;
        Ok(())
    }

    /// Flush every page present in the pool, skipping empty frames
    pub fn flush_all_pages(&self) -> Result<(), BufferPoolError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        for frame_id in 0..self.pool_size {
            if state.metas[frame_id].page_id != INVALID_PAGE_ID {
                self.write_frame_to_disk(state, frame_id)?;
            }
        }
        Ok(())
    }

    /// Drop the page from the pool. Succeeds if the page is absent or
    /// present with pin count 0; fails iff the page is pinned.
    pub fn delete_page(&self, page_id: PageId) -> Result<(), BufferPoolError> {
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let Some(frame_id) = state.page_table.find(&page_id) else {
            return Ok(());
        };
        if state.metas[frame_id].pin_count > 0 {
            return Err(BufferPoolError::PagePinned(page_id));
        }

        state.page_table.remove(&page_id);
        state.replacer.remove(frame_id);
        state.metas[frame_id].reset();
        state.free_list.push_back(frame_id);
        // Page ids are monotone and never reused, so there is no disk-side
        // deallocation to perform.
        Ok(())
    }

    /// Pick a reusable frame: the free list first, then an eviction
    /// victim. A dirty victim is written back before reuse.
    fn allocate_frame(&self, state: &mut PoolState) -> Result<FrameId, BufferPoolError> {
        if let Some(frame_id) = state.free_list.pop_front() {
            return Ok(frame_id);
        }

        let frame_id = state
            .replacer
            .evict()
            .ok_or(BufferPoolError::NoEvictableFrame)?;
        let old_page_id = state.metas[frame_id].page_id;
        log::debug!("evicting page {old_page_id} from frame {frame_id}");
        if old_page_id != INVALID_PAGE_ID {
            state.page_table.remove(&old_page_id);
            if state.metas[frame_id].is_dirty {
                let page = self.frames[frame_id].read();
                self.disk_manager.write_page(old_page_id, &page.data)?;
            }
        }
        state.metas[frame_id].reset();
        Ok(frame_id)
    }

    fn write_frame_to_disk(
        &self,
        state: &mut PoolState,
        frame_id: FrameId,
    ) -> Result<(), BufferPoolError> {
        let page_id = state.metas[frame_id].page_id;
        {
            let page = self.frames[frame_id].read();
            self.disk_manager.write_page(page_id, &page.data)?;
        }
        state.metas[frame_id].is_dirty = false;
        Ok(())
    }
}
