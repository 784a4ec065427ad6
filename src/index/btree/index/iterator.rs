use std::sync::Arc;

use crate::common::types::{PageId, PageReadGuard, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::IndexKey;
use crate::index::btree::node::BTreeNode;
use crate::storage::buffer::BufferPoolManager;
use super::base::BTreeIndex;

impl<K: IndexKey> BTreeIndex<K> {
    /// Iterate from the smallest key
    pub fn iter(&self) -> Result<BTreeIterator<K>, BTreeError> {
        let Some((mut page_id, mut guard)) = self.latch_root_read()? else {
            return Ok(BTreeIterator::end(self.bpm.clone()));
        };
        loop {
            let node = BTreeNode::<K>::decode(&guard)?;
            if node.is_leaf() {
                return BTreeIterator::positioned(self.bpm.clone(), page_id, guard, node, 0);
            }
            let child_id = node
                .child_at(0)
                .ok_or(BTreeError::InvalidNodeType(page_id))?;
            let child_ptr = self.bpm.fetch_page(child_id)?;
            let child_guard = child_ptr.read_arc();
            drop(guard);
            self.bpm.unpin_page(page_id, false)?;
            page_id = child_id;
            guard = child_guard;
        }
    }

    /// Iterate from the first entry whose key is >= `key`
    pub fn iter_from(&self, key: &K) -> Result<BTreeIterator<K>, BTreeError> {
        let Some((mut page_id, mut guard)) = self.latch_root_read()? else {
            return Ok(BTreeIterator::end(self.bpm.clone()));
        };
        loop {
            let node = BTreeNode::<K>::decode(&guard)?;
            if node.is_leaf() {
                let index = node.leaf_first_geq(key);
                return BTreeIterator::positioned(self.bpm.clone(), page_id, guard, node, index);
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
}

struct LeafPosition<K> {
    page_id: PageId,
    guard: PageReadGuard,
    node: BTreeNode<K>,
    index: usize,
}

/// Forward scan over the leaf chain. Holds the read latch and pin on the
/// current leaf; advancing latches the next sibling before releasing the
/// current one. The end state holds nothing.
pub struct BTreeIterator<K: IndexKey> {
    bpm: Arc<BufferPoolManager>,
    position: Option<LeafPosition<K>>,
}

impl<K: IndexKey> BTreeIterator<K> {
    fn end(bpm: Arc<BufferPoolManager>) -> Self {
        Self {
            bpm,
            position: None,
        }
    }

    fn positioned(
        bpm: Arc<BufferPoolManager>,
        page_id: PageId,
        guard: PageReadGuard,
        node: BTreeNode<K>,
        index: usize,
    ) -> Result<Self, BTreeError> {
        let mut iterator = Self {
            bpm,
            position: Some(LeafPosition {
                page_id,
                guard,
                node,
                index,
            }),
        };
        iterator.skip_exhausted()?;
        Ok(iterator)
    }

    /// Move past leaves with no remaining entries (including leaves
    /// emptied by a concurrent coalesce).
    fn skip_exhausted(&mut self) -> Result<(), BTreeError> {
        loop {
            let positioned = match &self.position {
                None => true,
                Some(position) => position.index < position.node.size(),
            };
            if positioned {
                return Ok(());
            }
            self.advance_leaf()?;
        }
    }

    /// Latch-couple onto the next sibling leaf, or reach the end state
    fn advance_leaf(&mut self) -> Result<(), BTreeError> {
        let Some(position) = self.position.take() else {
            return Ok(());
        };
        let LeafPosition {
            page_id,
            guard,
            node,
            ..
        } = position;
        let next_id = node.next_page_id();
        if next_id == INVALID_PAGE_ID {
            drop(guard);
            self.bpm.unpin_page(page_id, false)?;
            return Ok(());
        }
        let next_ptr = match self.bpm.fetch_page(next_id) {
            Ok(ptr) => ptr,
            Err(e) => {
                drop(guard);
                let _ = self.bpm.unpin_page(page_id, false);
                return Err(e.into());
            }
        };
        let next_guard = next_ptr.read_arc();
        drop(guard);
        self.bpm.unpin_page(page_id, false)?;
        let next_node = BTreeNode::<K>::decode(&next_guard)?;
        self.position = Some(LeafPosition {
            page_id: next_id,
            guard: next_guard,
            node: next_node,
            index: 0,
        });
        Ok(())
    }
}

impl<K: IndexKey> Iterator for BTreeIterator<K> {
    type Item = Result<(K, Rid), BTreeError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            let needs_advance = {
                let position = self.position.as_ref()?;
                position.index >= position.node.size()
            };
            if needs_advance {
                if let Err(e) = self.advance_leaf() {
                    return Some(Err(e));
                }
                continue;
            }
            let position = self.position.as_mut()?;
            let entry = position.node.leaf_entry_at(position.index);
            position.index += 1;
            return entry.map(Ok);
        }
    }
}

impl<K: IndexKey> Drop for BTreeIterator<K> {
    fn drop(&mut self) {
        if let Some(position) = self.position.take() {
            let page_id = position.page_id;
            drop(position.guard);
            if let Err(e) = self.bpm.unpin_page(page_id, false) {
                log::debug!("iterator unpin of page {page_id} failed: {e}");
            }
        }
    }
}
