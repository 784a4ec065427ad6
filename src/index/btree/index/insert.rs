use crate::common::types::{PageId, Rid, INVALID_PAGE_ID};
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::IndexKey;
use crate::index::btree::node::{BTreeNode, NodePayload};
use super::base::{AccessMode, BTreeIndex, WriteSet};

impl<K: IndexKey> BTreeIndex<K> {
    /// Insert a key-value pair. Returns false on a duplicate key.
    pub fn insert(&self, key: &K, rid: Rid) -> Result<bool, BTreeError> {
        let mut ctx = WriteSet::new();
        loop {
            if self.is_empty() {
                self.start_new_tree()?;
            }
            if self.latch_root_write(&mut ctx)? {
                break;
            }
        }

        let mut leaf = self.descend_to_leaf(key, &mut ctx, AccessMode::Insert)?;
        if !leaf.leaf_insert(key.clone(), rid) {
            ctx.release_pages(&self.bpm, false)?;
            return Ok(false);
        }

        let overflow = leaf.size() > leaf.max_size;
        self.encode_back(&mut ctx, &leaf)?;
        if overflow {
            self.split_up(&mut ctx, leaf)?;
        }
        ctx.release_pages(&self.bpm, true)?;
        Ok(true)
    }

    /// Create the first leaf root under the tree-level root latch, which
    /// is held only while the new root id is installed.
    fn start_new_tree(&self) -> Result<(), BTreeError> {
        let _root_install = self.root_latch.lock();
        if !self.is_empty() {
            return Ok(());
        }
        let (page_ptr, page_id) = self.bpm.new_page()?;
        {
            let mut page = page_ptr.write();
            BTreeNode::<K>::new_leaf(page_id, self.leaf_max_size).encode(&mut page);
        }
        self.bpm.unpin_page(page_id, true)?;
        self.set_root_page_id(page_id)?;
        Ok(())
    }

    /// Split overflowed nodes from the leaf upward through the ancestors
    /// retained by the descent, promoting each pivot into the parent. A
    /// root overflow installs a fresh root over both halves.
    fn split_up(&self, ctx: &mut WriteSet, mut cur: BTreeNode<K>) -> Result<(), BTreeError> {
        loop {
            if cur.size() <= cur.max_size {
                self.encode_back(ctx, &cur)?;
                return Ok(());
            }

            let (sibling_ptr, sibling_id) = self.bpm.new_page()?;
            let mut sibling_guard = sibling_ptr.write_arc();
            let (mut sibling, pivot) = cur.split(sibling_id);

            // children handed to a right internal sibling point back at it
            if let NodePayload::Internal { entries } = &sibling.payload {
                for &(_, child_id) in entries.iter() {
                    self.set_parent(child_id, sibling_id)?;
                }
            }

            if cur.parent_page_id == INVALID_PAGE_ID {
                let (root_ptr, root_id) = self.bpm.new_page()?;
                let mut root_guard = root_ptr.write_arc();
                let mut root = BTreeNode::<K>::new_internal(root_id, self.internal_max_size);
                root.insert_child(pivot.clone(), cur.page_id);
                root.insert_child(pivot, sibling_id);
                cur.parent_page_id = root_id;
                sibling.parent_page_id = root_id;

                self.encode_back(ctx, &cur)?;
                sibling.encode(&mut sibling_guard);
                root.encode(&mut root_guard);
                drop(sibling_guard);
                self.bpm.unpin_page(sibling_id, true)?;
                drop(root_guard);
                self.bpm.unpin_page(root_id, true)?;

                {
                    let _root_install = self.root_latch.lock();
                    self.set_root_page_id(root_id)?;
                }
                return Ok(());
            }

            self.encode_back(ctx, &cur)?;
            sibling.encode(&mut sibling_guard);
            drop(sibling_guard);
            self.bpm.unpin_page(sibling_id, true)?;

            let Some((cur_id, cur_guard)) = ctx.pop_back() else {
                return Err(BTreeError::TreeCorrupted("split walked off the page set"));
            };
            drop(cur_guard);
            self.bpm.unpin_page(cur_id, true)?;

            let (_, parent_guard) = ctx
                .back()
                .ok_or(BTreeError::TreeCorrupted("split reached an unlatched parent"))?;
            let mut parent = BTreeNode::<K>::decode(parent_guard)?;
            debug_assert!(parent.child_index_of(cur_id).is_some());
            parent.insert_child(pivot, sibling_id);
            cur = parent;
        }
    }

    /// Write a node image back into the page latched at the top of the set
    pub(crate) fn encode_back(
        &self,
        ctx: &mut WriteSet,
        node: &BTreeNode<K>,
    ) -> Result<(), BTreeError> {
        let Some((page_id, guard)) = ctx.back_mut() else {
            return Err(BTreeError::TreeCorrupted("page set lost the working page"));
        };
        debug_assert_eq!(page_id, node.page_id);
        node.encode(guard);
        Ok(())
    }

    /// Rewrite a child's parent pointer through a short page latch
    pub(crate) fn set_parent(
        &self,
        page_id: PageId,
        parent_page_id: PageId,
    ) -> Result<(), BTreeError> {
        let ptr = self.bpm.fetch_page(page_id)?;
        {
            let mut page = ptr.write();
            BTreeNode::<K>::set_parent_in_page(&mut page, parent_page_id);
        }
        self.bpm.unpin_page(page_id, true)?;
        Ok(())
    }
}
