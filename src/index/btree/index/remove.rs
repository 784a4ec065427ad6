use crate::common::types::INVALID_PAGE_ID;
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::IndexKey;
use crate::index::btree::node::{BTreeNode, NodePayload};
use super::base::{AccessMode, BTreeIndex, WriteSet};

impl<K: IndexKey> BTreeIndex<K> {
    /// Delete the entry for `key`; silent if the key is absent.
    pub fn remove(&self, key: &K) -> Result<(), BTreeError> {
        let mut ctx = WriteSet::new();
        if !self.latch_root_write(&mut ctx)? {
            return Ok(());
        }

        let mut leaf = self.descend_to_leaf(key, &mut ctx, AccessMode::Remove)?;
        let removing_first = leaf.leaf_entry_at(0).is_some_and(|(first, _)| first == *key);
        if !leaf.leaf_remove(key) {
            ctx.release_pages(&self.bpm, false)?;
            return Ok(());
        }
        self.encode_back(&mut ctx, &leaf)?;

        // Refresh any retained ancestor separator equal to the removed
        // first key; rebalancing below keeps its own separators current.
        if removing_first {
            if let Some((new_first, _)) = leaf.leaf_entry_at(0) {
                self.refresh_separators(&mut ctx, key, &new_first)?;
            }
        }

        self.rebalance_up(&mut ctx, leaf)?;
        ctx.release_pages(&self.bpm, true)?;
        ctx.delete_pages(&self.bpm);
        Ok(())
    }

    /// Rewrite separators equal to the removed key in every internal page
    /// still latched on the path.
    fn refresh_separators(
        &self,
        ctx: &mut WriteSet,
        old_key: &K,
        new_key: &K,
    ) -> Result<(), BTreeError> {
        let leaf_id = ctx.back().map(|(page_id, _)| page_id);
        for (page_id, guard) in ctx.pages_mut() {
            if Some(page_id) == leaf_id {
                continue;
            }
            let mut node = BTreeNode::<K>::decode(guard)?;
            let NodePayload::Internal { entries } = &mut node.payload else {
                continue;
            };
            let mut changed = false;
            for entry in entries.iter_mut().skip(1) {
                if entry.0 == *old_key {
                    entry.0 = new_key.clone();
                    changed = true;
                }
            }
            if changed {
                node.encode(guard);
            }
        }
        Ok(())
    }

    /// Walk underfull nodes upward: redistribute from an adjacent sibling
    /// when the pair can cover two minimum nodes, otherwise coalesce into
    /// the left sibling and recurse into the parent.
    fn rebalance_up(&self, ctx: &mut WriteSet, mut cur: BTreeNode<K>) -> Result<(), BTreeError> {
        loop {
            if cur.parent_page_id == INVALID_PAGE_ID {
                // A leaf root may shrink to zero; an internal root left
                // with one child collapses into that child.
                if !cur.is_leaf() && cur.size() == 1 {
                    self.collapse_root(ctx, &cur)?;
                }
                return Ok(());
            }
            if cur.size() >= cur.min_size() {
                return Ok(());
            }

            let Some((cur_id, cur_guard)) = ctx.pop_back() else {
                return Err(BTreeError::TreeCorrupted("rebalance walked off the page set"));
            };
            drop(cur_guard);
            self.bpm.unpin_page(cur_id, true)?;

            let (_, parent_guard) = ctx
                .back()
                .ok_or(BTreeError::TreeCorrupted("underflow without a latched parent"))?;
            let mut parent = BTreeNode::<K>::decode(parent_guard)?;
            let cur_index = parent
                .child_index_of(cur_id)
                .ok_or(BTreeError::TreeCorrupted("node missing from its parent"))?;

            // Pair with the right sibling, unless this is the rightmost
            // child, in which case pair with the left.
            let pair_left = if cur_index + 1 == parent.size() {
                cur_index - 1
            } else {
                cur_index
            };
            let left_id = parent
                .child_at(pair_left)
                .ok_or(BTreeError::TreeCorrupted("sibling slot out of range"))?;
            let right_id = parent
                .child_at(pair_left + 1)
                .ok_or(BTreeError::TreeCorrupted("sibling slot out of range"))?;

            let left_ptr = self.bpm.fetch_page(left_id)?;
            let mut left_guard = left_ptr.write_arc();
            let right_ptr = self.bpm.fetch_page(right_id)?;
            let mut right_guard = right_ptr.write_arc();
            let mut left = BTreeNode::<K>::decode(&left_guard)?;
            let mut right = BTreeNode::<K>::decode(&right_guard)?;

            if left.size() + right.size() >= 2 * left.min_size() {
                self.redistribute(&mut parent, &mut left, &mut right, pair_left + 1)?;
                left.encode(&mut left_guard);
                right.encode(&mut right_guard);
                self.encode_back(ctx, &parent)?;
                drop(left_guard);
                self.bpm.unpin_page(left_id, true)?;
                drop(right_guard);
                self.bpm.unpin_page(right_id, true)?;
                return Ok(());
            }

            self.coalesce(&mut parent, &mut left, &mut right)?;
            parent.remove_child_at(pair_left + 1);
            left.encode(&mut left_guard);
            // The emptied right page stays decodable for a scan that
            // already followed the old sibling pointer.
            right.encode(&mut right_guard);
            self.encode_back(ctx, &parent)?;
            drop(left_guard);
            self.bpm.unpin_page(left_id, true)?;
            drop(right_guard);
            self.bpm.unpin_page(right_id, true)?;
            ctx.mark_deleted(right_id);

            cur = parent;
        }
    }

    /// Move one entry from the larger sibling to the smaller and refresh
    /// the parent's separator for the right sibling.
    fn redistribute(
        &self,
        parent: &mut BTreeNode<K>,
        left: &mut BTreeNode<K>,
        right: &mut BTreeNode<K>,
        right_index: usize,
    ) -> Result<(), BTreeError> {
        let left_id = left.page_id;
        let right_id = right.page_id;
        let separator = parent
            .key_at(right_index)
            .cloned()
            .ok_or(BTreeError::TreeCorrupted("separator slot out of range"))?;

        match (&mut left.payload, &mut right.payload) {
            (
                NodePayload::Leaf { entries: le, .. },
                NodePayload::Leaf { entries: re, .. },
            ) => {
                if le.len() < re.len() {
                    let entry = re.remove(0);
                    le.push(entry);
                    let new_sep = re
                        .first()
                        .map(|e| e.0.clone())
                        .ok_or(BTreeError::TreeCorrupted("redistribution emptied a leaf"))?;
                    parent.set_key_at(right_index, new_sep);
                } else {
                    let entry = le
                        .pop()
                        .ok_or(BTreeError::TreeCorrupted("redistribution from an empty leaf"))?;
                    parent.set_key_at(right_index, entry.0.clone());
                    re.insert(0, entry);
                }
            }
            (
                NodePayload::Internal { entries: le },
                NodePayload::Internal { entries: re },
            ) => {
                if le.len() < re.len() {
                    // rotate right's first child leftward through the
                    // parent separator
                    let (_, child_id) = re.remove(0);
                    le.push((separator, child_id));
                    let new_sep = re
                        .first()
                        .map(|e| e.0.clone())
                        .ok_or(BTreeError::TreeCorrupted("redistribution emptied a node"))?;
                    parent.set_key_at(right_index, new_sep);
                    self.set_parent(child_id, left_id)?;
                } else {
                    let (key, child_id) = le
                        .pop()
                        .ok_or(BTreeError::TreeCorrupted("redistribution from an empty node"))?;
                    // right's former slot-0 key becomes a live separator
                    if let Some(first) = re.first_mut() {
                        first.0 = separator;
                    }
                    re.insert(0, (key.clone(), child_id));
                    parent.set_key_at(right_index, key);
                    self.set_parent(child_id, right_id)?;
                }
            }
            _ => return Err(BTreeError::TreeCorrupted("sibling level mismatch")),
        }
        Ok(())
    }

    /// Fold the right sibling's entries into the left one. Leaves keep the
    /// sibling chain intact; internal nodes re-parent the moved children.
    fn coalesce(
        &self,
        parent: &mut BTreeNode<K>,
        left: &mut BTreeNode<K>,
        right: &mut BTreeNode<K>,
    ) -> Result<(), BTreeError> {
        let left_id = left.page_id;
        let right_index = parent
            .child_index_of(right.page_id)
            .ok_or(BTreeError::TreeCorrupted("sibling missing from its parent"))?;
        let separator = parent
            .key_at(right_index)
            .cloned()
            .ok_or(BTreeError::TreeCorrupted("separator slot out of range"))?;

        match (&mut left.payload, &mut right.payload) {
            (
                NodePayload::Leaf {
                    entries: le,
                    next_page_id: l_next,
                },
                NodePayload::Leaf {
                    entries: re,
                    next_page_id: r_next,
                },
            ) => {
                le.extend(re.drain(..));
                *l_next = *r_next;
            }
            (
                NodePayload::Internal { entries: le },
                NodePayload::Internal { entries: re },
            ) => {
                if let Some(first) = re.first_mut() {
                    first.0 = separator;
                }
                for &(_, child_id) in re.iter() {
                    self.set_parent(child_id, left_id)?;
                }
                le.extend(re.drain(..));
            }
            _ => return Err(BTreeError::TreeCorrupted("sibling level mismatch")),
        }
        Ok(())
    }

    /// Replace an internal root holding a single child by that child's
    /// contents; the root page id never changes here.
    fn collapse_root(&self, ctx: &mut WriteSet, cur: &BTreeNode<K>) -> Result<(), BTreeError> {
        let root_id = cur.page_id;
        let child_id = cur
            .child_at(0)
            .ok_or(BTreeError::TreeCorrupted("internal root without a child"))?;

        let child_ptr = self.bpm.fetch_page(child_id)?;
        let child_guard = child_ptr.write_arc();
        let mut new_root = BTreeNode::<K>::decode(&child_guard)?;
        new_root.page_id = root_id;
        new_root.parent_page_id = INVALID_PAGE_ID;

        if let NodePayload::Internal { entries } = &new_root.payload {
            for &(_, grandchild) in entries.iter() {
                self.set_parent(grandchild, root_id)?;
            }
        }

        self.encode_back(ctx, &new_root)?;
        drop(child_guard);
        self.bpm.unpin_page(child_id, false)?;
        ctx.mark_deleted(child_id);
        Ok(())
    }
}
