use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Lsn, Page, PageId, Rid, INVALID_PAGE_ID, PAGE_SIZE};
use crate::index::btree::error::BTreeError;
use crate::index::btree::key::IndexKey;

/// On-page node header:
/// `page_type | lsn | size | max_size | parent_page_id | page_id | next_page_id`,
/// seven little-endian u32 fields. `next_page_id` is unused on internal
/// pages. The header is followed by `size` fixed-width records: `(key, rid)`
/// on leaves and `(key, child_page_id)` on internal pages, where the key in
/// slot 0 of an internal page is present but carries no meaning.
pub const NODE_HEADER_SIZE: usize = 28;

const PAGE_TYPE_LEAF: u32 = 1;
const PAGE_TYPE_INTERNAL: u32 = 2;

const LSN_OFFSET: usize = 4;
const SIZE_OFFSET: usize = 8;
const MAX_SIZE_OFFSET: usize = 12;
const PARENT_OFFSET: usize = 16;
const PAGE_ID_OFFSET: usize = 20;
const NEXT_PAGE_ID_OFFSET: usize = 24;

/// Variant payload of a tree page, discriminated by the on-page type tag
pub enum NodePayload<K> {
    Leaf {
        entries: Vec<(K, Rid)>,
        next_page_id: PageId,
    },
    Internal {
        entries: Vec<(K, PageId)>,
    },
}

/// Decoded image of one B+tree page
pub struct BTreeNode<K> {
    pub lsn: Lsn,
    pub max_size: usize,
    pub parent_page_id: PageId,
    pub page_id: PageId,
    pub payload: NodePayload<K>,
}

impl<K: IndexKey> BTreeNode<K> {
    pub fn new_leaf(page_id: PageId, max_size: usize) -> Self {
        Self {
            lsn: 0,
            max_size,
            parent_page_id: INVALID_PAGE_ID,
            page_id,
            payload: NodePayload::Leaf {
                entries: Vec::new(),
                next_page_id: INVALID_PAGE_ID,
            },
        }
    }

    pub fn new_internal(page_id: PageId, max_size: usize) -> Self {
        Self {
            lsn: 0,
            max_size,
            parent_page_id: INVALID_PAGE_ID,
            page_id,
            payload: NodePayload::Internal {
                entries: Vec::new(),
            },
        }
    }

    pub fn is_leaf(&self) -> bool {
        matches!(self.payload, NodePayload::Leaf { .. })
    }

    /// Number of entries on a leaf, number of children on an internal node
    pub fn size(&self) -> usize {
        match &self.payload {
            NodePayload::Leaf { entries, .. } => entries.len(),
            NodePayload::Internal { entries } => entries.len(),
        }
    }

    pub fn min_size(&self) -> usize {
        (self.max_size + 1) / 2
    }

    pub fn next_page_id(&self) -> PageId {
        match &self.payload {
            NodePayload::Leaf { next_page_id, .. } => *next_page_id,
            NodePayload::Internal { .. } => INVALID_PAGE_ID,
        }
    }

    pub fn decode(page: &Page) -> Result<Self, BTreeError> {
        let data = &page.data;
        let page_type = LittleEndian::read_u32(&data[0..4]);
        let lsn = LittleEndian::read_u32(&data[LSN_OFFSET..][..4]);
        let size = LittleEndian::read_u32(&data[SIZE_OFFSET..][..4]) as usize;
        let max_size = LittleEndian::read_u32(&data[MAX_SIZE_OFFSET..][..4]) as usize;
        let parent_page_id = LittleEndian::read_u32(&data[PARENT_OFFSET..][..4]);
        let page_id = LittleEndian::read_u32(&data[PAGE_ID_OFFSET..][..4]);
        let next_page_id = LittleEndian::read_u32(&data[NEXT_PAGE_ID_OFFSET..][..4]);

        let payload = match page_type {
            PAGE_TYPE_LEAF => {
                let record_size = K::ENCODED_SIZE + 8;
                if NODE_HEADER_SIZE + size * record_size > PAGE_SIZE {
                    return Err(BTreeError::InvalidNodeType(page.page_id));
                }
                let mut entries = Vec::with_capacity(size);
                for i in 0..size {
                    let offset = NODE_HEADER_SIZE + i * record_size;
                    let key = K::decode_from(&data[offset..offset + K::ENCODED_SIZE]);
                    let rid_offset = offset + K::ENCODED_SIZE;
                    let rid = Rid::new(
                        LittleEndian::read_u32(&data[rid_offset..][..4]),
                        LittleEndian::read_u32(&data[rid_offset + 4..][..4]),
                    );
                    entries.push((key, rid));
                }
                NodePayload::Leaf {
                    entries,
                    next_page_id,
                }
            }
            PAGE_TYPE_INTERNAL => {
                let record_size = K::ENCODED_SIZE + 4;
                if NODE_HEADER_SIZE + size * record_size > PAGE_SIZE {
                    return Err(BTreeError::InvalidNodeType(page.page_id));
                }
                let mut entries = Vec::with_capacity(size);
                for i in 0..size {
                    let offset = NODE_HEADER_SIZE + i * record_size;
                    let key = K::decode_from(&data[offset..offset + K::ENCODED_SIZE]);
                    let child =
                        LittleEndian::read_u32(&data[offset + K::ENCODED_SIZE..][..4]);
                    entries.push((key, child));
                }
                NodePayload::Internal { entries }
            }
            _ => return Err(BTreeError::InvalidNodeType(page.page_id)),
        };

        Ok(Self {
            lsn,
            max_size,
            parent_page_id,
            page_id,
            payload,
        })
    }

    pub fn encode(&self, page: &mut Page) {
        let data = &mut page.data;
        let (page_type, next_page_id) = match &self.payload {
            NodePayload::Leaf { next_page_id, .. } => (PAGE_TYPE_LEAF, *next_page_id),
            NodePayload::Internal { .. } => (PAGE_TYPE_INTERNAL, INVALID_PAGE_ID),
        };
        LittleEndian::write_u32(&mut data[0..4], page_type);
        LittleEndian::write_u32(&mut data[LSN_OFFSET..][..4], self.lsn);
        LittleEndian::write_u32(&mut data[SIZE_OFFSET..][..4], self.size() as u32);
        LittleEndian::write_u32(&mut data[MAX_SIZE_OFFSET..][..4], self.max_size as u32);
        LittleEndian::write_u32(&mut data[PARENT_OFFSET..][..4], self.parent_page_id);
        LittleEndian::write_u32(&mut data[PAGE_ID_OFFSET..][..4], self.page_id);
        LittleEndian::write_u32(&mut data[NEXT_PAGE_ID_OFFSET..][..4], next_page_id);

        match &self.payload {
            NodePayload::Leaf { entries, .. } => {
                let record_size = K::ENCODED_SIZE + 8;
                debug_assert!(NODE_HEADER_SIZE + entries.len() * record_size <= PAGE_SIZE);
                for (i, (key, rid)) in entries.iter().enumerate() {
                    let offset = NODE_HEADER_SIZE + i * record_size;
                    key.encode_into(&mut data[offset..offset + K::ENCODED_SIZE]);
                    let rid_offset = offset + K::ENCODED_SIZE;
                    LittleEndian::write_u32(&mut data[rid_offset..][..4], rid.page_id);
                    LittleEndian::write_u32(&mut data[rid_offset + 4..][..4], rid.slot_num);
                }
            }
            NodePayload::Internal { entries } => {
                let record_size = K::ENCODED_SIZE + 4;
                debug_assert!(NODE_HEADER_SIZE + entries.len() * record_size <= PAGE_SIZE);
                for (i, (key, child)) in entries.iter().enumerate() {
                    let offset = NODE_HEADER_SIZE + i * record_size;
                    key.encode_into(&mut data[offset..offset + K::ENCODED_SIZE]);
                    LittleEndian::write_u32(&mut data[offset + K::ENCODED_SIZE..][..4], *child);
                }
            }
        }
    }

    /// Rewrite only the parent pointer in a page's header, for bulk parent
    /// fix-ups that do not need a full decode.
    pub fn set_parent_in_page(page: &mut Page, parent_page_id: PageId) {
        LittleEndian::write_u32(&mut page.data[PARENT_OFFSET..][..4], parent_page_id);
    }

    // ---- leaf operations ----

    pub fn leaf_lookup(&self, key: &K) -> Option<Rid> {
        match &self.payload {
            NodePayload::Leaf { entries, .. } => entries
                .binary_search_by(|e| e.0.cmp(key))
                .ok()
                .map(|i| entries[i].1),
            NodePayload::Internal { .. } => None,
        }
    }

    pub fn leaf_entry_at(&self, index: usize) -> Option<(K, Rid)> {
        match &self.payload {
            NodePayload::Leaf { entries, .. } => entries.get(index).cloned(),
            NodePayload::Internal { .. } => None,
        }
    }

    /// Index of the first leaf entry with key >= `key`
    pub fn leaf_first_geq(&self, key: &K) -> usize {
        match &self.payload {
            NodePayload::Leaf { entries, .. } => entries.partition_point(|e| e.0 < *key),
            NodePayload::Internal { .. } => 0,
        }
    }

    /// Sorted insert; returns false on a duplicate key
    pub fn leaf_insert(&mut self, key: K, rid: Rid) -> bool {
        let NodePayload::Leaf { entries, .. } = &mut self.payload else {
            return false;
        };
        match entries.binary_search_by(|e| e.0.cmp(&key)) {
            Ok(_) => false,
            Err(pos) => {
                entries.insert(pos, (key, rid));
                true
            }
        }
    }

    /// Returns false if the key was absent
    pub fn leaf_remove(&mut self, key: &K) -> bool {
        let NodePayload::Leaf { entries, .. } = &mut self.payload else {
            return false;
        };
        match entries.binary_search_by(|e| e.0.cmp(key)) {
            Ok(pos) => {
                entries.remove(pos);
                true
            }
            Err(_) => false,
        }
    }

    // ---- internal operations ----

    /// The rightmost child whose separator key is <= `key`, or child 0 if
    /// `key` sorts below every separator. Separators live in slots 1..
    pub fn find_child(&self, key: &K) -> Option<PageId> {
        let NodePayload::Internal { entries } = &self.payload else {
            return None;
        };
        if entries.is_empty() {
            return None;
        }
        let idx = entries[1..].partition_point(|e| e.0 <= *key);
        Some(entries[idx].1)
    }

    /// Slot index of the child `find_child` would descend into
    pub fn find_child_slot(&self, key: &K) -> Option<usize> {
        let NodePayload::Internal { entries } = &self.payload else {
            return None;
        };
        if entries.is_empty() {
            return None;
        }
        Some(entries[1..].partition_point(|e| e.0 <= *key))
    }

    pub fn child_index_of(&self, child: PageId) -> Option<usize> {
        let NodePayload::Internal { entries } = &self.payload else {
            return None;
        };
        entries.iter().position(|e| e.1 == child)
    }

    pub fn child_at(&self, index: usize) -> Option<PageId> {
        let NodePayload::Internal { entries } = &self.payload else {
            return None;
        };
        entries.get(index).map(|e| e.1)
    }

    pub fn key_at(&self, index: usize) -> Option<&K> {
        let NodePayload::Internal { entries } = &self.payload else {
            return None;
        };
        entries.get(index).map(|e| &e.0)
    }

    pub fn set_key_at(&mut self, index: usize, key: K) {
        if let NodePayload::Internal { entries } = &mut self.payload {
            if let Some(entry) = entries.get_mut(index) {
                entry.0 = key;
            }
        }
    }

    /// Insert a `(separator, child)` entry at its key position (slot >= 1)
    pub fn insert_child(&mut self, key: K, child: PageId) {
        if let NodePayload::Internal { entries } = &mut self.payload {
            if entries.is_empty() {
                entries.push((key, child));
                return;
            }
            let pos = 1 + entries[1..].partition_point(|e| e.0 < key);
            entries.insert(pos, (key, child));
        }
    }

    pub fn remove_child_at(&mut self, index: usize) {
        if let NodePayload::Internal { entries } = &mut self.payload {
            if index < entries.len() {
                entries.remove(index);
            }
        }
    }

    // ---- split ----

    /// Move the upper entries `[min_size, size)` into a fresh right
    /// sibling and return it with the pivot key to push up. A leaf split
    /// links the sibling into the leaf chain.
    pub fn split(&mut self, sibling_page_id: PageId) -> (Self, K) {
        let split_at = self.min_size();
        let lsn = self.lsn;
        let max_size = self.max_size;
        let parent_page_id = self.parent_page_id;
        match &mut self.payload {
            NodePayload::Leaf {
                entries,
                next_page_id,
            } => {
                let right = entries.split_off(split_at);
                let pivot = right[0].0.clone();
                let sibling = Self {
                    lsn,
                    max_size,
                    parent_page_id,
                    page_id: sibling_page_id,
                    payload: NodePayload::Leaf {
                        entries: right,
                        next_page_id: *next_page_id,
                    },
                };
                *next_page_id = sibling_page_id;
                (sibling, pivot)
            }
            NodePayload::Internal { entries } => {
                let right = entries.split_off(split_at);
                // The pivot stays in the sibling's slot 0, where it is
                // unused as a separator.
                let pivot = right[0].0.clone();
                let sibling = Self {
                    lsn,
                    max_size,
                    parent_page_id,
                    page_id: sibling_page_id,
                    payload: NodePayload::Internal { entries: right },
                };
                (sibling, pivot)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_leaf_header_layout() {
        let mut node = BTreeNode::<i32>::new_leaf(9, 4);
        node.parent_page_id = 3;
        assert!(node.leaf_insert(10, Rid::new(1, 0)));
        assert!(node.leaf_insert(20, Rid::new(1, 1)));
        if let NodePayload::Leaf { next_page_id, .. } = &mut node.payload {
            *next_page_id = 11;
        }

        let mut page = Page::new(9);
        node.encode(&mut page);

        assert_eq!(LittleEndian::read_u32(&page.data[0..4]), PAGE_TYPE_LEAF);
        assert_eq!(LittleEndian::read_u32(&page.data[8..12]), 2); // size
        assert_eq!(LittleEndian::read_u32(&page.data[12..16]), 4); // max_size
        assert_eq!(LittleEndian::read_u32(&page.data[16..20]), 3); // parent
        assert_eq!(LittleEndian::read_u32(&page.data[20..24]), 9); // page id
        assert_eq!(LittleEndian::read_u32(&page.data[24..28]), 11); // next
        // first record sits right after the header: key then rid
        assert_eq!(LittleEndian::read_i32(&page.data[28..32]), 10);
        assert_eq!(LittleEndian::read_u32(&page.data[32..36]), 1);
        assert_eq!(LittleEndian::read_u32(&page.data[36..40]), 0);

        let decoded = BTreeNode::<i32>::decode(&page).unwrap();
        assert!(decoded.is_leaf());
        assert_eq!(decoded.size(), 2);
        assert_eq!(decoded.leaf_lookup(&20), Some(Rid::new(1, 1)));
        assert_eq!(decoded.next_page_id(), 11);
    }

    #[test]
    fn test_internal_child_routing() {
        let mut node = BTreeNode::<i32>::new_internal(5, 4);
        // slot 0 key is unused; children cover (-inf,10) [10,20) [20,inf)
        node.insert_child(0, 100);
        node.insert_child(10, 101);
        node.insert_child(20, 102);

        assert_eq!(node.find_child(&5), Some(100));
        assert_eq!(node.find_child(&10), Some(101));
        assert_eq!(node.find_child(&19), Some(101));
        assert_eq!(node.find_child(&25), Some(102));
        assert_eq!(node.child_index_of(102), Some(2));

        let mut page = Page::new(5);
        node.encode(&mut page);
        let decoded = BTreeNode::<i32>::decode(&page).unwrap();
        assert!(!decoded.is_leaf());
        assert_eq!(decoded.find_child(&10), Some(101));
    }

    #[test]
    fn test_leaf_split_links_sibling() {
        let mut node = BTreeNode::<i32>::new_leaf(1, 4);
        for k in 1..=5 {
            assert!(node.leaf_insert(k, Rid::new(0, k as u32)));
        }
        let (sibling, pivot) = node.split(2);
        assert_eq!(pivot, 3);
        assert_eq!(node.size(), 2);
        assert_eq!(sibling.size(), 3);
        assert_eq!(node.next_page_id(), 2);
        assert_eq!(sibling.next_page_id(), INVALID_PAGE_ID);
    }

    #[test]
    fn test_duplicate_leaf_insert_rejected() {
        let mut node = BTreeNode::<i32>::new_leaf(1, 4);
        assert!(node.leaf_insert(7, Rid::new(0, 1)));
        assert!(!node.leaf_insert(7, Rid::new(0, 2)));
        assert_eq!(node.leaf_lookup(&7), Some(Rid::new(0, 1)));
    }
}
