use byteorder::{ByteOrder, LittleEndian};

use crate::common::types::{Page, PageId, PAGE_SIZE};

const RECORD_COUNT_SIZE: usize = 4;
const NAME_SIZE: usize = 32;
const RECORD_SIZE: usize = NAME_SIZE + 4;
const MAX_RECORDS: usize = (PAGE_SIZE - RECORD_COUNT_SIZE) / RECORD_SIZE;

/// View over the header page (page id 0), which stores the directory of
/// `index_name -> root_page_id` records.
///
/// Layout: a `u32` record count followed by fixed-width records of a
/// zero-padded 32-byte name and a `u32` root page id.
pub struct HeaderPage;

impl HeaderPage {
    pub fn record_count(page: &Page) -> usize {
        LittleEndian::read_u32(&page.data[0..RECORD_COUNT_SIZE]) as usize
    }

    /// Look up the root page id registered under `name`
    pub fn find_record(page: &Page, name: &str) -> Option<PageId> {
        Self::record_index(page, name)
            .map(|i| LittleEndian::read_u32(&page.data[Self::root_offset(i)..][..4]))
    }

    /// Register a new `name -> root_page_id` record. Returns false if the
    /// name is already present, too long, or the directory is full.
    pub fn insert_record(page: &mut Page, name: &str, root_page_id: PageId) -> bool {
        if name.len() > NAME_SIZE || Self::record_index(page, name).is_some() {
            return false;
        }
        let count = Self::record_count(page);
        if count >= MAX_RECORDS {
            return false;
        }
        let name_offset = Self::name_offset(count);
        page.data[name_offset..name_offset + NAME_SIZE].fill(0);
        page.data[name_offset..name_offset + name.len()].copy_from_slice(name.as_bytes());
        LittleEndian::write_u32(&mut page.data[Self::root_offset(count)..][..4], root_page_id);
        LittleEndian::write_u32(&mut page.data[0..RECORD_COUNT_SIZE], (count + 1) as u32);
        true
    }

    /// Update an existing record. Returns false if the name is absent.
    pub fn update_record(page: &mut Page, name: &str, root_page_id: PageId) -> bool {
        match Self::record_index(page, name) {
            Some(i) => {
                LittleEndian::write_u32(&mut page.data[Self::root_offset(i)..][..4], root_page_id);
                true
            }
            None => false,
        }
    }

    fn record_index(page: &Page, name: &str) -> Option<usize> {
        if name.len() > NAME_SIZE {
            return None;
        }
        let count = Self::record_count(page);
        (0..count.min(MAX_RECORDS)).find(|&i| {
            let offset = Self::name_offset(i);
            let stored = &page.data[offset..offset + NAME_SIZE];
            &stored[..name.len()] == name.as_bytes() && stored[name.len()..].iter().all(|&b| b == 0)
        })
    }

    fn name_offset(index: usize) -> usize {
        RECORD_COUNT_SIZE + index * RECORD_SIZE
    }

    fn root_offset(index: usize) -> usize {
        Self::name_offset(index) + NAME_SIZE
    }
}
