//! Page 0 catalog mapping index names to root page ids, so indexes can be
//! located again across restarts.
//!
//! Layout: `record_count (4)` followed by fixed-width records of
//! `name (32, NUL padded) | root_page_id (4)`.

use crate::common::{PageId, PAGE_SIZE};

const RECORD_COUNT_OFFSET: usize = 0;
const RECORDS_OFFSET: usize = 4;

const NAME_SIZE: usize = 32;
const RECORD_SIZE: usize = NAME_SIZE + 4;

pub const MAX_HEADER_RECORDS: usize = (PAGE_SIZE - RECORDS_OFFSET) / RECORD_SIZE;

fn record_offset(index: usize) -> usize {
    RECORDS_OFFSET + index * RECORD_SIZE
}

fn name_matches(stored: &[u8], name: &str) -> bool {
    let stored = match stored.iter().position(|&b| b == 0) {
        Some(end) => &stored[..end],
        None => stored,
    };
    stored == name.as_bytes()
}

/// Mutable view of the header page.
pub struct HeaderPage<'a> {
    data: &'a mut [u8],
}

impl<'a> HeaderPage<'a> {
    pub fn new(data: &'a mut [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn record_count(&self) -> usize {
        i32::from_le_bytes(
            self.data[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4]
                .try_into()
                .unwrap(),
        ) as usize
    }

    fn set_record_count(&mut self, count: usize) {
        self.data[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4]
            .copy_from_slice(&(count as i32).to_le_bytes());
    }

    fn find_index(&self, name: &str) -> Option<usize> {
        (0..self.record_count()).find(|&i| {
            let offset = record_offset(i);
            name_matches(&self.data[offset..offset + NAME_SIZE], name)
        })
    }

    pub fn find_record(&self, name: &str) -> Option<PageId> {
        self.find_index(name).map(|i| {
            let offset = record_offset(i) + NAME_SIZE;
            PageId::new(i32::from_le_bytes(
                self.data[offset..offset + 4].try_into().unwrap(),
            ))
        })
    }

    /// Registers a new index. Returns false if the name is already present,
    /// too long, or the page is full.
    pub fn insert_record(&mut self, name: &str, root_page_id: PageId) -> bool {
        if name.is_empty() || name.len() > NAME_SIZE {
            return false;
        }
        if self.find_index(name).is_some() {
            return false;
        }
        let count = self.record_count();
        if count >= MAX_HEADER_RECORDS {
            return false;
        }

        let offset = record_offset(count);
        self.data[offset..offset + NAME_SIZE].fill(0);
        self.data[offset..offset + name.len()].copy_from_slice(name.as_bytes());
        self.data[offset + NAME_SIZE..offset + RECORD_SIZE]
            .copy_from_slice(&root_page_id.as_i32().to_le_bytes());
        self.set_record_count(count + 1);
        true
    }

    /// Updates an existing record. Returns false if the name is unknown.
    pub fn update_record(&mut self, name: &str, root_page_id: PageId) -> bool {
        match self.find_index(name) {
            Some(i) => {
                let offset = record_offset(i) + NAME_SIZE;
                self.data[offset..offset + 4]
                    .copy_from_slice(&root_page_id.as_i32().to_le_bytes());
                true
            }
            None => false,
        }
    }
}

/// Read-only view of the header page.
pub struct HeaderPageRef<'a> {
    data: &'a [u8],
}

impl<'a> HeaderPageRef<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        assert_eq!(data.len(), PAGE_SIZE);
        Self { data }
    }

    pub fn record_count(&self) -> usize {
        i32::from_le_bytes(
            self.data[RECORD_COUNT_OFFSET..RECORD_COUNT_OFFSET + 4]
                .try_into()
                .unwrap(),
        ) as usize
    }

    pub fn find_record(&self, name: &str) -> Option<PageId> {
        (0..self.record_count()).find_map(|i| {
            let offset = record_offset(i);
            if name_matches(&self.data[offset..offset + NAME_SIZE], name) {
                let root = i32::from_le_bytes(
                    self.data[offset + NAME_SIZE..offset + RECORD_SIZE]
                        .try_into()
                        .unwrap(),
                );
                Some(PageId::new(root))
            } else {
                None
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::INVALID_PAGE_ID;

    #[test]
    fn test_header_page_insert_find() {
        let mut data = [0u8; PAGE_SIZE];
        let mut header = HeaderPage::new(&mut data);

        assert!(header.insert_record("orders_pk", PageId::new(3)));
        assert!(header.insert_record("users_pk", PageId::new(7)));
        assert_eq!(header.record_count(), 2);

        assert_eq!(header.find_record("orders_pk"), Some(PageId::new(3)));
        assert_eq!(header.find_record("users_pk"), Some(PageId::new(7)));
        assert_eq!(header.find_record("missing"), None);
    }

    #[test]
    fn test_header_page_duplicate_insert() {
        let mut data = [0u8; PAGE_SIZE];
        let mut header = HeaderPage::new(&mut data);

        assert!(header.insert_record("idx", PageId::new(1)));
        assert!(!header.insert_record("idx", PageId::new(2)));
        assert_eq!(header.find_record("idx"), Some(PageId::new(1)));
    }

    #[test]
    fn test_header_page_update() {
        let mut data = [0u8; PAGE_SIZE];
        let mut header = HeaderPage::new(&mut data);

        assert!(header.insert_record("idx", INVALID_PAGE_ID));
        assert!(header.update_record("idx", PageId::new(42)));
        assert!(!header.update_record("nope", PageId::new(1)));
        assert_eq!(header.find_record("idx"), Some(PageId::new(42)));
    }

    #[test]
    fn test_header_page_ref_view() {
        let mut data = [0u8; PAGE_SIZE];
        {
            let mut header = HeaderPage::new(&mut data);
            header.insert_record("idx", PageId::new(5));
        }

        let header = HeaderPageRef::new(&data);
        assert_eq!(header.record_count(), 1);
        assert_eq!(header.find_record("idx"), Some(PageId::new(5)));
    }

    #[test]
    fn test_header_page_name_limits() {
        let mut data = [0u8; PAGE_SIZE];
        let mut header = HeaderPage::new(&mut data);

        assert!(!header.insert_record("", PageId::new(1)));
        let long = "x".repeat(NAME_SIZE + 1);
        assert!(!header.insert_record(&long, PageId::new(1)));

        let exact = "y".repeat(NAME_SIZE);
        assert!(header.insert_record(&exact, PageId::new(9)));
        assert_eq!(header.find_record(&exact), Some(PageId::new(9)));
    }
}
