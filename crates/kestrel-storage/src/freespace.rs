//! Hidden header page: page I/O counters and the free space map.
//!
//! Every paged file starts with one hidden header page. Record files keep
//! one 16-bit free-space entry per data page after the counters so that
//! inserts can find a page with room without reading every page.
//!
//! Header page layout:
//! ```text
//! +----------------------+ 0
//! | read counter   (u32) |
//! | write counter  (u32) |
//! | append counter (u32) |
//! | data pages     (u32) |
//! +----------------------+ 16
//! | free bytes     (u16) |  one entry per data page
//! | ...                  |
//! +----------------------+ 4096
//! ```

use kestrel_common::page::{get_u16, get_u32, put_u16, put_u32, PageBuf, PageNum, PAGE_SIZE};
use kestrel_common::{KestrelError, Result};

/// Bytes occupied by the counters and data-page count.
pub const HEADER_FIXED_SIZE: usize = 16;

/// Number of data pages whose free space one header page can track.
pub const MAX_DATA_PAGES: usize = (PAGE_SIZE - HEADER_FIXED_SIZE) / 2;

/// Page I/O counters persisted in the header page.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PageCounters {
    pub read: u32,
    pub write: u32,
    pub append: u32,
}

/// Free bytes per data page, indexed by page number.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FreeSpaceMap {
    entries: Vec<u16>,
}

impl FreeSpaceMap {
    /// Creates an empty map.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of tracked pages.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if no pages are tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Tracks one more page, initially recorded as full.
    ///
    /// Fails with `FileFull` once the header page has no room for the entry.
    pub fn push_full(&mut self) -> Result<PageNum> {
        self.check_room()?;
        self.entries.push(0);
        Ok((self.entries.len() - 1) as PageNum)
    }

    /// Fails with `FileFull` if one more page cannot be tracked.
    pub fn check_room(&self) -> Result<()> {
        if self.entries.len() >= MAX_DATA_PAGES {
            return Err(KestrelError::FileFull {
                max_pages: MAX_DATA_PAGES,
            });
        }
        Ok(())
    }

    /// Returns the recorded free bytes of a page.
    pub fn get(&self, page_num: PageNum) -> Option<u16> {
        self.entries.get(page_num as usize).copied()
    }

    /// Records the free bytes of a page.
    pub fn set(&mut self, page_num: PageNum, free_bytes: u16) -> Result<()> {
        let entry = self
            .entries
            .get_mut(page_num as usize)
            .ok_or(KestrelError::PageNotFound { page_num })?;
        *entry = free_bytes;
        Ok(())
    }

    /// Scans from the last page backward and returns the first page whose
    /// recorded free space strictly exceeds `bytes_needed`.
    ///
    /// Recently appended pages are preferred. This is not a best-fit search.
    pub fn find_page_with(&self, bytes_needed: usize) -> Option<PageNum> {
        self.entries
            .iter()
            .rposition(|&free| free as usize > bytes_needed)
            .map(|i| i as PageNum)
    }
}

/// Decoded contents of a file's header page.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileHeader {
    pub counters: PageCounters,
    pub space_map: FreeSpaceMap,
}

impl FileHeader {
    /// Creates the header of a freshly created file.
    ///
    /// The append counter starts past the hidden pages, which count as appended.
    pub fn new(hidden_pages: u32) -> Self {
        Self {
            counters: PageCounters {
                append: hidden_pages,
                ..Default::default()
            },
            space_map: FreeSpaceMap::new(),
        }
    }

    /// Serializes to a header page image.
    pub fn to_page(&self) -> PageBuf {
        let mut buf = [0u8; PAGE_SIZE];
        put_u32(&mut buf, 0, self.counters.read);
        put_u32(&mut buf, 4, self.counters.write);
        put_u32(&mut buf, 8, self.counters.append);
        put_u32(&mut buf, 12, self.space_map.len() as u32);
        for (i, &free) in self.space_map.entries.iter().enumerate() {
            put_u16(&mut buf, HEADER_FIXED_SIZE + i * 2, free);
        }
        buf
    }

    /// Deserializes from a header page image.
    pub fn from_page(buf: &PageBuf) -> Result<Self> {
        let counters = PageCounters {
            read: get_u32(buf, 0),
            write: get_u32(buf, 4),
            append: get_u32(buf, 8),
        };
        let count = get_u32(buf, 12) as usize;
        if count > MAX_DATA_PAGES {
            return Err(KestrelError::PageCorrupted {
                page_num: 0,
                reason: format!("header tracks {} pages, max {}", count, MAX_DATA_PAGES),
            });
        }
        let entries = (0..count)
            .map(|i| get_u16(buf, HEADER_FIXED_SIZE + i * 2))
            .collect();
        Ok(Self {
            counters,
            space_map: FreeSpaceMap { entries },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_max_data_pages() {
        assert_eq!(MAX_DATA_PAGES, 2040);
    }

    #[test]
    fn test_new_header_counts_hidden_pages() {
        let header = FileHeader::new(1);
        assert_eq!(
            header.counters,
            PageCounters {
                read: 0,
                write: 0,
                append: 1
            }
        );
        assert!(header.space_map.is_empty());
    }

    #[test]
    fn test_header_roundtrip() {
        let mut header = FileHeader::new(1);
        header.counters.read = 17;
        header.counters.write = 9;
        for free in [100u16, 4000, 0] {
            let n = header.space_map.push_full().unwrap();
            header.space_map.set(n, free).unwrap();
        }

        let page = header.to_page();
        assert_eq!(get_u32(&page, 12), 3);
        assert_eq!(get_u16(&page, 18), 4000);

        let decoded = FileHeader::from_page(&page).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn test_corrupt_page_count() {
        let mut page = [0u8; PAGE_SIZE];
        put_u32(&mut page, 12, MAX_DATA_PAGES as u32 + 1);
        assert!(matches!(
            FileHeader::from_page(&page),
            Err(KestrelError::PageCorrupted { .. })
        ));
    }

    #[test]
    fn test_find_page_scans_backward() {
        let mut map = FreeSpaceMap::new();
        for free in [500u16, 500, 10] {
            let n = map.push_full().unwrap();
            map.set(n, free).unwrap();
        }

        // Page 2 lacks room, page 1 is the last one that fits.
        assert_eq!(map.find_page_with(100), Some(1));
        assert_eq!(map.find_page_with(5), Some(2));
        assert_eq!(map.find_page_with(600), None);
    }

    #[test]
    fn test_find_page_requires_strictly_more() {
        let mut map = FreeSpaceMap::new();
        let n = map.push_full().unwrap();
        map.set(n, 64).unwrap();
        assert_eq!(map.find_page_with(64), None);
        assert_eq!(map.find_page_with(63), Some(0));
    }

    #[test]
    fn test_new_entries_start_full() {
        let mut map = FreeSpaceMap::new();
        map.push_full().unwrap();
        assert_eq!(map.get(0), Some(0));
        assert_eq!(map.find_page_with(0), None);
    }

    #[test]
    fn test_set_out_of_range() {
        let mut map = FreeSpaceMap::new();
        assert!(matches!(
            map.set(3, 10),
            Err(KestrelError::PageNotFound { page_num: 3 })
        ));
    }

    #[test]
    fn test_map_capacity() {
        let mut map = FreeSpaceMap::new();
        for _ in 0..MAX_DATA_PAGES {
            map.push_full().unwrap();
        }
        assert!(matches!(
            map.push_full(),
            Err(KestrelError::FileFull { max_pages: 2040 })
        ));
        assert_eq!(map.len(), MAX_DATA_PAGES);
    }
}
