//! Slotted data page holding variable-length records.
//!
//! Page layout:
//! ```text
//! +------------------+ 0
//! | Record Payload   |  <- Grows upward, packed in slot order
//! +------------------+
//! |                  |
//! | Free Space       |
//! |                  |
//! +------------------+
//! | Slot Directory   |  <- Grows downward, slot 0 highest
//! | (4 bytes/slot)   |
//! +------------------+ 4092
//! | free (i16)       |
//! | count (i16)      |
//! +------------------+ 4096
//! ```
//!
//! Live payload is always compact: every mutation shifts the bytes behind it
//! so the only unused region is the gap between payload and directory.
//! `free_space + live bytes + directory size == PAGE_SIZE` holds after every
//! operation.

use super::constants::{MAX_RECORD_SIZE, SLOT_SIZE};
use super::slot::{Slot, SlotDirectory};
use kestrel_common::page::{PageBuf, PageNum, PAGE_SIZE};
use kestrel_common::{KestrelError, Result};

/// A data page: raw bytes plus its parsed slot directory.
#[derive(Clone)]
pub struct DataPage {
    /// Page data buffer. The directory region is rewritten by `to_bytes`.
    data: Box<PageBuf>,
    dir: SlotDirectory,
}

impl Default for DataPage {
    fn default() -> Self {
        Self::new()
    }
}

impl DataPage {
    /// Creates a new empty data page.
    pub fn new() -> Self {
        Self {
            data: Box::new([0u8; PAGE_SIZE]),
            dir: SlotDirectory::new(),
        }
    }

    /// Parses the image of page `page_num`.
    pub fn from_bytes(page_num: PageNum, data: PageBuf) -> Result<Self> {
        let dir = SlotDirectory::decode(page_num, &data)?;
        let page = Self {
            data: Box::new(data),
            dir,
        };
        if page.payload_end() + page.dir.directory_size() + page.dir.free_space() != PAGE_SIZE {
            return Err(KestrelError::PageCorrupted {
                page_num,
                reason: "free space does not match directory".to_string(),
            });
        }
        let end = page.payload_end();
        if let Some(i) = page
            .dir
            .iter()
            .position(|s| !s.is_tombstone() && (s.offset < 0 || s.length < 0 || s.end() > end))
        {
            return Err(KestrelError::PageCorrupted {
                page_num,
                reason: format!("slot {} points outside the payload", i),
            });
        }
        Ok(page)
    }

    /// Serializes the page, directory included.
    pub fn to_bytes(&self) -> PageBuf {
        let mut buf = *self.data;
        self.dir.encode_into(&mut buf);
        buf
    }

    /// Returns the slot directory.
    pub fn directory(&self) -> &SlotDirectory {
        &self.dir
    }

    /// Free bytes on the page.
    pub fn free_space(&self) -> usize {
        self.dir.free_space()
    }

    /// Number of slots, tombstones included.
    pub fn record_count(&self) -> usize {
        self.dir.record_count()
    }

    /// End of the live payload region.
    fn payload_end(&self) -> usize {
        self.dir.live_bytes()
    }

    /// Returns true if a record of `len` bytes can be inserted.
    pub fn can_fit(&self, len: usize) -> bool {
        let slot_cost = if self.dir.free_slot() < self.dir.record_count() {
            0
        } else {
            SLOT_SIZE
        };
        len + slot_cost <= self.free_space()
    }

    /// First tombstoned slot, or `record_count` if a new slot is needed.
    pub fn get_free_slot(&self) -> usize {
        self.dir.free_slot()
    }

    fn live_slot(&self, slot_num: usize) -> Result<Slot> {
        match self.dir.get(slot_num) {
            Some(slot) if !slot.is_tombstone() => Ok(slot),
            Some(_) => Err(KestrelError::RecordNotFound(format!(
                "slot {} is deleted",
                slot_num
            ))),
            None => Err(KestrelError::RecordNotFound(format!(
                "slot {} out of range ({} slots)",
                slot_num,
                self.dir.record_count()
            ))),
        }
    }

    /// Returns true if the slot holds a tombstone.
    pub fn check_record_deleted(&self, slot_num: usize) -> Result<bool> {
        self.dir
            .get(slot_num)
            .map(|s| s.is_tombstone())
            .ok_or_else(|| KestrelError::RecordNotFound(format!("slot {} out of range", slot_num)))
    }

    /// Returns the bytes of a live record.
    pub fn get_record(&self, slot_num: usize) -> Result<&[u8]> {
        let slot = self.live_slot(slot_num)?;
        Ok(&self.data[slot.offset as usize..slot.end()])
    }

    /// Moves the live payload in `[from, end)` by `delta` bytes and fixes
    /// the offsets of every live slot at or behind `from`.
    fn shift_payload(&mut self, from: usize, delta: isize) {
        let end = self.payload_end();
        if delta == 0 || from >= end {
            return;
        }
        let to = (from as isize + delta) as usize;
        self.data.copy_within(from..end, to);
        for slot in self.dir.iter_mut() {
            if !slot.is_tombstone() && slot.offset as usize >= from {
                slot.offset = (slot.offset as isize + delta) as i16;
            }
        }
    }

    fn check_size(record: &[u8]) -> Result<()> {
        // Zero-length records would share an offset with their neighbor.
        if record.is_empty() {
            return Err(KestrelError::InvalidParameter {
                name: "record".to_string(),
                value: "empty".to_string(),
            });
        }
        if record.len() > MAX_RECORD_SIZE {
            return Err(KestrelError::RecordTooLarge {
                size: record.len(),
                max: MAX_RECORD_SIZE,
            });
        }
        Ok(())
    }

    /// Appends a record under a new slot at the end of the directory.
    pub fn add_record(&mut self, record: &[u8]) -> Result<usize> {
        Self::check_size(record)?;
        let needed = record.len() + SLOT_SIZE;
        if needed > self.free_space() {
            return Err(KestrelError::PageFull);
        }
        let offset = self.payload_end();
        self.data[offset..offset + record.len()].copy_from_slice(record);
        let slot_num = self.dir.push(Slot::new(offset, record.len()));
        self.dir.set_free_space(self.free_space() - needed);
        Ok(slot_num)
    }

    /// Writes a record into a tombstoned slot.
    ///
    /// The bytes go directly after the nearest live record with a lower slot
    /// number, keeping the payload in slot order.
    pub fn insert_at_slot(&mut self, slot_num: usize, record: &[u8]) -> Result<()> {
        Self::check_size(record)?;
        match self.dir.get(slot_num) {
            Some(slot) if slot.is_tombstone() => {}
            Some(_) => {
                return Err(KestrelError::Internal(format!(
                    "slot {} is occupied",
                    slot_num
                )))
            }
            None => return Err(KestrelError::RecordNotFound(format!("slot {}", slot_num))),
        }
        if record.len() > self.free_space() {
            return Err(KestrelError::PageFull);
        }

        let insert_at = (0..slot_num)
            .rev()
            .filter_map(|i| self.dir.get(i))
            .find(|s| !s.is_tombstone())
            .map_or(0, |s| s.end());
        self.shift_payload(insert_at, record.len() as isize);
        self.data[insert_at..insert_at + record.len()].copy_from_slice(record);
        self.dir.set(slot_num, Slot::new(insert_at, record.len()));
        self.dir.set_free_space(self.free_space() - record.len());
        Ok(())
    }

    /// Inserts a record into the first reusable slot, or a new one.
    pub fn insert_record(&mut self, record: &[u8]) -> Result<usize> {
        let slot_num = self.get_free_slot();
        if slot_num == self.record_count() {
            self.add_record(record)
        } else {
            self.insert_at_slot(slot_num, record)?;
            Ok(slot_num)
        }
    }

    /// Replaces a live record, shifting the bytes behind it by the length change.
    pub fn update_record(&mut self, slot_num: usize, record: &[u8]) -> Result<()> {
        Self::check_size(record)?;
        let slot = self.live_slot(slot_num)?;
        let old_len = slot.length as usize;
        if record.len() > old_len && record.len() - old_len > self.free_space() {
            return Err(KestrelError::PageFull);
        }

        let delta = record.len() as isize - old_len as isize;
        self.shift_payload(slot.end(), delta);
        let start = slot.offset as usize;
        self.data[start..start + record.len()].copy_from_slice(record);
        self.dir.set(slot_num, Slot::new(start, record.len()));
        self.dir
            .set_free_space((self.free_space() as isize - delta) as usize);
        Ok(())
    }

    /// Removes a live record and tombstones its slot. The slot is kept.
    pub fn delete_record(&mut self, slot_num: usize) -> Result<()> {
        let slot = self.live_slot(slot_num)?;
        let len = slot.length as usize;
        self.shift_payload(slot.end(), -(len as isize));
        self.dir.set(slot_num, Slot::TOMBSTONE);
        self.dir.set_free_space(self.free_space() + len);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::heap::constants::PAGE_CAPACITY;

    fn assert_invariant(page: &DataPage) {
        let dir = page.directory();
        assert_eq!(
            dir.free_space() + dir.live_bytes() + dir.directory_size(),
            PAGE_SIZE
        );
        // Live records tile [0, live_bytes) in slot order.
        let mut expected = 0;
        for slot in dir.iter().filter(|s| !s.is_tombstone()) {
            assert_eq!(slot.offset as usize, expected);
            expected = slot.end();
        }
    }

    #[test]
    fn test_new_page() {
        let page = DataPage::new();
        assert_eq!(page.free_space(), PAGE_CAPACITY);
        assert_eq!(page.record_count(), 0);
        assert_invariant(&page);
    }

    #[test]
    fn test_add_and_get() {
        let mut page = DataPage::new();
        assert_eq!(page.add_record(b"alpha---").unwrap(), 0);
        assert_eq!(page.add_record(b"beta----").unwrap(), 1);

        assert_eq!(page.get_record(0).unwrap(), b"alpha---");
        assert_eq!(page.get_record(1).unwrap(), b"beta----");
        assert_eq!(page.free_space(), PAGE_CAPACITY - 24);
        assert_invariant(&page);
    }

    #[test]
    fn test_bytes_roundtrip() {
        let mut page = DataPage::new();
        page.add_record(b"one12345").unwrap();
        page.add_record(b"two12345").unwrap();
        page.delete_record(0).unwrap();

        let restored = DataPage::from_bytes(3, page.to_bytes()).unwrap();
        assert_eq!(restored.record_count(), 2);
        assert!(restored.check_record_deleted(0).unwrap());
        assert_eq!(restored.get_record(1).unwrap(), b"two12345");
        assert_eq!(restored.free_space(), page.free_space());
    }

    #[test]
    fn test_delete_compacts_and_keeps_slot() {
        let mut page = DataPage::new();
        page.add_record(b"aaaaaaaa").unwrap();
        page.add_record(b"bbbbbbbbbbbb").unwrap();
        page.add_record(b"cccccccc").unwrap();

        page.delete_record(1).unwrap();
        assert_eq!(page.record_count(), 3);
        assert!(page.check_record_deleted(1).unwrap());
        assert!(matches!(
            page.get_record(1),
            Err(KestrelError::RecordNotFound(_))
        ));
        assert_eq!(page.get_record(2).unwrap(), b"cccccccc");
        assert_eq!(page.directory().get(2).unwrap().offset, 8);
        assert_invariant(&page);
    }

    #[test]
    fn test_delete_twice_fails() {
        let mut page = DataPage::new();
        page.add_record(b"xxxxxxxx").unwrap();
        page.delete_record(0).unwrap();
        assert!(page.delete_record(0).is_err());
    }

    #[test]
    fn test_insert_reuses_tombstone() {
        let mut page = DataPage::new();
        page.add_record(b"aaaaaaaa").unwrap();
        page.add_record(b"bbbbbbbb").unwrap();
        page.add_record(b"cccccccc").unwrap();
        page.delete_record(1).unwrap();
        let free_before = page.free_space();

        assert_eq!(page.get_free_slot(), 1);
        assert_eq!(page.insert_record(b"dddddddddddd").unwrap(), 1);
        assert_eq!(page.record_count(), 3);
        assert_eq!(page.free_space(), free_before - 12);

        assert_eq!(page.get_record(0).unwrap(), b"aaaaaaaa");
        assert_eq!(page.get_record(1).unwrap(), b"dddddddddddd");
        assert_eq!(page.get_record(2).unwrap(), b"cccccccc");
        assert_invariant(&page);
    }

    #[test]
    fn test_insert_at_first_slot() {
        let mut page = DataPage::new();
        page.add_record(b"aaaaaaaa").unwrap();
        page.add_record(b"bbbbbbbb").unwrap();
        page.delete_record(0).unwrap();

        page.insert_at_slot(0, b"zzzzzzzzzz").unwrap();
        assert_eq!(page.directory().get(0).unwrap().offset, 0);
        assert_eq!(page.get_record(1).unwrap(), b"bbbbbbbb");
        assert_invariant(&page);
    }

    #[test]
    fn test_insert_at_occupied_slot_fails() {
        let mut page = DataPage::new();
        page.add_record(b"aaaaaaaa").unwrap();
        assert!(page.insert_at_slot(0, b"bbbbbbbb").is_err());
        assert!(page.insert_at_slot(5, b"bbbbbbbb").is_err());
    }

    #[test]
    fn test_update_grow_and_shrink() {
        let mut page = DataPage::new();
        page.add_record(b"aaaaaaaa").unwrap();
        page.add_record(b"bbbbbbbb").unwrap();
        page.add_record(b"cccccccc").unwrap();

        page.update_record(1, b"BBBBBBBBBBBBBBBB").unwrap();
        assert_eq!(page.get_record(1).unwrap(), b"BBBBBBBBBBBBBBBB");
        assert_eq!(page.get_record(2).unwrap(), b"cccccccc");
        assert_invariant(&page);

        page.update_record(0, b"A").unwrap();
        assert_eq!(page.get_record(0).unwrap(), b"A");
        assert_eq!(page.get_record(1).unwrap(), b"BBBBBBBBBBBBBBBB");
        assert_eq!(page.get_record(2).unwrap(), b"cccccccc");
        assert_invariant(&page);
    }

    #[test]
    fn test_page_full() {
        let mut page = DataPage::new();
        let big = vec![7u8; MAX_RECORD_SIZE];
        page.add_record(&big).unwrap();
        assert_eq!(page.free_space(), 0);
        assert!(!page.can_fit(1));
        assert!(matches!(page.add_record(b"x"), Err(KestrelError::PageFull)));
        assert_invariant(&page);
    }

    #[test]
    fn test_record_too_large() {
        let mut page = DataPage::new();
        let huge = vec![0u8; MAX_RECORD_SIZE + 1];
        assert!(matches!(
            page.add_record(&huge),
            Err(KestrelError::RecordTooLarge { .. })
        ));
    }

    #[test]
    fn test_update_beyond_free_space() {
        let mut page = DataPage::new();
        page.add_record(&vec![1u8; 4000]).unwrap();
        page.add_record(b"small---").unwrap();
        assert!(matches!(
            page.update_record(1, &[2u8; 200]),
            Err(KestrelError::PageFull)
        ));
        assert_eq!(page.get_record(1).unwrap(), b"small---");
    }

    #[test]
    fn test_corrupt_free_space_detected() {
        let mut page = DataPage::new();
        page.add_record(b"aaaaaaaa").unwrap();
        let mut bytes = page.to_bytes();
        bytes[PAGE_SIZE - 4] = 0;
        bytes[PAGE_SIZE - 3] = 0;
        assert!(matches!(
            DataPage::from_bytes(0, bytes),
            Err(KestrelError::PageCorrupted { .. })
        ));
    }
}
