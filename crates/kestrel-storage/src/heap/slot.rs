//! Slot directory of a data page.
//!
//! The directory lives at the end of the page and grows backward. Entry `i`
//! is stored at `PAGE_SIZE - 4 - (i + 1) * 4`, directly below the trailer.
//! Deleted entries stay in the directory as tombstones so that the slot
//! numbers of their siblings never change.

use super::constants::{PAGE_CAPACITY, PAGE_TRAILER_SIZE, SLOT_SIZE};
use kestrel_common::page::{get_i16, put_i16, PageBuf, PageNum, PAGE_SIZE};
use kestrel_common::{KestrelError, Result};

/// A directory entry pointing at a record's bytes.
///
/// Layout (4 bytes):
/// - offset: 2 bytes (from page start)
/// - length: 2 bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Slot {
    pub offset: i16,
    pub length: i16,
}

impl Slot {
    /// Marker for a deleted entry.
    pub const TOMBSTONE: Slot = Slot {
        offset: -1,
        length: -1,
    };

    /// Creates a new slot.
    pub fn new(offset: usize, length: usize) -> Self {
        Self {
            offset: offset as i16,
            length: length as i16,
        }
    }

    /// Returns true if this slot has been deleted.
    pub fn is_tombstone(&self) -> bool {
        self.length == -1
    }

    /// Offset one past the record's last byte.
    pub fn end(&self) -> usize {
        self.offset as usize + self.length as usize
    }

    /// Serializes the slot to bytes.
    pub fn to_bytes(&self) -> [u8; SLOT_SIZE] {
        let mut buf = [0u8; SLOT_SIZE];
        buf[0..2].copy_from_slice(&self.offset.to_le_bytes());
        buf[2..4].copy_from_slice(&self.length.to_le_bytes());
        buf
    }

    /// Deserializes a slot from bytes.
    pub fn from_bytes(buf: &[u8]) -> Self {
        Self {
            offset: i16::from_le_bytes([buf[0], buf[1]]),
            length: i16::from_le_bytes([buf[2], buf[3]]),
        }
    }
}

/// Parsed slot directory and trailer counters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SlotDirectory {
    slots: Vec<Slot>,
    /// Bytes available for new payload and directory entries.
    free_space: i16,
}

impl Default for SlotDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl SlotDirectory {
    /// Creates the directory of an empty page.
    pub fn new() -> Self {
        Self {
            slots: Vec::new(),
            free_space: PAGE_CAPACITY as i16,
        }
    }

    fn slot_position(index: usize) -> usize {
        PAGE_SIZE - PAGE_TRAILER_SIZE - (index + 1) * SLOT_SIZE
    }

    /// Reads the directory from the image of page `page_num`.
    pub fn decode(page_num: PageNum, buf: &PageBuf) -> Result<Self> {
        let free_space = get_i16(buf, PAGE_SIZE - 4);
        let count = get_i16(buf, PAGE_SIZE - 2);
        if count < 0 || (count as usize) * SLOT_SIZE > PAGE_CAPACITY || free_space < 0 {
            return Err(KestrelError::PageCorrupted {
                page_num,
                reason: format!("bad trailer: free {} count {}", free_space, count),
            });
        }
        let slots = (0..count as usize)
            .map(|i| {
                let pos = Self::slot_position(i);
                Slot::from_bytes(&buf[pos..pos + SLOT_SIZE])
            })
            .collect();
        Ok(Self { slots, free_space })
    }

    /// Writes the directory and trailer into a page image.
    pub fn encode_into(&self, buf: &mut PageBuf) {
        for (i, slot) in self.slots.iter().enumerate() {
            let pos = Self::slot_position(i);
            buf[pos..pos + SLOT_SIZE].copy_from_slice(&slot.to_bytes());
        }
        put_i16(buf, PAGE_SIZE - 4, self.free_space);
        put_i16(buf, PAGE_SIZE - 2, self.slots.len() as i16);
    }

    /// Number of entries, tombstones included.
    pub fn record_count(&self) -> usize {
        self.slots.len()
    }

    /// Free bytes on the page.
    pub fn free_space(&self) -> usize {
        self.free_space as usize
    }

    pub(crate) fn set_free_space(&mut self, free: usize) {
        self.free_space = free as i16;
    }

    /// Returns an entry.
    pub fn get(&self, index: usize) -> Option<Slot> {
        self.slots.get(index).copied()
    }

    pub(crate) fn set(&mut self, index: usize, slot: Slot) {
        self.slots[index] = slot;
    }

    pub(crate) fn push(&mut self, slot: Slot) -> usize {
        self.slots.push(slot);
        self.slots.len() - 1
    }

    /// Iterates over all entries in slot order.
    pub fn iter(&self) -> impl Iterator<Item = &Slot> {
        self.slots.iter()
    }

    pub(crate) fn iter_mut(&mut self) -> impl Iterator<Item = &mut Slot> {
        self.slots.iter_mut()
    }

    /// First tombstoned entry, or `record_count` when none can be reused.
    pub fn free_slot(&self) -> usize {
        self.slots
            .iter()
            .position(Slot::is_tombstone)
            .unwrap_or(self.slots.len())
    }

    /// Sum of the lengths of live records.
    pub fn live_bytes(&self) -> usize {
        self.slots
            .iter()
            .filter(|s| !s.is_tombstone())
            .map(|s| s.length as usize)
            .sum()
    }

    /// Bytes taken by the directory array and the trailer.
    pub fn directory_size(&self) -> usize {
        self.slots.len() * SLOT_SIZE + PAGE_TRAILER_SIZE
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_common::page::empty_page;

    #[test]
    fn test_slot_roundtrip() {
        let slot = Slot::new(120, 33);
        assert_eq!(Slot::from_bytes(&slot.to_bytes()), slot);
        assert_eq!(slot.end(), 153);
        assert!(!slot.is_tombstone());
        assert!(Slot::TOMBSTONE.is_tombstone());
        assert_eq!(Slot::TOMBSTONE.to_bytes(), [0xff; 4]);
    }

    #[test]
    fn test_empty_directory() {
        let dir = SlotDirectory::new();
        assert_eq!(dir.free_space(), 4092);
        assert_eq!(dir.record_count(), 0);
        assert_eq!(dir.directory_size(), 4);
        assert_eq!(dir.free_slot(), 0);
    }

    #[test]
    fn test_encode_decode() {
        let mut dir = SlotDirectory::new();
        dir.push(Slot::new(0, 10));
        dir.push(Slot::TOMBSTONE);
        dir.push(Slot::new(10, 20));
        dir.set_free_space(PAGE_CAPACITY - 30 - 12);

        let mut page = empty_page();
        dir.encode_into(&mut page);

        // Trailer sits in the last four bytes, entry 0 right below it.
        assert_eq!(get_i16(&page, PAGE_SIZE - 2), 3);
        assert_eq!(get_i16(&page, PAGE_SIZE - 8), 0);
        assert_eq!(get_i16(&page, PAGE_SIZE - 6), 10);

        let decoded = SlotDirectory::decode(0, &page).unwrap();
        assert_eq!(decoded, dir);
        assert_eq!(decoded.free_slot(), 1);
        assert_eq!(decoded.live_bytes(), 30);
    }

    #[test]
    fn test_decode_rejects_bad_trailer() {
        let mut page = empty_page();
        put_i16(&mut page, PAGE_SIZE - 2, -3);
        assert!(SlotDirectory::decode(0, &page).is_err());

        put_i16(&mut page, PAGE_SIZE - 2, 2000);
        assert!(SlotDirectory::decode(0, &page).is_err());
    }
}
