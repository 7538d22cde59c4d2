//! Data page layout constants.

use kestrel_common::page::PAGE_SIZE;

/// Size of the page trailer (free space + record count) in bytes.
pub const PAGE_TRAILER_SIZE: usize = 4;

/// Size of a slot directory entry in bytes.
pub const SLOT_SIZE: usize = 4;

/// Free space of an empty data page.
pub const PAGE_CAPACITY: usize = PAGE_SIZE - PAGE_TRAILER_SIZE;

/// Largest record that fits in an empty page together with its slot.
pub const MAX_RECORD_SIZE: usize = PAGE_CAPACITY - SLOT_SIZE;

/// Every stored record is at least this long so it can later be replaced
/// in place by a forwarding record.
pub const MIN_RECORD_SIZE: usize = 8;

/// Field count value marking a forwarding record.
pub const FORWARD_MARKER: i16 = -1;

/// Bit set in the field count of a record stored away from its anchor slot.
pub const RELOCATED_FLAG: i16 = 0x4000;
