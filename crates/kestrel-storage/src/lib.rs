//! Storage engine for KestrelDB.
//!
//! This crate provides:
//! - Paged files with a hidden header page (counters and free space map)
//! - Slotted data pages holding variable-length records
//! - RecordStore for record CRUD with stable RIDs and filtered scans
//! - Record codec between the wire tuple format and the on-page layout
//! - B+ tree indexes over `(key, rid)` entries with range scans

pub mod btree;
mod disk;
mod freespace;
pub mod heap;
pub mod record;

pub use btree::{
    BTreeNode, IndexFile, IndexManager, IndexScan, IndexScanIter, NodeEntry, ScanState,
    MAX_KEY_SIZE,
};
pub use disk::{FileHandle, FileKind, FileManager};
pub use freespace::{FileHeader, FreeSpaceMap, PageCounters, MAX_DATA_PAGES};
pub use heap::{DataPage, RecordScan, RecordScanIter, RecordStore, Slot, SlotDirectory};
pub use record::{
    decode_tuple, encode_tuple, format_record, null_bitmap_size, RecordCodec, Rid,
};
