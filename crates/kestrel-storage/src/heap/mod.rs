//! Record storage on slotted data pages.
//!
//! - DataPage: slotted page holding variable-length records
//! - RecordStore: insert/read/update/delete by RID with forwarding on relocation
//! - RecordScan: filtered, projected sequential scan

pub mod constants;
mod file;
mod page;
mod scan;
mod slot;

pub use file::RecordStore;
pub use page::DataPage;
pub use scan::{RecordScan, RecordScanIter};
pub use slot::{Slot, SlotDirectory};
