//! Disk-backed B+ tree index.
//!
//! Index entries are `(key, rid)` pairs ordered by key, then RID, so one
//! index can hold many entries with the same key. Nodes are stored one per
//! page in an index file whose hidden root-pointer page names the root.
//!
//! - BTreeNode: parsed leaf or intermediate node with split and search
//! - IndexFile: node reads and writes with a single-node cache
//! - IndexManager: file lifecycle, insert, delete, scan and JSON dump
//! - IndexScan: range cursor over the leaf chain

pub mod constants;
mod file;
mod index;
mod node;
mod scan;

pub use constants::MAX_KEY_SIZE;
pub use file::IndexFile;
pub use index::IndexManager;
pub use node::{compare_entries, compare_keys, BTreeNode, NodeEntry};
pub use scan::{IndexScan, IndexScanIter, ScanState};
