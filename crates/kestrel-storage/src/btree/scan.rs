//! Range scan over the leaf chain of an index.

use super::file::IndexFile;
use super::node::{compare_keys, BTreeNode};
use crate::record::Rid;
use kestrel_common::page::PageNum;
use kestrel_common::{AttrType, KestrelError, Result, Value};
use std::cmp::Ordering;
use tracing::trace;

/// Position of an index scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// Not yet descended to a leaf.
    Uninitialized,
    /// Next slot to examine.
    Positioned { page_num: PageNum, slot: usize },
    /// End of range, end of leaf chain, or closed.
    Exhausted,
}

/// Cursor over index entries with keys between two optional bounds.
///
/// Like `RecordScan`, the cursor takes the file per step, so the caller may
/// delete the entry it just received. Deleted entries leave tombstones in
/// their leaf and the cursor's slot stays valid.
pub struct IndexScan {
    key_type: AttrType,
    low: Option<Value>,
    high: Option<Value>,
    low_inclusive: bool,
    high_inclusive: bool,
    state: ScanState,
}

impl IndexScan {
    pub(crate) fn new(
        key_type: AttrType,
        low: Option<Value>,
        high: Option<Value>,
        low_inclusive: bool,
        high_inclusive: bool,
    ) -> Self {
        Self {
            key_type,
            low,
            high,
            low_inclusive,
            high_inclusive,
            state: ScanState::Uninitialized,
        }
    }

    /// Returns the cursor position.
    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Descends from the root to the leftmost leaf that may hold the low key.
    fn find_start_leaf(&self, file: &mut IndexFile, root: PageNum) -> Result<PageNum> {
        let mut current = root;
        loop {
            let node = file.read_node(current, self.key_type)?;
            if node.is_leaf() {
                return Ok(current);
            }
            let child = match &self.low {
                Some(low) => node.find_child_node(low, None)?.0,
                None => node.next_page().ok_or_else(|| {
                    KestrelError::BTreeCorrupted(format!(
                        "intermediate node {} without leftmost child",
                        current
                    ))
                })?,
            };
            trace!(from = current, to = child, "scan descent");
            current = child;
        }
    }

    /// Reads the leaf under the cursor. Repeated reads of the same leaf are
    /// served by the file's node cache.
    fn read_leaf(&self, file: &mut IndexFile, page_num: PageNum) -> Result<BTreeNode> {
        let node = file.read_node(page_num, self.key_type)?;
        if !node.is_leaf() {
            return Err(KestrelError::BTreeCorrupted(format!(
                "leaf chain reaches intermediate node {}",
                page_num
            )));
        }
        Ok(node)
    }

    fn below_low(&self, key: &Value) -> bool {
        match &self.low {
            Some(low) => match compare_keys(key, low) {
                Ordering::Less => true,
                Ordering::Equal => !self.low_inclusive,
                Ordering::Greater => false,
            },
            None => false,
        }
    }

    fn above_high(&self, key: &Value) -> bool {
        match &self.high {
            Some(high) => match compare_keys(key, high) {
                Ordering::Greater => true,
                Ordering::Equal => !self.high_inclusive,
                Ordering::Less => false,
            },
            None => false,
        }
    }

    /// Returns the next entry in range as `(key, rid)`, None once exhausted.
    pub fn next_entry(&mut self, file: &mut IndexFile) -> Result<Option<(Value, Rid)>> {
        loop {
            let (page_num, slot) = match self.state {
                ScanState::Exhausted => return Ok(None),
                ScanState::Uninitialized => {
                    self.state = match file.root() {
                        Some(root) => ScanState::Positioned {
                            page_num: self.find_start_leaf(file, root)?,
                            slot: 0,
                        },
                        None => ScanState::Exhausted,
                    };
                    continue;
                }
                ScanState::Positioned { page_num, slot } => (page_num, slot),
            };

            let leaf = self.read_leaf(file, page_num)?;
            if slot >= leaf.slot_count() {
                self.state = match leaf.next_page() {
                    Some(next) => ScanState::Positioned {
                        page_num: next,
                        slot: 0,
                    },
                    None => ScanState::Exhausted,
                };
                continue;
            }
            let entry = leaf.entry(slot).map(|e| (e.key.clone(), e.rid));
            self.state = ScanState::Positioned {
                page_num,
                slot: slot + 1,
            };

            let Some((key, rid)) = entry else { continue };
            if self.below_low(&key) {
                continue;
            }
            if self.above_high(&key) {
                self.close();
                return Ok(None);
            }
            return Ok(Some((key, rid)));
        }
    }

    /// Ends the scan. Idempotent.
    pub fn close(&mut self) {
        self.state = ScanState::Exhausted;
    }

    /// Returns true once the scan is exhausted or closed.
    pub fn is_closed(&self) -> bool {
        self.state == ScanState::Exhausted
    }

    /// Drives the scan as an iterator that borrows the file.
    pub fn iter(self, file: &mut IndexFile) -> IndexScanIter<'_> {
        IndexScanIter { scan: self, file }
    }
}

/// Borrowing iterator adapter over an `IndexScan`.
pub struct IndexScanIter<'a> {
    scan: IndexScan,
    file: &'a mut IndexFile,
}

impl Iterator for IndexScanIter<'_> {
    type Item = Result<(Value, Rid)>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.scan.next_entry(self.file) {
            Ok(Some(item)) => Some(Ok(item)),
            Ok(None) => None,
            Err(e) => {
                self.scan.close();
                Some(Err(e))
            }
        }
    }
}
