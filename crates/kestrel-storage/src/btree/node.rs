//! Parsed B+ tree node.
//!
//! A node is decoded from its page image, mutated in memory and encoded back
//! as a whole. Entries are kept in `(key, rid)` order in the slot directory;
//! the payload region is rewritten compactly on every encode.
//!
//! Intermediate nodes use `next_page` as the leftmost child. Each of their
//! entries carries the child holding everything ordered at or after the
//! entry. Leaves use `next_page` to link to their right sibling.

use super::constants::{
    CHILD_POINTER_SIZE, COUNT_OFFSET, FREE_SPACE_OFFSET, NEXT_PAGE_OFFSET, NODE_CAPACITY,
    NODE_TRAILER_SIZE, NO_PAGE, TYPE_OFFSET,
};
use crate::heap::constants::SLOT_SIZE;
use crate::heap::Slot;
use crate::record::Rid;
use bytes::{Buf, BufMut};
use kestrel_common::page::{empty_page, get_i32, put_i32, PageBuf, PageNum, PageType, PAGE_SIZE};
use kestrel_common::{AttrType, KestrelError, Result, Value};
use std::cmp::Ordering;

/// Orders two keys of the same type.
#[inline]
pub fn compare_keys(a: &Value, b: &Value) -> Ordering {
    a.compare(b)
        .unwrap_or_else(|| (a.attr_type() as u8).cmp(&(b.attr_type() as u8)))
}

/// Orders two index entries by key, then by RID.
#[inline]
pub fn compare_entries(key: &Value, rid: Rid, other_key: &Value, other_rid: Rid) -> Ordering {
    compare_keys(key, other_key).then(rid.cmp(&other_rid))
}

fn corrupted(page_num: PageNum, reason: impl std::fmt::Display) -> KestrelError {
    KestrelError::BTreeCorrupted(format!("page {}: {}", page_num, reason))
}

/// One entry of a node.
///
/// Layout: `key (wire encoding) | rid.page: u32 | rid.slot: u16 [| child: u32]`
#[derive(Debug, Clone, PartialEq)]
pub struct NodeEntry {
    pub key: Value,
    pub rid: Rid,
    /// Subtree holding entries ordered at or after this one. Intermediate only.
    pub child: Option<PageNum>,
}

impl NodeEntry {
    /// Creates a leaf entry.
    pub fn leaf(key: Value, rid: Rid) -> Self {
        Self {
            key,
            rid,
            child: None,
        }
    }

    /// Creates an intermediate entry.
    pub fn intermediate(key: Value, rid: Rid, child: PageNum) -> Self {
        Self {
            key,
            rid,
            child: Some(child),
        }
    }

    /// Size of the encoded entry, excluding its directory slot.
    pub fn encoded_size(&self) -> usize {
        let child = if self.child.is_some() {
            CHILD_POINTER_SIZE
        } else {
            0
        };
        self.key.wire_size() + Rid::SIZE + child
    }

    fn encode_into(&self, out: &mut Vec<u8>) {
        self.key.encode_into(out);
        out.put_u32_le(self.rid.page_num);
        out.put_u16_le(self.rid.slot_num);
        if let Some(child) = self.child {
            out.put_u32_le(child);
        }
    }

    fn decode(page_num: PageNum, key_type: AttrType, is_leaf: bool, bytes: &[u8]) -> Result<Self> {
        let (key, used) =
            Value::decode(key_type, bytes).map_err(|e| corrupted(page_num, e))?;
        let tail = if is_leaf {
            Rid::SIZE
        } else {
            Rid::SIZE + CHILD_POINTER_SIZE
        };
        if bytes.len() != used + tail {
            return Err(corrupted(
                page_num,
                format!("entry of {} bytes, expected {}", bytes.len(), used + tail),
            ));
        }

        let mut rest = &bytes[used..];
        let rid = Rid::new(rest.get_u32_le(), rest.get_u16_le());
        let child = if is_leaf {
            None
        } else {
            Some(rest.get_u32_le())
        };
        Ok(Self { key, rid, child })
    }
}

/// A leaf or intermediate node.
///
/// Deleted entries stay in the directory as `None` until a split, or an
/// insert that cannot fit otherwise, compacts it. An open scan's slot
/// position therefore stays valid across deletes and ordinary inserts
/// after it.
#[derive(Debug, Clone, PartialEq)]
pub struct BTreeNode {
    page_type: PageType,
    next_page: Option<PageNum>,
    slots: Vec<Option<NodeEntry>>,
}

impl BTreeNode {
    /// Creates an empty leaf.
    pub fn new_leaf() -> Self {
        Self {
            page_type: PageType::BTreeLeaf,
            next_page: None,
            slots: Vec::new(),
        }
    }

    /// Creates an empty intermediate node whose only child is `leftmost`.
    pub fn new_intermediate(leftmost: PageNum) -> Self {
        Self {
            page_type: PageType::BTreeInternal,
            next_page: Some(leftmost),
            slots: Vec::new(),
        }
    }

    fn slot_position(index: usize) -> usize {
        PAGE_SIZE - NODE_TRAILER_SIZE - (index + 1) * SLOT_SIZE
    }

    /// Reads the node type and `next_page` without decoding entries.
    pub fn peek(page_num: PageNum, buf: &PageBuf) -> Result<(PageType, Option<PageNum>)> {
        let page_type = match PageType::from_u8(buf[TYPE_OFFSET]) {
            Some(t @ (PageType::BTreeLeaf | PageType::BTreeInternal)) => t,
            _ => {
                return Err(corrupted(
                    page_num,
                    format!("type byte {} is not a tree node", buf[TYPE_OFFSET]),
                ))
            }
        };
        let next_page = match get_i32(buf, NEXT_PAGE_OFFSET) {
            NO_PAGE => None,
            raw if raw < 0 => return Err(corrupted(page_num, format!("next page {}", raw))),
            raw => Some(raw as PageNum),
        };
        if page_type == PageType::BTreeInternal && next_page.is_none() {
            return Err(corrupted(page_num, "intermediate node without leftmost child"));
        }
        Ok((page_type, next_page))
    }

    /// Decodes the node stored in page `page_num`, whose keys are `key_type`.
    pub fn decode(page_num: PageNum, buf: &PageBuf, key_type: AttrType) -> Result<Self> {
        let (page_type, next_page) = Self::peek(page_num, buf)?;
        let is_leaf = page_type == PageType::BTreeLeaf;

        let count = get_i32(buf, COUNT_OFFSET);
        if count < 0 || count as usize * SLOT_SIZE > NODE_CAPACITY {
            return Err(corrupted(page_num, format!("slot count {}", count)));
        }
        let count = count as usize;
        let payload_limit = NODE_CAPACITY - count * SLOT_SIZE;

        let mut slots = Vec::with_capacity(count);
        for i in 0..count {
            let pos = Self::slot_position(i);
            let slot = Slot::from_bytes(&buf[pos..pos + SLOT_SIZE]);
            if slot.is_tombstone() {
                slots.push(None);
                continue;
            }
            if slot.offset < 0 || slot.length <= 0 || slot.end() > payload_limit {
                return Err(corrupted(
                    page_num,
                    format!("slot {} out of bounds ({}, {})", i, slot.offset, slot.length),
                ));
            }
            let bytes = &buf[slot.offset as usize..slot.end()];
            slots.push(Some(NodeEntry::decode(page_num, key_type, is_leaf, bytes)?));
        }

        let node = Self {
            page_type,
            next_page,
            slots,
        };
        let stored_free = get_i32(buf, FREE_SPACE_OFFSET);
        if stored_free != node.free_space() as i32 {
            return Err(corrupted(
                page_num,
                format!(
                    "free space {} does not match contents ({})",
                    stored_free,
                    node.free_space()
                ),
            ));
        }
        Ok(node)
    }

    /// Encodes the node into a page image.
    pub fn encode(&self) -> PageBuf {
        let mut buf = empty_page();
        let mut payload = Vec::with_capacity(NODE_CAPACITY);
        for (i, slot) in self.slots.iter().enumerate() {
            let entry_slot = match slot {
                Some(entry) => {
                    let offset = payload.len();
                    entry.encode_into(&mut payload);
                    Slot::new(offset, payload.len() - offset)
                }
                None => Slot::TOMBSTONE,
            };
            let pos = Self::slot_position(i);
            buf[pos..pos + SLOT_SIZE].copy_from_slice(&entry_slot.to_bytes());
        }
        buf[..payload.len()].copy_from_slice(&payload);

        buf[TYPE_OFFSET] = self.page_type as u8;
        put_i32(&mut buf, FREE_SPACE_OFFSET, self.free_space() as i32);
        put_i32(
            &mut buf,
            NEXT_PAGE_OFFSET,
            self.next_page.map_or(NO_PAGE, |p| p as i32),
        );
        put_i32(&mut buf, COUNT_OFFSET, self.slots.len() as i32);
        buf
    }

    /// Returns true for leaf nodes.
    pub fn is_leaf(&self) -> bool {
        self.page_type == PageType::BTreeLeaf
    }

    /// Right sibling of a leaf, leftmost child of an intermediate node.
    pub fn next_page(&self) -> Option<PageNum> {
        self.next_page
    }

    pub fn set_next_page(&mut self, next_page: Option<PageNum>) {
        self.next_page = next_page;
    }

    /// Number of directory slots, deleted ones included.
    pub fn slot_count(&self) -> usize {
        self.slots.len()
    }

    /// Returns the entry at a slot, or None if it was deleted.
    pub fn entry(&self, slot: usize) -> Option<&NodeEntry> {
        self.slots.get(slot).and_then(Option::as_ref)
    }

    /// Iterates over live entries in order.
    pub fn entries(&self) -> impl Iterator<Item = &NodeEntry> {
        self.slots.iter().flatten()
    }

    /// Number of live entries.
    pub fn len(&self) -> usize {
        self.entries().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Child pages of an intermediate node, leftmost first.
    pub fn children(&self) -> Vec<PageNum> {
        if self.is_leaf() {
            return Vec::new();
        }
        self.next_page
            .into_iter()
            .chain(self.entries().filter_map(|e| e.child))
            .collect()
    }

    /// Bytes taken by live entries and the directory.
    fn used_bytes(&self) -> usize {
        let entries: usize = self.entries().map(NodeEntry::encoded_size).sum();
        entries + self.slots.len() * SLOT_SIZE
    }

    /// Free bytes between the payload and the directory.
    pub fn free_space(&self) -> usize {
        NODE_CAPACITY.saturating_sub(self.used_bytes())
    }

    /// Returns true if an entry of `data_space` bytes fits, counting the
    /// directory slot it needs and the slots compaction would reclaim.
    pub fn has_space(&self, data_space: usize) -> bool {
        let reclaimable = self.slots.iter().filter(|s| s.is_none()).count() * SLOT_SIZE;
        self.free_space() + reclaimable >= data_space + SLOT_SIZE
    }

    /// Finds the child subtree covering `key`.
    ///
    /// With a RID, entries are compared as `(key, rid)` and the child of the
    /// last entry not greater than the target is chosen. Without one, the
    /// child of the last entry with a strictly smaller key is chosen, which
    /// leads to the leftmost leaf that may hold `key`. Returns the child and
    /// the slot an entry for the target would be inserted at.
    pub fn find_child_node(&self, key: &Value, rid: Option<Rid>) -> Result<(PageNum, usize)> {
        if self.is_leaf() {
            return Err(KestrelError::Internal(
                "child lookup on a leaf node".to_string(),
            ));
        }
        let mut child = self.next_page.ok_or_else(|| {
            KestrelError::BTreeCorrupted("intermediate node without leftmost child".to_string())
        })?;
        let mut index = 0;
        for (i, slot) in self.slots.iter().enumerate() {
            let Some(entry) = slot else { continue };
            let covers = match rid {
                Some(rid) => compare_entries(&entry.key, entry.rid, key, rid) != Ordering::Greater,
                None => compare_keys(&entry.key, key) == Ordering::Less,
            };
            if !covers {
                break;
            }
            child = entry.child.ok_or_else(|| {
                KestrelError::BTreeCorrupted("intermediate entry without child".to_string())
            })?;
            index = i + 1;
        }
        Ok((child, index))
    }

    /// Binary search for an exact `(key, rid)` entry.
    ///
    /// Returns `Ok(slot)` when found, `Err(slot)` with the insertion point
    /// otherwise.
    pub fn find_key(&self, key: &Value, rid: Rid) -> std::result::Result<usize, usize> {
        let live: Vec<usize> = self
            .slots
            .iter()
            .enumerate()
            .filter_map(|(i, s)| s.as_ref().map(|_| i))
            .collect();
        let found = live.binary_search_by(|&i| match &self.slots[i] {
            Some(entry) => compare_entries(&entry.key, entry.rid, key, rid),
            None => Ordering::Less,
        });
        match found {
            Ok(pos) => Ok(live[pos]),
            Err(pos) => Err(live.get(pos).copied().unwrap_or(self.slots.len())),
        }
    }

    /// Inserts a leaf entry in order. Returns its slot.
    pub fn insert_key(&mut self, key: Value, rid: Rid) -> Result<usize> {
        if !self.is_leaf() {
            return Err(KestrelError::Internal(
                "leaf insert into an intermediate node".to_string(),
            ));
        }
        self.insert_entry(NodeEntry::leaf(key, rid))
    }

    /// Inserts an intermediate entry in order. Returns its slot.
    pub fn insert_child(&mut self, key: Value, rid: Rid, child: PageNum) -> Result<usize> {
        if self.is_leaf() {
            return Err(KestrelError::Internal(
                "child insert into a leaf node".to_string(),
            ));
        }
        self.insert_entry(NodeEntry::intermediate(key, rid, child))
    }

    /// Places an entry without compacting the directory when it fits.
    ///
    /// A tombstone directly before the insertion point is reused, so no
    /// other slot moves. Otherwise later slots shift right by one. The
    /// directory is compacted only when the node is out of room without it.
    fn insert_entry(&mut self, entry: NodeEntry) -> Result<usize> {
        let mut index = match self.find_key(&entry.key, entry.rid) {
            Ok(_) => return Err(KestrelError::DuplicateKey),
            Err(index) => index,
        };
        let size = entry.encoded_size();
        if index > 0 && self.slots[index - 1].is_none() && self.free_space() >= size {
            self.slots[index - 1] = Some(entry);
            return Ok(index - 1);
        }
        if self.free_space() < size + SLOT_SIZE {
            if !self.has_space(size) {
                return Err(KestrelError::PageFull);
            }
            self.clean_directory();
            index = match self.find_key(&entry.key, entry.rid) {
                Ok(_) => return Err(KestrelError::DuplicateKey),
                Err(index) => index,
            };
        }
        self.slots.insert(index, Some(entry));
        Ok(index)
    }

    /// Deletes a leaf entry, leaving its slot as a tombstone.
    pub fn delete_key(&mut self, key: &Value, rid: Rid) -> Result<()> {
        match self.find_key(key, rid) {
            Ok(slot) => {
                self.slots[slot] = None;
                Ok(())
            }
            Err(_) => Err(KestrelError::KeyNotFound),
        }
    }

    /// Drops tombstoned slots from the directory.
    pub fn clean_directory(&mut self) {
        self.slots.retain(Option::is_some);
    }

    /// Splits the node at half of its occupied bytes.
    ///
    /// Returns the new right sibling and the `(key, rid)` separator the
    /// parent must point at it with. For leaves the separator is the
    /// sibling's first entry and the sibling inherits this node's right
    /// link; the caller links this node to the sibling once the sibling has
    /// a page. For intermediate nodes the separator entry moves up: its child
    /// becomes the sibling's leftmost child and it is kept in neither half.
    pub fn split(&mut self) -> Result<(BTreeNode, Value, Rid)> {
        self.clean_directory();
        let min_entries = if self.is_leaf() { 2 } else { 3 };
        if self.slots.len() < min_entries {
            return Err(KestrelError::BTreeCorrupted(format!(
                "cannot split a node with {} entries",
                self.slots.len()
            )));
        }

        let mut left: Vec<NodeEntry> = std::mem::take(&mut self.slots).into_iter().flatten().collect();
        let total: usize = left.iter().map(|e| e.encoded_size() + SLOT_SIZE).sum();
        let mut split_at = 0;
        let mut acc = 0;
        for entry in &left {
            if acc * 2 >= total {
                break;
            }
            acc += entry.encoded_size() + SLOT_SIZE;
            split_at += 1;
        }
        let keep_right = if self.is_leaf() { 1 } else { 2 };
        let split_at = split_at.clamp(1, left.len() - keep_right);
        let mut right = left.split_off(split_at);
        self.slots = left.into_iter().map(Some).collect();

        if self.is_leaf() {
            let separator = (right[0].key.clone(), right[0].rid);
            let sibling = BTreeNode {
                page_type: PageType::BTreeLeaf,
                next_page: self.next_page,
                slots: right.into_iter().map(Some).collect(),
            };
            return Ok((sibling, separator.0, separator.1));
        }

        let pushed = right.remove(0);
        let leftmost = pushed.child.ok_or_else(|| {
            KestrelError::BTreeCorrupted("intermediate entry without child".to_string())
        })?;
        let sibling = BTreeNode {
            page_type: PageType::BTreeInternal,
            next_page: Some(leftmost),
            slots: right.into_iter().map(Some).collect(),
        };
        Ok((sibling, pushed.key, pushed.rid))
    }
}
