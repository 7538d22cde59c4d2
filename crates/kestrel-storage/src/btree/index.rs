//! IndexManager: index file lifecycle, entry insert/delete, scans and dumps.
//!
//! Inserts descend recursively. A node that overflows splits and hands a
//! separator back to its caller, which inserts it into the parent. When the
//! root splits, a new intermediate root is created above it and the tree
//! grows by one level. Deletes never merge or rebalance nodes.

use super::constants::{CHILD_POINTER_SIZE, MAX_KEY_SIZE};
use super::file::IndexFile;
use super::node::{compare_entries, BTreeNode};
use super::scan::IndexScan;
use crate::disk::{FileKind, FileManager};
use crate::record::Rid;
use kestrel_common::page::PageNum;
use kestrel_common::{AttrType, Attribute, KestrelError, Result, Value};
use serde_json::json;
use std::cmp::Ordering;
use std::path::Path;
use tracing::{debug, trace};

/// Separator produced by a split, to be inserted into the parent.
#[derive(Debug, Clone, PartialEq)]
struct InsertionChild {
    key: Value,
    rid: Rid,
    /// The new right sibling.
    page_num: PageNum,
}

/// Entry point for index files.
pub struct IndexManager {
    files: FileManager,
}

impl IndexManager {
    /// Creates an index manager over a file manager.
    pub fn new(files: FileManager) -> Self {
        Self { files }
    }

    /// Returns the file manager.
    pub fn files(&self) -> &FileManager {
        &self.files
    }

    /// Creates an empty index file. The root is created by the first insert.
    pub fn create_file(&self, name: impl AsRef<Path>) -> Result<()> {
        self.files.create_file(name, FileKind::Index)
    }

    /// Deletes an index file that is not open.
    pub fn destroy_file(&self, name: impl AsRef<Path>) -> Result<()> {
        self.files.destroy_file(name)
    }

    /// Opens an index file.
    pub fn open_file(&self, name: impl AsRef<Path>) -> Result<IndexFile> {
        let handle = self.files.open_file(name, FileKind::Index)?;
        IndexFile::new(handle, self.files.config().index_node_cache)
    }

    /// Closes an index file. Closing twice is a no-op.
    pub fn close_file(&self, file: &mut IndexFile) -> Result<()> {
        file.close()
    }

    /// Inserts the entry `(key, rid)`. `key` is the wire encoding of one
    /// value of `attribute`'s type.
    pub fn insert_entry(
        &self,
        file: &mut IndexFile,
        attribute: &Attribute,
        key: &[u8],
        rid: Rid,
    ) -> Result<()> {
        let key = decode_key(attribute, key)?;
        let key_type = attribute.attr_type;

        let root = match file.root() {
            Some(root) => root,
            None => {
                let root = file.append_node(&BTreeNode::new_leaf())?;
                file.set_root(root)?;
                debug!(root = root, "created root leaf");
                root
            }
        };

        if let Some(child) = insert(file, root, key_type, &key, rid)? {
            let mut new_root = BTreeNode::new_intermediate(root);
            new_root.insert_child(child.key, child.rid, child.page_num)?;
            let new_root_page = file.append_node(&new_root)?;
            file.set_root(new_root_page)?;
            debug!(
                old_root = root,
                new_root = new_root_page,
                "root split, tree grew one level"
            );
        }
        Ok(())
    }

    /// Deletes the entry `(key, rid)`. Fails with `KeyNotFound` if absent.
    pub fn delete_entry(
        &self,
        file: &mut IndexFile,
        attribute: &Attribute,
        key: &[u8],
        rid: Rid,
    ) -> Result<()> {
        let key = decode_key(attribute, key)?;
        let root = file.root().ok_or(KestrelError::KeyNotFound)?;
        let (page_num, mut leaf) = find_leaf(file, root, attribute.attr_type, &key, rid)?;
        leaf.delete_key(&key, rid)?;
        file.write_node(page_num, &leaf)
    }

    /// Starts a scan over entries with keys between `low` and `high`.
    ///
    /// A missing bound is unbounded on that side.
    pub fn scan(
        &self,
        attribute: &Attribute,
        low: Option<&[u8]>,
        high: Option<&[u8]>,
        low_inclusive: bool,
        high_inclusive: bool,
    ) -> Result<IndexScan> {
        let low = low.map(|k| decode_key(attribute, k)).transpose()?;
        let high = high.map(|k| decode_key(attribute, k)).transpose()?;
        Ok(IndexScan::new(
            attribute.attr_type,
            low,
            high,
            low_inclusive,
            high_inclusive,
        ))
    }

    /// Dumps the tree as JSON, pre-order.
    ///
    /// A leaf is `{"keys": ["k:[(p,s),...]", ...]}` with the RIDs of equal
    /// keys grouped. An intermediate node is
    /// `{"keys": ["k", ...], "children": [...]}`. An empty tree is a leaf
    /// without keys.
    pub fn print_btree(&self, file: &mut IndexFile, attribute: &Attribute) -> Result<String> {
        let tree = match file.root() {
            Some(root) => dump_node(file, root, attribute.attr_type)?,
            None => json!({ "keys": [] }),
        };
        Ok(tree.to_string())
    }
}

/// Decodes a wire key and checks its size.
fn decode_key(attribute: &Attribute, key: &[u8]) -> Result<Value> {
    if key.len() > MAX_KEY_SIZE {
        return Err(KestrelError::KeyTooLarge {
            size: key.len(),
            max: MAX_KEY_SIZE,
        });
    }
    let (value, used) = Value::decode(attribute.attr_type, key)?;
    if used != key.len() {
        return Err(KestrelError::SchemaMismatch(format!(
            "{} key for {} has {} trailing bytes",
            attribute.attr_type,
            attribute.name,
            key.len() - used
        )));
    }
    Ok(value)
}

/// Inserts into the subtree at `page_num`. Returns the separator for the
/// caller when the node at `page_num` split.
fn insert(
    file: &mut IndexFile,
    page_num: PageNum,
    key_type: AttrType,
    key: &Value,
    rid: Rid,
) -> Result<Option<InsertionChild>> {
    let mut node = file.read_node(page_num, key_type)?;

    if node.is_leaf() {
        if node.find_key(key, rid).is_ok() {
            return Err(KestrelError::DuplicateKey);
        }
        let size = key.wire_size() + Rid::SIZE;
        if node.has_space(size) {
            node.insert_key(key.clone(), rid)?;
            file.write_node(page_num, &node)?;
            return Ok(None);
        }

        let (mut sibling, sep_key, sep_rid) = node.split()?;
        if compare_entries(key, rid, &sep_key, sep_rid) == Ordering::Less {
            node.insert_key(key.clone(), rid)?;
        } else {
            sibling.insert_key(key.clone(), rid)?;
        }
        let sibling_page = file.append_node(&sibling)?;
        node.set_next_page(Some(sibling_page));
        file.write_node(page_num, &node)?;
        debug!(
            page = page_num,
            sibling = sibling_page,
            left = node.len(),
            right = sibling.len(),
            "split leaf"
        );
        return Ok(Some(InsertionChild {
            key: sep_key,
            rid: sep_rid,
            page_num: sibling_page,
        }));
    }

    let (child_page, _) = node.find_child_node(key, Some(rid))?;
    trace!(from = page_num, to = child_page, "insert descent");
    let Some(child) = insert(file, child_page, key_type, key, rid)? else {
        return Ok(None);
    };

    let size = child.key.wire_size() + Rid::SIZE + CHILD_POINTER_SIZE;
    if node.has_space(size) {
        node.insert_child(child.key, child.rid, child.page_num)?;
        file.write_node(page_num, &node)?;
        return Ok(None);
    }

    let (mut sibling, sep_key, sep_rid) = node.split()?;
    if compare_entries(&child.key, child.rid, &sep_key, sep_rid) == Ordering::Less {
        node.insert_child(child.key, child.rid, child.page_num)?;
    } else {
        sibling.insert_child(child.key, child.rid, child.page_num)?;
    }
    let sibling_page = file.append_node(&sibling)?;
    file.write_node(page_num, &node)?;
    debug!(
        page = page_num,
        sibling = sibling_page,
        "split intermediate node"
    );
    Ok(Some(InsertionChild {
        key: sep_key,
        rid: sep_rid,
        page_num: sibling_page,
    }))
}

/// Descends to the leaf covering `(key, rid)`.
fn find_leaf(
    file: &mut IndexFile,
    root: PageNum,
    key_type: AttrType,
    key: &Value,
    rid: Rid,
) -> Result<(PageNum, BTreeNode)> {
    let mut current = root;
    loop {
        let node = file.read_node(current, key_type)?;
        if node.is_leaf() {
            return Ok((current, node));
        }
        current = node.find_child_node(key, Some(rid))?.0;
    }
}

fn dump_node(
    file: &mut IndexFile,
    page_num: PageNum,
    key_type: AttrType,
) -> Result<serde_json::Value> {
    let node = file.read_node(page_num, key_type)?;

    if node.is_leaf() {
        let mut groups: Vec<(Value, Vec<String>)> = Vec::new();
        for entry in node.entries() {
            let rid = entry.rid.to_string();
            if let Some((key, rids)) = groups.last_mut() {
                if *key == entry.key {
                    rids.push(rid);
                    continue;
                }
            }
            groups.push((entry.key.clone(), vec![rid]));
        }
        let keys: Vec<String> = groups
            .into_iter()
            .map(|(key, rids)| format!("{}:[{}]", key, rids.join(",")))
            .collect();
        return Ok(json!({ "keys": keys }));
    }

    let keys: Vec<String> = node.entries().map(|e| e.key.to_string()).collect();
    let mut children = Vec::new();
    for child in node.children() {
        children.push(dump_node(file, child, key_type)?);
    }
    Ok(json!({ "keys": keys, "children": children }))
}
