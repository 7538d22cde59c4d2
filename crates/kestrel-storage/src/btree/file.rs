//! IndexFile: node-level access to an open index file.

use super::constants::NO_PAGE;
use super::node::BTreeNode;
use crate::disk::{root_pointer_page, FileHandle, FileKind};
use crate::freespace::PageCounters;
use kestrel_common::page::{get_i32, PageBuf, PageNum, PageType};
use kestrel_common::{AttrType, KestrelError, Result};
use tracing::trace;

/// Hidden page holding the root page number.
const ROOT_POINTER_PAGE: u32 = 1;

/// An open index file.
///
/// The root page number lives on a hidden page and is `None` until the
/// first insert. With the node cache enabled the most recently read page is
/// kept in memory; any write or append drops it.
pub struct IndexFile {
    handle: FileHandle,
    root: Option<PageNum>,
    cache_enabled: bool,
    cache: Option<(PageNum, Box<PageBuf>)>,
}

impl IndexFile {
    /// Creates an index file over an open index-kind handle.
    pub fn new(mut handle: FileHandle, cache_enabled: bool) -> Result<Self> {
        if handle.kind() != FileKind::Index {
            return Err(KestrelError::InvalidParameter {
                name: "file kind".to_string(),
                value: format!("{:?}", handle.kind()),
            });
        }
        let pointer = handle.read_meta_page(ROOT_POINTER_PAGE)?;
        let root = match get_i32(&pointer, 0) {
            NO_PAGE => None,
            raw if raw < 0 || raw as u32 >= handle.num_pages() => {
                return Err(KestrelError::BTreeCorrupted(format!(
                    "root pointer {} outside {} pages",
                    raw,
                    handle.num_pages()
                )))
            }
            raw => Some(raw as PageNum),
        };

        Ok(Self {
            handle,
            root,
            cache_enabled,
            cache: None,
        })
    }

    /// Returns the underlying file handle.
    pub fn handle(&self) -> &FileHandle {
        &self.handle
    }

    /// Returns the page I/O counters.
    pub fn counters(&self) -> PageCounters {
        self.handle.counters()
    }

    /// Number of node pages.
    pub fn num_pages(&self) -> u32 {
        self.handle.num_pages()
    }

    /// Returns the root page, None for an empty tree.
    pub fn root(&self) -> Option<PageNum> {
        self.root
    }

    /// Persists a new root page number.
    pub(crate) fn set_root(&mut self, root: PageNum) -> Result<()> {
        self.handle
            .write_meta_page(ROOT_POINTER_PAGE, &root_pointer_page(Some(root)))?;
        self.root = Some(root);
        Ok(())
    }

    fn read_raw(&mut self, page_num: PageNum) -> Result<PageBuf> {
        if let Some((cached, page)) = &self.cache {
            if *cached == page_num {
                trace!(page = page_num, "node cache hit");
                return Ok(**page);
            }
        }
        let page = self.handle.read_page(page_num)?;
        if self.cache_enabled {
            self.cache = Some((page_num, Box::new(page)));
        }
        Ok(page)
    }

    /// Reads and decodes a node whose keys are `key_type`.
    pub fn read_node(&mut self, page_num: PageNum, key_type: AttrType) -> Result<BTreeNode> {
        let page = self.read_raw(page_num)?;
        BTreeNode::decode(page_num, &page, key_type)
    }

    /// Encodes and writes a node.
    pub fn write_node(&mut self, page_num: PageNum, node: &BTreeNode) -> Result<()> {
        self.cache = None;
        self.handle.write_page(page_num, &node.encode())
    }

    /// Appends a node and returns its page.
    pub fn append_node(&mut self, node: &BTreeNode) -> Result<PageNum> {
        self.cache = None;
        self.handle.append_page(&node.encode())
    }

    /// Number of levels on the leftmost path, 0 for an empty tree.
    pub fn height(&mut self) -> Result<usize> {
        let mut current = self.root;
        let mut height = 0;
        while let Some(page_num) = current {
            let page = self.read_raw(page_num)?;
            let (page_type, next_page) = BTreeNode::peek(page_num, &page)?;
            height += 1;
            current = match page_type {
                PageType::BTreeInternal => next_page,
                _ => None,
            };
        }
        Ok(height)
    }

    /// Persists the file header and closes the file. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        self.cache = None;
        self.handle.close()
    }
}
