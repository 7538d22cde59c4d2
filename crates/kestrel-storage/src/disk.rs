//! Paged file I/O: file lifecycle and page-level reads and writes.
//!
//! A paged file is a sequence of 4 KB pages. The first pages are hidden:
//! page 0 is always the header (counters and free space map), and index
//! files reserve one more page for the root pointer. Callers address the
//! remaining pages with a zero-based `PageNum`.

use crate::freespace::{FileHeader, PageCounters};
use kestrel_common::page::{PageBuf, PageNum, PAGE_SIZE};
use kestrel_common::{KestrelError, Result, StorageConfig};
use parking_lot::{const_mutex, Mutex};
use std::collections::BTreeSet;
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

/// What a paged file stores, which fixes its number of hidden pages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    /// Slotted data pages. One hidden header page.
    Record,
    /// B+ tree nodes. Header page plus a root-pointer page.
    Index,
}

impl FileKind {
    /// Number of hidden pages at the start of the file.
    pub fn hidden_pages(self) -> u32 {
        match self {
            FileKind::Record => 1,
            FileKind::Index => 2,
        }
    }
}

/// Canonical paths of files with a live handle, shared by every manager
/// in the process.
static OPEN_FILES: Mutex<BTreeSet<PathBuf>> = const_mutex(BTreeSet::new());

/// Creates, destroys, opens and closes paged files.
///
/// Relative file names resolve against the configured data directory. A
/// file can be open through at most one handle in the process at a time,
/// whichever manager opened it.
#[derive(Debug, Clone)]
pub struct FileManager {
    /// Configuration.
    config: StorageConfig,
}

impl FileManager {
    /// Creates a new file manager, creating the data directory if missing.
    pub fn new(config: StorageConfig) -> Result<Self> {
        config.validate()?;
        std::fs::create_dir_all(&config.data_dir)?;

        Ok(Self { config })
    }

    /// Returns the configuration.
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Returns the data directory path.
    pub fn data_dir(&self) -> &Path {
        &self.config.data_dir
    }

    /// Creates a new paged file with zeroed counters and its hidden pages.
    pub fn create_file(&self, name: impl AsRef<Path>, kind: FileKind) -> Result<()> {
        let path = self.config.resolve(name);
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                std::io::ErrorKind::AlreadyExists => {
                    KestrelError::FileExists(path.display().to_string())
                }
                _ => KestrelError::Io(e),
            })?;

        let hidden = kind.hidden_pages();
        file.write_all(&FileHeader::new(hidden).to_page())?;
        if kind == FileKind::Index {
            file.write_all(&root_pointer_page(None))?;
        }
        if self.config.fsync_enabled {
            file.sync_all()?;
        }

        debug!(path = %path.display(), ?kind, "created paged file");
        Ok(())
    }

    /// Deletes a paged file. The file must exist and must not be open.
    pub fn destroy_file(&self, name: impl AsRef<Path>) -> Result<()> {
        let path = self.config.resolve(name);
        if !path.exists() {
            return Err(KestrelError::FileNotFound(path.display().to_string()));
        }
        let canonical = std::fs::canonicalize(&path)?;
        if OPEN_FILES.lock().contains(&canonical) {
            return Err(KestrelError::FileAlreadyOpen(path.display().to_string()));
        }
        std::fs::remove_file(&path)?;

        debug!(path = %path.display(), "destroyed paged file");
        Ok(())
    }

    /// Opens a paged file, loading its counters and free space map.
    pub fn open_file(&self, name: impl AsRef<Path>, kind: FileKind) -> Result<FileHandle> {
        let path = self.config.resolve(name);
        if !path.exists() {
            return Err(KestrelError::FileNotFound(path.display().to_string()));
        }
        let canonical = std::fs::canonicalize(&path)?;

        let mut open_files = OPEN_FILES.lock();
        if open_files.contains(&canonical) {
            return Err(KestrelError::FileAlreadyOpen(path.display().to_string()));
        }

        let mut file = OpenOptions::new().read(true).write(true).open(&canonical)?;
        let file_size = file.metadata()?.len();
        let total_pages = (file_size / PAGE_SIZE as u64) as u32;
        let hidden = kind.hidden_pages();
        if total_pages < hidden {
            return Err(KestrelError::PageCorrupted {
                page_num: 0,
                reason: format!("file has {} pages, expected at least {}", total_pages, hidden),
            });
        }
        let num_pages = total_pages - hidden;

        let mut buf = [0u8; PAGE_SIZE];
        file.seek(SeekFrom::Start(0))?;
        file.read_exact(&mut buf)?;
        let mut header = FileHeader::from_page(&buf)?;

        if kind == FileKind::Record {
            let tracked = header.space_map.len() as u32;
            if tracked > num_pages {
                return Err(KestrelError::PageCorrupted {
                    page_num: 0,
                    reason: format!("header tracks {} pages, file has {}", tracked, num_pages),
                });
            }
            // Pages appended after the last header write are treated as full.
            for _ in tracked..num_pages {
                header.space_map.push_full()?;
            }
        }

        open_files.insert(canonical.clone());
        debug!(path = %canonical.display(), ?kind, num_pages, "opened paged file");

        Ok(FileHandle {
            file: Some(file),
            path: canonical,
            kind,
            header,
            num_pages,
            fsync_enabled: self.config.fsync_enabled,
        })
    }

    /// Closes a handle, persisting its header. Closing twice is a no-op.
    pub fn close_file(&self, handle: &mut FileHandle) -> Result<()> {
        handle.close()
    }

    /// Returns true if the named file currently has an open handle.
    pub fn is_open(&self, name: impl AsRef<Path>) -> bool {
        let path = self.config.resolve(name);
        match std::fs::canonicalize(&path) {
            Ok(canonical) => OPEN_FILES.lock().contains(&canonical),
            Err(_) => false,
        }
    }
}

/// Encodes the root-pointer page of an index file.
pub(crate) fn root_pointer_page(root: Option<PageNum>) -> PageBuf {
    let mut buf = [0u8; PAGE_SIZE];
    let raw = root.map_or(-1, |p| p as i32);
    buf[0..4].copy_from_slice(&raw.to_le_bytes());
    buf
}

/// Handle for an open paged file.
///
/// Dropping the handle closes it.
pub struct FileHandle {
    /// The OS file, None once closed.
    file: Option<File>,
    /// Canonical path of the file.
    path: PathBuf,
    kind: FileKind,
    /// Counters and free space map, written back on close.
    header: FileHeader,
    /// Number of visible pages.
    num_pages: u32,
    fsync_enabled: bool,
}

impl FileHandle {
    /// Returns the canonical path of the file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Returns the kind of file.
    pub fn kind(&self) -> FileKind {
        self.kind
    }

    /// Returns true until the handle is closed.
    pub fn is_open(&self) -> bool {
        self.file.is_some()
    }

    /// Returns the number of visible pages.
    pub fn num_pages(&self) -> u32 {
        self.num_pages
    }

    /// Returns the read, write and append counters.
    pub fn counters(&self) -> PageCounters {
        self.header.counters
    }

    fn file_mut(&mut self) -> Result<&mut File> {
        self.file.as_mut().ok_or(KestrelError::FileNotOpen)
    }

    fn offset_of(&self, page_num: PageNum) -> u64 {
        (self.kind.hidden_pages() as u64 + page_num as u64) * PAGE_SIZE as u64
    }

    fn check_page(&self, page_num: PageNum) -> Result<()> {
        if self.file.is_none() {
            return Err(KestrelError::FileNotOpen);
        }
        if page_num >= self.num_pages {
            return Err(KestrelError::PageNotFound { page_num });
        }
        Ok(())
    }

    fn write_at(&mut self, offset: u64, data: &PageBuf) -> Result<()> {
        let fsync = self.fsync_enabled;
        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(offset))?;
        file.write_all(data)?;
        if fsync {
            file.sync_all()?;
        }
        Ok(())
    }

    fn read_at(&mut self, offset: u64) -> Result<PageBuf> {
        let file = self.file_mut()?;
        file.seek(SeekFrom::Start(offset))?;
        let mut buffer = [0u8; PAGE_SIZE];
        file.read_exact(&mut buffer)?;
        Ok(buffer)
    }

    /// Reads a visible page.
    pub fn read_page(&mut self, page_num: PageNum) -> Result<PageBuf> {
        self.check_page(page_num)?;
        let buffer = self.read_at(self.offset_of(page_num))?;
        self.header.counters.read += 1;
        trace!(page = page_num, "read page");
        Ok(buffer)
    }

    /// Overwrites a visible page.
    pub fn write_page(&mut self, page_num: PageNum, data: &PageBuf) -> Result<()> {
        self.check_page(page_num)?;
        self.write_at(self.offset_of(page_num), data)?;
        self.header.counters.write += 1;
        trace!(page = page_num, "wrote page");
        Ok(())
    }

    /// Appends a page and returns its number.
    ///
    /// In record files the new page's free space is recorded as zero until
    /// the caller sets it with `set_page_space`.
    pub fn append_page(&mut self, data: &PageBuf) -> Result<PageNum> {
        if self.file.is_none() {
            return Err(KestrelError::FileNotOpen);
        }
        if self.kind == FileKind::Record {
            self.header.space_map.check_room()?;
        }
        let page_num = self.num_pages;
        self.write_at(self.offset_of(page_num), data)?;
        // The map only tracks pages that made it to disk.
        if self.kind == FileKind::Record {
            self.header.space_map.push_full()?;
        }
        self.num_pages += 1;
        self.header.counters.append += 1;
        debug!(path = %self.path.display(), page = page_num, "appended page");
        Ok(page_num)
    }

    /// Records the free bytes of a data page.
    pub fn set_page_space(&mut self, page_num: PageNum, free_bytes: u16) -> Result<()> {
        self.header.space_map.set(page_num, free_bytes)
    }

    /// Returns the recorded free bytes of a data page.
    pub fn page_space(&self, page_num: PageNum) -> Option<u16> {
        self.header.space_map.get(page_num)
    }

    /// Returns the last page whose recorded free space exceeds `bytes_needed`.
    pub fn find_free_page(&self, bytes_needed: usize) -> Option<PageNum> {
        self.header.space_map.find_page_with(bytes_needed)
    }

    fn check_meta_page(&self, index: u32) -> Result<()> {
        if index == 0 || index >= self.kind.hidden_pages() {
            return Err(KestrelError::InvalidParameter {
                name: "meta_page".to_string(),
                value: index.to_string(),
            });
        }
        Ok(())
    }

    /// Reads a hidden page after the header. Not counted.
    pub fn read_meta_page(&mut self, index: u32) -> Result<PageBuf> {
        self.check_meta_page(index)?;
        self.read_at(index as u64 * PAGE_SIZE as u64)
    }

    /// Writes a hidden page after the header. Not counted.
    pub fn write_meta_page(&mut self, index: u32, data: &PageBuf) -> Result<()> {
        self.check_meta_page(index)?;
        self.write_at(index as u64 * PAGE_SIZE as u64, data)
    }

    /// Persists the header and releases the file. Idempotent.
    pub fn close(&mut self) -> Result<()> {
        if self.file.is_none() {
            return Ok(());
        }
        let header = self.header.to_page();
        let result = self.write_at(0, &header).and_then(|_| {
            self.file_mut()?.sync_all()?;
            Ok(())
        });

        // Release the registration even if the final write failed.
        self.file = None;
        OPEN_FILES.lock().remove(&self.path);
        debug!(path = %self.path.display(), "closed paged file");
        result
    }
}

impl Drop for FileHandle {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
