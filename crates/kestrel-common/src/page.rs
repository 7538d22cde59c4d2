//! Page structures for KestrelDB storage.
//!
//! Every file is a sequence of fixed-size pages. The first pages of a file are
//! hidden metadata pages; callers address the remaining pages by a zero-based
//! `PageNum`. All multi-byte integers on disk are little-endian.

use serde::{Deserialize, Serialize};

/// Page size in bytes (4 KB).
pub const PAGE_SIZE: usize = 4096;

/// Zero-based index of a visible page within a file.
pub type PageNum = u32;

/// A raw page image.
pub type PageBuf = [u8; PAGE_SIZE];

/// Returns a zeroed page image.
#[inline]
pub fn empty_page() -> PageBuf {
    [0u8; PAGE_SIZE]
}

/// Page types in KestrelDB storage.
///
/// The B+ tree variants are stored as the trailing type byte of an index
/// node; data pages carry no type byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[repr(u8)]
pub enum PageType {
    /// Slotted data page holding records.
    Data = 0,
    /// B+ tree intermediate node.
    BTreeInternal = 1,
    /// B+ tree leaf node.
    BTreeLeaf = 2,
}

impl PageType {
    /// Decodes a stored type byte.
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(PageType::Data),
            1 => Some(PageType::BTreeInternal),
            2 => Some(PageType::BTreeLeaf),
            _ => None,
        }
    }
}

// Little-endian field accessors over page images. Slicing keeps every access
// bounds checked.

#[inline]
pub fn get_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([buf[offset], buf[offset + 1]])
}

#[inline]
pub fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub fn get_i16(buf: &[u8], offset: usize) -> i16 {
    i16::from_le_bytes([buf[offset], buf[offset + 1]])
}

#[inline]
pub fn put_i16(buf: &mut [u8], offset: usize, value: i16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub fn get_u32(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

#[inline]
pub fn put_u32(buf: &mut [u8], offset: usize, value: u32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub fn get_i32(buf: &[u8], offset: usize) -> i32 {
    i32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

#[inline]
pub fn put_i32(buf: &mut [u8], offset: usize, value: i32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}
