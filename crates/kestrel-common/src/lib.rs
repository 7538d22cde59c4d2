//! KestrelDB common types, errors, and configuration.
//!
//! This crate provides shared definitions used across all KestrelDB components.

pub mod config;
pub mod error;
pub mod page;
pub mod types;

pub use config::StorageConfig;
pub use error::{KestrelError, Result};
pub use page::{PageBuf, PageNum, PageType, PAGE_SIZE};
pub use types::{AttrType, Attribute, CompOp, Value};
