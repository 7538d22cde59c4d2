//! Configuration structures for KestrelDB.

use crate::error::{KestrelError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Storage configuration for the record and index file managers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory that relative file names resolve against.
    pub data_dir: PathBuf,
    /// Call `sync_all` after every page write.
    pub fsync_enabled: bool,
    /// Keep the most recently read index node in memory.
    pub index_node_cache: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            fsync_enabled: false,
            index_node_cache: true,
        }
    }
}

impl StorageConfig {
    /// Creates a config rooted at the given data directory, other fields default.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Default::default()
        }
    }

    /// Checks that the configuration is usable.
    pub fn validate(&self) -> Result<()> {
        if self.data_dir.as_os_str().is_empty() {
            return Err(KestrelError::ConfigError(
                "data_dir must not be empty".to_string(),
            ));
        }
        Ok(())
    }

    /// Resolves a file name against `data_dir`. Absolute paths pass through.
    pub fn resolve(&self, name: impl AsRef<Path>) -> PathBuf {
        let name = name.as_ref();
        if name.is_absolute() {
            name.to_path_buf()
        } else {
            self.data_dir.join(name)
        }
    }
}
