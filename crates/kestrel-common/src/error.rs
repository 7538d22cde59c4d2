//! Error types for KestrelDB.

use thiserror::Error;

/// Result type alias using KestrelError.
pub type Result<T> = std::result::Result<T, KestrelError>;

/// Status code reported for a successful operation.
pub const SUCCESS: i32 = 0;

/// Status code reported for any failed operation.
pub const FAILURE: i32 = -1;

/// Status code that terminates record and index scans.
pub const EOF: i32 = -2;

/// Errors that can occur in KestrelDB operations.
#[derive(Debug, Error)]
pub enum KestrelError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // File lifecycle errors
    #[error("File already exists: {0}")]
    FileExists(String),

    #[error("File not found: {0}")]
    FileNotFound(String),

    #[error("File already open: {0}")]
    FileAlreadyOpen(String),

    #[error("File not open")]
    FileNotOpen,

    #[error("File full: header tracks at most {max_pages} data pages")]
    FileFull { max_pages: usize },

    // Page errors
    #[error("Page not found: {page_num}")]
    PageNotFound { page_num: u32 },

    #[error("Page full, unable to insert record")]
    PageFull,

    #[error("Page corrupted: {page_num}, reason: {reason}")]
    PageCorrupted { page_num: u32, reason: String },

    // Record errors
    #[error("Record not found: {0}")]
    RecordNotFound(String),

    #[error("Record too large: {size} bytes (max {max})")]
    RecordTooLarge { size: usize, max: usize },

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Attribute not found: {0}")]
    AttributeNotFound(String),

    // B+ tree errors
    #[error("Key not found")]
    KeyNotFound,

    #[error("Duplicate key")]
    DuplicateKey,

    #[error("Key too large: {size} bytes (max {max})")]
    KeyTooLarge { size: usize, max: usize },

    #[error("B+ tree corrupted: {0}")]
    BTreeCorrupted(String),

    // Configuration errors
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Invalid parameter: {name} = {value}")]
    InvalidParameter { name: String, value: String },

    // Internal errors
    #[error("Internal error: {0}")]
    Internal(String),
}

impl KestrelError {
    /// Integer status code for callers that speak the return-code protocol.
    ///
    /// Failure kinds are not distinguished at this boundary.
    pub fn code(&self) -> i32 {
        FAILURE
    }

    /// Returns true for errors that mean "the addressed thing does not exist".
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            KestrelError::FileNotFound(_)
                | KestrelError::PageNotFound { .. }
                | KestrelError::RecordNotFound(_)
                | KestrelError::AttributeNotFound(_)
                | KestrelError::KeyNotFound
        )
    }
}

/// Maps an operation result onto the integer status protocol.
pub fn status_code<T>(result: &Result<T>) -> i32 {
    match result {
        Ok(_) => SUCCESS,
        Err(e) => e.code(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_io_error_conversion() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: KestrelError = io_err.into();
        assert!(matches!(err, KestrelError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_file_errors_display() {
        let err = KestrelError::FileExists("emp.tbl".to_string());
        assert_eq!(err.to_string(), "File already exists: emp.tbl");

        let err = KestrelError::FileAlreadyOpen("emp.tbl".to_string());
        assert_eq!(err.to_string(), "File already open: emp.tbl");

        let err = KestrelError::FileFull { max_pages: 2040 };
        assert_eq!(
            err.to_string(),
            "File full: header tracks at most 2040 data pages"
        );
    }

    #[test]
    fn test_page_errors_display() {
        let err = KestrelError::PageNotFound { page_num: 42 };
        assert_eq!(err.to_string(), "Page not found: 42");

        let err = KestrelError::PageCorrupted {
            page_num: 7,
            reason: "slot out of range".to_string(),
        };
        assert_eq!(err.to_string(), "Page corrupted: 7, reason: slot out of range");
    }

    #[test]
    fn test_record_errors_display() {
        let err = KestrelError::RecordTooLarge {
            size: 5000,
            max: 4088,
        };
        assert_eq!(err.to_string(), "Record too large: 5000 bytes (max 4088)");

        let err = KestrelError::AttributeNotFound("salary".to_string());
        assert_eq!(err.to_string(), "Attribute not found: salary");
    }

    #[test]
    fn test_btree_errors_display() {
        assert_eq!(KestrelError::KeyNotFound.to_string(), "Key not found");
        assert_eq!(KestrelError::DuplicateKey.to_string(), "Duplicate key");

        let err = KestrelError::KeyTooLarge {
            size: 2000,
            max: 1000,
        };
        assert_eq!(err.to_string(), "Key too large: 2000 bytes (max 1000)");
    }

    #[test]
    fn test_status_codes() {
        let ok: Result<()> = Ok(());
        assert_eq!(status_code(&ok), SUCCESS);

        let err: Result<()> = Err(KestrelError::KeyNotFound);
        assert_eq!(status_code(&err), FAILURE);
        assert!(FAILURE < 0);
        assert!(EOF < 0);
        assert_ne!(EOF, FAILURE);
    }

    #[test]
    fn test_is_not_found() {
        assert!(KestrelError::KeyNotFound.is_not_found());
        assert!(KestrelError::RecordNotFound("0:0".to_string()).is_not_found());
        assert!(!KestrelError::PageFull.is_not_found());
        assert!(!KestrelError::DuplicateKey.is_not_found());
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<KestrelError>();
    }
}
