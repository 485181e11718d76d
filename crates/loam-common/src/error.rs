//! Error types for LoamDB.

use thiserror::Error;

/// Result type alias using LoamError.
pub type Result<T> = std::result::Result<T, LoamError>;

/// Errors that can occur in LoamDB operations.
///
/// A missing key is not an error: lookups return `Ok(None)` instead.
#[derive(Debug, Error)]
pub enum LoamError {
    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Lifecycle errors
    #[error("tree is closed")]
    Closed,

    #[error("tree poisoned by earlier {0} failure")]
    Poisoned(&'static str),

    // On-disk structure errors
    #[error("corrupt page {page}: {reason}")]
    CorruptPage { page: u64, reason: String },

    #[error("corrupt WAL: {0}")]
    CorruptWal(String),

    // Configuration errors
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("configuration mismatch for {field}: file has {on_disk}, caller requested {requested}")]
    ConfigMismatch {
        field: &'static str,
        on_disk: u32,
        requested: u32,
    },

    // Argument errors
    #[error("key is {size} bytes, configured key size is {expected}")]
    BadKeySize { size: usize, expected: usize },

    #[error("value is {size} bytes, maximum representable is {max}")]
    ValueTooLarge { size: usize, max: usize },
}

impl LoamError {
    /// Returns a short label when this error must poison the tree instance.
    ///
    /// `Io`, `CorruptPage` and `CorruptWal` are fatal: the in-memory state
    /// can no longer be trusted to match the files, so every subsequent
    /// operation fails with [`LoamError::Poisoned`] until reopen.
    pub fn poison_label(&self) -> Option<&'static str> {
        match self {
            LoamError::Io(_) => Some("I/O"),
            LoamError::CorruptPage { .. } => Some("corrupt page"),
            LoamError::CorruptWal(_) => Some("corrupt WAL"),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Error as IoError, ErrorKind};

    #[test]
    fn test_io_error_conversion() {
        let io_err = IoError::new(ErrorKind::NotFound, "file not found");
        let err: LoamError = io_err.into();
        assert!(matches!(err, LoamError::Io(_)));
        assert!(err.to_string().contains("I/O error"));
    }

    #[test]
    fn test_corrupt_page_display() {
        let err = LoamError::CorruptPage {
            page: 42,
            reason: "unknown node kind 9".to_string(),
        };
        assert_eq!(err.to_string(), "corrupt page 42: unknown node kind 9");
    }

    #[test]
    fn test_config_mismatch_display() {
        let err = LoamError::ConfigMismatch {
            field: "page_size",
            on_disk: 4096,
            requested: 8192,
        };
        assert_eq!(
            err.to_string(),
            "configuration mismatch for page_size: file has 4096, caller requested 8192"
        );
    }

    #[test]
    fn test_poison_labels() {
        let io_err: LoamError = IoError::new(ErrorKind::Other, "disk on fire").into();
        assert_eq!(io_err.poison_label(), Some("I/O"));

        let corrupt = LoamError::CorruptWal("bad checksum".to_string());
        assert_eq!(corrupt.poison_label(), Some("corrupt WAL"));

        assert_eq!(LoamError::Closed.poison_label(), None);
        assert_eq!(
            LoamError::BadKeySize {
                size: 9,
                expected: 8
            }
            .poison_label(),
            None
        );
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<LoamError>();
    }
}
