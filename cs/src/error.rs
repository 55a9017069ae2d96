//! Chunk store and item codec error types

use std::path::PathBuf;
use thiserror::Error;

/// Errors from chunk store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error during {op} on {path}: {source}")]
    Io {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Chunk {id} not found (store holds {count} chunks)")]
    NotFound { id: u64, count: usize },

    #[error("Chunk of {len} bytes exceeds the 4-byte frame limit")]
    ChunkTooLarge { len: usize },
}

impl StoreError {
    pub(crate) fn io(op: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            op,
            path: path.into(),
            source,
        }
    }
}

/// Errors from encoding or decoding a catalog item
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("Truncated item: {field} needs {needed} bytes, {remaining} remain")]
    Truncated {
        field: &'static str,
        needed: usize,
        remaining: usize,
    },

    #[error("Field {field} is {len} bytes, limit is {max}")]
    FieldTooLong {
        field: &'static str,
        len: usize,
        max: usize,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_message() {
        let err = StoreError::NotFound { id: 12, count: 3 };
        assert_eq!(err.to_string(), "Chunk 12 not found (store holds 3 chunks)");
    }

    #[test]
    fn test_io_error_keeps_source() {
        let err = StoreError::io(
            "read",
            "/tmp/catalog000",
            std::io::Error::new(std::io::ErrorKind::UnexpectedEof, "short read"),
        );
        assert!(err.to_string().contains("read"));
        assert!(err.to_string().contains("/tmp/catalog000"));
        assert!(std::error::Error::source(&err).is_some());
    }

    #[test]
    fn test_truncated_message() {
        let err = CodecError::Truncated {
            field: "description",
            needed: 10,
            remaining: 4,
        };
        assert_eq!(err.to_string(), "Truncated item: description needs 10 bytes, 4 remain");
    }
}
