//! Error types for the sluice-spool crate.
//!
//! This module provides typed error handling for spool operations including
//! file I/O, record encoding, and validation.

use std::io;

use thiserror::Error;

use crate::SpoolHandle;

/// Top-level spool error type.
#[derive(Debug, Error)]
pub enum SpoolError {
    /// I/O operation failed (file read/write/delete).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Encoding or decoding a record failed.
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    /// Record not found in spool.
    #[error("Record not found: {0}")]
    NotFound(SpoolHandle),

    /// Record already exists in spool.
    #[error("Record already exists: {0}")]
    AlreadyExists(SpoolHandle),

    /// Spool directory validation failed.
    #[error("Spool validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Another process is draining the store.
    #[error("Spool {0} is already being flushed by another process")]
    Busy(String),

    /// A bounded store is full.
    #[error("Spool capacity exceeded: {capacity} records")]
    CapacityExceeded { capacity: usize },

    /// Internal error (lock poisoning, misuse of a drain, etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SpoolError {
    /// Returns `true` if the stored bytes of a record are unusable.
    ///
    /// Such a record can never be delivered and is set aside rather than
    /// retried.
    #[must_use]
    pub const fn is_corruption(&self) -> bool {
        matches!(
            self,
            Self::Serialization(SerializationError::Decode(_) | SerializationError::Corrupted(_))
        )
    }
}

/// Record encoding and decoding errors.
#[derive(Debug, Error)]
pub enum SerializationError {
    /// Bincode serialization failed.
    #[error("Bincode encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    /// Bincode deserialization failed.
    #[error("Bincode decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    /// Record framing is damaged (bad magic, checksum, or length).
    #[error("Corrupted record: {0}")]
    Corrupted(String),
}

/// Spool directory validation errors.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// Spool path contains `..`.
    #[error("Spool path cannot contain '..' components: {0}")]
    ParentDirectory(String),

    /// Spool path is relative.
    #[error("Spool path must be absolute: {0}")]
    NotAbsolute(String),

    /// Spool path points into a system directory.
    #[error("Spool path cannot be in system directory {prefix}: {path}")]
    SystemDirectory { prefix: String, path: String },

    /// Spool path exists but is not a directory.
    #[error("Spool path is not a directory: {0}")]
    NotDirectory(String),
}

/// Specialized `Result` type for spool operations.
pub type Result<T> = std::result::Result<T, SpoolError>;

impl<T> From<std::sync::PoisonError<T>> for SpoolError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Internal(format!("Lock poisoned: {e}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::StorageFull, "no space left on device");
        let spool_err: SpoolError = io_err.into();
        assert!(matches!(spool_err, SpoolError::Io(_)));
        assert!(spool_err.to_string().contains("no space left"));
        assert!(!spool_err.is_corruption());
    }

    #[test]
    fn test_corruption_classification() {
        let err = SpoolError::from(SerializationError::Corrupted("bad magic".to_string()));
        assert!(err.is_corruption());

        let err = SpoolError::CapacityExceeded { capacity: 3 };
        assert!(!err.is_corruption());
        assert_eq!(err.to_string(), "Spool capacity exceeded: 3 records");
    }
}
