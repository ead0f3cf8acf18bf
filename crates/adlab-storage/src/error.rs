//! Error types for adlab-storage
//!
//! Storage-level failures (I/O, verification, corrupt reads) propagate to the
//! caller. Ordering and duplicate conditions are expected under concurrent
//! ingestion and are handled where they occur, so they have no variant here.

use thiserror::Error;

/// Errors that can occur in storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    /// I/O error during storage operations
    #[error("I/O error: {0}")]
    Io(String),

    /// The index stream holds an out-of-sequence or inconsistent entry
    #[error("Verification failed at entry {position}: {reason}")]
    Verification { position: i64, reason: String },

    /// Zero-length payloads are never written
    #[error("Cannot add a zero-length record")]
    EmptyPayload,

    /// Requested record index is beyond the end of the log
    #[error("Record {index} out of range (last index {last})")]
    OutOfRange { index: i64, last: i64 },

    /// A record read returned fewer bytes than its index entry promises
    #[error("Corrupt read of record {index}: expected {expected} bytes, got {actual}")]
    CorruptRead {
        index: i64,
        expected: u64,
        actual: u64,
    },

    /// A byte position outside the frequency grid
    #[error("Position {0} outside the frequency table")]
    PositionOutOfRange(usize),

    /// The store was opened read-only
    #[error("Store {0} is read-only")]
    ReadOnly(String),

    /// Error during serialization
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Error during deserialization
    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}

impl StorageError {
    /// Create a new verification error
    pub fn verification(position: i64, reason: impl Into<String>) -> Self {
        Self::Verification {
            position,
            reason: reason.into(),
        }
    }

    /// Create a new Serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    /// Create a new Deserialization error
    pub fn deserialization(message: impl Into<String>) -> Self {
        Self::Deserialization(message.into())
    }

    /// Whether this error means the data on disk cannot be trusted
    ///
    /// Corruption is not a transient fault and must not be retried.
    pub fn is_corruption(&self) -> bool {
        matches!(
            self,
            StorageError::Verification { .. } | StorageError::CorruptRead { .. }
        )
    }
}

/// Convert from postcard Error to StorageError
impl From<postcard::Error> for StorageError {
    fn from(err: postcard::Error) -> Self {
        StorageError::Deserialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_verification_error() {
        let err = StorageError::verification(3, "index field is 7");
        assert!(matches!(err, StorageError::Verification { position: 3, .. }));
        assert!(err.to_string().contains("entry 3"));
        assert!(err.is_corruption());
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let storage_err: StorageError = io_err.into();
        assert!(matches!(storage_err, StorageError::Io(_)));
        assert!(!storage_err.is_corruption());
    }

    #[test]
    fn test_corrupt_read_is_corruption() {
        let err = StorageError::CorruptRead {
            index: 2,
            expected: 10,
            actual: 0,
        };
        assert!(err.is_corruption());
    }

    #[test]
    fn test_empty_payload_message() {
        assert!(
            StorageError::EmptyPayload
                .to_string()
                .contains("zero-length")
        );
    }
}
