//! Error types for the adlab service

use adlab_core::{DatasetKey, ProtocolError};
use adlab_storage::StorageError;
use thiserror::Error;

/// Errors that can occur in the service
#[derive(Debug, Error)]
pub enum ServiceError {
    /// Storage error
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    /// Message contract error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The handler for a dataset has stopped
    #[error("Handler for {0} is closed")]
    HandlerClosed(DatasetKey),

    /// The service has been shut down
    #[error("Service is shut down")]
    ShutDown,

    /// IO error
    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ServiceError {
    fn from(e: std::io::Error) -> Self {
        ServiceError::Io(e.to_string())
    }
}

/// Result type alias for service operations
pub type ServiceResult<T> = Result<T, ServiceError>;
