//! Error types for logbook-core

use thiserror::Error;

use crate::remote::RemoteError;

/// Result type alias using logbook-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in logbook-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Record not found (or tombstoned, for mutations)
    #[error("Record not found: {0}")]
    NotFound(String),

    /// Invalid input
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Attachment/blob storage error
    #[error("Storage error: {0}")]
    Storage(String),

    /// Remote service error
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),
}
