//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid identifier: {0}")]
    InvalidId(String),

    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("unknown operation type: {0}")]
    UnknownOpType(String),

    #[error("unknown scope: {0}")]
    UnknownScope(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
