//! Error types for the core domain.

use thiserror::Error;

/// Core domain error type.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid repository name: {0}")]
    InvalidRepositoryName(String),

    #[error("invalid capability: {0}")]
    InvalidCapability(String),

    #[error("path exceeds maximum depth of {max} segments")]
    PathTooDeep { max: usize },

    #[error("invalid role: {0}")]
    InvalidRole(String),
}

/// Result type alias for core operations.
pub type Result<T> = std::result::Result<T, Error>;
