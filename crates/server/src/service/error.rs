//! Errors raised by the permission resolver, the coordinator and the registry.

use depot_metadata::MetadataError;
use depot_storage::StorageError;

/// Error kinds surfaced by every service operation.
///
/// Storage and index failures carry the operation, repository and path so
/// that a failed multi-step mutation can be diagnosed from the error alone.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("permission denied: {operation} on {repository}/{path}")]
    PermissionDenied {
        operation: &'static str,
        repository: String,
        path: String,
    },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("invalid request: {0}")]
    BadRequest(String),

    #[error(transparent)]
    Invalid(#[from] depot_core::Error),

    #[error("{operation} failed in object store for {repository}/{path}: {source}")]
    Storage {
        operation: &'static str,
        repository: String,
        path: String,
        #[source]
        source: StorageError,
    },

    #[error("{operation} failed in path index for {repository}/{path}: {source}")]
    Index {
        operation: &'static str,
        repository: String,
        path: String,
        #[source]
        source: MetadataError,
    },

    #[error("{operation} timed out after {secs}s")]
    Timeout { operation: &'static str, secs: u64 },
}

impl ServiceError {
    /// Short label used for metrics and error codes.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::PermissionDenied { .. } => "permission_denied",
            Self::Conflict(_) => "conflict",
            Self::BadRequest(_) | Self::Invalid(_) => "invalid",
            Self::Storage { .. } => "storage_failure",
            Self::Index { .. } => "index_failure",
            Self::Timeout { .. } => "timeout",
        }
    }

    pub fn is_permission_denied(&self) -> bool {
        matches!(self, Self::PermissionDenied { .. })
    }
}

/// Result type for service operations.
pub type ServiceResult<T> = std::result::Result<T, ServiceError>;

/// Where an operation is acting, used to attach context to backend errors.
#[derive(Clone, Copy, Debug)]
pub(crate) struct Scope<'a> {
    pub operation: &'static str,
    pub repository: &'a str,
    pub path: &'a str,
}

impl<'a> Scope<'a> {
    pub fn new(operation: &'static str, repository: &'a str, path: &'a str) -> Self {
        Self {
            operation,
            repository,
            path,
        }
    }

    pub fn denied(&self) -> ServiceError {
        ServiceError::PermissionDenied {
            operation: self.operation,
            repository: self.repository.to_string(),
            path: self.path.to_string(),
        }
    }

    /// Classify an object-store error.
    pub fn storage(&self, err: StorageError) -> ServiceError {
        match err {
            StorageError::NotFound(_) => {
                ServiceError::NotFound(format!("{}/{}", self.repository, self.path))
            }
            StorageError::Timeout { operation, secs } => ServiceError::Timeout { operation, secs },
            source => ServiceError::Storage {
                operation: self.operation,
                repository: self.repository.to_string(),
                path: self.path.to_string(),
                source,
            },
        }
    }

    /// Classify a path-index error.
    pub fn index(&self, err: MetadataError) -> ServiceError {
        match err {
            MetadataError::NotFound(what) => ServiceError::NotFound(what),
            MetadataError::AlreadyExists(what) => ServiceError::Conflict(what),
            source => ServiceError::Index {
                operation: self.operation,
                repository: self.repository.to_string(),
                path: self.path.to_string(),
                source,
            },
        }
    }
}
