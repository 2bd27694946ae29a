//! API error types.

use crate::service::ServiceError;
use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// API error response.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error(transparent)]
    Service(#[from] ServiceError),

    #[error("metadata error: {0}")]
    Metadata(#[from] depot_metadata::MetadataError),

    #[error("invalid input: {0}")]
    Core(#[from] depot_core::Error),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Unauthorized(_) => "unauthorized",
            Self::Forbidden(_) => "forbidden",
            Self::Conflict(_) => "conflict",
            Self::PayloadTooLarge(_) => "payload_too_large",
            Self::Internal(_) => "internal_error",
            Self::Service(e) => match e {
                ServiceError::NotFound(_) => "not_found",
                ServiceError::PermissionDenied { .. } => "permission_denied",
                ServiceError::Conflict(_) => "conflict",
                ServiceError::BadRequest(_) | ServiceError::Invalid(_) => "bad_request",
                ServiceError::Storage { .. } => "storage_error",
                ServiceError::Index { .. } => "index_error",
                ServiceError::Timeout { .. } => "timeout",
            },
            Self::Metadata(_) => "metadata_error",
            Self::Core(_) => "bad_request",
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::Conflict(_) => StatusCode::CONFLICT,
            Self::PayloadTooLarge(_) => StatusCode::PAYLOAD_TOO_LARGE,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Service(e) => match e {
                ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
                ServiceError::PermissionDenied { .. } => StatusCode::FORBIDDEN,
                ServiceError::Conflict(_) => StatusCode::CONFLICT,
                ServiceError::BadRequest(_) | ServiceError::Invalid(_) => StatusCode::BAD_REQUEST,
                ServiceError::Storage { .. } | ServiceError::Index { .. } => {
                    StatusCode::INTERNAL_SERVER_ERROR
                }
                ServiceError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            },
            Self::Metadata(e) => match e {
                depot_metadata::MetadataError::NotFound(_) => StatusCode::NOT_FOUND,
                depot_metadata::MetadataError::AlreadyExists(_) => StatusCode::CONFLICT,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Core(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!(code = self.code(), error = %self, "Request failed");
        }
        let body = ErrorResponse {
            code: self.code().to_string(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn service_errors_map_to_statuses() {
        let cases = [
            (
                ApiError::from(ServiceError::NotFound("x".into())),
                StatusCode::NOT_FOUND,
            ),
            (
                ApiError::from(ServiceError::PermissionDenied {
                    operation: "remove_file",
                    repository: "projects".into(),
                    path: "a.txt".into(),
                }),
                StatusCode::FORBIDDEN,
            ),
            (
                ApiError::from(ServiceError::Conflict("x".into())),
                StatusCode::CONFLICT,
            ),
            (
                ApiError::from(ServiceError::Invalid(depot_core::Error::InvalidPath(
                    "x".into(),
                ))),
                StatusCode::BAD_REQUEST,
            ),
            (
                ApiError::from(ServiceError::Timeout {
                    operation: "put",
                    secs: 10,
                }),
                StatusCode::GATEWAY_TIMEOUT,
            ),
            (
                ApiError::Unauthorized("missing".into()),
                StatusCode::UNAUTHORIZED,
            ),
        ];
        for (err, status) in cases {
            assert_eq!(err.status_code(), status, "{err}");
        }
    }

    #[test]
    fn denial_has_its_own_code() {
        let err = ApiError::from(ServiceError::PermissionDenied {
            operation: "create_repository",
            repository: "projects".into(),
            path: String::new(),
        });
        assert_eq!(err.code(), "permission_denied");
    }
}
