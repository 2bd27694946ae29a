//! Shared handler helpers.

use crate::auth::require_auth;
use crate::error::{ApiError, ApiResult};
use axum::extract::Request;
use depot_core::{RepoPath, Role};
use serde::de::DeserializeOwned;

/// Maximum accepted size of a JSON request body.
pub const MAX_JSON_BODY_SIZE: usize = 1024 * 1024;

/// Resolve the caller's role or fail with 401.
pub fn caller(req: &Request) -> ApiResult<Role> {
    Ok(require_auth(req)?.role.clone())
}

/// Read and decode a JSON body.
pub async fn read_json<T: DeserializeOwned>(req: Request) -> ApiResult<T> {
    let bytes = axum::body::to_bytes(req.into_body(), MAX_JSON_BODY_SIZE)
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read body: {e}")))?;
    serde_json::from_slice(&bytes).map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))
}

/// Like [`read_json`], but an empty body decodes to the default value.
pub async fn read_json_or_default<T: DeserializeOwned + Default>(req: Request) -> ApiResult<T> {
    let bytes = axum::body::to_bytes(req.into_body(), MAX_JSON_BODY_SIZE)
        .await
        .map_err(|e| ApiError::BadRequest(format!("failed to read body: {e}")))?;
    if bytes.iter().all(u8::is_ascii_whitespace) {
        return Ok(T::default());
    }
    serde_json::from_slice(&bytes).map_err(|e| ApiError::BadRequest(format!("invalid JSON: {e}")))
}

/// Parse a `<repository>/<logical path>` body field.
pub fn repo_path(field: &str, raw: &str) -> ApiResult<RepoPath> {
    RepoPath::parse(raw).map_err(|e| ApiError::BadRequest(format!("{field}: {e}")))
}
