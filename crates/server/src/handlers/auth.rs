//! Authentication-related endpoints.

use crate::auth::require_auth;
use crate::error::ApiResult;
use axum::Json;
use axum::extract::Request;
use serde::Serialize;

/// Response for the authenticated caller.
#[derive(Debug, Serialize)]
pub struct WhoamiResponse {
    pub token_id: String,
    pub role_id: String,
    pub role: String,
    pub privileged: bool,
}

/// GET /v1/whoami - Return the caller's role.
pub async fn whoami(req: Request) -> ApiResult<Json<WhoamiResponse>> {
    let auth = require_auth(&req)?;

    Ok(Json(WhoamiResponse {
        token_id: auth.token_id.to_string(),
        role_id: auth.role.id.to_string(),
        role: auth.role.title.clone(),
        privileged: auth.role.is_privileged(),
    }))
}
