//! Admin endpoints: roles, tokens and health.

use super::common::{caller, read_json};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use depot_metadata::RoleRow;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use uuid::Uuid;

/// Health check response.
#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub version: &'static str,
}

/// GET /v1/health - Health check.
///
/// Intentionally unauthenticated for load balancers and probes. Returns
/// only status and version.
pub async fn health_check(State(state): State<AppState>) -> ApiResult<Json<HealthResponse>> {
    state.metadata.health_check().await?;

    Ok(Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Deserialize)]
pub struct CreateRoleRequest {
    pub title: String,
}

#[derive(Debug, Serialize)]
pub struct RoleResponse {
    pub role_id: String,
    pub title: String,
    pub created_at: String,
}

impl TryFrom<RoleRow> for RoleResponse {
    type Error = ApiError;

    fn try_from(row: RoleRow) -> ApiResult<Self> {
        Ok(Self {
            role_id: row.role_id.to_string(),
            title: row.title,
            created_at: row
                .created_at
                .format(&Rfc3339)
                .map_err(|e| ApiError::Internal(format!("failed to format timestamp: {e}")))?,
        })
    }
}

/// POST /v1/admin/roles - Create a role.
pub async fn create_role(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<(StatusCode, Json<RoleResponse>)> {
    let role = caller(&req)?;
    let body: CreateRoleRequest = read_json(req).await?;

    let created = state.registry.create_role(&role, &body.title).await?;
    Ok((StatusCode::CREATED, Json(created.try_into()?)))
}

/// GET /v1/admin/roles - List roles.
pub async fn list_roles(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<Vec<RoleResponse>>> {
    let role = caller(&req)?;
    let roles = state
        .registry
        .list_roles(&role)
        .await?
        .into_iter()
        .map(RoleResponse::try_from)
        .collect::<ApiResult<Vec<_>>>()?;
    Ok(Json(roles))
}

#[derive(Debug, Deserialize)]
pub struct CreateTokenRequest {
    pub role_title: String,
    pub description: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct CreateTokenResponse {
    pub token_id: String,
    pub role_title: String,
    /// The secret. Shown once; only its hash is stored.
    pub token: String,
}

/// POST /v1/admin/tokens - Issue a token for a role.
pub async fn create_token(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<(StatusCode, Json<CreateTokenResponse>)> {
    let role = caller(&req)?;
    let body: CreateTokenRequest = read_json(req).await?;

    let issued = state
        .registry
        .create_token(&role, &body.role_title, body.description)
        .await?;
    Ok((
        StatusCode::CREATED,
        Json(CreateTokenResponse {
            token_id: issued.token_id.to_string(),
            role_title: issued.role_title,
            token: issued.token,
        }),
    ))
}

/// DELETE /v1/admin/tokens/{token_id} - Revoke a token.
pub async fn revoke_token(
    State(state): State<AppState>,
    Path(token_id): Path<String>,
    req: Request,
) -> ApiResult<StatusCode> {
    let role = caller(&req)?;
    let token_id = Uuid::parse_str(&token_id)
        .map_err(|e| ApiError::BadRequest(format!("invalid token ID: {e}")))?;

    state.registry.revoke_token(&role, token_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
