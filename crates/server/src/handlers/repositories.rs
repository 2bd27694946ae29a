//! Repository administration endpoints.
//!
//! Listings answer non-admin callers with an empty array; mutations answer
//! them with 403.

use super::common::{caller, read_json, read_json_or_default};
use crate::error::{ApiError, ApiResult};
use crate::service::{GrantInput, ReconcileReport};
use crate::state::AppState;
use axum::Json;
use axum::extract::{Path, Request, State};
use axum::http::StatusCode;
use depot_core::Capability;
use depot_metadata::{GrantRow, PathRow, RepositoryRow};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct CreateRepositoryRequest {
    /// Repository name.
    pub dir: String,
}

#[derive(Debug, Serialize)]
pub struct RepositoryResponse {
    pub id: String,
    pub repo: String,
}

impl From<RepositoryRow> for RepositoryResponse {
    fn from(row: RepositoryRow) -> Self {
        Self {
            id: row.repository_id.to_string(),
            repo: row.name,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PathResponse {
    pub id: i64,
    pub path: String,
}

impl From<PathRow> for PathResponse {
    fn from(row: PathRow) -> Self {
        Self {
            id: row.path_id,
            path: row.path,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct GrantResponse {
    pub id: i64,
    pub role_title: String,
    pub path: String,
    pub permission: String,
}

impl From<GrantRow> for GrantResponse {
    fn from(row: GrantRow) -> Self {
        Self {
            id: row.grant_id,
            role_title: row.role_title,
            path: row.path,
            permission: row.permission,
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct GrantRequest {
    pub role_title: String,
    pub path: String,
    pub permission: String,
}

impl GrantRequest {
    fn into_input(self) -> ApiResult<GrantInput> {
        let capability: Capability = self
            .permission
            .parse()
            .map_err(|e| ApiError::BadRequest(format!("permission: {e}")))?;
        Ok(GrantInput {
            role_title: self.role_title,
            path: self.path,
            capability,
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct EditGrantRequest {
    pub id: i64,
    #[serde(flatten)]
    pub grant: GrantRequest,
}

#[derive(Debug, Deserialize)]
pub struct RemoveGrantRequest {
    pub id: i64,
}

#[derive(Debug, Default, Deserialize)]
pub struct ReconcileRequest {
    #[serde(default)]
    pub dry_run: bool,
}

/// POST /v1/rep/create - Create a repository.
pub async fn create_repository(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<(StatusCode, Json<RepositoryResponse>)> {
    let role = caller(&req)?;
    let body: CreateRepositoryRequest = read_json(req).await?;

    let repo = state.registry.create_repository(&role, &body.dir).await?;
    Ok((StatusCode::CREATED, Json(repo.into())))
}

/// GET /v1/rep/get - List repositories.
pub async fn list_repositories(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<Vec<RepositoryResponse>>> {
    let role = caller(&req)?;
    let repos = state.registry.list_repositories(&role).await?;
    Ok(Json(repos.into_iter().map(Into::into).collect()))
}

/// GET /v1/rep/getfiles/{repo} - List a repository's indexed paths.
pub async fn list_repository_paths(
    State(state): State<AppState>,
    Path(repo): Path<String>,
    req: Request,
) -> ApiResult<Json<Vec<PathResponse>>> {
    let role = caller(&req)?;
    let paths = state.registry.list_repository_paths(&role, &repo).await?;
    Ok(Json(paths.into_iter().map(Into::into).collect()))
}

/// GET /v1/rep/getperms/{repo} - List a repository's grants.
pub async fn list_grants(
    State(state): State<AppState>,
    Path(repo): Path<String>,
    req: Request,
) -> ApiResult<Json<Vec<GrantResponse>>> {
    let role = caller(&req)?;
    let grants = state.registry.list_grants(&role, &repo).await?;
    Ok(Json(grants.into_iter().map(Into::into).collect()))
}

/// POST /v1/rep/addperms/{repo} - Add a grant.
pub async fn add_grant(
    State(state): State<AppState>,
    Path(repo): Path<String>,
    req: Request,
) -> ApiResult<(StatusCode, Json<GrantResponse>)> {
    let role = caller(&req)?;
    let body: GrantRequest = read_json(req).await?;
    let input = body.into_input()?;

    let grant = state.registry.add_grant(&role, &repo, &input).await?;
    Ok((StatusCode::CREATED, Json(grant.into())))
}

/// PATCH /v1/rep/editperms/{repo} - Replace a grant's role, path and
/// capability.
pub async fn edit_grant(
    State(state): State<AppState>,
    Path(repo): Path<String>,
    req: Request,
) -> ApiResult<Json<GrantResponse>> {
    let role = caller(&req)?;
    let body: EditGrantRequest = read_json(req).await?;
    let input = body.grant.into_input()?;

    let grant = state
        .registry
        .edit_grant(&role, &repo, body.id, &input)
        .await?;
    Ok(Json(grant.into()))
}

/// DELETE /v1/rep/removeperms/{repo} - Remove a grant.
pub async fn remove_grant(
    State(state): State<AppState>,
    Path(repo): Path<String>,
    req: Request,
) -> ApiResult<StatusCode> {
    let role = caller(&req)?;
    let body: RemoveGrantRequest = read_json(req).await?;

    state.registry.remove_grant(&role, &repo, body.id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/rep/reconcile/{repo} - Recompute the index from object keys.
pub async fn reconcile_repository(
    State(state): State<AppState>,
    Path(repo): Path<String>,
    req: Request,
) -> ApiResult<Json<ReconcileReport>> {
    let role = caller(&req)?;
    let body: ReconcileRequest = read_json_or_default(req).await?;

    Ok(Json(
        state.registry.reconcile(&role, &repo, body.dry_run).await?,
    ))
}
