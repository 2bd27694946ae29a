//! Directory endpoints.

use super::common::{caller, read_json, repo_path};
use super::files::{MoveRequest, RenameRequest};
use crate::error::ApiResult;
use crate::service::DirectoryChanges;
use crate::state::AppState;
use axum::Json;
use axum::extract::{Request, State};
use axum::http::StatusCode;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize, Serialize)]
pub struct DirRequest {
    pub dir: String,
}

/// POST /v1/dir/create - Create an empty directory.
pub async fn create_directory(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<(StatusCode, Json<DirRequest>)> {
    let role = caller(&req)?;
    let body: DirRequest = read_json(req).await?;
    let dir = repo_path("dir", &body.dir)?;

    state.files.create_directory(&role, &dir).await?;
    Ok((
        StatusCode::CREATED,
        Json(DirRequest {
            dir: dir.to_string(),
        }),
    ))
}

/// POST /v1/dir/rename - Rename a directory and everything below it.
pub async fn rename_directory(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<DirectoryChanges>> {
    let role = caller(&req)?;
    let body: RenameRequest = read_json(req).await?;
    let old = repo_path("old", &body.old)?;
    let new = repo_path("new", &body.new)?;

    Ok(Json(state.files.rename_directory(&role, &old, &new).await?))
}

/// POST /v1/dir/move - Move a directory under another parent.
pub async fn move_directory(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<DirectoryChanges>> {
    let role = caller(&req)?;
    let body: MoveRequest = read_json(req).await?;
    let src = repo_path("src", &body.src)?;
    let dst = repo_path("dst", &body.dst)?;

    Ok(Json(state.files.move_directory(&role, &src, &dst).await?))
}

/// DELETE /v1/dir/remove - Remove a directory and everything below it.
pub async fn remove_directory(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<DirectoryChanges>> {
    let role = caller(&req)?;
    let body: DirRequest = read_json(req).await?;
    let dir = repo_path("dir", &body.dir)?;

    Ok(Json(state.files.remove_directory(&role, &dir).await?))
}
