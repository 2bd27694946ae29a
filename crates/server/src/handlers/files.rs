//! File endpoints: listing, download, upload, removal, rename and move.

use super::common::{caller, read_json, repo_path};
use crate::error::{ApiError, ApiResult};
use crate::state::AppState;
use axum::Json;
use axum::body::Body;
use axum::extract::multipart::MultipartError;
use axum::extract::{FromRequest, Multipart, Path, Request, State};
use axum::http::StatusCode;
use axum::http::header::{CONTENT_DISPOSITION, CONTENT_LENGTH, CONTENT_TYPE};
use axum::response::Response;
use bytes::Bytes;
use depot_core::DirNode;
use serde::{Deserialize, Serialize};

/// GET /v1/static - Tree of every entry the caller may list.
pub async fn list_files(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<Json<Vec<DirNode>>> {
    let role = caller(&req)?;
    Ok(Json(state.files.list_files(&role).await?))
}

/// GET /v1/static/{*path} - Stream a file the caller may download.
pub async fn download_file(
    State(state): State<AppState>,
    Path(path): Path<String>,
    req: Request,
) -> ApiResult<Response> {
    let role = caller(&req)?;
    let target = repo_path("path", &path)?;
    let (meta, stream) = state.files.get_file(&role, &target).await?;

    let file_name = target.path().file_name().unwrap_or_default().replace('"', "");
    Response::builder()
        .status(StatusCode::OK)
        .header(
            CONTENT_TYPE,
            meta.content_type
                .as_deref()
                .unwrap_or("application/octet-stream"),
        )
        .header(CONTENT_LENGTH, meta.size)
        .header(
            CONTENT_DISPOSITION,
            format!("attachment; filename=\"{file_name}\""),
        )
        .body(Body::from_stream(stream))
        .map_err(|e| ApiError::Internal(format!("failed to build response: {e}")))
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub uploaded: Vec<String>,
}

fn multipart_error(e: MultipartError) -> ApiError {
    if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
        ApiError::PayloadTooLarge(e.body_text())
    } else {
        ApiError::BadRequest(e.body_text())
    }
}

/// POST /v1/file/upload - Multipart upload of one or more `file` parts into
/// the directory named by the `dir` part.
///
/// The `dir` part must come first. Each `file` part is authorized from its
/// headers before its body is read.
pub async fn upload_files(
    State(state): State<AppState>,
    req: Request,
) -> ApiResult<(StatusCode, Json<UploadResponse>)> {
    let role = caller(&req)?;
    let mut multipart = Multipart::from_request(req, &state)
        .await
        .map_err(|e| ApiError::BadRequest(e.body_text()))?;

    let mut dir = None;
    let mut files: Vec<(String, Bytes)> = Vec::new();
    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let name = field.name().unwrap_or_default().to_string();
        match name.as_str() {
            "dir" => {
                let text = field.text().await.map_err(multipart_error)?;
                dir = Some(repo_path("dir", &text)?);
            }
            "file" => {
                let dir = dir.as_ref().ok_or_else(|| {
                    ApiError::BadRequest("dir field must precede file parts".to_string())
                })?;
                let file_name = field
                    .file_name()
                    .map(str::to_string)
                    .ok_or_else(|| ApiError::BadRequest("file part has no file name".to_string()))?;
                state
                    .files
                    .authorize_upload(&role, dir, &file_name)
                    .await?;
                let data = field.bytes().await.map_err(multipart_error)?;
                files.push((file_name, data));
            }
            _ => {}
        }
    }

    let dir = dir.ok_or_else(|| ApiError::BadRequest("missing dir field".to_string()))?;
    if files.is_empty() {
        return Err(ApiError::BadRequest("no file parts".to_string()));
    }

    let mut uploaded = Vec::with_capacity(files.len());
    for (file_name, data) in files {
        let stored = state
            .files
            .upload_file(&role, &dir, &file_name, data)
            .await?;
        uploaded.push(stored.to_string());
    }

    Ok((StatusCode::CREATED, Json(UploadResponse { uploaded })))
}

#[derive(Debug, Deserialize)]
pub struct RemoveFileRequest {
    pub filename: String,
}

/// DELETE /v1/file/remove - Remove a file.
pub async fn remove_file(State(state): State<AppState>, req: Request) -> ApiResult<StatusCode> {
    let role = caller(&req)?;
    let body: RemoveFileRequest = read_json(req).await?;
    let target = repo_path("filename", &body.filename)?;

    state.files.remove_file(&role, &target).await?;
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct RenameRequest {
    pub old: String,
    pub new: String,
}

#[derive(Debug, Deserialize)]
pub struct MoveRequest {
    pub src: String,
    pub dst: String,
}

/// POST /v1/file/rename - Rename a file.
pub async fn rename_file(State(state): State<AppState>, req: Request) -> ApiResult<StatusCode> {
    let role = caller(&req)?;
    let body: RenameRequest = read_json(req).await?;
    let old = repo_path("old", &body.old)?;
    let new = repo_path("new", &body.new)?;

    state.files.rename_file(&role, &old, &new).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// POST /v1/file/move - Move a file to another directory.
pub async fn move_file(State(state): State<AppState>, req: Request) -> ApiResult<StatusCode> {
    let role = caller(&req)?;
    let body: MoveRequest = read_json(req).await?;
    let src = repo_path("src", &body.src)?;
    let dst = repo_path("dst", &body.dst)?;

    state.files.move_file(&role, &src, &dst).await?;
    Ok(StatusCode::NO_CONTENT)
}
