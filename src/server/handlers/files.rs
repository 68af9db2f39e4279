//! 文件相关 HTTP handler

use axum::extract::{Multipart, Query, State};
use axum::response::Response;
use axum::Json;
use std::path::PathBuf;
use tokio::task::spawn_blocking;
use tracing::{debug, info};

use crate::server::context::{AppContext, AppError};
use crate::server::download;
use crate::server::file_api;
use crate::server::handlers::{multipart_error, required};
use crate::server::listing::{self, ListingResult};
use crate::server::protocol::{
    CreateRequest, DeleteMultipleRequest, DeleteMultipleResponse, DeleteRequest,
    FileContentResponse, ListQuery, PathQuery, RenameRequest, RenameResponse, SaveFileRequest,
    SuccessBody, TransferRequest, TransferResponse,
};

fn display(paths: &[PathBuf]) -> String {
    paths
        .iter()
        .map(|p| p.to_string_lossy())
        .collect::<Vec<_>>()
        .join(", ")
}

/// `GET /` 与 `GET /api/files`
pub async fn list_files(
    State(ctx): State<AppContext>,
    Query(query): Query<ListQuery>,
) -> Result<Json<ListingResult>, AppError> {
    let dir = ctx.paths.resolve_or_root(query.path.as_deref())?;
    let mut result = spawn_blocking(move || listing::list_directory(&dir)).await??;

    if query.hidden == Some(false) {
        result.entries.retain(|e| !e.is_hidden);
    }
    debug!(path = %result.path, entries = result.entries.len(), "Listed directory");
    Ok(Json(result))
}

/// `GET /file-content`
pub async fn file_content(
    State(ctx): State<AppContext>,
    Query(query): Query<PathQuery>,
) -> Result<Json<FileContentResponse>, AppError> {
    let path = ctx.paths.resolve(required(query.path.as_deref(), "path")?)?;
    let max_bytes = ctx.config.files.max_read_bytes;

    let read_path = path.clone();
    let content = spawn_blocking(move || file_api::read_file(&read_path, max_bytes)).await??;
    Ok(Json(FileContentResponse {
        content,
        path: path.to_string_lossy().to_string(),
    }))
}

/// `POST /save-file`
pub async fn save_file(
    State(ctx): State<AppContext>,
    Json(req): Json<SaveFileRequest>,
) -> Result<Json<SuccessBody>, AppError> {
    let path = ctx.paths.resolve(&req.file_path)?;

    let write_path = path.clone();
    let result = spawn_blocking(move || file_api::write_file(&write_path, &req.content)).await?;
    let bytes = ctx.audit("save", &path.to_string_lossy(), None, result)?;

    info!(path = %path.display(), bytes, "File saved");
    Ok(Json(SuccessBody::with_message("File saved successfully")))
}

/// `POST /create`
pub async fn create(
    State(ctx): State<AppContext>,
    Json(req): Json<CreateRequest>,
) -> Result<Json<SuccessBody>, AppError> {
    let parent = ctx.paths.resolve_or_root(req.current_path.as_deref())?;
    let kind = req.kind.into();
    let shown = parent.join(&req.name).to_string_lossy().to_string();

    let name = req.name.clone();
    let result = spawn_blocking(move || file_api::create_entry(&parent, &name, kind)).await?;
    let target = ctx.audit("create", &shown, Some(&format!("{:?}", kind)), result)?;

    Ok(Json(SuccessBody::with_message(format!(
        "Created {}",
        target.display()
    ))))
}

/// `DELETE /delete`
pub async fn delete(
    State(ctx): State<AppContext>,
    Json(req): Json<DeleteRequest>,
) -> Result<Json<SuccessBody>, AppError> {
    let path = ctx.paths.resolve(&req.path)?;

    let target = path.clone();
    let result = spawn_blocking(move || file_api::delete_entry(&target)).await?;
    ctx.audit("delete", &path.to_string_lossy(), None, result)?;

    Ok(Json(SuccessBody::with_message("Deleted successfully")))
}

/// `DELETE /delete-multiple`
pub async fn delete_multiple(
    State(ctx): State<AppContext>,
    Json(req): Json<DeleteMultipleRequest>,
) -> Result<Json<DeleteMultipleResponse>, AppError> {
    if req.paths.is_empty() {
        return Err(AppError::InvalidInput("No paths selected".to_string()));
    }
    let paths = req
        .paths
        .iter()
        .map(|p| ctx.paths.resolve(p))
        .collect::<Result<Vec<_>, _>>()?;

    let shown = display(&paths);
    let result = spawn_blocking(move || file_api::delete_entries(&paths)).await?;
    let deleted = ctx.audit("delete", &shown, None, result)?;

    Ok(Json(DeleteMultipleResponse {
        success: true,
        deleted,
    }))
}

/// `POST /rename`
pub async fn rename(
    State(ctx): State<AppContext>,
    Json(req): Json<RenameRequest>,
) -> Result<Json<RenameResponse>, AppError> {
    let old_path = ctx.paths.resolve(&req.old_path)?;

    let source = old_path.clone();
    let new_name = req.new_name.clone();
    let result = spawn_blocking(move || file_api::rename_entry(&source, &new_name)).await?;
    let new_path = ctx.audit(
        "rename",
        &old_path.to_string_lossy(),
        Some(&req.new_name),
        result,
    )?;

    Ok(Json(RenameResponse {
        success: true,
        new_path: new_path.to_string_lossy().to_string(),
    }))
}

async fn transfer(
    ctx: &AppContext,
    op: &'static str,
    req: TransferRequest,
) -> Result<Json<TransferResponse>, AppError> {
    if req.source_paths.is_empty() {
        return Err(AppError::InvalidInput("No paths selected".to_string()));
    }
    let sources = req
        .source_paths
        .iter()
        .map(|p| ctx.paths.resolve(p))
        .collect::<Result<Vec<_>, _>>()?;
    let dest = ctx.paths.resolve(&req.dest_path)?;

    let shown = display(&sources);
    let dest_shown = dest.to_string_lossy().to_string();
    let result = spawn_blocking(move || match op {
        "move" => file_api::move_entries(&sources, &dest),
        _ => file_api::copy_entries(&sources, &dest),
    })
    .await?;
    let paths = ctx.audit(op, &shown, Some(&dest_shown), result)?;

    info!(op, count = paths.len(), dest = %dest_shown, "Transfer finished");
    Ok(Json(TransferResponse {
        success: true,
        paths: paths
            .iter()
            .map(|p| p.to_string_lossy().to_string())
            .collect(),
    }))
}

/// `POST /copy`
pub async fn copy(
    State(ctx): State<AppContext>,
    Json(req): Json<TransferRequest>,
) -> Result<Json<TransferResponse>, AppError> {
    transfer(&ctx, "copy", req).await
}

/// `POST /move`
pub async fn move_entries(
    State(ctx): State<AppContext>,
    Json(req): Json<TransferRequest>,
) -> Result<Json<TransferResponse>, AppError> {
    transfer(&ctx, "move", req).await
}

/// `POST /upload-files`：字段 `files`（可多个）与 `currentPath`
pub async fn upload_files(
    State(ctx): State<AppContext>,
    mut multipart: Multipart,
) -> Result<Json<SuccessBody>, AppError> {
    let mut current_path: Option<String> = None;
    let mut uploads: Vec<(String, bytes::Bytes)> = Vec::new();

    while let Some(field) = multipart.next_field().await.map_err(multipart_error)? {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("currentPath") => {
                current_path = Some(field.text().await.map_err(multipart_error)?);
            }
            Some("files") | Some("files[]") | Some("file") => {
                let name = field.file_name().unwrap_or_default().to_string();
                let data = field.bytes().await.map_err(multipart_error)?;
                uploads.push((name, data));
            }
            other => debug!("Ignoring multipart field {:?}", other),
        }
    }

    if uploads.is_empty() {
        return Err(AppError::InvalidInput("No files uploaded".to_string()));
    }
    let dir = ctx.paths.resolve_or_root(current_path.as_deref())?;
    let shown = dir.to_string_lossy().to_string();

    let result = spawn_blocking(move || {
        let mut stored = Vec::with_capacity(uploads.len());
        for (name, data) in &uploads {
            let target = file_api::upload_target(&dir, name)?;
            std::fs::write(&target, data).map_err(|e| AppError::from_io(e, &target))?;
            stored.push(target);
        }
        Ok::<_, AppError>(stored)
    })
    .await?;
    let stored = ctx.audit("upload", &shown, None, result)?;

    info!(count = stored.len(), dir = %shown, "Files uploaded");
    Ok(Json(SuccessBody::with_message(format!(
        "{} file(s) uploaded",
        stored.len()
    ))))
}

/// `GET /download`
pub async fn download(
    State(ctx): State<AppContext>,
    Query(query): Query<PathQuery>,
) -> Result<Response, AppError> {
    let path = ctx.paths.resolve(required(query.path.as_deref(), "path")?)?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .ok_or_else(|| AppError::InvalidInput("Path has no file name".to_string()))?;

    download::attachment(&path, &name, None).await
}
