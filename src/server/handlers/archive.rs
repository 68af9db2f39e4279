//! 归档相关 HTTP handler：下载打包、导出、zip/仓库导入

use axum::extract::{Multipart, Query, State};
use axum::response::Response;
use axum::Json;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::task::spawn_blocking;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::server::archive::{
    export_directory, export_entries, import_repository, import_zip, zip_name_for, ArchiveJob,
    IgnoreRules, ImportOutcome, RootPolicy,
};
use crate::server::context::{AppContext, AppError};
use crate::server::download::{self, RemoveOnDrop};
use crate::server::handlers::{multipart_error, required};
use crate::server::protocol::{
    ExportZipRequest, ExportZipResponse, ImportGitRequest, ImportResponse, MultiPathQuery,
    PathQuery,
};
use crate::util::format_file_size;

/// Zip `sources` inside a fresh job and stream the result; the job's
/// directory goes away with the response body.
async fn zip_and_send(
    sources: Vec<PathBuf>,
    name: String,
    single_folder: bool,
) -> Result<Response, AppError> {
    let zip_name = name.clone();
    let (work_dir, output) = spawn_blocking(move || {
        let job = ArchiveJob::new(sources.first().cloned().unwrap_or_default(), &zip_name)?;
        let output = job.work_dir().join(&zip_name);
        let stats = if single_folder {
            export_directory(&sources[0], &output, &IgnoreRules::default())?
        } else {
            export_entries(&sources, &output, &IgnoreRules::default())?
        };
        debug!(?stats, "Download archive ready");
        Ok::<_, AppError>((job.into_work_dir(), output))
    })
    .await??;

    download::attachment(&output, &name, Some(Box::new(work_dir))).await
}

/// `GET /download-folder`
pub async fn download_folder(
    State(ctx): State<AppContext>,
    Query(query): Query<PathQuery>,
) -> Result<Response, AppError> {
    let dir = ctx.paths.resolve_or_root(query.path.as_deref())?;
    let name = zip_name_for(&dir);
    zip_and_send(vec![dir], name, true).await
}

/// `GET /download-multiple?paths=<JSON>`
pub async fn download_multiple(
    State(ctx): State<AppContext>,
    Query(query): Query<MultiPathQuery>,
) -> Result<Response, AppError> {
    let raw = query
        .parse()
        .map_err(|e| AppError::InvalidInput(format!("'paths' must be a JSON array: {}", e)))?;
    if raw.is_empty() {
        return Err(AppError::InvalidInput("No paths selected".to_string()));
    }
    let sources = raw
        .iter()
        .map(|p| ctx.paths.resolve(p))
        .collect::<Result<Vec<_>, _>>()?;

    zip_and_send(sources, "files.zip".to_string(), false).await
}

/// `POST /export-zip`：写入 exports_dir/<uuid>/<name>.zip
pub async fn export_zip(
    State(ctx): State<AppContext>,
    Json(req): Json<ExportZipRequest>,
) -> Result<Json<ExportZipResponse>, AppError> {
    let source = ctx.paths.resolve_or_root(req.current_path.as_deref())?;
    let job_dir = ctx.config.exports_dir().join(Uuid::new_v4().to_string());
    let output = job_dir.join(zip_name_for(&source));
    let defaults = ctx.config.archive.default_ignores.clone();
    let use_gitignore = ctx.config.archive.use_gitignore;

    let (src, out, dir) = (source.clone(), output.clone(), job_dir.clone());
    let result = spawn_blocking(move || {
        let rules = IgnoreRules::for_source(&src, &defaults, use_gitignore);
        let result = export_directory(&src, &out, &rules);
        if result.is_err() {
            let _ = std::fs::remove_dir_all(&dir);
        }
        result
    })
    .await?;
    let stats = ctx.audit(
        "export",
        &source.to_string_lossy(),
        Some(&output.to_string_lossy()),
        result,
    )?;

    info!(output = %output.display(), bytes = stats.bytes, files = stats.files, "Export finished");
    Ok(Json(ExportZipResponse {
        success: true,
        file_path: output.to_string_lossy().to_string(),
        file_size: format_file_size(stats.bytes),
        file_size_bytes: stats.bytes,
    }))
}

/// Check that `path` is a file inside `exports_dir`.
fn exported_file(exports_dir: &Path, path: &Path) -> Result<PathBuf, AppError> {
    let root = exports_dir
        .canonicalize()
        .map_err(|e| AppError::from_io(e, exports_dir))?;
    let file = path.canonicalize().map_err(|e| AppError::from_io(e, path))?;
    if file == root || !file.starts_with(&root) {
        return Err(AppError::PermissionDenied(format!(
            "'{}' is not an exported archive",
            path.display()
        )));
    }
    Ok(file)
}

/// `GET /download-zip-file`：发送后删除导出文件
pub async fn download_zip_file(
    State(ctx): State<AppContext>,
    Query(query): Query<PathQuery>,
) -> Result<Response, AppError> {
    let requested = PathBuf::from(required(query.path.as_deref(), "path")?);
    let exports_dir = ctx.config.exports_dir();
    let file = exported_file(&exports_dir, &requested)?;

    let name = file
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| "export.zip".to_string());
    let guard = match file.parent() {
        Some(parent) if exports_dir.canonicalize().ok().as_deref() != Some(parent) => {
            RemoveOnDrop::file_and_dir(file.clone(), parent.to_path_buf())
        }
        _ => RemoveOnDrop::file(file.clone()),
    };

    download::attachment(&file, &name, Some(Box::new(guard))).await
}

fn import_message(outcome: &ImportOutcome) -> String {
    match &outcome.root_folder {
        Some(root) => format!("Imported {} file(s) from '{}'", outcome.files, root),
        None => format!("Imported {} file(s)", outcome.files),
    }
}

/// `POST /import-zip`：字段 `zipFile` 与 `currentPath`
pub async fn import_zip_upload(
    State(ctx): State<AppContext>,
    mut multipart: Multipart,
) -> Result<Json<ImportResponse>, AppError> {
    let upload_dir = tempfile::Builder::new()
        .prefix("filedeck-upload-")
        .tempdir()
        .map_err(|e| AppError::Io(format!("Failed to create temp directory: {}", e)))?;
    let zip_path = upload_dir.path().join("upload.zip");
    let mut current_path: Option<String> = None;
    let mut received = false;

    while let Some(mut field) = multipart.next_field().await.map_err(multipart_error)? {
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("currentPath") => {
                current_path = Some(field.text().await.map_err(multipart_error)?);
            }
            Some("zipFile") => {
                let mut file = tokio::fs::File::create(&zip_path).await?;
                while let Some(chunk) = field.chunk().await.map_err(multipart_error)? {
                    file.write_all(&chunk).await?;
                }
                file.flush().await?;
                received = true;
            }
            other => debug!("Ignoring multipart field {:?}", other),
        }
    }

    if !received {
        return Err(AppError::InvalidInput("No zip file uploaded".to_string()));
    }
    let dest = ctx.paths.resolve_or_root(current_path.as_deref())?;
    let shown = dest.to_string_lossy().to_string();

    let result = spawn_blocking(move || {
        let outcome = import_zip(&zip_path, &dest, RootPolicy::SingleFolder);
        // The upload itself is removed together with its directory
        drop(upload_dir);
        outcome
    })
    .await?;
    let outcome = ctx.audit("import", &shown, Some("zip"), result)?;

    Ok(Json(ImportResponse {
        success: true,
        message: import_message(&outcome),
    }))
}

/// `POST /import-git`
pub async fn import_git(
    State(ctx): State<AppContext>,
    Json(req): Json<ImportGitRequest>,
) -> Result<Json<ImportResponse>, AppError> {
    required(Some(req.repo_url.as_str()), "repoUrl")?;
    let dest = ctx.paths.resolve_or_root(req.current_path.as_deref())?;

    let result = import_repository(
        ctx.fetcher.as_ref(),
        &req.repo_url,
        &ctx.config.archive.branches,
        &dest,
    )
    .await;
    if let Err(e) = &result {
        warn!(repo = %req.repo_url, error = %e, "Repository import failed");
    }
    let outcome = ctx.audit(
        "import",
        &dest.to_string_lossy(),
        Some(&req.repo_url),
        result,
    )?;

    Ok(Json(ImportResponse {
        success: true,
        message: format!("Repository imported. {}", import_message(&outcome)),
    }))
}
