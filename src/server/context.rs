//! 共享上下文与错误类型
//!
//! 所有 HTTP/WS handler 共享同一个 `AppContext`，错误统一为 `AppError`，
//! 由 `IntoResponse` 转换为 `{ success: false, error, code }`。

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::config::ServerConfig;
use crate::server::archive::remote::{ArchiveFetcher, HttpFetcher};
use crate::server::file_api::PathPolicy;
use crate::server::protocol::ErrorBody;
use crate::util::audit_log::AuditLog;

/// 统一应用错误类型
#[derive(Error, Debug)]
pub enum AppError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    PermissionDenied(String),

    #[error("{0}")]
    InvalidInput(String),

    #[error("{0}")]
    AlreadyExists(String),

    #[error("{0}")]
    Busy(String),

    #[error("Remote fetch failed: {0}")]
    RemoteFetchFailed(String),

    #[error("Archive error: {0}")]
    Archive(String),

    #[error("Failed to start command: {0}")]
    ProcessSpawnFailed(String),

    #[error("I/O error: {0}")]
    Io(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl AppError {
    /// 转换为协议 error code
    pub fn code(&self) -> &'static str {
        match self {
            AppError::NotFound(_) => "not_found",
            AppError::PermissionDenied(_) => "permission_denied",
            AppError::InvalidInput(_) => "invalid_input",
            AppError::AlreadyExists(_) => "already_exists",
            AppError::Busy(_) => "busy",
            AppError::RemoteFetchFailed(_) => "remote_fetch_failed",
            AppError::Archive(_) => "archive_error",
            AppError::ProcessSpawnFailed(_) => "process_spawn_failed",
            AppError::Io(_) => "io_error",
            AppError::Internal(_) => "internal_error",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::PermissionDenied(_) => StatusCode::FORBIDDEN,
            AppError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            AppError::AlreadyExists(_) | AppError::Busy(_) => StatusCode::CONFLICT,
            AppError::RemoteFetchFailed(_) => StatusCode::BAD_GATEWAY,
            AppError::Archive(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::ProcessSpawnFailed(_) | AppError::Io(_) | AppError::Internal(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
        }
    }

    /// 带路径上下文的 io 错误转换
    pub fn from_io(e: io::Error, path: &std::path::Path) -> Self {
        let shown = path.display();
        match e.kind() {
            io::ErrorKind::NotFound => AppError::NotFound(format!("Path not found: {}", shown)),
            io::ErrorKind::PermissionDenied => {
                AppError::PermissionDenied(format!("Permission denied: {}", shown))
            }
            io::ErrorKind::AlreadyExists => {
                AppError::AlreadyExists(format!("Target already exists: {}", shown))
            }
            _ => AppError::Io(format!("{}: {}", shown, e)),
        }
    }
}

impl From<io::Error> for AppError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::NotFound => AppError::NotFound(e.to_string()),
            io::ErrorKind::PermissionDenied => AppError::PermissionDenied(e.to_string()),
            io::ErrorKind::AlreadyExists => AppError::AlreadyExists(e.to_string()),
            _ => AppError::Io(e.to_string()),
        }
    }
}

impl From<zip::result::ZipError> for AppError {
    fn from(e: zip::result::ZipError) -> Self {
        match e {
            zip::result::ZipError::Io(io_err) => AppError::from(io_err),
            other => AppError::Archive(other.to_string()),
        }
    }
}

impl From<walkdir::Error> for AppError {
    fn from(e: walkdir::Error) -> Self {
        let path = e.path().map(|p| p.to_path_buf());
        match (e.into_io_error(), path) {
            (Some(io_err), Some(path)) => AppError::from_io(io_err, &path),
            (Some(io_err), None) => AppError::from(io_err),
            (None, _) => AppError::Io("Filesystem loop detected while walking".to_string()),
        }
    }
}

/// 从 tokio JoinError 转换
impl From<tokio::task::JoinError> for AppError {
    fn from(e: tokio::task::JoinError) -> Self {
        AppError::Internal(format!("Task failed: {}", e))
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let body = ErrorBody {
            success: false,
            error: self.to_string(),
            code: self.code().to_string(),
        };
        (self.status(), Json(body)).into_response()
    }
}

/// 服务器上下文，所有 handler 共享
#[derive(Clone)]
pub struct AppContext {
    pub config: Arc<ServerConfig>,
    pub paths: Arc<PathPolicy>,
    pub fetcher: Arc<dyn ArchiveFetcher>,
    pub audit: Option<Arc<AuditLog>>,
}

impl AppContext {
    pub fn new(config: ServerConfig) -> Result<Self, AppError> {
        let fetcher = HttpFetcher::new(Duration::from_secs(config.archive.fetch_timeout_secs))?;
        Ok(Self::with_fetcher(config, Arc::new(fetcher)))
    }

    /// 使用自定义下载器构建（测试中替换网络访问）
    pub fn with_fetcher(config: ServerConfig, fetcher: Arc<dyn ArchiveFetcher>) -> Self {
        let paths = PathPolicy::new(config.root_dir(), config.files.sandbox_root.clone());
        let audit = config.audit_dir().map(|dir| {
            let log = AuditLog::new(dir);
            log.cleanup_old_logs();
            Arc::new(log)
        });

        Self {
            config: Arc::new(config),
            paths: Arc::new(paths),
            fetcher,
            audit,
        }
    }

    /// 记录一次变更操作，并返回原结果
    pub fn audit<T>(
        &self,
        op: &str,
        path: &str,
        detail: Option<&str>,
        result: Result<T, AppError>,
    ) -> Result<T, AppError> {
        if let Some(log) = &self.audit {
            match &result {
                Ok(_) => log.record(op, path, detail, true),
                Err(e) => log.record(op, path, Some(&e.to_string()), false),
            }
        }
        result
    }

    pub fn command_timeout(&self) -> Option<Duration> {
        match self.config.terminal.command_timeout_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}
