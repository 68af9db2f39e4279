// handlers module - HTTP/WebSocket route handlers
// Blocking filesystem and zip work is moved onto the blocking pool

pub mod archive;
pub mod files;
pub mod terminal;

use axum::extract::multipart::MultipartError;

use crate::server::context::AppError;

/// 多部分表单解析错误
pub(crate) fn multipart_error(e: MultipartError) -> AppError {
    AppError::InvalidInput(format!("Invalid multipart body: {}", e.body_text()))
}

/// 必填参数缺失
pub(crate) fn required<'a>(value: Option<&'a str>, field: &str) -> Result<&'a str, AppError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(AppError::InvalidInput(format!("Missing required field '{}'", field))),
    }
}
