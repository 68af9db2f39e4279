//! Attachment responses
//!
//! Files are streamed in chunks. A cleanup guard travels with the stream and
//! is dropped when the body finishes or the client goes away, which is how
//! temporary zips and exported files get removed.

use axum::body::Body;
use axum::http::{header, HeaderValue};
use axum::response::Response;
use bytes::Bytes;
use std::fs;
use std::path::{Path, PathBuf};
use tokio::io::AsyncReadExt;
use tracing::{debug, warn};

use crate::server::context::AppError;

const CHUNK_SIZE: usize = 64 * 1024;

/// Anything whose `Drop` releases resources backing a download
pub type CleanupGuard = Box<dyn Send + 'static>;

/// Removes a file, and optionally its (then empty) parent directory, on drop
#[derive(Debug)]
pub struct RemoveOnDrop {
    file: PathBuf,
    dir: Option<PathBuf>,
}

impl RemoveOnDrop {
    pub fn file(file: PathBuf) -> Self {
        Self { file, dir: None }
    }

    pub fn file_and_dir(file: PathBuf, dir: PathBuf) -> Self {
        Self {
            file,
            dir: Some(dir),
        }
    }
}

impl Drop for RemoveOnDrop {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.file) {
            warn!("Failed to remove {:?}: {}", self.file, e);
        } else {
            debug!("Removed {:?}", self.file);
        }
        if let Some(dir) = &self.dir {
            let _ = fs::remove_dir(dir);
        }
    }
}

struct StreamState {
    file: tokio::fs::File,
    done: bool,
    _guard: Option<CleanupGuard>,
}

/// Stream `path` as `Content-Disposition: attachment` named `download_name`.
pub async fn attachment(
    path: &Path,
    download_name: &str,
    guard: Option<CleanupGuard>,
) -> Result<Response, AppError> {
    let file = tokio::fs::File::open(path)
        .await
        .map_err(|e| AppError::from_io(e, path))?;
    let metadata = file.metadata().await?;
    if metadata.is_dir() {
        return Err(AppError::InvalidInput(format!(
            "'{}' is a directory",
            path.display()
        )));
    }

    let state = StreamState {
        file,
        done: false,
        _guard: guard,
    };
    let stream = futures::stream::unfold(state, |mut state| async move {
        if state.done {
            return None;
        }
        let mut buf = vec![0u8; CHUNK_SIZE];
        match state.file.read(&mut buf).await {
            Ok(0) => None,
            Ok(n) => {
                buf.truncate(n);
                Some((Ok(Bytes::from(buf)), state))
            }
            Err(e) => {
                state.done = true;
                Some((Err(e), state))
            }
        }
    });

    let content_type = mime_guess::from_path(download_name)
        .first_or_octet_stream()
        .to_string();

    Response::builder()
        .header(header::CONTENT_TYPE, content_type)
        .header(header::CONTENT_LENGTH, metadata.len())
        .header(header::CONTENT_DISPOSITION, content_disposition(download_name))
        .body(Body::from_stream(stream))
        .map_err(|e| AppError::Internal(format!("Failed to build response: {}", e)))
}

/// `attachment; filename="..."; filename*=UTF-8''...`
fn content_disposition(name: &str) -> HeaderValue {
    let ascii: String = name
        .chars()
        .map(|c| {
            if (c.is_ascii_graphic() && c != '"' && c != '\\') || c == ' ' {
                c
            } else {
                '_'
            }
        })
        .collect();

    let mut encoded = String::new();
    for b in name.bytes() {
        if b.is_ascii_alphanumeric() || b"-._~".contains(&b) {
            encoded.push(b as char);
        } else {
            encoded.push_str(&format!("%{:02X}", b));
        }
    }

    let value = format!("attachment; filename=\"{}\"; filename*=UTF-8''{}", ascii, encoded);
    HeaderValue::from_str(&value).unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}
