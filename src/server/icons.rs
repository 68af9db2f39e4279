//! File name → display category used by the client grid.

use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileKind {
    Folder,
    Javascript,
    Html,
    Css,
    Json,
    Text,
    Markdown,
    Python,
    Config,
    Shell,
    Image,
    Video,
    Audio,
    Pdf,
    Other,
}

impl FileKind {
    /// Bootstrap icon class rendered by the web client.
    pub fn icon_class(self) -> &'static str {
        match self {
            FileKind::Folder => "bi bi-folder-fill",
            FileKind::Javascript => "bi bi-filetype-js",
            FileKind::Html => "bi bi-filetype-html",
            FileKind::Css => "bi bi-filetype-css",
            FileKind::Json => "bi bi-filetype-json",
            FileKind::Text => "bi bi-file-earmark-text",
            FileKind::Markdown => "bi bi-file-earmark-code",
            FileKind::Python => "bi bi-filetype-py",
            FileKind::Config => "bi bi-gear",
            FileKind::Shell => "bi bi-terminal",
            FileKind::Image => "bi bi-file-earmark-image",
            FileKind::Video => "bi bi-file-earmark-play",
            FileKind::Audio => "bi bi-file-earmark-music",
            FileKind::Pdf => "bi bi-file-earmark-pdf",
            FileKind::Other => "bi bi-file-earmark",
        }
    }
}

/// Lowercased extension without the dot; dotfiles such as `.env` have none.
pub fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
}

pub fn classify(name: &str, is_dir: bool) -> FileKind {
    if is_dir {
        return FileKind::Folder;
    }

    match extension_of(name).as_deref() {
        Some("js") => FileKind::Javascript,
        Some("html") | Some("htm") => FileKind::Html,
        Some("css") => FileKind::Css,
        Some("json") => FileKind::Json,
        Some("txt") => FileKind::Text,
        Some("md") => FileKind::Markdown,
        Some("py") => FileKind::Python,
        Some("env") => FileKind::Config,
        Some("sh") | Some("bash") => FileKind::Shell,
        Some("png") | Some("jpg") | Some("jpeg") | Some("gif") | Some("svg") => FileKind::Image,
        Some("mp4") | Some("mov") | Some("avi") => FileKind::Video,
        Some("mp3") | Some("wav") => FileKind::Audio,
        Some("pdf") => FileKind::Pdf,
        _ => FileKind::Other,
    }
}
