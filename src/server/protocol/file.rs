//! 文件领域协议类型

use serde::{Deserialize, Serialize};

use crate::server::file_api::NewEntryKind;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListQuery {
    pub path: Option<String>,
    /// `false` hides dotfiles; absent shows everything
    pub hidden: Option<bool>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathQuery {
    pub path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct FileContentResponse {
    pub content: String,
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SaveFileRequest {
    pub file_path: String,
    pub content: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateRequest {
    pub name: String,
    #[serde(rename = "type")]
    pub kind: EntryType,
    pub current_path: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EntryType {
    File,
    Folder,
}

impl From<EntryType> for NewEntryKind {
    fn from(kind: EntryType) -> Self {
        match kind {
            EntryType::File => NewEntryKind::File,
            EntryType::Folder => NewEntryKind::Folder,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteRequest {
    pub path: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DeleteMultipleRequest {
    pub paths: Vec<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeleteMultipleResponse {
    pub success: bool,
    pub deleted: usize,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameRequest {
    pub old_path: String,
    pub new_name: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenameResponse {
    pub success: bool,
    pub new_path: String,
}

/// Body of `/copy` and `/move`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    pub source_paths: Vec<String>,
    pub dest_path: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TransferResponse {
    pub success: bool,
    pub paths: Vec<String>,
}
