//! 归档领域协议类型

use serde::{Deserialize, Serialize};

/// `?paths=<JSON array>` of `/download-multiple`
#[derive(Debug, Clone, Deserialize)]
pub struct MultiPathQuery {
    pub paths: String,
}

impl MultiPathQuery {
    pub fn parse(&self) -> Result<Vec<String>, serde_json::Error> {
        serde_json::from_str(&self.paths)
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportZipRequest {
    pub current_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExportZipResponse {
    pub success: bool,
    pub file_path: String,
    /// Human-readable, e.g. `"1.5 MB"`
    pub file_size: String,
    pub file_size_bytes: u64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportGitRequest {
    pub repo_url: String,
    pub current_path: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ImportResponse {
    pub success: bool,
    pub message: String,
}
