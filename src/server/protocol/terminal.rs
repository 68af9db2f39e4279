//! 终端领域协议类型

use serde::{Deserialize, Serialize};

/// Client → server frames on `/terminal`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TerminalRequest {
    Cmd {
        command: String,
        #[serde(rename = "currentPath", default)]
        current_path: Option<String>,
    },
    Interrupt,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputKind {
    Stdout,
    Stderr,
    Status,
    Error,
    Command,
}

/// Server → client frame on `/terminal`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TerminalOutput {
    pub output: String,
    #[serde(rename = "type")]
    pub kind: OutputKind,
}

impl TerminalOutput {
    pub fn new(kind: OutputKind, output: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            kind,
        }
    }
}
