//! JSON wire types
//!
//! Request bodies use the camelCase field names the web client sends.
//! Every failure is rendered as [`ErrorBody`].

use serde::{Deserialize, Serialize};

pub mod archive;
pub mod file;
pub mod terminal;

pub use archive::{ExportZipRequest, ExportZipResponse, ImportGitRequest, ImportResponse, MultiPathQuery};
pub use file::{
    CreateRequest, DeleteMultipleRequest, DeleteMultipleResponse, DeleteRequest,
    FileContentResponse, ListQuery, PathQuery, RenameRequest, RenameResponse, SaveFileRequest,
    TransferRequest, TransferResponse,
};
pub use terminal::{OutputKind, TerminalOutput, TerminalRequest};

/// Error response body
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub success: bool,
    pub error: String,
    pub code: String,
}

/// Plain success response with a human-readable message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuccessBody {
    pub success: bool,
    pub message: String,
}

impl SuccessBody {
    pub fn with_message(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_request_parsing() {
        let msg: TerminalRequest =
            serde_json::from_str(r#"{"type":"cmd","command":"ls -la","currentPath":"/tmp"}"#)
                .unwrap();
        match msg {
            TerminalRequest::Cmd {
                command,
                current_path,
            } => {
                assert_eq!(command, "ls -la");
                assert_eq!(current_path.as_deref(), Some("/tmp"));
            }
            other => panic!("unexpected message: {:?}", other),
        }

        let msg: TerminalRequest = serde_json::from_str(r#"{"type":"interrupt"}"#).unwrap();
        assert!(matches!(msg, TerminalRequest::Interrupt));
    }

    #[test]
    fn test_terminal_output_shape() {
        let json = serde_json::to_value(TerminalOutput::new(OutputKind::Stderr, "oops")).unwrap();
        assert_eq!(json, serde_json::json!({ "output": "oops", "type": "stderr" }));
    }

    #[test]
    fn test_request_field_names() {
        let req: SaveFileRequest =
            serde_json::from_str(r#"{"filePath":"/a.txt","content":"x"}"#).unwrap();
        assert_eq!(req.file_path, "/a.txt");

        let req: CreateRequest =
            serde_json::from_str(r#"{"name":"d","type":"folder","currentPath":"/tmp"}"#).unwrap();
        assert_eq!(req.current_path.as_deref(), Some("/tmp"));

        let req: TransferRequest =
            serde_json::from_str(r#"{"sourcePaths":["/a"],"destPath":"/b"}"#).unwrap();
        assert_eq!(req.source_paths, vec!["/a".to_string()]);
    }

    #[test]
    fn test_success_body_shape() {
        let json = serde_json::to_value(SuccessBody::with_message("Deleted successfully")).unwrap();
        assert_eq!(
            json,
            serde_json::json!({ "success": true, "message": "Deleted successfully" })
        );
    }
}
