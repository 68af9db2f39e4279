//! `/terminal` 消息处理

use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::server::bridge::ShellSession;
use crate::server::context::{AppContext, AppError};
use crate::server::protocol::{OutputKind, TerminalOutput, TerminalRequest};

pub const INTERRUPT_UNAVAILABLE: &str =
    "\r\nInterrupt is not available; the running command continues.\r\n";

/// 错误帧：`{ output: "\r\n<message>\r\n", type: "error" }`
pub fn error_frame(e: &AppError) -> TerminalOutput {
    TerminalOutput::new(OutputKind::Error, format!("\r\n{}\r\n", e))
}

/// Handle one text frame. Returns an immediate reply, if any; process output
/// arrives later through `events`.
pub async fn handle_terminal_message(
    text: &str,
    session: &mut ShellSession,
    ctx: &AppContext,
    events: &mpsc::Sender<TerminalOutput>,
) -> Result<Option<TerminalOutput>, AppError> {
    let request: TerminalRequest = serde_json::from_str(text)
        .map_err(|e| AppError::InvalidInput(format!("Invalid terminal message: {}", e)))?;

    match request {
        TerminalRequest::Cmd {
            command,
            current_path,
        } => {
            let cwd = ctx.paths.resolve_or_root(current_path.as_deref())?;
            info!(command = %command, cwd = %cwd.display(), "Terminal command");
            session.start(&command, &cwd, events.clone()).await?;
            Ok(None)
        }
        TerminalRequest::Interrupt => {
            warn!("Interrupt requested; not supported");
            Ok(Some(TerminalOutput::new(
                OutputKind::Status,
                INTERRUPT_UNAVAILABLE,
            )))
        }
    }
}
