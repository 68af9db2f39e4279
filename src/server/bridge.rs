//! Command Bridge session
//!
//! One `ShellSession` per `/terminal` connection, owning at most one child
//! process. Output is pushed as [`TerminalOutput`] frames into an mpsc
//! channel that the WebSocket loop drains.
//!
//! Commands are split on whitespace and spawned without a shell, so
//! quoting, pipes and globbing are not available.
//!
//! A command is finished once its own process exits. Processes it left
//! running in the background are not waited for; their output stops being
//! forwarded shortly after.

use std::path::Path;
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::server::context::AppError;
use crate::server::protocol::{OutputKind, TerminalOutput};

const READ_BUF_SIZE: usize = 8 * 1024;
/// How long output may keep flowing after the command itself exited
const OUTPUT_GRACE: Duration = Duration::from_secs(1);
const KILLED_OUTPUT_GRACE: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Running,
}

/// How a running command ended
#[derive(Debug)]
enum Finish {
    Exited(Option<i32>),
    Terminated,
    TimedOut(Duration),
    WaitFailed(String),
}

pub struct ShellSession {
    active: Arc<AtomicBool>,
    kill_tx: Option<mpsc::Sender<()>>,
    timeout: Option<Duration>,
}

impl ShellSession {
    /// `timeout`: kill commands running longer than this; `None` waits forever
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            active: Arc::new(AtomicBool::new(false)),
            kill_tx: None,
            timeout,
        }
    }

    pub fn state(&self) -> SessionState {
        if self.active.load(Ordering::SeqCst) {
            SessionState::Running
        } else {
            SessionState::Idle
        }
    }

    /// Split a command line into program and arguments on whitespace.
    pub fn split_command(command: &str) -> Option<(String, Vec<String>)> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some((program, parts.collect()))
    }

    /// Echo and spawn `command` in `cwd`. Output, then a final `status`
    /// frame, are delivered through `events`.
    pub async fn start(
        &mut self,
        command: &str,
        cwd: &Path,
        events: mpsc::Sender<TerminalOutput>,
    ) -> Result<(), AppError> {
        if self.state() == SessionState::Running {
            return Err(AppError::Busy(
                "A command is already running; wait for it to finish".to_string(),
            ));
        }
        let (program, args) = Self::split_command(command)
            .ok_or_else(|| AppError::InvalidInput("Command is empty".to_string()))?;

        let _ = events
            .send(TerminalOutput::new(
                OutputKind::Command,
                format!("> {}\r\n", command.trim()),
            ))
            .await;

        info!(%program, cwd = %cwd.display(), "Spawning command");
        let mut child = Command::new(&program)
            .args(&args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AppError::ProcessSpawnFailed(e.to_string()))?;

        let mut forwarders: Vec<JoinHandle<()>> = Vec::with_capacity(2);
        if let Some(out) = child.stdout.take() {
            forwarders.push(tokio::spawn(forward_output(out, OutputKind::Stdout, events.clone())));
        }
        if let Some(err) = child.stderr.take() {
            forwarders.push(tokio::spawn(forward_output(err, OutputKind::Stderr, events.clone())));
        }

        // Polled again during the drain phase, which a oneshot cannot be
        let (kill_tx, mut kill_rx) = mpsc::channel::<()>(1);
        self.kill_tx = Some(kill_tx);
        self.active.store(true, Ordering::SeqCst);

        let active = self.active.clone();
        let timeout = self.timeout;
        tokio::spawn(async move {
            let deadline = tokio::time::sleep(timeout.unwrap_or_default());
            tokio::pin!(deadline);

            let finish = tokio::select! {
                status = child.wait() => match status {
                    Ok(status) => Finish::Exited(status.code()),
                    Err(e) => Finish::WaitFailed(e.to_string()),
                },
                // Explicit terminate() or the session being dropped
                _ = kill_rx.recv() => {
                    let _ = child.kill().await;
                    Finish::Terminated
                }
                _ = &mut deadline, if timeout.is_some() => {
                    let _ = child.kill().await;
                    Finish::TimedOut(timeout.unwrap_or_default())
                }
            };

            // Drain remaining output. A backgrounded grandchild can hold the
            // pipes open indefinitely, so the drain is bounded and stays
            // interruptible by terminate() and the deadline.
            let exited = matches!(finish, Finish::Exited(_) | Finish::WaitFailed(_));
            let grace = if exited { OUTPUT_GRACE } else { KILLED_OUTPUT_GRACE };
            let finish = {
                let drain = async {
                    for handle in forwarders.iter_mut() {
                        let _ = handle.await;
                    }
                };
                tokio::select! {
                    _ = drain => finish,
                    _ = tokio::time::sleep(grace) => {
                        debug!(%program, "Output pipes still open, detaching readers");
                        finish
                    }
                    _ = kill_rx.recv(), if exited => Finish::Terminated,
                    _ = &mut deadline, if exited && timeout.is_some() => {
                        Finish::TimedOut(timeout.unwrap_or_default())
                    }
                }
            };
            for handle in &forwarders {
                handle.abort();
            }

            debug!(?finish, %program, "Command finished");
            active.store(false, Ordering::SeqCst);
            let _ = events.send(finish_frame(&finish)).await;
        });

        Ok(())
    }

    /// Kill the running command, if any. Returns whether one was signalled.
    pub fn terminate(&mut self) -> bool {
        match self.kill_tx.take() {
            Some(tx) if self.state() == SessionState::Running => tx.try_send(()).is_ok(),
            _ => false,
        }
    }
}

impl Drop for ShellSession {
    fn drop(&mut self) {
        if self.terminate() {
            info!("Session closed, terminating running command");
        }
    }
}

async fn forward_output<R>(mut reader: R, kind: OutputKind, events: mpsc::Sender<TerminalOutput>)
where
    R: AsyncRead + Unpin,
{
    let mut buf = vec![0u8; READ_BUF_SIZE];
    let mut pending: Vec<u8> = Vec::new();
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                pending.extend_from_slice(&buf[..n]);
                let chunk = take_utf8(&mut pending);
                if chunk.is_empty() {
                    continue;
                }
                if events.send(TerminalOutput::new(kind, chunk)).await.is_err() {
                    return;
                }
            }
            Err(e) => {
                warn!("Failed to read {:?} pipe: {}", kind, e);
                break;
            }
        }
    }
    if !pending.is_empty() {
        let rest = String::from_utf8_lossy(&pending).to_string();
        let _ = events.send(TerminalOutput::new(kind, rest)).await;
    }
}

/// Decode the complete characters in `pending`, leaving a trailing
/// incomplete sequence in place for the next read. Invalid bytes become
/// U+FFFD.
fn take_utf8(pending: &mut Vec<u8>) -> String {
    let mut out = String::new();
    let mut consumed = 0;
    loop {
        match std::str::from_utf8(&pending[consumed..]) {
            Ok(rest) => {
                out.push_str(rest);
                consumed = pending.len();
                break;
            }
            Err(e) => {
                let valid_end = consumed + e.valid_up_to();
                out.push_str(&String::from_utf8_lossy(&pending[consumed..valid_end]));
                match e.error_len() {
                    Some(len) => {
                        out.push(char::REPLACEMENT_CHARACTER);
                        consumed = valid_end + len;
                    }
                    None => {
                        consumed = valid_end;
                        break;
                    }
                }
            }
        }
    }
    pending.drain(..consumed);
    out
}

fn finish_frame(finish: &Finish) -> TerminalOutput {
    match finish {
        Finish::Exited(Some(code)) => {
            TerminalOutput::new(OutputKind::Status, format!("\r\nExited with code {}.\r\n", code))
        }
        Finish::Exited(None) => {
            TerminalOutput::new(OutputKind::Status, "\r\nExited after a signal.\r\n")
        }
        Finish::Terminated => TerminalOutput::new(OutputKind::Status, "\r\nProcess terminated.\r\n"),
        Finish::TimedOut(d) => TerminalOutput::new(
            OutputKind::Status,
            format!(
                "\r\nCommand timed out after {}s and was terminated.\r\n",
                d.as_secs()
            ),
        ),
        Finish::WaitFailed(e) => {
            TerminalOutput::new(OutputKind::Error, format!("\r\nFailed to wait for command: {}\r\n", e))
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use tempfile::TempDir;

    /// Collect frames until (and including) the final status/error frame
    async fn collect_until_done(rx: &mut mpsc::Receiver<TerminalOutput>) -> Vec<TerminalOutput> {
        let mut frames = Vec::new();
        loop {
            let frame = tokio::time::timeout(Duration::from_secs(10), rx.recv())
                .await
                .expect("timed out waiting for output")
                .expect("channel closed");
            let last = matches!(frame.kind, OutputKind::Status | OutputKind::Error);
            frames.push(frame);
            if last {
                return frames;
            }
        }
    }

    #[test]
    fn test_split_command() {
        assert_eq!(
            ShellSession::split_command("  ls   -la  /tmp "),
            Some(("ls".to_string(), vec!["-la".to_string(), "/tmp".to_string()]))
        );
        assert_eq!(ShellSession::split_command("   "), None);
    }

    #[tokio::test]
    async fn test_runs_command_and_reports_exit() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("marker.txt"), "").unwrap();
        let (tx, mut rx) = mpsc::channel(64);
        let mut session = ShellSession::new(None);

        session.start("ls", temp.path(), tx).await.unwrap();
        let frames = collect_until_done(&mut rx).await;

        assert_eq!(frames[0], TerminalOutput::new(OutputKind::Command, "> ls\r\n"));
        let stdout: String = frames
            .iter()
            .filter(|f| f.kind == OutputKind::Stdout)
            .map(|f| f.output.as_str())
            .collect();
        assert!(stdout.contains("marker.txt"));
        let last = frames.last().unwrap();
        assert_eq!(last.kind, OutputKind::Status);
        assert_eq!(last.output, "\r\nExited with code 0.\r\n");
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_stderr_and_nonzero_exit() {
        let temp = TempDir::new().unwrap();
        let (tx, mut rx) = mpsc::channel(64);
        let mut session = ShellSession::new(None);

        session.start("ls does-not-exist", temp.path(), tx).await.unwrap();
        let frames = collect_until_done(&mut rx).await;

        assert!(frames.iter().any(|f| f.kind == OutputKind::Stderr));
        let last = frames.last().unwrap();
        assert!(last.output.starts_with("\r\nExited with code "));
        assert_ne!(last.output, "\r\nExited with code 0.\r\n");
    }

    #[tokio::test]
    async fn test_busy_then_terminate() {
        let temp = TempDir::new().unwrap();
        let (tx, mut rx) = mpsc::channel(64);
        let mut session = ShellSession::new(None);

        session.start("sleep 30", temp.path(), tx.clone()).await.unwrap();
        assert_eq!(session.state(), SessionState::Running);
        assert!(matches!(
            session.start("ls", temp.path(), tx).await,
            Err(AppError::Busy(_))
        ));

        assert!(session.terminate());
        let frames = collect_until_done(&mut rx).await;
        assert_eq!(frames.last().unwrap().output, "\r\nProcess terminated.\r\n");
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!session.terminate());
    }

    #[tokio::test]
    async fn test_timeout_kills_command() {
        let temp = TempDir::new().unwrap();
        let (tx, mut rx) = mpsc::channel(64);
        let mut session = ShellSession::new(Some(Duration::from_millis(200)));

        session.start("sleep 30", temp.path(), tx).await.unwrap();
        let frames = collect_until_done(&mut rx).await;

        assert!(frames.last().unwrap().output.contains("timed out"));
        assert_eq!(session.state(), SessionState::Idle);
    }

    #[tokio::test]
    async fn test_background_grandchild_does_not_hold_session() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("bg.sh"), "sleep 5 &\necho started\n").unwrap();
        let (tx, mut rx) = mpsc::channel(64);
        let mut session = ShellSession::new(None);

        session.start("sh bg.sh", temp.path(), tx.clone()).await.unwrap();
        let frames = tokio::time::timeout(Duration::from_secs(4), collect_until_done(&mut rx))
            .await
            .expect("session stayed busy behind the background process");

        assert!(frames
            .iter()
            .any(|f| f.kind == OutputKind::Stdout && f.output.contains("started")));
        assert_eq!(frames.last().unwrap().output, "\r\nExited with code 0.\r\n");
        assert_eq!(session.state(), SessionState::Idle);

        session.start("true", temp.path(), tx).await.unwrap();
        let frames = collect_until_done(&mut rx).await;
        assert_eq!(frames.last().unwrap().output, "\r\nExited with code 0.\r\n");
    }

    #[tokio::test]
    async fn test_timeout_with_background_grandchild() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("bg.sh"), "sleep 5 &\nsleep 30\n").unwrap();
        let (tx, mut rx) = mpsc::channel(64);
        let mut session = ShellSession::new(Some(Duration::from_millis(300)));

        session.start("sh bg.sh", temp.path(), tx).await.unwrap();
        let frames = tokio::time::timeout(Duration::from_secs(3), collect_until_done(&mut rx))
            .await
            .expect("timeout did not end the command");

        assert!(frames.last().unwrap().output.contains("timed out"));
        assert_eq!(session.state(), SessionState::Idle);
        assert!(!session.terminate());
    }

    #[test]
    fn test_take_utf8_keeps_split_characters() {
        let bytes = "aé".as_bytes();
        let mut pending = bytes[..2].to_vec();
        assert_eq!(take_utf8(&mut pending), "a");
        assert_eq!(pending, vec![0xC3]);

        pending.extend_from_slice(&bytes[2..]);
        assert_eq!(take_utf8(&mut pending), "é");
        assert!(pending.is_empty());

        let mut pending = vec![0xFF, b'b'];
        assert_eq!(take_utf8(&mut pending), "\u{FFFD}b");
        assert!(pending.is_empty());
    }

    #[tokio::test]
    async fn test_spawn_failure_leaves_session_idle() {
        let temp = TempDir::new().unwrap();
        let (tx, mut rx) = mpsc::channel(64);
        let mut session = ShellSession::new(None);

        let result = session
            .start("filedeck-no-such-binary --flag", temp.path(), tx)
            .await;

        assert!(matches!(result, Err(AppError::ProcessSpawnFailed(_))));
        assert_eq!(session.state(), SessionState::Idle);
        // Only the echo was emitted
        assert_eq!(rx.recv().await.unwrap().kind, OutputKind::Command);
    }

    #[tokio::test]
    async fn test_empty_command_rejected() {
        let temp = TempDir::new().unwrap();
        let (tx, _rx) = mpsc::channel(4);
        let mut session = ShellSession::new(None);
        assert!(matches!(
            session.start("  ", temp.path(), tx).await,
            Err(AppError::InvalidInput(_))
        ));
    }
}
