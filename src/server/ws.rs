use axum::{
    extract::ws::{Message, WebSocket, WebSocketUpgrade},
    extract::State,
    response::IntoResponse,
};
use tokio::sync::mpsc;
use tracing::{debug, error, info, trace, warn};

use crate::server::bridge::ShellSession;
use crate::server::context::AppContext;
use crate::server::handlers;
use crate::server::protocol::TerminalOutput;

/// WebSocket upgrade handler for `/terminal`
pub async fn terminal_ws(ws: WebSocketUpgrade, State(ctx): State<AppContext>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, ctx))
}

/// Handle one `/terminal` connection
async fn handle_socket(mut socket: WebSocket, ctx: AppContext) {
    info!("New terminal connection established");

    // 进程输出通道：bridge 后台 task 推送 → 主循环转发到 WebSocket
    let (events_tx, mut events_rx) = mpsc::channel::<TerminalOutput>(256);
    let mut session = ShellSession::new(ctx.command_timeout());

    loop {
        tokio::select! {
            biased;  // 优先处理 WebSocket 消息

            msg_result = socket.recv() => {
                match msg_result {
                    Some(Ok(Message::Text(text))) => {
                        trace!("Received terminal message: {} bytes", text.len());
                        let reply = match handlers::terminal::handle_terminal_message(
                            &text,
                            &mut session,
                            &ctx,
                            &events_tx,
                        ).await {
                            Ok(reply) => reply,
                            Err(e) => {
                                warn!("Error handling terminal message: {}", e);
                                Some(handlers::terminal::error_frame(&e))
                            }
                        };
                        if let Some(frame) = reply {
                            // Queued output (e.g. the command echo) goes out first
                            let mut send_failed = false;
                            while let Ok(queued) = events_rx.try_recv() {
                                if let Err(e) = send_message(&mut socket, &queued).await {
                                    error!("Failed to send output: {}", e);
                                    send_failed = true;
                                    break;
                                }
                            }
                            if send_failed {
                                break;
                            }
                            if let Err(e) = send_message(&mut socket, &frame).await {
                                error!("Failed to send reply: {}", e);
                                break;
                            }
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        warn!("Ignoring binary message ({} bytes), JSON text expected", data.len());
                    }
                    Some(Ok(Message::Close(_))) => {
                        info!("Terminal connection closed by client");
                        break;
                    }
                    Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => {
                        // Handled automatically by axum
                    }
                    Some(Err(e)) => {
                        error!("WebSocket error: {}", e);
                        break;
                    }
                    None => {
                        info!("Terminal connection closed (recv returned None)");
                        break;
                    }
                }
            }

            Some(frame) = events_rx.recv() => {
                if let Err(e) = send_message(&mut socket, &frame).await {
                    error!("Failed to send output: {}", e);
                    break;
                }
            }
        }
    }

    // 连接断开：终止仍在运行的命令
    if session.terminate() {
        debug!("Terminated running command on disconnect");
    }
    info!("Terminal connection handler finished");
}

/// Send one frame as JSON text
pub async fn send_message(socket: &mut WebSocket, frame: &TerminalOutput) -> Result<(), String> {
    let text = serde_json::to_string(frame).map_err(|e| e.to_string())?;
    socket
        .send(Message::Text(text))
        .await
        .map_err(|e| e.to_string())
}
