use axum::{
    body::Bytes,
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt, stream::SplitSink, stream::SplitStream};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::time::Instant;

use super::api::SharedState;
use super::channel::ClientMessage;
use super::gateway::SessionGateway;
use super::models::SessionId;

/// How often to send WebSocket Ping frames.
const PING_INTERVAL: Duration = Duration::from_secs(30);

/// How long to wait for a Pong response before considering the connection dead.
const PONG_TIMEOUT: Duration = Duration::from_secs(60);

// ── WebSocket handler ────────────────────────────────────────────────

pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(state): State<SharedState>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: SharedState) {
    let (sender, receiver) = socket.split();
    let (session, rx) = state.hub.connect();
    tracing::info!(
        session = %session,
        sessions = state.hub.session_count(),
        "client connected"
    );

    run_socket_loop(sender, receiver, rx, session, &state.gateway).await;

    // A run still in flight keeps going; its later events are dropped.
    state.hub.disconnect(session);
    tracing::info!(
        session = %session,
        sessions = state.hub.session_count(),
        "client disconnected"
    );
}

/// Core WebSocket loop with ping/pong keepalive.
///
/// Forwards the session's queued events, hands `start_analysis` frames to the
/// gateway, and pings periodically. If no Pong is received within
/// [`PONG_TIMEOUT`] after a Ping is sent, the connection is considered dead
/// and the loop exits.
async fn run_socket_loop(
    mut sender: SplitSink<WebSocket, Message>,
    mut receiver: SplitStream<WebSocket>,
    mut rx: mpsc::UnboundedReceiver<String>,
    session: SessionId,
    gateway: &SessionGateway,
) {
    let mut ping_interval = tokio::time::interval(PING_INTERVAL);
    // The first tick completes immediately; consume it so the first real
    // ping fires after PING_INTERVAL has elapsed.
    ping_interval.tick().await;

    let mut last_pong = Instant::now();
    let mut awaiting_pong = false;

    loop {
        tokio::select! {
            // ── Periodic ping ───────────────────────────────────────
            _ = ping_interval.tick() => {
                if awaiting_pong && last_pong.elapsed() > PONG_TIMEOUT {
                    tracing::debug!(session = %session, "pong timeout");
                    break;
                }
                if sender.send(Message::Ping(Bytes::new())).await.is_err() {
                    break;
                }
                awaiting_pong = true;
            }

            // ── Session events ──────────────────────────────────────
            queued = rx.recv() => {
                match queued {
                    Some(json) => {
                        if sender.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    // Sender dropped: the hub no longer knows this session.
                    None => break,
                }
            }

            // ── Client frames ───────────────────────────────────────
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        dispatch_text(gateway, session, text.as_str());
                    }
                    Some(Ok(Message::Pong(_))) => {
                        last_pong = Instant::now();
                        awaiting_pong = false;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {
                        // Binary and Ping frames carry no commands.
                    }
                    Some(Err(e)) => {
                        tracing::debug!(session = %session, "socket error: {}", e);
                        break;
                    }
                }
            }
        }
    }

    // Best-effort close frame
    let _ = sender.send(Message::Close(None)).await;
}

/// Decode one text frame and route it. Never blocks on a run.
fn dispatch_text(gateway: &SessionGateway, session: SessionId, text: &str) {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::StartAnalysis(command)) => {
            gateway.start_analysis(session, command);
        }
        Err(e) => gateway.reject(session, format!("Invalid message: {}", e)),
    }
}

// ── Tests ────────────────────────────────────────────────────────────
