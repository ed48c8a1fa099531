use std::collections::HashMap;
use std::sync::Mutex;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::models::{AnalysisError, AnalysisResult, ProgressEvent, SessionId, StartAnalysis};

// ── Wire messages ─────────────────────────────────────────────────────

/// Events pushed to a session. Serialized as `{"type": ..., "data": ...}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    Progress(ProgressEvent),
    AnalysisComplete(Box<AnalysisResult>),
    AnalysisError(AnalysisError),
}

impl ServerEvent {
    pub fn progress(message: impl Into<String>, progress: i32) -> Self {
        ServerEvent::Progress(ProgressEvent::new(message, progress))
    }

    pub fn error(message: impl std::fmt::Display) -> Self {
        ServerEvent::AnalysisError(AnalysisError::new(message))
    }

    /// The wire name of this event.
    pub fn name(&self) -> &'static str {
        match self {
            ServerEvent::Progress(_) => "progress",
            ServerEvent::AnalysisComplete(_) => "analysis_complete",
            ServerEvent::AnalysisError(_) => "analysis_error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, ServerEvent::Progress(_))
    }
}

/// Commands a session may send.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientMessage {
    StartAnalysis(StartAnalysis),
}

// ── Progress channel ──────────────────────────────────────────────────

/// Addressed delivery of events to a single session.
///
/// Implementations must preserve per-session emission order, must be safe to
/// call from many runs at once, and must treat an unknown or disconnected
/// session as a no-op.
pub trait ProgressChannel: Send + Sync {
    fn publish(&self, session: SessionId, event: ServerEvent);
}

/// Registry of connected WebSocket sessions.
///
/// Each session owns an unbounded FIFO queue drained by its socket loop, so
/// publishing never blocks and never reorders.
#[derive(Default)]
pub struct SessionHub {
    sessions: Mutex<HashMap<SessionId, mpsc::UnboundedSender<String>>>,
}

impl SessionHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new session and return its id and the queue of encoded
    /// events addressed to it.
    pub fn connect(&self) -> (SessionId, mpsc::UnboundedReceiver<String>) {
        let id = SessionId::new();
        let (tx, rx) = mpsc::unbounded_channel();
        match self.sessions.lock() {
            Ok(mut sessions) => {
                sessions.insert(id, tx);
            }
            Err(poisoned) => {
                poisoned.into_inner().insert(id, tx);
            }
        }
        tracing::debug!(session = %id, "session connected");
        (id, rx)
    }

    pub fn disconnect(&self, session: SessionId) {
        let removed = match self.sessions.lock() {
            Ok(mut sessions) => sessions.remove(&session),
            Err(poisoned) => poisoned.into_inner().remove(&session),
        };
        if removed.is_some() {
            tracing::debug!(session = %session, "session disconnected");
        }
    }

    pub fn is_connected(&self, session: SessionId) -> bool {
        self.sender(session).is_some()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().map(|s| s.len()).unwrap_or(0)
    }

    fn sender(&self, session: SessionId) -> Option<mpsc::UnboundedSender<String>> {
        self.sessions
            .lock()
            .ok()
            .and_then(|sessions| sessions.get(&session).cloned())
    }
}

impl ProgressChannel for SessionHub {
    fn publish(&self, session: SessionId, event: ServerEvent) {
        let Some(tx) = self.sender(session) else {
            tracing::debug!(
                session = %session,
                event = event.name(),
                "dropping event for disconnected session"
            );
            return;
        };
        let Some(json) = encode_event(&event) else {
            return;
        };
        if tx.send(json).is_err() {
            tracing::debug!(session = %session, event = event.name(), "session queue closed");
        }
    }
}

/// Serialize an event to its JSON text frame.
pub fn encode_event(event: &ServerEvent) -> Option<String> {
    match serde_json::to_string(event) {
        Ok(json) => Some(json),
        Err(e) => {
            tracing::error!(event = event.name(), "failed to serialize event: {}", e);
            None
        }
    }
}

/// Channel that keeps every published event in memory, in order.
///
/// Handy for headless runs and for asserting on event streams.
#[derive(Default)]
pub struct MemoryChannel {
    events: Mutex<Vec<(SessionId, ServerEvent)>>,
}

impl MemoryChannel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Events addressed to `session`, in emission order.
    pub fn events_for(&self, session: SessionId) -> Vec<ServerEvent> {
        self.events
            .lock()
            .map(|events| {
                events
                    .iter()
                    .filter(|(s, _)| *s == session)
                    .map(|(_, e)| e.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Progress percentages published to `session`, in order.
    pub fn progress_values(&self, session: SessionId) -> Vec<i32> {
        self.events_for(session)
            .into_iter()
            .filter_map(|e| match e {
                ServerEvent::Progress(p) => Some(p.progress),
                _ => None,
            })
            .collect()
    }

    pub fn terminal_events(&self, session: SessionId) -> Vec<ServerEvent> {
        self.events_for(session)
            .into_iter()
            .filter(ServerEvent::is_terminal)
            .collect()
    }
}

impl ProgressChannel for MemoryChannel {
    fn publish(&self, session: SessionId, event: ServerEvent) {
        match self.events.lock() {
            Ok(mut events) => events.push((session, event)),
            Err(poisoned) => poisoned.into_inner().push((session, event)),
        }
    }
}
