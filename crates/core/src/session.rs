//! Per-connection session identity and lifecycle.

use serde::Serialize;
use std::fmt;
use std::sync::OnceLock;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

/// Lifecycle of a session: `Connecting → Streaming → Closing → Closed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SessionState {
    Connecting,
    Streaming,
    Closing,
    Closed,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionState::Connecting => write!(f, "CONNECTING"),
            SessionState::Streaming => write!(f, "STREAMING"),
            SessionState::Closing => write!(f, "CLOSING"),
            SessionState::Closed => write!(f, "CLOSED"),
        }
    }
}

/// What triggered the move to `Closing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseReason {
    /// The client's audio stream ended.
    InputEnded,
    /// Sending to the client failed.
    TransportFailed,
    /// A stage task failed unexpectedly.
    StageFailed,
    /// A collaborator connection could not be established.
    ConnectFailed,
    /// Every stage finished on its own.
    StagesFinished,
    /// Closed explicitly, e.g. on server shutdown.
    Requested,
}

/// One live client connection.
///
/// The session owns the conversation identifier and the cancellation token
/// shared by every task of its pipeline. Closing is idempotent: only the first
/// trigger moves the session to `Closing` and cancels the token.
#[derive(Debug)]
pub struct Session {
    thread_id: String,
    state: watch::Sender<SessionState>,
    cancel: CancellationToken,
    close_reason: OnceLock<CloseReason>,
}

impl Default for Session {
    fn default() -> Self {
        Self::new()
    }
}

impl Session {
    pub fn new() -> Self {
        Self::with_thread_id(Uuid::new_v4().to_string())
    }

    pub fn with_thread_id(thread_id: impl Into<String>) -> Self {
        let (state, _) = watch::channel(SessionState::Connecting);
        Self {
            thread_id: thread_id.into(),
            state,
            cancel: CancellationToken::new(),
            close_reason: OnceLock::new(),
        }
    }

    pub fn thread_id(&self) -> &str {
        &self.thread_id
    }

    pub fn state(&self) -> SessionState {
        *self.state.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<SessionState> {
        self.state.subscribe()
    }

    /// The token every task of this session observes.
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn close_reason(&self) -> Option<CloseReason> {
        self.close_reason.get().copied()
    }

    /// Enters `Closing` and cancels the session. Returns true only for the
    /// first trigger.
    pub fn close(&self, reason: CloseReason) -> bool {
        let entered = self.state.send_if_modified(|state| match state {
            SessionState::Connecting | SessionState::Streaming => {
                *state = SessionState::Closing;
                true
            }
            SessionState::Closing | SessionState::Closed => false,
        });
        if entered {
            let _ = self.close_reason.set(reason);
            info!(thread_id = %self.thread_id, ?reason, "Session closing.");
            self.cancel.cancel();
        } else {
            debug!(thread_id = %self.thread_id, ?reason, "Ignoring repeated close trigger.");
        }
        entered
    }

    pub(crate) fn mark_streaming(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == SessionState::Connecting {
                *state = SessionState::Streaming;
                true
            } else {
                false
            }
        })
    }

    pub(crate) fn mark_closed(&self) {
        self.state.send_if_modified(|state| {
            if *state == SessionState::Closed {
                false
            } else {
                *state = SessionState::Closed;
                true
            }
        });
        self.cancel.cancel();
    }
}
