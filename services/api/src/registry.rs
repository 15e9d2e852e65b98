//! Process-wide registry of live voice sessions.

use crate::models::SessionInfo;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::watch;
use tracing::{Instrument, debug, info_span};
use voice_agent_core::{Session, SessionState};

#[derive(Default, Clone)]
pub struct SessionRegistry {
    sessions: Arc<Mutex<HashMap<String, SessionInfo>>>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `session` and keeps its entry in step with its state until it closes.
    pub fn track(&self, session: &Session) {
        let thread_id = session.thread_id().to_string();
        self.lock().insert(
            thread_id.clone(),
            SessionInfo {
                thread_id: thread_id.clone(),
                state: session.state(),
                started_at: Utc::now(),
            },
        );

        let registry = self.clone();
        let states = session.subscribe();
        let span = info_span!("session_registry", %thread_id);
        tokio::spawn(async move { registry.follow(thread_id, states).await }.instrument(span));
    }

    async fn follow(&self, thread_id: String, mut states: watch::Receiver<SessionState>) {
        loop {
            let state = *states.borrow_and_update();
            if state == SessionState::Closed {
                break;
            }
            if let Some(info) = self.lock().get_mut(&thread_id) {
                info.state = state;
            }
            if states.changed().await.is_err() {
                break;
            }
        }
        self.lock().remove(&thread_id);
        debug!("Session removed from registry.");
    }

    pub fn get(&self, thread_id: &str) -> Option<SessionInfo> {
        self.lock().get(thread_id).cloned()
    }

    /// Live sessions, oldest first.
    pub fn list(&self) -> Vec<SessionInfo> {
        let mut sessions: Vec<_> = self.lock().values().cloned().collect();
        sessions.sort_by_key(|info| info.started_at);
        sessions
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SessionInfo>> {
        self.sessions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
