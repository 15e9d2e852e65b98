//! Shared Application State
//!
//! This module defines the `AppState` struct, which holds all shared,
//! clonable resources like the pipeline and the live-session registry.

use crate::{config::Config, registry::SessionRegistry};
use std::sync::Arc;
use tokio_util::{sync::CancellationToken, task::TaskTracker};
use voice_agent_core::VoicePipeline;

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub pipeline: VoicePipeline,
    pub sessions: SessionRegistry,
    pub config: Arc<Config>,
    /// Cancelled when the server begins shutting down.
    pub shutdown: CancellationToken,
    /// Tracks WebSocket sessions so shutdown can wait for them to close.
    pub session_tasks: TaskTracker,
}

impl AppState {
    pub fn new(pipeline: VoicePipeline, config: Arc<Config>) -> Self {
        Self {
            pipeline,
            sessions: SessionRegistry::new(),
            config,
            shutdown: CancellationToken::new(),
            session_tasks: TaskTracker::new(),
        }
    }
}
