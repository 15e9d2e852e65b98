//! API Models
//!
//! Response bodies for the REST endpoints, documented with `utoipa`.

use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use voice_agent_core::SessionState;

/// A live voice session.
#[derive(Serialize, ToSchema, Debug, Clone, PartialEq)]
pub struct SessionInfo {
    #[schema(example = "5f0c6f4e-8d7b-4a53-9a0e-0d6a1f3c9b21")]
    pub thread_id: String,
    #[schema(value_type = String, example = "STREAMING")]
    pub state: SessionState,
    pub started_at: DateTime<Utc>,
}

#[derive(Serialize, ToSchema, Debug)]
pub struct HealthResponse {
    #[schema(example = "ok")]
    pub status: String,
    pub active_sessions: usize,
}

#[derive(Serialize, ToSchema)]
pub struct ErrorResponse {
    pub message: String,
}
