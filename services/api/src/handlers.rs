//! Axum Handlers for the REST API
//!
//! Read-only views of the service: health and the live voice sessions.
//! It uses `utoipa` doc comments to generate OpenAPI documentation.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
};
use std::sync::Arc;

use crate::{
    models::{ErrorResponse, HealthResponse, SessionInfo},
    state::AppState,
};

pub enum ApiError {
    NotFound(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::NotFound(message) => {
                (StatusCode::NOT_FOUND, Json(ErrorResponse { message })).into_response()
            }
        }
    }
}

/// Report service health and the number of live sessions.
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is up", body = HealthResponse)
    )
)]
pub async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        active_sessions: state.sessions.len(),
    })
}

/// List all live voice sessions.
#[utoipa::path(
    get,
    path = "/sessions",
    responses(
        (status = 200, description = "List of live sessions", body = [SessionInfo])
    )
)]
pub async fn list_sessions(State(state): State<Arc<AppState>>) -> Json<Vec<SessionInfo>> {
    Json(state.sessions.list())
}

/// Get a live voice session by its thread id.
#[utoipa::path(
    get,
    path = "/sessions/{thread_id}",
    responses(
        (status = 200, description = "Session details", body = SessionInfo),
        (status = 404, description = "Session not found", body = ErrorResponse)
    ),
    params(
        ("thread_id" = String, Path, description = "Conversation thread id of the session")
    )
)]
pub async fn get_session(
    State(state): State<Arc<AppState>>,
    Path(thread_id): Path<String>,
) -> Result<Json<SessionInfo>, ApiError> {
    state
        .sessions
        .get(&thread_id)
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("Session '{}' not found", thread_id)))
}
