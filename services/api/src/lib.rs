//! Voice Agent API Library Crate
//!
//! This library contains the web-facing side of the voice ordering agent:
//! configuration, the order assistant, speech providers, API handlers,
//! WebSocket logic and routing. The `api` binary is a thin wrapper around it.

pub mod assistant;
pub mod audio_utils;
pub mod config;
pub mod handlers;
pub mod models;
pub mod registry;
pub mod router;
pub mod state;
pub mod ws;
