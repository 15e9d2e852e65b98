//! WebSocket Session Management
//!
//! This module contains the logic for serving voice sessions over WebSockets.
//! It is structured into submodules for clarity:
//!
//! - `protocol`: Defines the JSON message format sent to the client.
//! - `session`: Manages the WebSocket connection lifecycle and runs the pipeline.
//! - `provider`: Handles connections to third-party speech APIs (AssemblyAI, Cartesia).

pub mod protocol;
pub mod provider;
pub mod session;

pub use session::ws_handler;
