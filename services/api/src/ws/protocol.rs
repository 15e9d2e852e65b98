//! Defines the WebSocket message protocol between the browser client and the API server.
//!
//! The client sends raw PCM16 audio as binary frames and never sends JSON, so
//! only the server-to-client direction has a message type.

use crate::audio_utils;
use serde::Serialize;
use serde_json::Value;
use voice_agent_core::VoiceAgentEvent;

/// Messages sent from the server to the client (browser).
#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A partial transcript of the user's speech.
    SttChunk { transcript: String, ts: i64 },
    /// The final transcript of one user utterance.
    SttOutput { transcript: String, ts: i64 },
    /// A chunk of the agent's text reply.
    AgentChunk { text: String, ts: i64 },
    ToolCall {
        id: String,
        name: String,
        args: Value,
        ts: i64,
    },
    ToolResult {
        tool_call_id: String,
        name: String,
        result: String,
        ts: i64,
    },
    /// The agent finished its reply for the current turn.
    AgentEnd { ts: i64 },
    /// A chunk of audio data (base64 encoded PCM16) for the agent's voice.
    AudioChunk { data: String, ts: i64 },
}

impl ServerMessage {
    /// Builds the wire message for `event`, stamped with `ts` (ms since the Unix epoch).
    pub fn from_event(event: VoiceAgentEvent, ts: i64) -> Self {
        match event {
            VoiceAgentEvent::SttChunk { text } => Self::SttChunk { transcript: text, ts },
            VoiceAgentEvent::SttFinal { text } => Self::SttOutput { transcript: text, ts },
            VoiceAgentEvent::AgentChunk { text } => Self::AgentChunk { text, ts },
            VoiceAgentEvent::ToolCall { id, name, args } => Self::ToolCall { id, name, args, ts },
            VoiceAgentEvent::ToolResult {
                tool_call_id,
                name,
                result,
            } => Self::ToolResult {
                tool_call_id,
                name,
                result,
                ts,
            },
            VoiceAgentEvent::AgentEnd => Self::AgentEnd { ts },
            VoiceAgentEvent::AudioChunk { bytes } => Self::AudioChunk {
                data: audio_utils::encode_base64(&bytes),
                ts,
            },
        }
    }

    /// Builds the wire message for `event`, stamped with the current time.
    pub fn now(event: VoiceAgentEvent) -> Self {
        Self::from_event(event, chrono::Utc::now().timestamp_millis())
    }
}
