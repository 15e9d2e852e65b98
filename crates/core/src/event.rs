//! The closed set of events that flow through the voice pipeline.

use bytes::Bytes;
use serde_json::Value;

/// An event produced by one of the pipeline stages.
///
/// Events are immutable once produced. Each stage emits its own events in
/// causal order, and every pass-through stage forwards the events it receives
/// unchanged.
#[derive(Debug, Clone, PartialEq)]
pub enum VoiceAgentEvent {
    /// A partial, non-final transcript fragment.
    SttChunk { text: String },
    /// The finalized transcript for one utterance. Starts a new turn.
    SttFinal { text: String },
    /// A partial agent response.
    AgentChunk { text: String },
    /// The agent invoked a tool. `id` is unique per call within a turn.
    ToolCall { id: String, name: String, args: Value },
    /// The outcome of a tool, correlated to a prior `ToolCall` by id.
    ToolResult {
        tool_call_id: String,
        name: String,
        result: String,
    },
    /// End of the agent's turn.
    AgentEnd,
    /// Synthesized speech ready for playback (PCM16 little-endian).
    AudioChunk { bytes: Bytes },
}

impl VoiceAgentEvent {
    /// The wire name of the event kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::SttChunk { .. } => "stt_chunk",
            Self::SttFinal { .. } => "stt_output",
            Self::AgentChunk { .. } => "agent_chunk",
            Self::ToolCall { .. } => "tool_call",
            Self::ToolResult { .. } => "tool_result",
            Self::AgentEnd => "agent_end",
            Self::AudioChunk { .. } => "audio_chunk",
        }
    }

    pub fn stt_chunk(text: impl Into<String>) -> Self {
        Self::SttChunk { text: text.into() }
    }

    pub fn stt_final(text: impl Into<String>) -> Self {
        Self::SttFinal { text: text.into() }
    }

    pub fn agent_chunk(text: impl Into<String>) -> Self {
        Self::AgentChunk { text: text.into() }
    }
}
