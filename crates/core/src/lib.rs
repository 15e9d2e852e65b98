pub mod agent;
pub mod cleanup;
pub mod event;
pub mod llm_client;
pub mod merge;
pub mod order;
pub mod pipeline;
pub mod registry;
pub mod session;
pub mod stt;
pub mod tts;
pub mod turn_buffer;

pub use event::VoiceAgentEvent;
pub use pipeline::{EventSink, PipelineConfig, PipelineError, VoicePipeline};
pub use session::{CloseReason, Session, SessionState};

/// The system prompt used when no override is configured.
pub const DEFAULT_SYSTEM_PROMPT: &str = "\
You are a helpful sandwich shop assistant. Your goal is to take the user's order.
Be concise and friendly.

Available toppings: lettuce, tomato, onion, pickles, mayo, mustard.
Available meats: turkey, ham, roast beef.
Available cheeses: swiss, cheddar, provolone.
";
