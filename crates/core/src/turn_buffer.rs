//! Per-turn accumulation of agent text ahead of synthesis.

/// Collects the `AgentChunk` texts of one turn in arrival order.
#[derive(Debug, Default)]
pub struct TurnBuffer {
    chunks: Vec<String>,
}

impl TurnBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, text: impl Into<String>) {
        self.chunks.push(text.into());
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.iter().all(String::is_empty)
    }

    /// Ends the turn: returns the concatenated text and clears the buffer.
    /// Returns `None` when the turn produced no text, so nothing is submitted.
    pub fn take_turn(&mut self) -> Option<String> {
        let text = self.chunks.concat();
        self.chunks.clear();
        (!text.is_empty()).then_some(text)
    }

    /// Drops a partial turn. Returns the number of discarded chunks.
    pub fn discard(&mut self) -> usize {
        let discarded = self.chunks.len();
        self.chunks.clear();
        discarded
    }
}
