//! Conversational agent collaborator interface.

use crate::cleanup::Release;
use anyhow::Result;
use async_trait::async_trait;
use futures::Stream;
use serde_json::Value;
use std::pin::Pin;
use std::sync::Arc;

#[cfg(test)]
use mockall::automock;

/// A tool invocation requested by the agent.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolInvocation {
    /// Identifier assigned by the agent, if it supplied one.
    pub id: Option<String>,
    pub name: String,
    pub args: Value,
}

/// The outcome of a tool the agent ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ToolOutcome {
    pub tool_call_id: String,
    pub name: String,
    pub result: String,
}

/// One unit of a streamed agent response.
#[derive(Debug, Clone, PartialEq)]
pub enum AgentUpdate {
    TextDelta(String),
    ToolCalls(Vec<ToolInvocation>),
    ToolResult(ToolOutcome),
}

pub type AgentStream = Pin<Box<dyn Stream<Item = Result<AgentUpdate>> + Send>>;

/// A conversational agent that keeps history per conversation id.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ConversationAgent: Send + Sync {
    /// Streams the agent's response to `message` within conversation `thread_id`.
    async fn stream(&self, thread_id: &str, message: String) -> Result<AgentStream>;

    /// Drops all state kept for `thread_id`.
    async fn end_conversation(&self, thread_id: &str);
}

/// The dialog stage's handle: ending it evicts the conversation state.
pub struct ConversationLease {
    agent: Arc<dyn ConversationAgent>,
    thread_id: String,
}

impl ConversationLease {
    pub fn new(agent: Arc<dyn ConversationAgent>, thread_id: impl Into<String>) -> Self {
        Self {
            agent,
            thread_id: thread_id.into(),
        }
    }
}

#[async_trait]
impl Release for ConversationLease {
    async fn release(&mut self) -> Result<()> {
        self.agent.end_conversation(&self.thread_id).await;
        Ok(())
    }
}
