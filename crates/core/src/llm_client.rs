use anyhow::{Result, anyhow};
use async_openai::{
    Client,
    config::OpenAIConfig,
    error::OpenAIError,
    types::{
        ChatCompletionRequestMessage, ChatCompletionTool, CreateChatCompletionRequestArgs,
        CreateChatCompletionResponse,
    },
};
use async_trait::async_trait;
use futures::{Stream, StreamExt};
use std::pin::Pin;

#[cfg(test)]
use mockall::automock;

/// Represents a tool call requested by the LLM.
pub type ToolCall = async_openai::types::ChatCompletionMessageToolCall;

/// Represents the events that can be yielded from a streaming text response.
#[derive(Debug, Clone)]
pub enum LLMStreamEvent {
    TextChunk(String),
}

/// A stream of text chunks from the LLM.
pub type LLMStream = Pin<Box<dyn Stream<Item = Result<LLMStreamEvent, OpenAIError>> + Send>>;

/// Represents the two possible outcomes of the LLM's initial decision-making turn.
#[derive(Debug, Clone)]
pub enum LLMAction {
    /// The LLM decided to respond directly with text.
    TextResponse(String),
    /// The LLM decided to call one or more tools, optionally saying something first.
    ToolCall {
        preamble: Option<String>,
        calls: Vec<ToolCall>,
    },
}

/// Sampling parameters applied to every completion request.
#[derive(Debug, Clone)]
pub struct LLMSettings {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

/// A generic client for interacting with an LLM.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait LLMClient: Send + Sync {
    /// Makes a single, non-streaming call to the LLM to decide on the next action.
    async fn decide_action(
        &self,
        history_with_user_message: Vec<ChatCompletionRequestMessage>,
        tools: Vec<ChatCompletionTool>,
    ) -> Result<LLMAction>;

    /// Makes a streaming call to the LLM, typically after tools have been executed.
    async fn stream_reply(&self, history: Vec<ChatCompletionRequestMessage>) -> Result<LLMStream>;
}

/// An implementation of `LLMClient` for any OpenAI-compatible API (Groq included).
pub struct OpenAICompatibleClient {
    client: Client<OpenAIConfig>,
    settings: LLMSettings,
}

impl OpenAICompatibleClient {
    /// Creates a new client for an OpenAI-compatible service.
    ///
    /// # Arguments
    ///
    /// * `config` - API key and base URL of the service.
    /// * `settings` - Model identifier and sampling parameters.
    pub fn new(config: OpenAIConfig, settings: LLMSettings) -> Self {
        Self {
            client: Client::with_config(config),
            settings,
        }
    }

    pub fn model(&self) -> &str {
        &self.settings.model
    }
}

#[async_trait]
impl LLMClient for OpenAICompatibleClient {
    async fn decide_action(
        &self,
        history_with_user_message: Vec<ChatCompletionRequestMessage>,
        tools: Vec<ChatCompletionTool>,
    ) -> Result<LLMAction> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.settings.model)
            .temperature(self.settings.temperature)
            .max_completion_tokens(self.settings.max_tokens)
            .messages(history_with_user_message)
            .tools(tools)
            .tool_choice("auto")
            .build()?;

        let response: CreateChatCompletionResponse = self.client.chat().create(request).await?;
        let choice = response
            .choices
            .first()
            .ok_or_else(|| anyhow!("LLM response contained no choices."))?;

        match (&choice.message.tool_calls, &choice.message.content) {
            (Some(calls), content) if !calls.is_empty() => Ok(LLMAction::ToolCall {
                preamble: content.clone().filter(|text| !text.trim().is_empty()),
                calls: calls.clone(),
            }),
            (_, Some(content)) => Ok(LLMAction::TextResponse(content.clone())),
            _ => Err(anyhow!(
                "LLM response had neither text content nor tool calls."
            )),
        }
    }

    async fn stream_reply(&self, history: Vec<ChatCompletionRequestMessage>) -> Result<LLMStream> {
        let request = CreateChatCompletionRequestArgs::default()
            .model(&self.settings.model)
            .temperature(self.settings.temperature)
            .max_completion_tokens(self.settings.max_tokens)
            .messages(history)
            .stream(true)
            .build()?;

        let stream = self.client.chat().create_stream(request).await?;

        Ok(Box::pin(stream.filter_map(|result| async {
            match result {
                Ok(response) => response
                    .choices
                    .first()
                    .and_then(|choice| choice.delta.content.clone())
                    .filter(|content| !content.is_empty())
                    .map(|content| Ok(LLMStreamEvent::TextChunk(content))),
                Err(e) => Some(Err(e)),
            }
        })))
    }
}
