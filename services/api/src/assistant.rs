//! The sandwich-shop order assistant.
//!
//! Implements the pipeline's conversational agent on top of an
//! OpenAI-compatible chat model and the MCP order tools. Each conversation
//! keeps its own history, order and tool client in a [`ConversationRegistry`].
//!
//! A turn runs one tool-calling cycle:
//! 1. The model decides to answer directly or to call tools.
//! 2. Requested tools are executed through the MCP client.
//! 3. With tool results appended, the final reply is streamed.

use anyhow::{Context, Result};
use async_openai::types::{
    ChatCompletionRequestAssistantMessageArgs, ChatCompletionRequestMessage,
    ChatCompletionRequestSystemMessageArgs, ChatCompletionRequestToolMessageArgs,
    ChatCompletionRequestUserMessageArgs, ChatCompletionTool, ChatCompletionToolArgs,
    FunctionObjectArgs,
};
use async_trait::async_trait;
use futures_util::StreamExt;
use rmcp::{
    ServiceExt,
    model::{CallToolRequestParam, RawContent},
    service::{Peer, RoleClient, RunningService},
};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc};
use tokio_stream::wrappers::ReceiverStream;
use tracing::{Instrument, debug, info, info_span, warn};
use voice_agent_core::{
    agent::{AgentStream, AgentUpdate, ConversationAgent, ToolInvocation, ToolOutcome},
    llm_client::{LLMAction, LLMClient, LLMStreamEvent, ToolCall},
    order::{OrderService, SandwichOrder},
    registry::ConversationRegistry,
};

/// Everything one conversation remembers between turns.
pub struct Conversation {
    history: Vec<ChatCompletionRequestMessage>,
    order: Arc<Mutex<SandwichOrder>>,
    tools: Option<RunningService<RoleClient, ()>>,
}

impl Conversation {
    fn new() -> Self {
        Self {
            history: Vec::new(),
            order: Arc::new(Mutex::new(SandwichOrder::new())),
            tools: None,
        }
    }

    /// Starts the order tool service on first use and returns its client.
    async fn tool_client(&mut self) -> Result<&RunningService<RoleClient, ()>> {
        if self.tools.is_none() {
            let service = OrderService::new(self.order.clone());
            let (server_transport, client_transport) = tokio::io::duplex(4096);
            tokio::spawn(async move {
                if let Ok(server) = service.serve(server_transport).await {
                    let _ = server.waiting().await;
                }
            });
            let client = ().serve(client_transport).await?;
            self.tools = Some(client);
        }
        self.tools.as_ref().context("tool client not started")
    }

    pub fn order(&self) -> Arc<Mutex<SandwichOrder>> {
        self.order.clone()
    }
}

#[derive(Clone)]
pub struct OrderAssistant {
    llm_client: Arc<dyn LLMClient>,
    system_prompt: Arc<String>,
    conversations: Arc<ConversationRegistry<Conversation>>,
}

impl OrderAssistant {
    pub fn new(llm_client: Arc<dyn LLMClient>, system_prompt: Arc<String>) -> Self {
        Self {
            llm_client,
            system_prompt,
            conversations: Arc::new(ConversationRegistry::new()),
        }
    }

    pub fn conversations(&self) -> &ConversationRegistry<Conversation> {
        &self.conversations
    }

    /// Runs one turn. The conversation is locked only to read and to record
    /// history, never across a model or tool call, and every such call stops
    /// early once the turn's receiver is dropped.
    async fn run_turn(
        &self,
        conversation: Arc<Mutex<Conversation>>,
        message: String,
        tx: &mpsc::Sender<Result<AgentUpdate>>,
    ) -> Result<()> {
        let user_message: ChatCompletionRequestMessage =
            ChatCompletionRequestUserMessageArgs::default().content(message).build()?.into();
        let mut messages = vec![
            ChatCompletionRequestSystemMessageArgs::default()
                .content(self.system_prompt.as_str())
                .build()?
                .into(),
        ];
        let tool_client = {
            let mut conversation = conversation.lock().await;
            messages.extend(conversation.history.iter().cloned());
            conversation.tool_client().await?.peer().clone()
        };
        messages.push(user_message.clone());
        let mut turn_messages = vec![user_message];

        let tools = until_abandoned(tx, list_tools(&tool_client)).await??;
        let action = until_abandoned(tx, self.llm_client.decide_action(messages.clone(), tools)).await??;
        let calls = match action {
            LLMAction::TextResponse(text) => {
                emit(tx, AgentUpdate::TextDelta(text.clone())).await?;
                turn_messages.push(assistant_text(text)?);
                conversation.lock().await.history.extend(turn_messages);
                return Ok(());
            }
            LLMAction::ToolCall { preamble, calls } => {
                if let Some(text) = preamble {
                    emit(tx, AgentUpdate::TextDelta(text)).await?;
                }
                calls
            }
        };

        emit(
            tx,
            AgentUpdate::ToolCalls(calls.iter().map(invocation).collect()),
        )
        .await?;

        turn_messages.push(
            ChatCompletionRequestAssistantMessageArgs::default()
                .tool_calls(calls.clone())
                .build()?
                .into(),
        );
        for call in &calls {
            let result = until_abandoned(tx, call_tool(&tool_client, call)).await?;
            emit(
                tx,
                AgentUpdate::ToolResult(ToolOutcome {
                    tool_call_id: call.id.clone(),
                    name: call.function.name.clone(),
                    result: result.clone(),
                }),
            )
            .await?;
            turn_messages.push(
                ChatCompletionRequestToolMessageArgs::default()
                    .tool_call_id(call.id.clone())
                    .content(result)
                    .build()?
                    .into(),
            );
        }

        messages.extend(turn_messages.iter().skip(1).cloned());
        let mut reply_stream = until_abandoned(tx, self.llm_client.stream_reply(messages)).await??;
        let mut reply = String::new();
        while let Some(event) = until_abandoned(tx, reply_stream.next()).await? {
            let LLMStreamEvent::TextChunk(chunk) = event?;
            reply.push_str(&chunk);
            emit(tx, AgentUpdate::TextDelta(chunk)).await?;
        }

        if !reply.is_empty() {
            turn_messages.push(assistant_text(reply)?);
        }
        conversation.lock().await.history.extend(turn_messages);
        Ok(())
    }
}

#[async_trait]
impl ConversationAgent for OrderAssistant {
    async fn stream(&self, thread_id: &str, message: String) -> Result<AgentStream> {
        let conversation = self
            .conversations
            .get_or_insert_with(thread_id, Conversation::new);
        let (tx, rx) = mpsc::channel(32);
        let assistant = self.clone();
        let span = info_span!("assistant_turn", %thread_id);

        tokio::spawn(
            async move {
                info!("Running assistant turn.");
                if let Err(e) = assistant.run_turn(conversation, message, &tx).await {
                    // A closed receiver means the session went away mid-turn.
                    if !tx.is_closed() {
                        let _ = tx.send(Err(e)).await;
                    } else {
                        debug!(error = ?e, "Turn abandoned.");
                    }
                }
            }
            .instrument(span),
        );

        Ok(Box::pin(ReceiverStream::new(rx)))
    }

    async fn end_conversation(&self, thread_id: &str) {
        let Some(conversation) = self.conversations.evict(thread_id) else {
            return;
        };
        let mut conversation = conversation.lock().await;
        {
            let order = conversation.order.lock().await;
            info!(%thread_id, order = ?*order, "Conversation ended.");
        }
        if let Some(client) = conversation.tools.take() {
            if let Err(e) = client.cancel().await {
                warn!(error = ?e, "Failed to stop the order tool client.");
            }
        }
    }
}

/// Awaits `fut` unless the turn's receiver goes away first.
async fn until_abandoned<F: Future>(tx: &mpsc::Sender<Result<AgentUpdate>>, fut: F) -> Result<F::Output> {
    tokio::select! {
        biased;
        _ = tx.closed() => Err(anyhow::anyhow!("turn receiver dropped")),
        output = fut => Ok(output),
    }
}

async fn emit(tx: &mpsc::Sender<Result<AgentUpdate>>, update: AgentUpdate) -> Result<()> {
    tx.send(Ok(update))
        .await
        .map_err(|_| anyhow::anyhow!("turn receiver dropped"))
}

fn assistant_text(text: String) -> Result<ChatCompletionRequestMessage> {
    Ok(ChatCompletionRequestAssistantMessageArgs::default()
        .content(text)
        .build()?
        .into())
}

fn invocation(call: &ToolCall) -> ToolInvocation {
    let args = serde_json::from_str(&call.function.arguments)
        .unwrap_or_else(|_| Value::String(call.function.arguments.clone()));
    ToolInvocation {
        id: Some(call.id.clone()).filter(|id| !id.is_empty()),
        name: call.function.name.clone(),
        args,
    }
}

async fn list_tools(client: &Peer<RoleClient>) -> Result<Vec<ChatCompletionTool>> {
    client
        .list_all_tools()
        .await?
        .into_iter()
        .map(|t| {
            Ok(ChatCompletionToolArgs::default()
                .function(
                    FunctionObjectArgs::default()
                        .name(t.name)
                        .description(t.description.unwrap_or_default())
                        .parameters(serde_json::to_value(&*t.input_schema)?)
                        .build()?,
                )
                .build()?)
        })
        .collect()
}

/// Runs one tool call. Failures become the tool's result text so the model can recover.
async fn call_tool(client: &Peer<RoleClient>, call: &ToolCall) -> String {
    let arguments = serde_json::from_str::<Value>(&call.function.arguments)
        .ok()
        .and_then(|value| value.as_object().cloned());
    let result = client
        .call_tool(CallToolRequestParam {
            name: call.function.name.clone().into(),
            arguments,
        })
        .await;

    let text = result.map_err(anyhow::Error::from).and_then(|result| {
        let annotated_content = result
            .content
            .context("Tool call returned no content")?
            .pop()
            .context("Content list was empty")?;
        Ok(match annotated_content.raw {
            RawContent::Text(text_content) => text_content.text,
            _ => "{\"error\": \"Unexpected content type from tool\"}".to_string(),
        })
    });
    match text {
        Ok(text) => {
            info!(tool = %call.function.name, result = %text, "Tool call finished.");
            text
        }
        Err(e) => {
            warn!(tool = %call.function.name, error = ?e, "Tool call failed.");
            format!("{{\"error\": \"{}\"}}", e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_openai::types::{ChatCompletionToolType, FunctionCall};
    use futures_util::stream;
    use std::sync::Mutex as StdMutex;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;
    use voice_agent_core::llm_client::LLMStream;

    /// Calls `add_to_order` on the first decision, then streams a fixed reply.
    struct ScriptedLlm {
        decisions: StdMutex<Vec<LLMAction>>,
        seen_tools: StdMutex<Vec<String>>,
        seen_history: StdMutex<Vec<usize>>,
    }

    impl ScriptedLlm {
        fn new(decisions: Vec<LLMAction>) -> Self {
            Self {
                decisions: StdMutex::new(decisions),
                seen_tools: StdMutex::new(Vec::new()),
                seen_history: StdMutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl LLMClient for ScriptedLlm {
        async fn decide_action(
            &self,
            history_with_user_message: Vec<ChatCompletionRequestMessage>,
            tools: Vec<ChatCompletionTool>,
        ) -> Result<LLMAction> {
            self.seen_history
                .lock()
                .unwrap()
                .push(history_with_user_message.len());
            *self.seen_tools.lock().unwrap() = tools.into_iter().map(|t| t.function.name).collect();
            Ok(self.decisions.lock().unwrap().remove(0))
        }

        async fn stream_reply(&self, _history: Vec<ChatCompletionRequestMessage>) -> Result<LLMStream> {
            Ok(Box::pin(stream::iter(vec![
                Ok(LLMStreamEvent::TextChunk("Anything ".to_string())),
                Ok(LLMStreamEvent::TextChunk("else?".to_string())),
            ])))
        }
    }

    fn tool_call(id: &str, name: &str, arguments: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            r#type: ChatCompletionToolType::Function,
            function: FunctionCall {
                name: name.to_string(),
                arguments: arguments.to_string(),
            },
        }
    }

    async fn collect(stream: AgentStream) -> Vec<AgentUpdate> {
        stream.map(|update| update.unwrap()).collect().await
    }

    #[tokio::test]
    async fn tool_turn_streams_calls_results_and_reply() {
        let llm = Arc::new(ScriptedLlm::new(vec![LLMAction::ToolCall {
            preamble: Some("Sure, ".to_string()),
            calls: vec![tool_call(
                "t1",
                "add_to_order",
                r#"{"item":"turkey sandwich","quantity":1}"#,
            )],
        }]));
        let assistant = OrderAssistant::new(llm.clone(), Arc::new("prompt".to_string()));

        let updates = collect(
            assistant
                .stream("thread", "add a turkey sandwich".to_string())
                .await
                .unwrap(),
        )
        .await;

        assert_eq!(
            updates,
            vec![
                AgentUpdate::TextDelta("Sure, ".to_string()),
                AgentUpdate::ToolCalls(vec![ToolInvocation {
                    id: Some("t1".to_string()),
                    name: "add_to_order".to_string(),
                    args: serde_json::json!({"item": "turkey sandwich", "quantity": 1}),
                }]),
                AgentUpdate::ToolResult(ToolOutcome {
                    tool_call_id: "t1".to_string(),
                    name: "add_to_order".to_string(),
                    result: "Added 1 x turkey sandwich to the order.".to_string(),
                }),
                AgentUpdate::TextDelta("Anything ".to_string()),
                AgentUpdate::TextDelta("else?".to_string()),
            ]
        );

        let mut tools = llm.seen_tools.lock().unwrap().clone();
        tools.sort();
        assert_eq!(tools, vec!["add_to_order", "confirm_order"]);

        let conversation = assistant.conversations().get("thread").unwrap();
        let order = conversation.lock().await.order();
        assert_eq!(order.lock().await.lines.len(), 1);
    }

    #[tokio::test]
    async fn history_carries_over_and_is_evicted_on_end() {
        let llm = Arc::new(ScriptedLlm::new(vec![
            LLMAction::TextResponse("Hi! What can I get you?".to_string()),
            LLMAction::TextResponse("Turkey it is.".to_string()),
        ]));
        let assistant = OrderAssistant::new(llm.clone(), Arc::new("prompt".to_string()));

        let first = collect(assistant.stream("thread", "hello".to_string()).await.unwrap()).await;
        let second = collect(assistant.stream("thread", "turkey".to_string()).await.unwrap()).await;

        assert_eq!(first, vec![AgentUpdate::TextDelta("Hi! What can I get you?".to_string())]);
        assert_eq!(second, vec![AgentUpdate::TextDelta("Turkey it is.".to_string())]);
        // System prompt + user, then system prompt + user + assistant + user.
        assert_eq!(*llm.seen_history.lock().unwrap(), vec![2, 4]);

        assistant.end_conversation("thread").await;
        assert!(assistant.conversations().is_empty());
    }

    #[tokio::test]
    async fn failed_decision_surfaces_as_stream_error() {
        struct FailingLlm;

        #[async_trait]
        impl LLMClient for FailingLlm {
            async fn decide_action(
                &self,
                _history: Vec<ChatCompletionRequestMessage>,
                _tools: Vec<ChatCompletionTool>,
            ) -> Result<LLMAction> {
                Err(anyhow::anyhow!("rate limited"))
            }

            async fn stream_reply(&self, _history: Vec<ChatCompletionRequestMessage>) -> Result<LLMStream> {
                Err(anyhow::anyhow!("unreachable"))
            }
        }

        let assistant = OrderAssistant::new(Arc::new(FailingLlm), Arc::new("prompt".to_string()));
        let mut stream = assistant.stream("thread", "hello".to_string()).await.unwrap();

        assert!(stream.next().await.unwrap().is_err());
        assert!(stream.next().await.is_none());
    }

    #[tokio::test]
    async fn dropped_turn_stops_the_model_call_and_ends_promptly() {
        struct DropFlag(Arc<AtomicBool>);

        impl Drop for DropFlag {
            fn drop(&mut self) {
                self.0.store(true, Ordering::SeqCst);
            }
        }

        /// Decides nothing for a minute, flagging when the call is dropped.
        struct SlowLlm {
            started: Arc<Notify>,
            abandoned: Arc<AtomicBool>,
        }

        #[async_trait]
        impl LLMClient for SlowLlm {
            async fn decide_action(
                &self,
                _history: Vec<ChatCompletionRequestMessage>,
                _tools: Vec<ChatCompletionTool>,
            ) -> Result<LLMAction> {
                let _flag = DropFlag(self.abandoned.clone());
                self.started.notify_one();
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(LLMAction::TextResponse("too late".to_string()))
            }

            async fn stream_reply(&self, _history: Vec<ChatCompletionRequestMessage>) -> Result<LLMStream> {
                Err(anyhow::anyhow!("unreachable"))
            }
        }

        let started = Arc::new(Notify::new());
        let abandoned = Arc::new(AtomicBool::new(false));
        let assistant = OrderAssistant::new(
            Arc::new(SlowLlm {
                started: started.clone(),
                abandoned: abandoned.clone(),
            }),
            Arc::new("prompt".to_string()),
        );

        let stream = assistant.stream("thread", "hello".to_string()).await.unwrap();
        started.notified().await;
        drop(stream);

        tokio::time::timeout(Duration::from_millis(500), assistant.end_conversation("thread"))
            .await
            .expect("end_conversation waited on the abandoned turn");
        assert!(assistant.conversations().is_empty());
        for _ in 0..50 {
            if abandoned.load(Ordering::SeqCst) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(abandoned.load(Ordering::SeqCst));
    }

    #[test]
    fn invalid_tool_arguments_are_passed_through_as_text() {
        let call = tool_call("", "confirm_order", "{not json");
        let invocation = invocation(&call);
        assert_eq!(invocation.id, None);
        assert_eq!(invocation.args, Value::String("{not json".to_string()));
    }
}
