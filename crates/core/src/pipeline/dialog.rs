//! Dialog stage: passes transcript events through and runs one agent turn
//! per final transcript.

use super::{forward, recv_or_cancel};
use crate::{
    agent::{AgentStream, AgentUpdate, ConversationAgent, ToolInvocation, ToolOutcome},
    event::VoiceAgentEvent,
};
use futures::StreamExt;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

struct IssuedCall {
    id: String,
    name: String,
    generated: bool,
    resolved: bool,
}

/// Tool calls issued during the current turn.
///
/// Guarantees every emitted `ToolResult` refers to a `ToolCall` emitted
/// earlier in the same turn. Calls the agent left without an id get a fresh
/// one; their results are matched to the oldest unresolved call of the same
/// tool.
#[derive(Default)]
pub(super) struct TurnLedger {
    calls: Vec<IssuedCall>,
}

impl TurnLedger {
    pub(super) fn issue(&mut self, invocation: ToolInvocation) -> VoiceAgentEvent {
        let (id, generated) = match invocation.id.filter(|id| !id.is_empty()) {
            Some(id) => (id, false),
            None => (Uuid::new_v4().to_string(), true),
        };
        self.calls.push(IssuedCall {
            id: id.clone(),
            name: invocation.name.clone(),
            generated,
            resolved: false,
        });
        VoiceAgentEvent::ToolCall {
            id,
            name: invocation.name,
            args: invocation.args,
        }
    }

    pub(super) fn correlate(&mut self, outcome: ToolOutcome) -> Option<VoiceAgentEvent> {
        let call = match self
            .calls
            .iter_mut()
            .position(|call| call.id == outcome.tool_call_id)
        {
            Some(index) => &mut self.calls[index],
            None => self
                .calls
                .iter_mut()
                .find(|call| call.generated && !call.resolved && call.name == outcome.name)?,
        };
        call.resolved = true;
        Some(VoiceAgentEvent::ToolResult {
            tool_call_id: call.id.clone(),
            name: outcome.name,
            result: outcome.result,
        })
    }
}

/// Runs the dialog stage until the inbound events end or the session is
/// cancelled.
///
/// Every inbound event is forwarded unchanged. A `SttFinal` received while a
/// turn is in flight is queued and starts its own turn after the current
/// `AgentEnd`.
pub(super) async fn run_dialog(
    agent: Arc<dyn ConversationAgent>,
    thread_id: String,
    mut inbound: mpsc::Receiver<VoiceAgentEvent>,
    out: mpsc::Sender<VoiceAgentEvent>,
    cancel: CancellationToken,
) {
    let mut pending: VecDeque<String> = VecDeque::new();
    let mut turn: Option<(AgentStream, TurnLedger)> = None;
    let mut inbound_open = true;

    loop {
        if turn.is_none() {
            if let Some(message) = pending.pop_front() {
                info!(%thread_id, queued = pending.len(), "Starting agent turn.");
                let Some(started) = recv_or_cancel(&cancel, agent.stream(&thread_id, message)).await
                else {
                    return;
                };
                match started {
                    Ok(stream) => turn = Some((stream, TurnLedger::default())),
                    Err(e) => {
                        warn!(error = ?e, "Agent invocation failed; ending turn.");
                        if !forward(&out, VoiceAgentEvent::AgentEnd, &cancel).await {
                            return;
                        }
                        continue;
                    }
                }
            } else if !inbound_open {
                debug!("Transcript stream ended and no turn pending.");
                return;
            }
        }

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return,
            update = next_update(&mut turn), if turn.is_some() => {
                let event = match update {
                    Some(Ok(update)) => {
                        let Some((_, ledger)) = turn.as_mut() else { continue };
                        if !emit_update(update, ledger, &out, &cancel).await {
                            return;
                        }
                        continue;
                    }
                    Some(Err(e)) => {
                        warn!(error = ?e, "Agent stream failed mid-turn; ending turn.");
                        VoiceAgentEvent::AgentEnd
                    }
                    None => VoiceAgentEvent::AgentEnd,
                };
                turn = None;
                debug!("Agent turn complete.");
                if !forward(&out, event, &cancel).await {
                    return;
                }
            }
            event = inbound.recv(), if inbound_open => match event {
                Some(event) => {
                    if let VoiceAgentEvent::SttFinal { text } = &event {
                        pending.push_back(text.clone());
                    }
                    if !forward(&out, event, &cancel).await {
                        return;
                    }
                }
                None => inbound_open = false,
            },
        }
    }
}

async fn next_update(
    turn: &mut Option<(AgentStream, TurnLedger)>,
) -> Option<anyhow::Result<AgentUpdate>> {
    match turn {
        Some((stream, _)) => stream.next().await,
        None => None,
    }
}

async fn emit_update(
    update: AgentUpdate,
    ledger: &mut TurnLedger,
    out: &mpsc::Sender<VoiceAgentEvent>,
    cancel: &CancellationToken,
) -> bool {
    match update {
        AgentUpdate::TextDelta(text) if text.is_empty() => true,
        AgentUpdate::TextDelta(text) => forward(out, VoiceAgentEvent::AgentChunk { text }, cancel).await,
        AgentUpdate::ToolCalls(invocations) => {
            for invocation in invocations {
                let event = ledger.issue(invocation);
                if !forward(out, event, cancel).await {
                    return false;
                }
            }
            true
        }
        AgentUpdate::ToolResult(outcome) => match ledger.correlate(outcome) {
            Some(event) => forward(out, event, cancel).await,
            None => {
                warn!("Dropping tool result with no matching tool call.");
                true
            }
        },
    }
}
