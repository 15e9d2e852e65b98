//! Speech-synthesis stage: buffers each turn's agent text and submits it to
//! the synthesizer at `AgentEnd`.

use super::{forward, recv_or_cancel};
use crate::{
    cleanup::StageHandle,
    event::VoiceAgentEvent,
    tts::{AudioStream, TtsSender},
    turn_buffer::TurnBuffer,
};
use futures::StreamExt;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub(super) type TtsHandle = StageHandle<Box<dyn TtsSender>>;

/// Forwards every inbound event and submits each completed turn.
///
/// The `AgentEnd` is forwarded before the submission so that it always
/// precedes the audio it triggers in the merged output.
pub(super) async fn buffer_turns(
    handle: Arc<TtsHandle>,
    mut inbound: mpsc::Receiver<VoiceAgentEvent>,
    out: mpsc::Sender<VoiceAgentEvent>,
    cancel: CancellationToken,
) {
    let mut buffer = TurnBuffer::new();

    while let Some(Some(event)) = recv_or_cancel(&cancel, inbound.recv()).await {
        let completed = match &event {
            VoiceAgentEvent::AgentChunk { text } => {
                buffer.push(text.as_str());
                None
            }
            VoiceAgentEvent::AgentEnd => Some(buffer.take_turn()),
            _ => None,
        };
        if !forward(&out, event, &cancel).await {
            break;
        }
        match completed {
            Some(Some(text)) => submit(&handle, text, &cancel).await,
            Some(None) => debug!("Turn produced no text; skipping synthesis."),
            None => {}
        }
    }

    if !buffer.is_empty() {
        let discarded = buffer.discard();
        info!(discarded, "Dropping unfinished turn without synthesis.");
    }
}

async fn submit(handle: &TtsHandle, text: String, cancel: &CancellationToken) {
    if !handle.is_connected() {
        debug!("Synthesizer degraded; skipping submission.");
        return;
    }
    let Some(mut sender) = handle.lock().await else {
        return;
    };
    info!(chars = text.len(), "Submitting turn for synthesis.");
    match recv_or_cancel(cancel, sender.send_text(text)).await {
        Some(Ok(())) => {}
        Some(Err(e)) => {
            warn!(error = ?e, "Failed to submit text to synthesizer.");
            handle.mark_degraded();
        }
        None => {}
    }
}

/// Translates synthesizer output into `AudioChunk` events.
pub(super) async fn relay_audio(
    handle: Arc<TtsHandle>,
    mut audio: AudioStream,
    out: mpsc::Sender<VoiceAgentEvent>,
    cancel: CancellationToken,
) {
    while let Some(next) = recv_or_cancel(&cancel, audio.next()).await {
        match next {
            Some(Ok(bytes)) => {
                if !forward(&out, VoiceAgentEvent::AudioChunk { bytes }, &cancel).await {
                    break;
                }
            }
            Some(Err(e)) => {
                warn!(error = ?e, "Failed to receive from synthesizer.");
                handle.mark_degraded();
                break;
            }
            None => {
                debug!("Synthesizer stream ended.");
                break;
            }
        }
    }
}
