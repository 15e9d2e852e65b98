//! Streaming Pipeline Orchestrator
//!
//! Composes the three stages of a voice session and pumps the merged event
//! stream to the client:
//!
//! - `ingest`: client audio → recognizer, recognizer results → transcript events.
//! - `dialog`: transcript events pass through; each final transcript runs one agent turn.
//! - `synthesis`: agent events pass through; each completed turn is synthesized.
//!
//! Stages run as separate tasks connected by bounded channels. The pass-through
//! output of the synthesis stage and the synthesized audio are combined by a
//! [`FanIn`](crate::merge::FanIn) into the session's single outbound stream.

mod dialog;
mod ingest;
mod synthesis;

use crate::{
    agent::{ConversationAgent, ConversationLease},
    cleanup::{SessionCleanup, Stage, StageHandle},
    event::VoiceAgentEvent,
    merge::fan_in,
    session::{CloseReason, Session, SessionState},
    stt::SpeechToText,
    tts::TextToSpeech,
};
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::{Stream, StreamExt};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::{sync::mpsc, task::JoinSet};
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, instrument, warn};

/// Tunables for one pipeline session.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Capacity of every inter-stage channel.
    pub channel_capacity: usize,
    /// How long stage tasks get to finish after cancellation before they are aborted.
    pub shutdown_timeout: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            channel_capacity: 64,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

/// Errors that end a session abnormally.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("speech-to-text connection failed: {0:#}")]
    SttConnect(anyhow::Error),
    #[error("text-to-speech connection failed: {0:#}")]
    TtsConnect(anyhow::Error),
    #[error("pipeline stage task failed")]
    StageFailed,
}

/// The transport boundary that receives the merged event stream.
#[async_trait]
pub trait EventSink: Send {
    async fn send(&mut self, event: VoiceAgentEvent) -> Result<()>;
}

#[async_trait]
impl EventSink for mpsc::Sender<VoiceAgentEvent> {
    async fn send(&mut self, event: VoiceAgentEvent) -> Result<()> {
        mpsc::Sender::send(self, event)
            .await
            .map_err(|_| anyhow::anyhow!("event receiver dropped"))
    }
}

/// Builds and runs voice sessions against a fixed set of collaborators.
#[derive(Clone)]
pub struct VoicePipeline {
    stt: Arc<dyn SpeechToText>,
    tts: Arc<dyn TextToSpeech>,
    agent: Arc<dyn ConversationAgent>,
    config: PipelineConfig,
}

impl VoicePipeline {
    pub fn new(
        stt: Arc<dyn SpeechToText>,
        tts: Arc<dyn TextToSpeech>,
        agent: Arc<dyn ConversationAgent>,
    ) -> Self {
        Self {
            stt,
            tts,
            agent,
            config: PipelineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: PipelineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Runs one session from connection to teardown.
    ///
    /// Returns once the session is `Closed`. Every collaborator that was
    /// connected has been closed exactly once by then, however the session
    /// ended. Nothing is sent to `sink` after `Closing` is entered.
    #[instrument(name = "pipeline", skip_all, fields(thread_id = %session.thread_id()))]
    pub async fn run<A, K>(
        &self,
        session: Arc<Session>,
        audio: A,
        sink: &mut K,
    ) -> Result<CloseReason, PipelineError>
    where
        A: Stream<Item = Bytes> + Send + 'static,
        K: EventSink + ?Sized,
    {
        let cancel = session.cancellation();

        info!("Connecting collaborators.");
        let stt_connect = self.stt.connect();
        let tts_connect = self.tts.connect();
        tokio::pin!(stt_connect, tts_connect);
        let (mut stt_result, mut tts_result) = (None, None);
        // Each connection is awaited on its own so one that finishes before
        // cancellation is still closed.
        while stt_result.is_none() || tts_result.is_none() {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                connected = &mut stt_connect, if stt_result.is_none() => stt_result = Some(connected),
                connected = &mut tts_connect, if tts_result.is_none() => tts_result = Some(connected),
            }
        }
        let (stt, tts) = match (stt_result, tts_result) {
            (Some(Ok(stt)), Some(Ok(tts))) => (stt, tts),
            (Some(Err(e)), tts) => {
                match tts {
                    Some(Ok(mut tts)) => {
                        let _ = tts.sender.close().await;
                    }
                    Some(Err(tts_err)) => {
                        warn!(error = ?tts_err, "Synthesizer connection failed as well.")
                    }
                    None => {}
                }
                return Err(connect_failed(&session, PipelineError::SttConnect(e)));
            }
            (stt, Some(Err(e))) => {
                if let Some(Ok(mut stt)) = stt {
                    let _ = stt.sender.close().await;
                }
                return Err(connect_failed(&session, PipelineError::TtsConnect(e)));
            }
            (stt, tts) => {
                info!("Closed while connecting.");
                if let Some(Ok(mut stt)) = stt {
                    let _ = stt.sender.close().await;
                }
                if let Some(Ok(mut tts)) = tts {
                    let _ = tts.sender.close().await;
                }
                session.mark_closed();
                return Ok(session.close_reason().unwrap_or(CloseReason::Requested));
            }
        };

        let stt_handle = StageHandle::new(Stage::Ingest, stt.sender);
        let tts_handle = StageHandle::new(Stage::Synthesis, tts.sender);
        let dialog_handle = StageHandle::new(
            Stage::Dialog,
            ConversationLease::new(self.agent.clone(), session.thread_id()),
        );
        let mut cleanup = SessionCleanup::new();
        cleanup.register(stt_handle.clone());
        cleanup.register(dialog_handle);
        cleanup.register(tts_handle.clone());

        if !session.mark_streaming() {
            // Closed while connecting.
            cleanup.close_all().await;
            session.mark_closed();
            return Ok(session.close_reason().unwrap_or(CloseReason::Requested));
        }
        info!("Session streaming.");

        let capacity = self.config.channel_capacity.max(1);
        let (stt_tx, stt_rx) = mpsc::channel(capacity);
        let (dialog_tx, dialog_rx) = mpsc::channel(capacity);
        let (pass_tx, pass_rx) = mpsc::channel(capacity);
        let (audio_tx, audio_rx) = mpsc::channel(capacity);

        let span = tracing::Span::current();
        let mut tasks = JoinSet::new();
        tasks.spawn(
            ingest::forward_audio(stt_handle.clone(), audio.boxed(), session.clone())
                .instrument(span.clone()),
        );
        tasks.spawn(
            ingest::relay_transcripts(stt_handle, stt.recognitions, stt_tx, session.clone())
                .instrument(span.clone()),
        );
        tasks.spawn(
            dialog::run_dialog(
                self.agent.clone(),
                session.thread_id().to_string(),
                stt_rx,
                dialog_tx,
                cancel.clone(),
            )
            .instrument(span.clone()),
        );
        tasks.spawn(
            synthesis::buffer_turns(tts_handle.clone(), dialog_rx, pass_tx, cancel.clone())
                .instrument(span.clone()),
        );
        tasks.spawn(
            synthesis::relay_audio(tts_handle, tts.audio, audio_tx, cancel.clone())
                .instrument(span),
        );

        // Pass-through first: an `AgentEnd` is always queued before the audio it triggers.
        let mut merged = fan_in(
            [ReceiverStream::new(pass_rx), ReceiverStream::new(audio_rx)],
            cancel.clone(),
        );

        let mut stage_failed = false;
        let mut sent = 0usize;
        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break,
                Some(joined) = tasks.join_next() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(error = %e, "Stage task panicked.");
                            stage_failed = true;
                            session.close(CloseReason::StageFailed);
                        }
                    }
                }
                event = merged.next() => {
                    let Some(event) = event else {
                        session.close(CloseReason::StagesFinished);
                        break;
                    };
                    debug!(kind = event.kind(), "Sending event.");
                    match recv_or_cancel(&cancel, sink.send(event)).await {
                        Some(Ok(())) => sent += 1,
                        Some(Err(e)) => {
                            warn!(error = ?e, "Transport send failed.");
                            session.close(CloseReason::TransportFailed);
                            break;
                        }
                        None => break,
                    }
                }
            }
        }

        // No-op unless the token was cancelled without a close trigger.
        session.close(CloseReason::Requested);
        drop(merged);
        shutdown_tasks(&mut tasks, self.config.shutdown_timeout, &mut stage_failed).await;
        let closed = cleanup.close_all().await;
        session.mark_closed();

        let reason = session.close_reason().unwrap_or(CloseReason::Requested);
        info!(?reason, sent, closed, "Session closed.");
        if stage_failed {
            Err(PipelineError::StageFailed)
        } else {
            Ok(reason)
        }
    }
}

fn connect_failed(session: &Session, err: PipelineError) -> PipelineError {
    error!(error = %err, "Session could not start.");
    session.close(CloseReason::ConnectFailed);
    session.mark_closed();
    err
}

/// Waits for the stage tasks to observe cancellation, aborting stragglers.
async fn shutdown_tasks(tasks: &mut JoinSet<()>, timeout: Duration, stage_failed: &mut bool) {
    let drained = tokio::time::timeout(timeout, async {
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                if e.is_panic() {
                    error!(error = %e, "Stage task panicked during shutdown.");
                    *stage_failed = true;
                }
            }
        }
    })
    .await;
    if drained.is_err() {
        warn!(remaining = tasks.len(), "Stage tasks did not stop in time; aborting.");
        tasks.shutdown().await;
    }
}

/// Awaits `fut` unless the session is cancelled first.
pub(crate) async fn recv_or_cancel<F: Future>(cancel: &CancellationToken, fut: F) -> Option<F::Output> {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => None,
        output = fut => Some(output),
    }
}

/// Sends `event` downstream. False when cancelled or the receiver is gone.
pub(crate) async fn forward(
    out: &mpsc::Sender<VoiceAgentEvent>,
    event: VoiceAgentEvent,
    cancel: &CancellationToken,
) -> bool {
    matches!(recv_or_cancel(cancel, out.send(event)).await, Some(Ok(())))
}
