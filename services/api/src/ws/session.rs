//! Manages the WebSocket connection lifecycle for one voice session.

use super::protocol::ServerMessage;
use crate::state::AppState;
use anyhow::Result;
use async_trait::async_trait;
use axum::{
    extract::{
        State,
        ws::{Message, WebSocket, WebSocketUpgrade},
    },
    response::Response,
};
use bytes::Bytes;
use futures_util::{
    SinkExt, Stream, StreamExt, future,
    stream::{SplitSink, SplitStream},
};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};
use voice_agent_core::{CloseReason, EventSink, PipelineError, Session, VoiceAgentEvent};

/// Axum handler to upgrade an HTTP connection to a WebSocket.
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<AppState>>) -> Response {
    let session_tasks = state.session_tasks.clone();
    ws.on_upgrade(move |socket| session_tasks.track_future(handle_socket(socket, state)))
}

/// Forwards pipeline events to the client as JSON text frames.
pub struct WsEventSink {
    socket_tx: SplitSink<WebSocket, Message>,
}

#[async_trait]
impl EventSink for WsEventSink {
    async fn send(&mut self, event: VoiceAgentEvent) -> Result<()> {
        send_msg(&mut self.socket_tx, ServerMessage::now(event)).await
    }
}

/// The client's audio: binary frames until the socket closes or errors.
fn client_audio(socket_rx: SplitStream<WebSocket>) -> impl Stream<Item = Bytes> + Send + 'static {
    socket_rx
        .take_while(|message| {
            future::ready(match message {
                Ok(Message::Close(_)) => {
                    info!("Client sent close frame.");
                    false
                }
                Ok(_) => true,
                Err(e) => {
                    warn!(error = ?e, "Error receiving from client WebSocket.");
                    false
                }
            })
        })
        .filter_map(|message| {
            future::ready(match message {
                Ok(Message::Binary(data)) => Some(data),
                _ => None,
            })
        })
}

/// Runs one pipeline session over an upgraded socket.
#[instrument(name = "ws_session", skip_all, fields(thread_id))]
async fn handle_socket(socket: WebSocket, state: Arc<AppState>) {
    let session = Arc::new(Session::new());
    tracing::Span::current().record("thread_id", session.thread_id());
    info!("New WebSocket connection.");
    state.sessions.track(&session);

    let (socket_tx, socket_rx) = socket.split();
    let mut sink = WsEventSink { socket_tx };

    match run_session(&state, session, client_audio(socket_rx), &mut sink).await {
        Ok(reason) => info!(?reason, "Voice session finished."),
        Err(e) => error!(error = %e, "Voice session terminated with error."),
    }

    // The client may already be gone.
    let _ = sink.socket_tx.close().await;
    info!("WebSocket connection closed.");
}

/// Runs the pipeline for `session`, closing it when the server shuts down.
pub(crate) async fn run_session<A, K>(
    state: &AppState,
    session: Arc<Session>,
    audio: A,
    sink: &mut K,
) -> Result<CloseReason, PipelineError>
where
    A: Stream<Item = Bytes> + Send + 'static,
    K: EventSink + ?Sized,
{
    let run = state.pipeline.run(session.clone(), audio, sink);
    tokio::pin!(run);
    tokio::select! {
        result = &mut run => result,
        _ = state.shutdown.cancelled() => {
            info!("Server shutting down; closing voice session.");
            session.close(CloseReason::Requested);
            run.await
        }
    }
}

/// A helper function to serialize and send a `ServerMessage` to the client.
pub(crate) async fn send_msg(
    socket_tx: &mut SplitSink<WebSocket, Message>,
    msg: ServerMessage,
) -> Result<()> {
    let serialized = serde_json::to_string(&msg)?;
    socket_tx.send(Message::Text(serialized.into())).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, SttProvider};
    use async_trait::async_trait;
    use futures_util::stream;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use voice_agent_core::{
        SessionState, VoicePipeline,
        agent::{AgentStream, ConversationAgent},
        stt::{SpeechToText, SttConnection, SttSender},
        tts::{TextToSpeech, TtsConnection, TtsSender},
    };

    /// Collaborators that connect and then stay silent, counting closes.
    #[derive(Clone, Default)]
    struct Idle {
        closes: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl SttSender for Idle {
        async fn send_audio(&mut self, _audio: Bytes) -> Result<()> {
            Ok(())
        }

        async fn close(&mut self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl TtsSender for Idle {
        async fn send_text(&mut self, _text: String) -> Result<()> {
            Ok(())
        }

        async fn close(&mut self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[async_trait]
    impl SpeechToText for Idle {
        async fn connect(&self) -> Result<SttConnection> {
            Ok(SttConnection {
                sender: Box::new(self.clone()),
                recognitions: Box::pin(stream::pending()),
            })
        }
    }

    #[async_trait]
    impl TextToSpeech for Idle {
        async fn connect(&self) -> Result<TtsConnection> {
            Ok(TtsConnection {
                sender: Box::new(self.clone()),
                audio: Box::pin(stream::pending()),
            })
        }
    }

    #[async_trait]
    impl ConversationAgent for Idle {
        async fn stream(&self, _thread_id: &str, _message: String) -> Result<AgentStream> {
            Ok(Box::pin(stream::pending()))
        }

        async fn end_conversation(&self, _thread_id: &str) {
            self.closes.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn app_state(idle: &Idle) -> AppState {
        let config = Config {
            bind_address: "127.0.0.1:0".parse().unwrap(),
            log_level: tracing::Level::INFO,
            stt_provider: SttProvider::AssemblyAI,
            assemblyai_api_key: Some("key".to_string()),
            cartesia_api_key: "key".to_string(),
            cartesia_voice_id: "voice".to_string(),
            cartesia_tts_model: "sonic-2".to_string(),
            cartesia_stt_model: "ink-whisper".to_string(),
            groq_api_key: "key".to_string(),
            groq_api_base: "http://localhost".to_string(),
            groq_model: "model".to_string(),
            groq_temperature: 0.7,
            groq_max_tokens: 1024,
            sample_rate: 16000,
            static_dir: None,
            system_prompt_path: None,
        };
        AppState::new(
            VoicePipeline::new(
                Arc::new(idle.clone()),
                Arc::new(idle.clone()),
                Arc::new(idle.clone()),
            ),
            Arc::new(config),
        )
    }

    #[tokio::test]
    async fn server_shutdown_closes_live_sessions() {
        let idle = Idle::default();
        let state = Arc::new(app_state(&idle));
        let session = Arc::new(Session::with_thread_id("t1"));
        let tracked = state.session_tasks.track_future({
            let state = state.clone();
            let session = session.clone();
            async move {
                let (mut sink, _events) = mpsc::channel::<VoiceAgentEvent>(8);
                run_session(&state, session, stream::pending::<Bytes>(), &mut sink).await
            }
        });
        let run = tokio::spawn(tracked);

        let mut states = session.subscribe();
        states
            .wait_for(|state| *state == SessionState::Streaming)
            .await
            .unwrap();
        state.shutdown.cancel();
        state.session_tasks.close();
        tokio::time::timeout(Duration::from_secs(2), state.session_tasks.wait())
            .await
            .expect("session did not drain after shutdown");

        assert!(matches!(run.await.unwrap(), Ok(CloseReason::Requested)));
        assert_eq!(session.state(), SessionState::Closed);
        // Recognizer, conversation and synthesizer.
        assert_eq!(idle.closes.load(Ordering::SeqCst), 3);
    }
}
