//! Manages provider-specific WebSocket connections for speech recognition and synthesis.

pub mod assemblyai;
pub mod cartesia;

use crate::config::{Config, SttProvider};
use anyhow::{Context, Result};
use futures_util::{
    StreamExt,
    stream::{SplitSink, SplitStream},
};
use std::sync::Arc;
use tokio::net::TcpStream;
use tokio_tungstenite::{
    MaybeTlsStream, WebSocketStream, connect_async,
    tungstenite::{handshake::client::Request, protocol::Message as WsMessage},
};
use tracing::info;
use voice_agent_core::{stt::SpeechToText, tts::TextToSpeech};

pub type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;
pub type WsSink = SplitSink<WsStream, WsMessage>;
pub type WsSource = SplitStream<WsStream>;

/// Cartesia API version sent with every request.
pub const CARTESIA_VERSION: &str = "2025-04-16";

/// Opens a provider WebSocket and splits it into its sending and receiving halves.
pub(crate) async fn open(request: Request, provider: &'static str) -> Result<(WsSink, WsSource)> {
    let (ws_stream, _) = connect_async(request)
        .await
        .with_context(|| format!("Failed to connect to {} WebSocket", provider))?;
    info!(provider, "Provider WebSocket connected.");
    Ok(ws_stream.split())
}

/// Builds the configured speech-to-text provider.
pub fn speech_to_text(config: &Config) -> Result<Arc<dyn SpeechToText>> {
    Ok(match config.stt_provider {
        SttProvider::AssemblyAI => {
            let api_key = config
                .assemblyai_api_key
                .clone()
                .context("AssemblyAI API key not found")?;
            Arc::new(assemblyai::AssemblyAiStt::new(api_key, config.sample_rate))
        }
        SttProvider::Cartesia => Arc::new(cartesia::CartesiaStt::new(
            config.cartesia_api_key.clone(),
            config.cartesia_stt_model.clone(),
            config.sample_rate,
        )),
    })
}

/// Builds the text-to-speech provider.
pub fn text_to_speech(config: &Config) -> Arc<dyn TextToSpeech> {
    Arc::new(cartesia::CartesiaTts::new(
        config.cartesia_api_key.clone(),
        config.cartesia_tts_model.clone(),
        config.cartesia_voice_id.clone(),
    ))
}
