//! Text-to-speech collaborator interface.

use crate::cleanup::Release;
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

/// A lazy sequence of synthesized PCM16 audio chunks.
pub type AudioStream = Pin<Box<dyn Stream<Item = Result<Bytes>> + Send>>;

/// The sending half of a live synthesizer connection.
#[async_trait]
pub trait TtsSender: Send {
    /// Requests synthesis of one complete turn of text.
    async fn send_text(&mut self, text: String) -> Result<()>;

    async fn close(&mut self) -> Result<()>;
}

pub struct TtsConnection {
    pub sender: Box<dyn TtsSender>,
    pub audio: AudioStream,
}

/// Factory for synthesizer connections. One connection per session.
#[async_trait]
pub trait TextToSpeech: Send + Sync {
    async fn connect(&self) -> Result<TtsConnection>;
}

#[async_trait]
impl Release for Box<dyn TtsSender> {
    async fn release(&mut self) -> Result<()> {
        self.close().await
    }
}
