//! Speech-to-text collaborator interface.

use crate::cleanup::Release;
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures::Stream;
use std::pin::Pin;

#[cfg(test)]
use mockall::automock;

/// One recognition result from the speech recognizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Recognition {
    /// An interim hypothesis that may still change.
    Partial(String),
    /// The finalized transcript of one utterance.
    Final(String),
    /// The recognizer has finished and will send nothing more.
    End,
}

/// A lazy sequence of recognition results.
pub type RecognitionStream = Pin<Box<dyn Stream<Item = Result<Recognition>> + Send>>;

/// The sending half of a live recognizer connection.
#[async_trait]
pub trait SttSender: Send {
    /// Forwards one chunk of PCM16 audio.
    async fn send_audio(&mut self, audio: Bytes) -> Result<()>;

    /// Signals the recognizer to finalize, then closes the connection.
    async fn close(&mut self) -> Result<()>;
}

/// A connected recognizer: the sender and the stream of results.
pub struct SttConnection {
    pub sender: Box<dyn SttSender>,
    pub recognitions: RecognitionStream,
}

/// Factory for recognizer connections. One connection per session.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait SpeechToText: Send + Sync {
    async fn connect(&self) -> Result<SttConnection>;
}

#[async_trait]
impl Release for Box<dyn SttSender> {
    async fn release(&mut self) -> Result<()> {
        self.close().await
    }
}
