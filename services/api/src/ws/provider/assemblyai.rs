//! Streaming speech recognition over the AssemblyAI v3 WebSocket API.

use super::{WsSink, open};
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt, future};
use serde::Deserialize;
use tokio_tungstenite::tungstenite::{client::IntoClientRequest, protocol::Message as WsMessage};
use tracing::{debug, info};
use voice_agent_core::stt::{Recognition, SpeechToText, SttConnection, SttSender};

/// Messages received from AssemblyAI.
#[derive(Deserialize, Debug)]
#[serde(tag = "type")]
enum AssemblyAiMessage {
    Begin {
        id: String,
    },
    Turn {
        transcript: String,
        #[serde(default)]
        end_of_turn: bool,
        #[serde(default)]
        turn_is_formatted: bool,
    },
    Termination {},
    #[serde(other)]
    Other,
}

/// Maps one server message to a recognition result, if it carries one.
fn parse(text: &str) -> Option<Recognition> {
    match serde_json::from_str::<AssemblyAiMessage>(text) {
        Ok(AssemblyAiMessage::Begin { id }) => {
            info!(session = %id, "AssemblyAI session started.");
            None
        }
        Ok(AssemblyAiMessage::Turn {
            transcript,
            end_of_turn,
            turn_is_formatted,
        }) => {
            if end_of_turn && turn_is_formatted {
                Some(Recognition::Final(transcript))
            } else if transcript.is_empty() {
                None
            } else {
                Some(Recognition::Partial(transcript))
            }
        }
        Ok(AssemblyAiMessage::Termination {}) => Some(Recognition::End),
        Ok(AssemblyAiMessage::Other) => None,
        Err(e) => {
            debug!(error = %e, "Ignoring unparseable AssemblyAI message.");
            None
        }
    }
}

pub struct AssemblyAiStt {
    api_key: String,
    sample_rate: u32,
}

impl AssemblyAiStt {
    pub fn new(api_key: String, sample_rate: u32) -> Self {
        Self {
            api_key,
            sample_rate,
        }
    }

    fn url(&self) -> String {
        format!(
            "wss://streaming.assemblyai.com/v3/ws?sample_rate={}&encoding=pcm_s16le&format_turns=true",
            self.sample_rate
        )
    }
}

#[async_trait]
impl SpeechToText for AssemblyAiStt {
    async fn connect(&self) -> Result<SttConnection> {
        let mut request = self.url().into_client_request()?;
        request
            .headers_mut()
            .insert("Authorization", self.api_key.parse()?);

        let (tx, rx) = open(request, "AssemblyAI").await?;
        let recognitions = rx.filter_map(|message| {
            future::ready(match message {
                Ok(WsMessage::Text(text)) => parse(&text).map(Ok),
                Ok(WsMessage::Close(_)) => Some(Ok(Recognition::End)),
                Ok(_) => None,
                Err(e) => Some(Err(e.into())),
            })
        });

        Ok(SttConnection {
            sender: Box::new(AssemblyAiSender { tx, closed: false }),
            recognitions: Box::pin(recognitions),
        })
    }
}

struct AssemblyAiSender {
    tx: WsSink,
    closed: bool,
}

#[async_trait]
impl SttSender for AssemblyAiSender {
    async fn send_audio(&mut self, audio: Bytes) -> Result<()> {
        self.tx.send(WsMessage::Binary(audio)).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(());
        }
        let terminate = serde_json::json!({ "type": "Terminate" }).to_string();
        self.tx.send(WsMessage::Text(terminate.into())).await?;
        self.tx.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formatted_end_of_turn_is_final() {
        let message = r#"{"type":"Turn","turn_order":0,"end_of_turn":true,"turn_is_formatted":true,"transcript":"Add a turkey sandwich.","words":[]}"#;
        assert_eq!(
            parse(message),
            Some(Recognition::Final("Add a turkey sandwich.".to_string()))
        );
    }

    #[test]
    fn unformatted_turn_is_partial() {
        let message = r#"{"type":"Turn","end_of_turn":true,"turn_is_formatted":false,"transcript":"add a turkey sandwich"}"#;
        assert_eq!(
            parse(message),
            Some(Recognition::Partial("add a turkey sandwich".to_string()))
        );
    }

    #[test]
    fn empty_partial_is_skipped() {
        let message = r#"{"type":"Turn","end_of_turn":false,"turn_is_formatted":false,"transcript":""}"#;
        assert_eq!(parse(message), None);
    }

    #[test]
    fn termination_ends_recognition() {
        let message = r#"{"type":"Termination","audio_duration_seconds":3,"session_duration_seconds":4}"#;
        assert_eq!(parse(message), Some(Recognition::End));
    }

    #[test]
    fn begin_and_unknown_messages_carry_nothing() {
        assert_eq!(parse(r#"{"type":"Begin","id":"abc","expires_at":1}"#), None);
        assert_eq!(parse(r#"{"type":"SpeechStarted"}"#), None);
        assert_eq!(parse("not json"), None);
    }
}
