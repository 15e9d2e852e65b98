//! Cartesia WebSocket clients: `ink` streaming recognition and `sonic` synthesis.

use super::{CARTESIA_VERSION, WsSink, open};
use crate::audio_utils;
use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::{SinkExt, StreamExt, future};
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::{
    client::IntoClientRequest, handshake::client::Request, protocol::Message as WsMessage,
};
use tracing::{debug, info, warn};
use uuid::Uuid;
use voice_agent_core::{
    stt::{Recognition, SpeechToText, SttConnection, SttSender},
    tts::{TextToSpeech, TtsConnection, TtsSender},
};

fn request(url: &str, api_key: &str) -> Result<Request> {
    let mut request = url.into_client_request()?;
    request.headers_mut().insert("X-API-Key", api_key.parse()?);
    request
        .headers_mut()
        .insert("Cartesia-Version", CARTESIA_VERSION.parse()?);
    Ok(request)
}

// --- Speech-to-text ---

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum SttMessage {
    Transcript {
        #[serde(default)]
        text: String,
        #[serde(default)]
        is_final: bool,
    },
    Done,
    Error {
        #[serde(default)]
        message: Option<String>,
    },
    #[serde(other)]
    Other,
}

fn parse_transcript(text: &str) -> Option<Recognition> {
    match serde_json::from_str::<SttMessage>(text) {
        Ok(SttMessage::Transcript { text, is_final: true }) => Some(Recognition::Final(text)),
        Ok(SttMessage::Transcript { text, .. }) if text.is_empty() => None,
        Ok(SttMessage::Transcript { text, .. }) => Some(Recognition::Partial(text)),
        Ok(SttMessage::Done) => Some(Recognition::End),
        Ok(SttMessage::Error { message }) => {
            warn!(detail = message.as_deref().unwrap_or_default(), "Cartesia STT reported an error.");
            None
        }
        Ok(SttMessage::Other) => None,
        Err(e) => {
            debug!(error = %e, "Ignoring unparseable Cartesia STT message.");
            None
        }
    }
}

pub struct CartesiaStt {
    api_key: String,
    model: String,
    sample_rate: u32,
}

impl CartesiaStt {
    pub fn new(api_key: String, model: String, sample_rate: u32) -> Self {
        Self {
            api_key,
            model,
            sample_rate,
        }
    }
}

#[async_trait]
impl SpeechToText for CartesiaStt {
    async fn connect(&self) -> Result<SttConnection> {
        let url = format!(
            "wss://api.cartesia.ai/stt/websocket?model={}&language=en&encoding=pcm_s16le&sample_rate={}",
            self.model, self.sample_rate
        );
        info!(model = %self.model, "Connecting to Cartesia STT.");
        let (tx, rx) = open(request(&url, &self.api_key)?, "Cartesia STT").await?;
        let recognitions = rx.filter_map(|message| {
            future::ready(match message {
                Ok(WsMessage::Text(text)) => parse_transcript(&text).map(Ok),
                Ok(WsMessage::Close(_)) => Some(Ok(Recognition::End)),
                Ok(_) => None,
                Err(e) => Some(Err(e.into())),
            })
        });

        Ok(SttConnection {
            sender: Box::new(CartesiaSttSender { tx, closed: false }),
            recognitions: Box::pin(recognitions),
        })
    }
}

struct CartesiaSttSender {
    tx: WsSink,
    closed: bool,
}

#[async_trait]
impl SttSender for CartesiaSttSender {
    async fn send_audio(&mut self, audio: Bytes) -> Result<()> {
        self.tx.send(WsMessage::Binary(audio)).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(());
        }
        self.tx.send(WsMessage::Text("done".into())).await?;
        self.tx.close().await?;
        Ok(())
    }
}

// --- Text-to-speech ---

#[derive(Serialize, Debug)]
struct Voice<'a> {
    mode: &'static str,
    id: &'a str,
}

#[derive(Serialize, Debug)]
struct OutputFormat {
    container: &'static str,
    encoding: &'static str,
    sample_rate: u32,
}

/// One generation request; every submitted turn gets its own context.
#[derive(Serialize, Debug)]
struct GenerationRequest<'a> {
    model_id: &'a str,
    transcript: &'a str,
    voice: Voice<'a>,
    language: &'static str,
    output_format: OutputFormat,
    context_id: String,
    #[serde(rename = "continue")]
    continue_: bool,
}

#[derive(Deserialize, Debug)]
#[serde(tag = "type", rename_all = "snake_case")]
enum TtsMessage {
    Chunk {
        data: String,
        #[serde(default)]
        context_id: Option<String>,
    },
    Done {
        #[serde(default)]
        context_id: Option<String>,
    },
    Error {
        #[serde(default)]
        error: Option<String>,
    },
    #[serde(other)]
    Other,
}

/// Maps one server message to an audio chunk, if it carries one.
fn parse_audio(text: &str) -> Option<Result<Bytes>> {
    match serde_json::from_str::<TtsMessage>(text) {
        Ok(TtsMessage::Chunk { data, context_id }) => match audio_utils::decode_base64(&data) {
            Ok(bytes) => {
                debug!(
                    context_id = context_id.as_deref().unwrap_or_default(),
                    duration_ms = audio_utils::pcm16_duration_ms(
                        bytes.len(),
                        audio_utils::SYNTHESIS_OUTPUT_PCM16_SAMPLE_RATE
                    ),
                    "Received synthesized audio."
                );
                Some(Ok(bytes))
            }
            Err(e) => {
                warn!(error = ?e, "Dropping undecodable audio chunk.");
                None
            }
        },
        Ok(TtsMessage::Done { context_id }) => {
            debug!(context_id = context_id.as_deref().unwrap_or_default(), "Synthesis complete.");
            None
        }
        Ok(TtsMessage::Error { error }) => {
            warn!(error = error.as_deref().unwrap_or_default(), "Cartesia TTS reported an error.");
            None
        }
        Ok(TtsMessage::Other) => None,
        Err(e) => {
            debug!(error = %e, "Ignoring unparseable Cartesia TTS message.");
            None
        }
    }
}

pub struct CartesiaTts {
    api_key: String,
    model: String,
    voice_id: String,
}

impl CartesiaTts {
    pub fn new(api_key: String, model: String, voice_id: String) -> Self {
        Self {
            api_key,
            model,
            voice_id,
        }
    }
}

#[async_trait]
impl TextToSpeech for CartesiaTts {
    async fn connect(&self) -> Result<TtsConnection> {
        info!(model = %self.model, "Connecting to Cartesia TTS.");
        let (tx, rx) = open(
            request("wss://api.cartesia.ai/tts/websocket", &self.api_key)?,
            "Cartesia TTS",
        )
        .await?;
        let audio = rx
            .take_while(|message| future::ready(!matches!(message, Ok(WsMessage::Close(_)))))
            .filter_map(|message| {
                future::ready(match message {
                    Ok(WsMessage::Text(text)) => parse_audio(&text),
                    Ok(_) => None,
                    Err(e) => Some(Err(e.into())),
                })
            });

        Ok(TtsConnection {
            sender: Box::new(CartesiaTtsSender {
                tx,
                model: self.model.clone(),
                voice_id: self.voice_id.clone(),
                closed: false,
            }),
            audio: Box::pin(audio),
        })
    }
}

struct CartesiaTtsSender {
    tx: WsSink,
    model: String,
    voice_id: String,
    closed: bool,
}

impl CartesiaTtsSender {
    fn generation_request(&self, text: &str) -> Result<String> {
        let request = GenerationRequest {
            model_id: &self.model,
            transcript: text,
            voice: Voice {
                mode: "id",
                id: &self.voice_id,
            },
            language: "en",
            output_format: OutputFormat {
                container: "raw",
                encoding: "pcm_s16le",
                sample_rate: audio_utils::SYNTHESIS_OUTPUT_PCM16_SAMPLE_RATE,
            },
            context_id: Uuid::new_v4().to_string(),
            continue_: false,
        };
        Ok(serde_json::to_string(&request)?)
    }
}

#[async_trait]
impl TtsSender for CartesiaTtsSender {
    async fn send_text(&mut self, text: String) -> Result<()> {
        let request = self.generation_request(&text)?;
        self.tx.send(WsMessage::Text(request.into())).await?;
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if std::mem::replace(&mut self.closed, true) {
            return Ok(());
        }
        self.tx.close().await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;

    #[test]
    fn transcript_messages_map_to_recognitions() {
        assert_eq!(
            parse_transcript(r#"{"type":"transcript","text":"one turkey","is_final":false}"#),
            Some(Recognition::Partial("one turkey".to_string()))
        );
        assert_eq!(
            parse_transcript(r#"{"type":"transcript","text":"One turkey, please.","is_final":true,"duration":1.2}"#),
            Some(Recognition::Final("One turkey, please.".to_string()))
        );
        assert_eq!(parse_transcript(r#"{"type":"done"}"#), Some(Recognition::End));
        assert_eq!(parse_transcript(r#"{"type":"flush_done"}"#), None);
    }

    #[test]
    fn audio_chunks_are_decoded() {
        let chunk = parse_audio(r#"{"type":"chunk","data":"AQD/fw==","context_id":"c1","done":false}"#);
        assert_eq!(
            chunk.map(|r| r.unwrap()),
            Some(Bytes::from_static(&[0x01, 0x00, 0xff, 0x7f]))
        );
        assert!(parse_audio(r#"{"type":"done","context_id":"c1"}"#).is_none());
        assert!(parse_audio(r#"{"type":"error","error":"quota"}"#).is_none());
        assert!(parse_audio(r#"{"type":"timestamps"}"#).is_none());
    }

    #[test]
    fn generation_request_shape() {
        let request = GenerationRequest {
            model_id: "sonic-2",
            transcript: "Sure, anything else?",
            voice: Voice { mode: "id", id: "voice-1" },
            language: "en",
            output_format: OutputFormat {
                container: "raw",
                encoding: "pcm_s16le",
                sample_rate: 24000,
            },
            context_id: "ctx".to_string(),
            continue_: false,
        };
        let value: Value = serde_json::to_value(&request).unwrap();

        assert_eq!(value["model_id"], "sonic-2");
        assert_eq!(value["transcript"], "Sure, anything else?");
        assert_eq!(value["voice"]["mode"], "id");
        assert_eq!(value["voice"]["id"], "voice-1");
        assert_eq!(value["output_format"]["encoding"], "pcm_s16le");
        assert_eq!(value["output_format"]["sample_rate"], 24000);
        assert_eq!(value["continue"], false);
    }
}
