//! Cartesia streaming TTS over a persistent WebSocket
//!
//! Each request gets its own `context_id`; replies for any other context
//! (leftovers from a cancelled request) are skipped.

use std::sync::{Mutex, PoisonError};

use async_trait::async_trait;
use base64::Engine;
use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio_tungstenite::tungstenite::Message;

use super::queue::{ChunkSink, SpeechBackend};
use super::SynthesisRequest;
use crate::config::TtsConfig;
use crate::transport::{self, WsStream};
use crate::{Error, Result};

const CARTESIA_VERSION: &str = "2024-06-10";

/// Synthesizes speech with Cartesia Sonic
pub struct CartesiaSpeech {
    url: String,
    model: String,
    voice: String,
    sample_rate: u32,
    socket: tokio::sync::Mutex<Option<WsStream>>,
    active_context: Mutex<Option<String>>,
}

impl CartesiaSpeech {
    /// Create a new Cartesia backend
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing or the URL is invalid
    pub fn new(config: &TtsConfig) -> Result<Self> {
        let api_key = super::require_key(config, "CARTESIA_API_KEY", "Cartesia")?;

        let base = config
            .url
            .as_deref()
            .unwrap_or("wss://api.cartesia.ai/tts/websocket");
        let mut url = url::Url::parse(base)
            .map_err(|e| Error::Config(format!("invalid Cartesia URL {base}: {e}")))?;
        url.query_pairs_mut()
            .append_pair("api_key", &api_key)
            .append_pair("cartesia_version", CARTESIA_VERSION);

        Ok(Self {
            url: url.into(),
            model: config.model.clone().unwrap_or_else(|| "sonic-3".to_string()),
            voice: config
                .voice
                .clone()
                .unwrap_or_else(|| "a0e99841-438c-4a64-b679-ae501e7d6091".to_string()),
            sample_rate: config.sample_rate,
            socket: tokio::sync::Mutex::new(None),
            active_context: Mutex::new(None),
        })
    }

    fn set_active_context(&self, context: Option<String>) -> Option<String> {
        let mut active = self
            .active_context
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        std::mem::replace(&mut *active, context)
    }

    fn generation_request<'a>(
        &'a self,
        request: &'a SynthesisRequest,
        context_id: &'a str,
    ) -> GenerationRequest<'a> {
        let generation_config = (request.speed.is_some() || request.emotion.is_some()).then(|| {
            GenerationConfig {
                speed: request.speed,
                emotion: request.emotion.map(super::Emotion::as_str),
            }
        });

        GenerationRequest {
            model_id: &self.model,
            transcript: &request.text,
            voice: VoiceSpec {
                mode: "id",
                id: &self.voice,
            },
            output_format: OutputFormat {
                container: "raw",
                encoding: "pcm_s16le",
                sample_rate: self.sample_rate,
            },
            context_id,
            continue_: false,
            generation_config,
        }
    }
}

#[derive(Serialize)]
struct GenerationRequest<'a> {
    model_id: &'a str,
    transcript: &'a str,
    voice: VoiceSpec<'a>,
    output_format: OutputFormat,
    context_id: &'a str,
    #[serde(rename = "continue")]
    continue_: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize)]
struct VoiceSpec<'a> {
    mode: &'static str,
    id: &'a str,
}

#[derive(Serialize)]
struct OutputFormat {
    container: &'static str,
    encoding: &'static str,
    sample_rate: u32,
}

#[derive(Serialize)]
struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    speed: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    emotion: Option<&'static str>,
}

#[derive(Serialize)]
struct CancelRequest<'a> {
    context_id: &'a str,
    cancel: bool,
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum CartesiaMessage {
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
        #[serde(default)]
        context_id: Option<String>,
    },
    #[serde(other)]
    Other,
}

/// Read replies for `context_id` until its `done` message
async fn read_context(ws: &mut WsStream, context_id: &str, sink: &mut ChunkSink) -> Result<()> {
    let ours = |ctx: &Option<String>| ctx.as_deref().is_none_or(|c| c == context_id);

    while let Some(frame) = ws.next().await {
        let Message::Text(text) = frame? else {
            continue;
        };
        let message: CartesiaMessage = match serde_json::from_str(text.as_str()) {
            Ok(m) => m,
            Err(e) => {
                tracing::debug!(error = %e, "skipping unparsable Cartesia message");
                continue;
            }
        };

        match message {
            CartesiaMessage::Chunk { data, context_id } if ours(&context_id) => {
                let pcm = base64::engine::general_purpose::STANDARD
                    .decode(data.as_bytes())
                    .map_err(|e| Error::Tts(format!("invalid Cartesia audio chunk: {e}")))?;
                sink.push(&pcm).await?;
            }
            CartesiaMessage::Done { context_id } if ours(&context_id) => return Ok(()),
            CartesiaMessage::Error { error, context_id } if ours(&context_id) => {
                return Err(Error::Tts(format!(
                    "Cartesia error: {}",
                    error.unwrap_or_else(|| "unknown".to_string())
                )));
            }
            _ => {}
        }
    }

    Err(Error::Transport("Cartesia socket closed mid-utterance".to_string()))
}

#[async_trait]
impl SpeechBackend for CartesiaSpeech {
    fn name(&self) -> &'static str {
        "cartesia"
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    async fn open(&self) -> Result<()> {
        let mut socket = self.socket.lock().await;
        if socket.is_none() {
            *socket = Some(transport::connect(&self.url, &[]).await?);
        }
        Ok(())
    }

    async fn close(&self) {
        if let Some(mut ws) = self.socket.lock().await.take() {
            let _ = ws.close(None).await;
        }
    }

    async fn interrupt(&self, utterance_id: u64) {
        let Some(context_id) = self.set_active_context(None) else {
            return;
        };
        let mut socket = self.socket.lock().await;
        if let Some(ws) = socket.as_mut() {
            let cancel = CancelRequest {
                context_id: &context_id,
                cancel: true,
            };
            if let Ok(message) = transport::json_message(&cancel) {
                if let Err(e) = ws.send(message).await {
                    tracing::debug!(utterance_id, error = %e, "failed to send Cartesia cancel");
                    *socket = None;
                }
            }
        }
    }

    async fn stream(&self, request: &SynthesisRequest, sink: &mut ChunkSink) -> Result<()> {
        let context_id = uuid::Uuid::new_v4().to_string();
        self.set_active_context(Some(context_id.clone()));

        let mut socket = self.socket.lock().await;
        if socket.is_none() {
            tracing::debug!("reopening Cartesia socket");
            *socket = Some(transport::connect(&self.url, &[]).await?);
        }
        let ws = socket
            .as_mut()
            .ok_or_else(|| Error::Transport("Cartesia socket unavailable".to_string()))?;

        let message = transport::json_message(&self.generation_request(request, &context_id))?;
        let result = match ws.send(message).await {
            Ok(()) => read_context(ws, &context_id, sink).await,
            Err(e) => Err(e.into()),
        };

        if matches!(result, Err(Error::Transport(_) | Error::WebSocket(_))) {
            *socket = None;
        }
        self.set_active_context(None);
        result
    }
}
