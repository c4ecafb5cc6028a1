//! Deepgram live transcription over WebSocket

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;

use super::{SttConnector, SttEvent, SttLink, UpstreamFrame};
use crate::config::SttConfig;
use crate::transport::{self, WsStream};
use crate::{Error, Result};

const DEFAULT_URL: &str = "wss://api.deepgram.com/v1/listen";

/// Mic audio format the session forwards
const SAMPLE_RATE: u32 = 16_000;

/// Connects to Deepgram's streaming `listen` endpoint
pub struct DeepgramConnector {
    url: String,
    api_key: String,
}

impl DeepgramConnector {
    /// Create a connector from STT configuration
    ///
    /// # Errors
    ///
    /// Returns error if the API key is missing or the URL is invalid
    pub fn new(config: &SttConfig) -> Result<Self> {
        let api_key = config
            .api_key
            .clone()
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| Error::Config("DEEPGRAM_API_KEY required for Deepgram STT".to_string()))?;

        Ok(Self {
            url: listen_url(config)?,
            api_key,
        })
    }
}

fn listen_url(config: &SttConfig) -> Result<String> {
    let base = config.url.as_deref().unwrap_or(DEFAULT_URL);
    let mut url = url::Url::parse(base)
        .map_err(|e| Error::Config(format!("invalid Deepgram URL {base}: {e}")))?;

    url.query_pairs_mut()
        .append_pair("model", &config.model)
        .append_pair("language", &config.language)
        .append_pair("encoding", "linear16")
        .append_pair("sample_rate", &SAMPLE_RATE.to_string())
        .append_pair("channels", "1")
        .append_pair("punctuate", "true")
        .append_pair("interim_results", "true")
        .append_pair("endpointing", &config.endpointing_ms.to_string())
        .append_pair("utterance_end_ms", &config.utterance_end_ms.to_string());

    Ok(url.into())
}

#[async_trait]
impl SttConnector for DeepgramConnector {
    fn name(&self) -> &'static str {
        "deepgram"
    }

    async fn connect(&self) -> Result<SttLink> {
        let ws = transport::connect(
            &self.url,
            &[("Authorization", format!("Token {}", self.api_key))],
        )
        .await?;

        let (outbound_tx, outbound_rx) = mpsc::channel(64);
        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        tokio::spawn(pump(ws, outbound_rx, inbound_tx));

        Ok(SttLink {
            outbound: outbound_tx,
            inbound: inbound_rx,
        })
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type")]
enum DeepgramMessage {
    Results {
        #[serde(default)]
        channel: Channel,
        #[serde(default)]
        is_final: bool,
        #[serde(default)]
        speech_final: bool,
        #[serde(default)]
        from_finalize: bool,
    },
    UtteranceEnd {
        #[serde(default)]
        last_word_end: Option<f64>,
    },
    Metadata {
        #[serde(default)]
        request_id: Option<String>,
    },
    #[serde(other)]
    Other,
}

#[derive(Debug, Default, Deserialize)]
struct Channel {
    #[serde(default)]
    alternatives: Vec<Alternative>,
}

#[derive(Debug, Deserialize)]
struct Alternative {
    #[serde(default)]
    transcript: String,
    confidence: Option<f32>,
}

/// Map one upstream text frame to a session event
fn parse_message(text: &str) -> Option<SttEvent> {
    let message: DeepgramMessage = match serde_json::from_str(text) {
        Ok(m) => m,
        Err(e) => {
            tracing::debug!(error = %e, "unparsable Deepgram message");
            return None;
        }
    };

    match message {
        DeepgramMessage::Results {
            channel,
            is_final,
            speech_final,
            from_finalize,
        } => {
            let best = channel.alternatives.into_iter().next();
            let (text, confidence) = best.map_or((String::new(), None), |a| {
                (a.transcript.trim().to_string(), a.confidence)
            });

            if is_final {
                let end_of_speech = speech_final || from_finalize;
                // Empty finals only matter when they close the utterance
                (!text.is_empty() || end_of_speech).then_some(SttEvent::Final {
                    text,
                    confidence,
                    end_of_speech,
                })
            } else {
                (!text.is_empty()).then_some(SttEvent::Partial { text, confidence })
            }
        }
        DeepgramMessage::UtteranceEnd { last_word_end } => {
            tracing::trace!(?last_word_end, "utterance end");
            Some(SttEvent::UtteranceEnd)
        }
        DeepgramMessage::Metadata { request_id } => {
            tracing::debug!(?request_id, "Deepgram stream metadata");
            None
        }
        DeepgramMessage::Other => None,
    }
}

fn control_frame(kind: &'static str) -> Message {
    Message::Text(format!(r#"{{"type":"{kind}"}}"#).into())
}

/// Shuttle frames between the link channels and the socket
///
/// Returning drops `inbound`, which the actor sees as a lost link.
async fn pump(
    ws: WsStream,
    mut outbound: mpsc::Receiver<UpstreamFrame>,
    inbound: mpsc::Sender<SttEvent>,
) {
    let (mut sink, mut stream) = ws.split();

    loop {
        tokio::select! {
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    let _ = sink.send(control_frame("CloseStream")).await;
                    break;
                };
                let closing = frame == UpstreamFrame::CloseStream;
                let message = match frame {
                    UpstreamFrame::Audio(data) => Message::Binary(data.into()),
                    UpstreamFrame::KeepAlive => control_frame("KeepAlive"),
                    UpstreamFrame::Finalize => control_frame("Finalize"),
                    UpstreamFrame::CloseStream => control_frame("CloseStream"),
                };
                if let Err(e) = sink.send(message).await {
                    tracing::warn!(error = %e, "Deepgram write failed");
                    break;
                }
                if closing {
                    break;
                }
            }
            message = stream.next() => match message {
                Some(Ok(Message::Text(text))) => {
                    if let Some(event) = parse_message(text.as_str()) {
                        if inbound.send(event).await.is_err() {
                            break;
                        }
                    }
                }
                Some(Ok(Message::Close(frame))) => {
                    tracing::info!(?frame, "Deepgram closed the stream");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => {
                    tracing::warn!(error = %e, "Deepgram read failed");
                    break;
                }
                None => break,
            }
        }
    }
}
