//! OpenAI-compatible chat completions, streamed over SSE

use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use super::{ChatEvent, ChatMessage, ChatModel, ChatRequest};
use crate::config::LlmConfig;
use crate::retry::is_recoverable_status;
use crate::{Error, Result};

/// Deltas buffered before the reader waits on the session
const EVENT_CAPACITY: usize = 64;

pub struct OpenAiChat {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
}

#[derive(Serialize)]
struct CompletionRequest<'a> {
    model: &'a str,
    messages: &'a [ChatMessage],
    max_tokens: u32,
    stream: bool,
}

#[derive(Deserialize)]
struct CompletionChunk {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    #[serde(default)]
    delta: Delta,
    #[serde(default)]
    finish_reason: Option<String>,
}

#[derive(Default, Deserialize)]
struct Delta {
    #[serde(default)]
    content: Option<String>,
}

/// What one SSE line means for the turn
#[derive(Debug, PartialEq, Eq)]
enum Line {
    Delta(String),
    Done,
    Skip,
}

fn parse_line(line: &str) -> Line {
    let Some(data) = line.strip_prefix("data:").map(str::trim) else {
        return Line::Skip;
    };
    if data == "[DONE]" {
        return Line::Done;
    }

    match serde_json::from_str::<CompletionChunk>(data) {
        Ok(chunk) => {
            let text: String = chunk
                .choices
                .into_iter()
                .filter_map(|c| {
                    if let Some(reason) = c.finish_reason {
                        tracing::trace!(%reason, "completion finished");
                    }
                    c.delta.content
                })
                .collect();
            if text.is_empty() {
                Line::Skip
            } else {
                Line::Delta(text)
            }
        }
        Err(e) => {
            tracing::debug!(error = %e, "unparsable completion chunk");
            Line::Skip
        }
    }
}

impl OpenAiChat {
    #[must_use]
    pub fn new(config: &LlmConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        }
    }
}

#[async_trait]
impl ChatModel for OpenAiChat {
    fn name(&self) -> &str {
        &self.model
    }

    async fn stream_turn(&self, request: ChatRequest) -> Result<mpsc::Receiver<ChatEvent>> {
        let body = CompletionRequest {
            model: &self.model,
            messages: &request.messages,
            max_tokens: request.max_tokens,
            stream: true,
        };

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }
        let response = builder.send().await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(if matches!(status.as_u16(), 401 | 403) {
                Error::Auth(format!("model API rejected credentials: {body}"))
            } else if is_recoverable_status(status.as_u16()) {
                Error::Llm(format!("model API unavailable ({status}): {body}"))
            } else {
                Error::Llm(format!("model API error {status}: {body}"))
            });
        }

        let (tx, rx) = mpsc::channel(EVENT_CAPACITY);
        tokio::spawn(async move {
            let mut stream = response.bytes_stream();
            let mut pending = String::new();

            while let Some(chunk) = stream.next().await {
                let bytes = match chunk {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        let _ = tx.send(ChatEvent::Error(e.to_string())).await;
                        return;
                    }
                };
                pending.push_str(&String::from_utf8_lossy(&bytes));

                while let Some(end) = pending.find('\n') {
                    let line: String = pending.drain(..=end).collect();
                    let event = match parse_line(line.trim_end()) {
                        Line::Delta(text) => ChatEvent::Delta(text),
                        Line::Done => {
                            let _ = tx.send(ChatEvent::Done).await;
                            return;
                        }
                        Line::Skip => continue,
                    };
                    // Receiver dropped: the turn was cancelled
                    if tx.send(event).await.is_err() {
                        return;
                    }
                }
            }

            // Some servers close without a [DONE] marker
            let _ = tx.send(ChatEvent::Done).await;
        });

        Ok(rx)
    }
}
