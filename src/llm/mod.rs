//! Conversational model collaborator
//!
//! The session talks to the model through [`ChatModel`]: one streamed
//! completion per turn, delivered as [`ChatEvent`]s. Dropping the receiver
//! cancels the turn.

mod openai;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub use openai::OpenAiChat;

use crate::Result;
use crate::config::LlmConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRequest {
    pub messages: Vec<ChatMessage>,
    pub max_tokens: u32,
}

/// Streamed model output
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatEvent {
    Delta(String),
    Done,
    Error(String),
}

/// Turn-based streaming text model
#[async_trait]
pub trait ChatModel: Send + Sync {
    fn name(&self) -> &str;

    /// Start one completion
    ///
    /// # Errors
    ///
    /// Returns error if the request cannot be started; failures after the
    /// stream opened arrive as [`ChatEvent::Error`]
    async fn stream_turn(&self, request: ChatRequest) -> Result<mpsc::Receiver<ChatEvent>>;
}

/// Build the model client from configuration
#[must_use]
pub fn create_chat_model(config: &LlmConfig) -> Arc<dyn ChatModel> {
    if config.api_key.is_none() {
        tracing::warn!(base_url = %config.base_url, "no LLM API key configured");
    }
    Arc::new(OpenAiChat::new(config))
}
