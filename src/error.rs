//! Error types for the pitwall gateway

use thiserror::Error;

/// Result type alias for pitwall operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in the pitwall gateway
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Audio device or mixing error
    #[error("audio error: {0}")]
    Audio(String),

    /// Speech-to-text error
    #[error("STT error: {0}")]
    Stt(String),

    /// Text-to-speech error
    #[error("TTS error: {0}")]
    Tts(String),

    /// Conversational model error
    #[error("LLM error: {0}")]
    Llm(String),

    /// Telemetry feed error
    #[error("telemetry error: {0}")]
    Telemetry(String),

    /// Client/session protocol violation
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Transport closed or unusable
    #[error("transport error: {0}")]
    Transport(String),

    /// Upstream rejected our credentials
    #[error("auth error: {0}")]
    Auth(String),

    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP error
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// WebSocket client error
    #[error("websocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// TOML parsing error
    #[error("toml error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl Error {
    /// Whether retrying the failed operation can plausibly succeed
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Config(_) | Self::Auth(_))
    }
}
