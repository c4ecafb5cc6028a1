//! Text-to-speech (TTS) providers
//!
//! Every backend sits behind [`TtsProvider`] and reports progress as
//! [`TtsEvent`]s on a channel supplied at construction. Backends only know
//! how to turn one request into PCM; queueing, cancellation and sample
//! alignment live in [`QueuedProvider`].

mod cartesia;
mod elevenlabs;
mod openai;
mod queue;

use std::fmt;
use std::str::FromStr;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

pub use cartesia::CartesiaSpeech;
pub use elevenlabs::ElevenLabsSpeech;
pub use openai::OpenAiSpeech;
pub use queue::{ChunkSink, QueuedProvider, SpeechBackend};

use crate::config::TtsConfig;
use crate::{Error, Result};

/// Slowest allowed speaking rate
pub const MIN_SPEED: f32 = 0.7;

/// Fastest allowed speaking rate
pub const MAX_SPEED: f32 = 1.5;

/// Delivery style requested for an utterance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Emotion {
    Neutral,
    Calm,
    Content,
    Excited,
    Scared,
    Angry,
    Sad,
}

impl Emotion {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Neutral => "neutral",
            Self::Calm => "calm",
            Self::Content => "content",
            Self::Excited => "excited",
            Self::Scared => "scared",
            Self::Angry => "angry",
            Self::Sad => "sad",
        }
    }
}

impl fmt::Display for Emotion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Emotion {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "neutral" => Ok(Self::Neutral),
            "calm" => Ok(Self::Calm),
            "content" => Ok(Self::Content),
            "excited" => Ok(Self::Excited),
            "scared" => Ok(Self::Scared),
            "angry" => Ok(Self::Angry),
            "sad" => Ok(Self::Sad),
            other => Err(Error::Tts(format!("unknown emotion: {other}"))),
        }
    }
}

/// One unit of text to speak
#[derive(Debug, Clone, PartialEq)]
pub struct SynthesisRequest {
    /// Utterance this audio belongs to
    pub utterance_id: u64,
    pub text: String,
    pub emotion: Option<Emotion>,
    /// Speaking rate, always within [`MIN_SPEED`]..=[`MAX_SPEED`]
    pub speed: Option<f32>,
}

impl SynthesisRequest {
    #[must_use]
    pub fn new(utterance_id: u64, text: impl Into<String>) -> Self {
        Self {
            utterance_id,
            text: text.into(),
            emotion: None,
            speed: None,
        }
    }

    #[must_use]
    pub const fn with_emotion(mut self, emotion: Option<Emotion>) -> Self {
        self.emotion = emotion;
        self
    }

    /// Set the speaking rate, clamped to the supported range
    #[must_use]
    pub fn with_speed(mut self, speed: Option<f32>) -> Self {
        self.speed = speed.map(|s| s.clamp(MIN_SPEED, MAX_SPEED));
        self
    }
}

/// Progress reported by a provider
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TtsEvent {
    Connected,
    Disconnected,
    /// PCM 16-bit little-endian mono at the provider's sample rate
    AudioChunk { utterance_id: u64, data: Vec<u8> },
    /// All audio for one request has been emitted
    ChunkDone { utterance_id: u64 },
    /// The queue ran dry
    Completed,
    /// In-flight and queued work was discarded
    Cancelled,
    Error { message: String, recoverable: bool },
}

/// Speech synthesis capability
#[async_trait]
pub trait TtsProvider: Send + Sync {
    /// Backend identifier for logs
    fn name(&self) -> &'static str;

    /// Open the backend connection
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be reached
    async fn connect(&self) -> Result<()>;

    /// Cancel everything and close the backend connection
    async fn disconnect(&self);

    /// Queue a request; audio arrives as [`TtsEvent::AudioChunk`]
    ///
    /// # Errors
    ///
    /// Returns error if the provider is not connected
    async fn synthesize(&self, request: SynthesisRequest) -> Result<()>;

    /// Stop in-flight synthesis and drop queued text; a no-op when idle
    async fn cancel(&self);

    fn is_connected(&self) -> bool;

    /// Whether a request is in flight or queued
    fn is_streaming(&self) -> bool;

    /// Output sample rate in Hz
    fn sample_rate(&self) -> u32;
}

/// Creates a provider per session, wired to that session's event channel
pub trait TtsFactory: Send + Sync {
    /// # Errors
    ///
    /// Returns error if the provider cannot be built
    fn create(&self, events: mpsc::Sender<TtsEvent>) -> Result<Box<dyn TtsProvider>>;
}

/// Factory that builds the backend named in configuration
#[derive(Debug, Clone)]
pub struct ConfiguredTts {
    config: TtsConfig,
}

impl ConfiguredTts {
    /// Validate configuration up front so a bad key fails at startup
    ///
    /// # Errors
    ///
    /// Returns error if the provider is unknown or its credentials are missing
    pub fn new(config: TtsConfig) -> Result<Self> {
        validate(&config)?;
        Ok(Self { config })
    }
}

impl TtsFactory for ConfiguredTts {
    fn create(&self, events: mpsc::Sender<TtsEvent>) -> Result<Box<dyn TtsProvider>> {
        create_tts_provider(&self.config, events)
    }
}

/// Build the provider selected by `config.provider`
///
/// # Errors
///
/// Returns error if the provider is unknown or its credentials are missing
pub fn create_tts_provider(
    config: &TtsConfig,
    events: mpsc::Sender<TtsEvent>,
) -> Result<Box<dyn TtsProvider>> {
    let provider: Box<dyn TtsProvider> = match config.provider.as_str() {
        "cartesia" => Box::new(QueuedProvider::new(CartesiaSpeech::new(config)?, events)),
        "openai" => Box::new(QueuedProvider::new(OpenAiSpeech::new(config)?, events)),
        "elevenlabs" => Box::new(QueuedProvider::new(ElevenLabsSpeech::new(config)?, events)),
        other => {
            return Err(Error::Config(format!(
                "unknown TTS provider '{other}' (expected cartesia, openai or elevenlabs)"
            )));
        }
    };

    tracing::debug!(
        provider = provider.name(),
        sample_rate = provider.sample_rate(),
        "TTS provider created"
    );
    Ok(provider)
}

/// Check that the configured provider can be built
///
/// # Errors
///
/// Returns error if the provider is unknown or its credentials are missing
pub fn validate(config: &TtsConfig) -> Result<()> {
    let (tx, _rx) = mpsc::channel(1);
    create_tts_provider(config, tx).map(|_| ())
}

/// Fetch a required, non-empty API key
fn require_key(config: &TtsConfig, env_var: &str, backend: &str) -> Result<String> {
    config
        .api_key
        .as_deref()
        .filter(|k| !k.trim().is_empty())
        .map(ToString::to_string)
        .ok_or_else(|| Error::Config(format!("{env_var} required for {backend} TTS")))
}
