//! TOML configuration file loading
//!
//! Supports `~/.config/pitwall/config.toml` as a persistent config source.
//! All fields are optional; the file is a partial overlay on top of defaults.

use std::path::{Path, PathBuf};

use serde::Deserialize;

/// Top-level TOML configuration file schema
#[derive(Debug, Default, Deserialize)]
pub struct PitwallConfigFile {
    #[serde(default)]
    pub server: ServerFileConfig,

    #[serde(default)]
    pub stt: SttFileConfig,

    #[serde(default)]
    pub tts: TtsFileConfig,

    #[serde(default)]
    pub llm: LlmFileConfig,

    #[serde(default)]
    pub chunker: ChunkerFileConfig,

    #[serde(default)]
    pub playback: PlaybackFileConfig,

    #[serde(default)]
    pub proactive: ProactiveFileConfig,

    #[serde(default)]
    pub telemetry: TelemetryFileConfig,

    #[serde(default)]
    pub session: SessionFileConfig,
}

/// Server/runtime configuration
#[derive(Debug, Default, Deserialize)]
pub struct ServerFileConfig {
    /// Address to bind (e.g. "0.0.0.0" to accept LAN overlays)
    pub bind: Option<String>,
    /// Port to listen on
    pub port: Option<u16>,
}

/// Speech-to-text configuration
#[derive(Debug, Default, Deserialize)]
pub struct SttFileConfig {
    /// Backend name ("deepgram")
    pub provider: Option<String>,
    pub api_key: Option<String>,
    /// Override for the streaming endpoint
    pub url: Option<String>,
    pub model: Option<String>,
    pub language: Option<String>,
    /// Silence duration that ends a segment
    pub endpointing_ms: Option<u32>,
    /// Silence duration that ends an utterance
    pub utterance_end_ms: Option<u32>,
    pub keepalive_secs: Option<u64>,
    pub max_reconnect_attempts: Option<u32>,
}

/// Text-to-speech configuration
#[derive(Debug, Default, Deserialize)]
pub struct TtsFileConfig {
    /// Backend name ("cartesia", "openai", "elevenlabs")
    pub provider: Option<String>,
    pub api_key: Option<String>,
    /// Override for the backend base URL
    pub url: Option<String>,
    pub voice: Option<String>,
    pub model: Option<String>,
    pub sample_rate: Option<u32>,
}

/// Conversational model configuration
#[derive(Debug, Default, Deserialize)]
pub struct LlmFileConfig {
    /// OpenAI-compatible base URL
    pub base_url: Option<String>,
    pub api_key: Option<String>,
    pub model: Option<String>,
    pub max_tokens: Option<u32>,
    /// Replaces the built-in race engineer prompt
    pub system_prompt: Option<String>,
}

/// Text chunker bounds
#[derive(Debug, Default, Deserialize)]
pub struct ChunkerFileConfig {
    pub min_chars: Option<usize>,
    pub max_chars: Option<usize>,
}

/// Audio playback scheduling
#[derive(Debug, Default, Deserialize)]
pub struct PlaybackFileConfig {
    pub min_lead_ms: Option<u64>,
    pub lead_in_ms: Option<u64>,
    pub ambience_gain: Option<f32>,
    pub fade_ms: Option<u64>,
    /// Play radio open/close cues and ambience
    pub cues: Option<bool>,
}

/// Proactive trigger engine
#[derive(Debug, Default, Deserialize)]
pub struct ProactiveFileConfig {
    pub enabled: Option<bool>,
    pub race_interval_secs: Option<u64>,
    pub default_interval_secs: Option<u64>,
}

/// Telemetry feed
#[derive(Debug, Default, Deserialize)]
pub struct TelemetryFileConfig {
    pub enabled: Option<bool>,
    pub url: Option<String>,
}

/// Per-session limits
#[derive(Debug, Default, Deserialize)]
pub struct SessionFileConfig {
    pub setup_timeout_secs: Option<u64>,
    pub history_turns: Option<usize>,
}

/// Load the TOML config file from the standard path
///
/// Returns `PitwallConfigFile::default()` if the file doesn't exist or can't be parsed.
pub fn load_config_file() -> PitwallConfigFile {
    config_file_path().map_or_else(PitwallConfigFile::default, |path| load_from(&path))
}

/// Load a config file from an explicit path with the same fallback rules
pub fn load_from(path: &Path) -> PitwallConfigFile {
    if !path.exists() {
        return PitwallConfigFile::default();
    }

    match std::fs::read_to_string(path) {
        Ok(content) => match toml::from_str(&content) {
            Ok(config) => {
                tracing::info!(path = %path.display(), "loaded config file");
                config
            }
            Err(e) => {
                tracing::warn!(
                    path = %path.display(),
                    error = %e,
                    "failed to parse config file, using defaults"
                );
                PitwallConfigFile::default()
            }
        },
        Err(e) => {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "failed to read config file"
            );
            PitwallConfigFile::default()
        }
    }
}

/// Return the config file path: `~/.config/pitwall/config.toml`
pub fn config_file_path() -> Option<PathBuf> {
    directories::BaseDirs::new().map(|d| d.config_dir().join("pitwall").join("config.toml"))
}
