//! Configuration management for the pitwall gateway
//!
//! Every value resolves as env var > TOML file > built-in default.

pub mod file;

use std::time::Duration;

use crate::{Error, Result};

/// Built-in instructions for the race engineer persona
pub const DEFAULT_SYSTEM_PROMPT: &str = "You are a race engineer talking to your driver over team radio \
during a sim race. Keep every reply to one or two short spoken sentences. Use plain words, no lists, \
no markdown. You may start a reply with [EMOTION:calm|excited|angry|sad|scared|content|neutral] and \
[SPEED:0.7-1.5]. Messages starting with [PROACTIVE:...] are alerts from the telemetry system: relay \
them briefly. Messages starting with [PROACTIVE:periodic] are telemetry trends: reply [SILENT] unless \
something is worth telling the driver right now.";

/// Pitwall gateway configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub server: ServerConfig,
    pub stt: SttConfig,
    pub tts: TtsConfig,
    pub llm: LlmConfig,
    pub chunker: ChunkerConfig,
    pub playback: PlaybackConfig,
    pub proactive: ProactiveConfig,
    pub telemetry: TelemetryConfig,
    pub session: SessionConfig,
}

/// HTTP/WebSocket server configuration
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind
    pub bind: String,

    /// Port to listen on
    pub port: u16,
}

/// Streaming speech-to-text configuration
#[derive(Debug, Clone)]
pub struct SttConfig {
    /// Backend name
    pub provider: String,

    /// Backend API key (`DEEPGRAM_API_KEY`)
    pub api_key: Option<String>,

    /// Endpoint override, mainly for local proxies
    pub url: Option<String>,

    /// Model identifier (e.g. "nova-2")
    pub model: String,

    /// Transcription language
    pub language: String,

    /// Silence before a segment is finalized
    pub endpointing_ms: u32,

    /// Silence before the utterance is closed
    pub utterance_end_ms: u32,

    /// Idle interval after which a keep-alive is sent
    pub keepalive: Duration,

    /// Reconnect attempts before reporting failure
    pub max_reconnect_attempts: u32,
}

/// Speech synthesis configuration
#[derive(Debug, Clone)]
pub struct TtsConfig {
    /// Backend name ("cartesia", "openai", "elevenlabs")
    pub provider: String,

    /// API key for the selected backend
    pub api_key: Option<String>,

    /// Base URL override
    pub url: Option<String>,

    /// Voice identifier (backend default when unset)
    pub voice: Option<String>,

    /// Model identifier (backend default when unset)
    pub model: Option<String>,

    /// Requested output sample rate
    pub sample_rate: u32,
}

/// Conversational model configuration
#[derive(Debug, Clone)]
pub struct LlmConfig {
    /// OpenAI-compatible API base URL
    pub base_url: String,

    /// API key (`OPENAI_API_KEY`)
    pub api_key: Option<String>,

    /// Model identifier
    pub model: String,

    /// Reply token limit
    pub max_tokens: u32,

    /// System prompt for every turn
    pub system_prompt: String,
}

/// Text chunker bounds
#[derive(Debug, Clone, Copy)]
pub struct ChunkerConfig {
    pub min_chars: usize,
    pub max_chars: usize,
}

/// Playback scheduler timing
#[derive(Debug, Clone)]
pub struct PlaybackConfig {
    /// Minimum distance between "now" and a newly scheduled chunk
    pub min_lead: Duration,

    /// Extra lead reserved before the first chunk of an utterance
    pub lead_in: Duration,

    /// Ambience loop level under the voice
    pub ambience_gain: f32,

    /// Fade applied on interrupt
    pub fade: Duration,

    /// Play open/close cues and ambience
    pub cues: bool,
}

/// Proactive trigger engine configuration
#[derive(Debug, Clone)]
pub struct ProactiveConfig {
    pub enabled: bool,

    /// Tick interval while a race session is running
    pub race_interval: Duration,

    /// Tick interval for practice, qualifying and everything else
    pub default_interval: Duration,
}

/// Telemetry feed configuration
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub enabled: bool,

    /// Telemetry service WebSocket URL
    pub url: String,
}

/// Per-session limits
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Time allowed for the `hello` handshake
    pub setup_timeout: Duration,

    /// Conversation turns kept for model context
    pub history_turns: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".to_string(),
            port: 8765,
        }
    }
}

impl Default for SttConfig {
    fn default() -> Self {
        Self {
            provider: "deepgram".to_string(),
            api_key: None,
            url: None,
            model: "nova-2".to_string(),
            language: "en".to_string(),
            endpointing_ms: 300,
            utterance_end_ms: 1000,
            keepalive: Duration::from_secs(8),
            max_reconnect_attempts: 5,
        }
    }
}

impl Default for TtsConfig {
    fn default() -> Self {
        Self {
            provider: "cartesia".to_string(),
            api_key: None,
            url: None,
            voice: None,
            model: None,
            sample_rate: 24_000,
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            max_tokens: 300,
            system_prompt: DEFAULT_SYSTEM_PROMPT.to_string(),
        }
    }
}

impl Default for ChunkerConfig {
    fn default() -> Self {
        Self {
            min_chars: 20,
            max_chars: 200,
        }
    }
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            min_lead: Duration::from_millis(30),
            lead_in: Duration::from_millis(80),
            ambience_gain: 0.04,
            fade: Duration::from_millis(150),
            cues: true,
        }
    }
}

impl Default for ProactiveConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            race_interval: Duration::from_secs(15),
            default_interval: Duration::from_secs(30),
        }
    }
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "ws://127.0.0.1:8766".to_string(),
        }
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            setup_timeout: Duration::from_secs(8),
            history_turns: 12,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            stt: SttConfig::default(),
            tts: TtsConfig::default(),
            llm: LlmConfig::default(),
            chunker: ChunkerConfig::default(),
            playback: PlaybackConfig::default(),
            proactive: ProactiveConfig::default(),
            telemetry: TelemetryConfig::default(),
            session: SessionConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the environment and the standard config file
    ///
    /// # Errors
    ///
    /// Returns error if the resolved values are inconsistent
    pub fn load() -> Result<Self> {
        Self::from_sources(file::load_config_file(), |key| std::env::var(key).ok())
    }

    /// Resolve configuration from a parsed file and an env lookup
    ///
    /// # Errors
    ///
    /// Returns error if the resolved values are inconsistent
    pub fn from_sources(
        fc: file::PitwallConfigFile,
        env: impl Fn(&str) -> Option<String>,
    ) -> Result<Self> {
        let defaults = Self::default();
        fn env_parse<T: std::str::FromStr>(
            env: &impl Fn(&str) -> Option<String>,
            key: &str,
        ) -> Option<T> {
            env(key).and_then(|v| v.parse().ok())
        }

        let server = ServerConfig {
            bind: env("PITWALL_BIND")
                .or(fc.server.bind)
                .unwrap_or(defaults.server.bind),
            port: env_parse(&env, "PITWALL_PORT")
                .or(fc.server.port)
                .unwrap_or(defaults.server.port),
        };

        let stt = SttConfig {
            provider: env("PITWALL_STT_PROVIDER")
                .or(fc.stt.provider)
                .unwrap_or(defaults.stt.provider),
            api_key: env("DEEPGRAM_API_KEY").or(fc.stt.api_key),
            url: env("PITWALL_STT_URL").or(fc.stt.url),
            model: fc.stt.model.unwrap_or(defaults.stt.model),
            language: env("PITWALL_STT_LANGUAGE")
                .or(fc.stt.language)
                .unwrap_or(defaults.stt.language),
            endpointing_ms: fc.stt.endpointing_ms.unwrap_or(defaults.stt.endpointing_ms),
            utterance_end_ms: fc
                .stt
                .utterance_end_ms
                .unwrap_or(defaults.stt.utterance_end_ms),
            keepalive: fc
                .stt
                .keepalive_secs
                .map_or(defaults.stt.keepalive, Duration::from_secs),
            max_reconnect_attempts: fc
                .stt
                .max_reconnect_attempts
                .unwrap_or(defaults.stt.max_reconnect_attempts),
        };

        let tts_provider = env("PITWALL_TTS_PROVIDER")
            .or(fc.tts.provider)
            .unwrap_or(defaults.tts.provider)
            .to_lowercase();
        let tts_key_var = match tts_provider.as_str() {
            "openai" => "OPENAI_API_KEY",
            "elevenlabs" => "ELEVENLABS_API_KEY",
            _ => "CARTESIA_API_KEY",
        };
        let tts = TtsConfig {
            api_key: env(tts_key_var).or(fc.tts.api_key),
            provider: tts_provider,
            url: fc.tts.url,
            voice: env("PITWALL_TTS_VOICE").or(fc.tts.voice),
            model: fc.tts.model,
            sample_rate: fc.tts.sample_rate.unwrap_or(defaults.tts.sample_rate),
        };

        let llm = LlmConfig {
            base_url: env("PITWALL_LLM_URL")
                .or(fc.llm.base_url)
                .unwrap_or(defaults.llm.base_url),
            api_key: env("OPENAI_API_KEY").or(fc.llm.api_key),
            model: env("PITWALL_LLM_MODEL")
                .or(fc.llm.model)
                .unwrap_or(defaults.llm.model),
            max_tokens: fc.llm.max_tokens.unwrap_or(defaults.llm.max_tokens),
            system_prompt: fc.llm.system_prompt.unwrap_or(defaults.llm.system_prompt),
        };

        let chunker = ChunkerConfig {
            min_chars: fc.chunker.min_chars.unwrap_or(defaults.chunker.min_chars),
            max_chars: fc.chunker.max_chars.unwrap_or(defaults.chunker.max_chars),
        };
        if chunker.min_chars == 0 || chunker.min_chars > chunker.max_chars {
            return Err(Error::Config(format!(
                "chunker bounds invalid: min {} max {}",
                chunker.min_chars, chunker.max_chars
            )));
        }

        let playback = PlaybackConfig {
            min_lead: fc
                .playback
                .min_lead_ms
                .map_or(defaults.playback.min_lead, Duration::from_millis),
            lead_in: fc
                .playback
                .lead_in_ms
                .map_or(defaults.playback.lead_in, Duration::from_millis),
            ambience_gain: fc
                .playback
                .ambience_gain
                .unwrap_or(defaults.playback.ambience_gain)
                .clamp(0.0, 1.0),
            fade: fc
                .playback
                .fade_ms
                .map_or(defaults.playback.fade, Duration::from_millis),
            cues: fc.playback.cues.unwrap_or(defaults.playback.cues),
        };

        let proactive = ProactiveConfig {
            enabled: env_parse(&env, "PITWALL_PROACTIVE")
                .or(fc.proactive.enabled)
                .unwrap_or(defaults.proactive.enabled),
            race_interval: fc
                .proactive
                .race_interval_secs
                .map_or(defaults.proactive.race_interval, Duration::from_secs),
            default_interval: fc
                .proactive
                .default_interval_secs
                .map_or(defaults.proactive.default_interval, Duration::from_secs),
        };

        let telemetry = TelemetryConfig {
            enabled: fc.telemetry.enabled.unwrap_or(defaults.telemetry.enabled),
            url: env("PITWALL_TELEMETRY_URL")
                .or(fc.telemetry.url)
                .unwrap_or(defaults.telemetry.url),
        };

        let session = SessionConfig {
            setup_timeout: fc
                .session
                .setup_timeout_secs
                .map_or(defaults.session.setup_timeout, Duration::from_secs),
            history_turns: fc
                .session
                .history_turns
                .unwrap_or(defaults.session.history_turns),
        };

        Ok(Self {
            server,
            stt,
            tts,
            llm,
            chunker,
            playback,
            proactive,
            telemetry,
            session,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use super::*;

    fn env_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_sources() {
        let config = Config::from_sources(file::PitwallConfigFile::default(), env_from(&[])).unwrap();
        assert_eq!(config.server.port, 8765);
        assert_eq!(config.stt.keepalive, Duration::from_secs(8));
        assert_eq!(config.tts.provider, "cartesia");
        assert_eq!(config.session.setup_timeout, Duration::from_secs(8));
        assert_eq!(config.proactive.race_interval, Duration::from_secs(15));
        assert_eq!(config.proactive.default_interval, Duration::from_secs(30));
        assert!(config.tts.api_key.is_none());
    }

    #[test]
    fn env_overrides_file() {
        let fc: file::PitwallConfigFile = toml::from_str(
            r#"
            [server]
            port = 9000
            [llm]
            model = "from-file"
            "#,
        )
        .unwrap();
        let config = Config::from_sources(
            fc,
            env_from(&[("PITWALL_PORT", "9100"), ("DEEPGRAM_API_KEY", "dg")]),
        )
        .unwrap();

        assert_eq!(config.server.port, 9100);
        assert_eq!(config.llm.model, "from-file");
        assert_eq!(config.stt.api_key.as_deref(), Some("dg"));
    }

    #[test]
    fn tts_key_follows_provider() {
        let config = Config::from_sources(
            file::PitwallConfigFile::default(),
            env_from(&[
                ("PITWALL_TTS_PROVIDER", "ElevenLabs"),
                ("ELEVENLABS_API_KEY", "el"),
                ("CARTESIA_API_KEY", "ca"),
            ]),
        )
        .unwrap();
        assert_eq!(config.tts.provider, "elevenlabs");
        assert_eq!(config.tts.api_key.as_deref(), Some("el"));
    }

    #[test]
    fn unparsable_env_falls_back() {
        let config = Config::from_sources(
            file::PitwallConfigFile::default(),
            env_from(&[("PITWALL_PORT", "not-a-port")]),
        )
        .unwrap();
        assert_eq!(config.server.port, 8765);
    }

    #[test]
    fn rejects_inverted_chunker_bounds() {
        let fc: file::PitwallConfigFile = toml::from_str(
            r"
            [chunker]
            min_chars = 300
            max_chars = 100
            ",
        )
        .unwrap();
        let err = Config::from_sources(fc, env_from(&[])).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
