//! `ElevenLabs` streaming endpoint with raw PCM output

use async_trait::async_trait;
use futures::StreamExt;

use super::queue::{ChunkSink, SpeechBackend};
use super::{Emotion, SynthesisRequest};
use crate::config::TtsConfig;
use crate::{Error, Result};

/// PCM rates the streaming endpoint can produce
const SUPPORTED_RATES: &[u32] = &[16_000, 22_050, 24_000, 44_100];

/// Synthesizes speech with the `ElevenLabs` API
pub struct ElevenLabsSpeech {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    voice_id: String,
    sample_rate: u32,
}

impl ElevenLabsSpeech {
    /// Create a new `ElevenLabs` backend
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing or the sample rate is unsupported
    pub fn new(config: &TtsConfig) -> Result<Self> {
        let api_key = super::require_key(config, "ELEVENLABS_API_KEY", "ElevenLabs")?;

        if !SUPPORTED_RATES.contains(&config.sample_rate) {
            return Err(Error::Config(format!(
                "ElevenLabs cannot produce PCM at {} Hz",
                config.sample_rate
            )));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.elevenlabs.io".to_string()),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| "eleven_flash_v2_5".to_string()),
            voice_id: config
                .voice
                .clone()
                .unwrap_or_else(|| "pNInz6obpgDQGcFmaJgB".to_string()),
            sample_rate: config.sample_rate,
        })
    }
}

/// Lower stability lets the voice swing further from its baseline
const fn stability(emotion: Option<Emotion>) -> f32 {
    match emotion {
        Some(Emotion::Excited | Emotion::Angry | Emotion::Scared) => 0.3,
        Some(Emotion::Calm | Emotion::Sad) => 0.75,
        Some(Emotion::Neutral | Emotion::Content) | None => 0.5,
    }
}

#[derive(serde::Serialize)]
struct StreamRequest<'a> {
    text: &'a str,
    model_id: &'a str,
    voice_settings: VoiceSettings,
}

#[derive(serde::Serialize)]
struct VoiceSettings {
    stability: f32,
    similarity_boost: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    speed: Option<f32>,
}

#[async_trait]
impl SpeechBackend for ElevenLabsSpeech {
    fn name(&self) -> &'static str {
        "elevenlabs"
    }

    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    async fn stream(&self, request: &SynthesisRequest, sink: &mut ChunkSink) -> Result<()> {
        let url = format!(
            "{}/v1/text-to-speech/{}/stream?output_format=pcm_{}",
            self.base_url, self.voice_id, self.sample_rate
        );

        let body = StreamRequest {
            text: &request.text,
            model_id: &self.model,
            voice_settings: VoiceSettings {
                stability: stability(request.emotion),
                similarity_boost: 0.75,
                speed: request.speed,
            },
        };

        let response = self
            .client
            .post(&url)
            .header("xi-api-key", &self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(if matches!(status.as_u16(), 401 | 403) {
                Error::Auth(format!("ElevenLabs rejected credentials: {body}"))
            } else {
                Error::Tts(format!("ElevenLabs TTS error {status}: {body}"))
            });
        }

        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            sink.push(&chunk?).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(sample_rate: u32) -> TtsConfig {
        TtsConfig {
            provider: "elevenlabs".to_string(),
            api_key: Some("xi".to_string()),
            sample_rate,
            ..TtsConfig::default()
        }
    }

    #[test]
    fn rejects_unsupported_rate() {
        assert!(ElevenLabsSpeech::new(&config(48_000)).is_err());
        assert_eq!(ElevenLabsSpeech::new(&config(16_000)).unwrap().sample_rate(), 16_000);
    }

    #[test]
    fn emotion_moves_stability() {
        assert!(stability(Some(Emotion::Excited)) < stability(None));
        assert!(stability(Some(Emotion::Calm)) > stability(None));
    }
}
