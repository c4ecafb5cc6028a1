//! `OpenAI` speech endpoint, streamed as raw PCM

use async_trait::async_trait;
use futures::StreamExt;

use super::queue::{ChunkSink, SpeechBackend};
use super::{Emotion, SynthesisRequest};
use crate::config::TtsConfig;
use crate::{Error, Result};

/// `OpenAI` only produces 24 kHz PCM
const OPENAI_SAMPLE_RATE: u32 = 24_000;

/// Synthesizes speech with the `OpenAI` audio API
pub struct OpenAiSpeech {
    client: reqwest::Client,
    api_key: String,
    base_url: String,
    model: String,
    voice: String,
}

impl OpenAiSpeech {
    /// Create a new `OpenAI` backend
    ///
    /// # Errors
    ///
    /// Returns error if API key is missing
    pub fn new(config: &TtsConfig) -> Result<Self> {
        let api_key = super::require_key(config, "OPENAI_API_KEY", "OpenAI")?;

        Ok(Self {
            client: reqwest::Client::new(),
            api_key,
            base_url: config
                .url
                .clone()
                .unwrap_or_else(|| "https://api.openai.com/v1".to_string()),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| "gpt-4o-mini-tts".to_string()),
            voice: config.voice.clone().unwrap_or_else(|| "onyx".to_string()),
        })
    }
}

/// Delivery hint for models that accept free-form instructions
const fn instructions(emotion: Emotion) -> &'static str {
    match emotion {
        Emotion::Neutral => "Speak like a focused race engineer on team radio.",
        Emotion::Calm => "Speak calmly and steadily, reassuring the driver.",
        Emotion::Content => "Speak warmly, pleased with how things are going.",
        Emotion::Excited => "Speak with energy and excitement.",
        Emotion::Scared => "Speak urgently, with alarm in your voice.",
        Emotion::Angry => "Speak sharply, clearly frustrated.",
        Emotion::Sad => "Speak softly and with disappointment.",
    }
}

#[derive(serde::Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    response_format: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    speed: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    instructions: Option<&'static str>,
}

#[async_trait]
impl SpeechBackend for OpenAiSpeech {
    fn name(&self) -> &'static str {
        "openai"
    }

    fn sample_rate(&self) -> u32 {
        OPENAI_SAMPLE_RATE
    }

    async fn stream(&self, request: &SynthesisRequest, sink: &mut ChunkSink) -> Result<()> {
        let body = SpeechRequest {
            model: &self.model,
            input: &request.text,
            voice: &self.voice,
            response_format: "pcm",
            speed: request.speed,
            instructions: request.emotion.map(instructions),
        };

        let response = self
            .client
            .post(format!("{}/audio/speech", self.base_url))
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(if matches!(status.as_u16(), 401 | 403) {
                Error::Auth(format!("OpenAI TTS rejected credentials: {body}"))
            } else {
                Error::Tts(format!("OpenAI TTS error {status}: {body}"))
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

    #[test]
    fn request_omits_unset_controls() {
        let body = SpeechRequest {
            model: "m",
            input: "Box now.",
            voice: "onyx",
            response_format: "pcm",
            speed: None,
            instructions: None,
        };
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(json["response_format"], "pcm");
        assert!(json.get("speed").is_none());
        assert!(json.get("instructions").is_none());
    }

    #[test]
    fn defaults_applied() {
        let speech = OpenAiSpeech::new(&TtsConfig {
            provider: "openai".to_string(),
            api_key: Some("sk".to_string()),
            ..TtsConfig::default()
        })
        .unwrap();
        assert_eq!(speech.voice, "onyx");
        assert_eq!(speech.base_url, "https://api.openai.com/v1");
    }
}
