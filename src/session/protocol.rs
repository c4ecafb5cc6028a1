//! Client ⇄ session wire messages
//!
//! Text frames are JSON, internally tagged on `type` with snake_case names
//! and camelCase fields. Binary frames are PCM and never pass through here.

use serde::{Deserialize, Serialize};

/// Protocol version spoken by this server
pub const PROTOCOL_VERSION: u32 = 1;

/// Encoding label sent with every `tts_audio_start`
pub const AUDIO_ENCODING: &str = "pcm_s16le";

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Capabilities {
    pub binary_audio: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MicMode {
    Ptt,
    Vad,
    Continuous,
    #[serde(other)]
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InterruptReason {
    /// Client-side VAD heard the driver
    VadVoice,
    /// Push-to-talk pressed
    PttOn,
    #[serde(other)]
    Other,
}

/// Messages from the driver client
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ClientMessage {
    Hello {
        protocol_version: u32,
        #[serde(default)]
        client_id: Option<String>,
        #[serde(default)]
        capabilities: Capabilities,
    },
    MicState {
        enabled: bool,
        #[serde(default)]
        mode: Option<MicMode>,
    },
    Interrupt {
        reason: InterruptReason,
    },
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Connected,
    Idle,
    Streaming,
    Error,
}

/// Pipeline stage an error belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ErrorScope {
    Stt,
    Llm,
    Tts,
    Pipeline,
}

/// Messages from the session to the client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case", rename_all_fields = "camelCase")]
pub enum ServerMessage {
    Ready {
        protocol_version: u32,
    },
    State {
        stt: ComponentStatus,
        llm: ComponentStatus,
        tts: ComponentStatus,
        mic_enabled: bool,
        speaking: bool,
    },
    SttPartial {
        text: String,
        confidence: Option<f32>,
    },
    SttFinal {
        text: String,
        confidence: Option<f32>,
    },
    LlmDelta {
        text: String,
    },
    LlmDone {
        text: String,
        duration_ms: u64,
    },
    TtsAudioStart {
        utterance_id: u64,
        sample_rate: u32,
        encoding: String,
        channels: u16,
    },
    TtsAudioDone {
        utterance_id: u64,
        chunks: u32,
        bytes: u64,
        duration_ms: u64,
    },
    Error {
        scope: ErrorScope,
        message: String,
        recoverable: bool,
    },
    #[serde(other)]
    Unknown,
}

impl ServerMessage {
    pub fn error(scope: ErrorScope, message: impl Into<String>, recoverable: bool) -> Self {
        Self::Error {
            scope,
            message: message.into(),
            recoverable,
        }
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn hello_parses_camel_case() {
        let msg: ClientMessage = serde_json::from_str(
            r#"{"type":"hello","protocolVersion":1,"clientId":"overlay","capabilities":{"binaryAudio":true}}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            ClientMessage::Hello {
                protocol_version: 1,
                client_id: Some("overlay".to_string()),
                capabilities: Capabilities { binary_audio: true },
            }
        );
    }

    #[test]
    fn interrupt_and_mic_state() {
        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"interrupt","reason":"ptt_on"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Interrupt { reason: InterruptReason::PttOn });

        let msg: ClientMessage =
            serde_json::from_str(r#"{"type":"mic_state","enabled":false,"mode":"vad","extra":1}"#)
                .unwrap();
        assert_eq!(
            msg,
            ClientMessage::MicState {
                enabled: false,
                mode: Some(MicMode::Vad),
            }
        );
    }

    #[test]
    fn unknown_types_are_tolerated() {
        let msg: ClientMessage = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(msg, ClientMessage::Unknown);
        let msg: ServerMessage = serde_json::from_str(r#"{"type":"transcript_v2"}"#).unwrap();
        assert_eq!(msg, ServerMessage::Unknown);
    }

    #[test]
    fn server_messages_use_wire_names() {
        let state = ServerMessage::State {
            stt: ComponentStatus::Streaming,
            llm: ComponentStatus::Idle,
            tts: ComponentStatus::Connected,
            mic_enabled: true,
            speaking: false,
        };
        assert_eq!(
            serde_json::to_value(&state).unwrap(),
            json!({"type":"state","stt":"streaming","llm":"idle","tts":"connected","micEnabled":true,"speaking":false})
        );

        let done = ServerMessage::TtsAudioDone {
            utterance_id: 3,
            chunks: 5,
            bytes: 48_000,
            duration_ms: 1_000,
        };
        assert_eq!(
            serde_json::to_value(&done).unwrap(),
            json!({"type":"tts_audio_done","utteranceId":3,"chunks":5,"bytes":48000,"durationMs":1000})
        );

        let err = ServerMessage::error(ErrorScope::Pipeline, "setup timeout", false);
        assert_eq!(serde_json::to_value(&err).unwrap()["scope"], "pipeline");
    }

    #[test]
    fn partial_without_confidence_is_null() {
        let msg = ServerMessage::SttPartial {
            text: "box".to_string(),
            confidence: None,
        };
        assert!(serde_json::to_value(&msg).unwrap()["confidence"].is_null());
    }
}
