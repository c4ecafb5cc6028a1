//! Per-session flags and the `state` message derived from them

use super::protocol::{ComponentStatus, ServerMessage};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionState {
    pub mic_enabled: bool,
    /// Voice heard since the last end of speech
    pub voice_detected: bool,
    pub stt_connected: bool,
    pub stt_failed: bool,
    pub llm_active: bool,
    pub llm_failed: bool,
    pub tts_connected: bool,
    pub tts_active: bool,
    pub tts_failed: bool,
    /// Scheduled audio has not finished playing
    pub speaking: bool,
}

const fn status(failed: bool, active: bool, connected: bool) -> ComponentStatus {
    if failed {
        ComponentStatus::Error
    } else if active {
        ComponentStatus::Streaming
    } else if connected {
        ComponentStatus::Connected
    } else {
        ComponentStatus::Idle
    }
}

impl SessionState {
    /// Driver is talking, for proactive suppression
    #[must_use]
    pub const fn driver_speaking(&self) -> bool {
        self.mic_enabled && self.voice_detected
    }

    #[must_use]
    pub const fn stt_status(&self) -> ComponentStatus {
        status(
            self.stt_failed,
            self.stt_connected && self.mic_enabled,
            self.stt_connected,
        )
    }

    #[must_use]
    pub const fn llm_status(&self) -> ComponentStatus {
        status(self.llm_failed, self.llm_active, false)
    }

    #[must_use]
    pub const fn tts_status(&self) -> ComponentStatus {
        status(self.tts_failed, self.tts_active, self.tts_connected)
    }

    #[must_use]
    pub fn to_message(&self) -> ServerMessage {
        ServerMessage::State {
            stt: self.stt_status(),
            llm: self.llm_status(),
            tts: self.tts_status(),
            mic_enabled: self.mic_enabled,
            speaking: self.speaking,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stt_streams_only_with_mic_on() {
        let mut state = SessionState {
            stt_connected: true,
            ..SessionState::default()
        };
        assert_eq!(state.stt_status(), ComponentStatus::Connected);
        state.mic_enabled = true;
        assert_eq!(state.stt_status(), ComponentStatus::Streaming);
        state.stt_failed = true;
        assert_eq!(state.stt_status(), ComponentStatus::Error);
    }

    #[test]
    fn llm_is_idle_or_streaming() {
        let mut state = SessionState::default();
        assert_eq!(state.llm_status(), ComponentStatus::Idle);
        state.llm_active = true;
        assert_eq!(state.llm_status(), ComponentStatus::Streaming);
    }

    #[test]
    fn driver_speaking_needs_mic() {
        let mut state = SessionState {
            voice_detected: true,
            ..SessionState::default()
        };
        assert!(!state.driver_speaking());
        state.mic_enabled = true;
        assert!(state.driver_speaking());
    }
}
