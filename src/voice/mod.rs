//! Voice pipeline building blocks
//!
//! Speech in (capture, STT), speech out (chunking, sanitizing, TTS,
//! playback). The session wires these together per client.

pub mod capture;
pub mod chunker;
pub mod pcm;
pub mod playback;
pub mod sanitize;
pub mod stt;
pub mod tts;
pub mod vad;

pub use capture::{MicCapture, MonoConverter, SAMPLE_RATE};
pub use chunker::TextChunker;
pub use playback::{
    AudioOutput, ClockOutput, DeviceOutput, Mixer, PlaybackEvent, PlaybackScheduler,
};
pub use sanitize::{
    Directives, Sanitized, is_likely_wrong_language, sanitize, sanitize_opening,
};
pub use stt::{SttConnector, SttEvent, SttHandle, create_stt_connector};
pub use tts::{
    ConfiguredTts, Emotion, SynthesisRequest, TtsEvent, TtsFactory, TtsProvider,
    create_tts_provider,
};
pub use vad::VoiceDetector;
