//! Pitwall - a voice race engineer for sim racing
//!
//! This library provides the orchestration layer between a driver's
//! microphone and a spoken reply:
//! - Voice sessions over WebSocket (protocol, state, utterance accounting)
//! - Streaming STT and TTS adapters with reconnect and queueing
//! - Text chunking and sanitizing for speech
//! - Gapless playback scheduling with radio cues
//! - Proactive telemetry triggers
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────┐   mic PCM / control   ┌──────────────────────────────┐
//! │ Driver client │ ────────────────────▶ │           Session            │
//! │  mic, speaker │ ◀──────────────────── │ STT ▶ LLM ▶ chunker ▶ TTS    │
//! └──────────────┘   state / audio        │        ▲                     │
//!                                         │  proactive ◀ telemetry feed  │
//!                                         └──────────────────────────────┘
//! ```

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod llm;
pub mod proactive;
pub mod retry;
pub mod session;
pub mod telemetry;
pub mod transport;
pub mod voice;

pub use config::Config;
pub use error::{Error, Result};
