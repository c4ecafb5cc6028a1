//! Driver-side client
//!
//! Streams the microphone to a gateway and plays the engineer's replies
//! through a local playback scheduler. The speaking indicator follows the
//! local scheduler, not `tts_audio_done`, so it reflects what is audible.

use std::time::Duration;

use futures::{SinkExt, StreamExt};
use tokio::io::AsyncBufReadExt;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tokio_tungstenite::tungstenite::Message;

use crate::config::PlaybackConfig;
use crate::session::{
    Capabilities, ClientMessage, Integrity, InterruptReason, MicMode, PROTOCOL_VERSION,
    ServerMessage, UtteranceTracker,
};
use crate::transport::{self, json_message};
use crate::voice::playback::{AudioOutput, DeviceOutput, PlaybackEvent, PlaybackScheduler};
use crate::voice::{MicCapture, VoiceDetector};
use crate::Result;

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Client connection settings
#[derive(Debug, Clone)]
pub struct ClientOptions {
    /// Gateway WebSocket URL
    pub url: String,
    /// Push-to-talk: Enter toggles the mic
    pub ptt: bool,
    pub client_id: String,
    pub playback: PlaybackConfig,
}

/// Plays server audio and checks each utterance for truncation
pub struct ClientPlayback<O> {
    scheduler: PlaybackScheduler<O>,
    tracker: UtteranceTracker,
    fade: Duration,
    speaking: bool,
    failure: Option<String>,
    vad: VoiceDetector,
}

impl<O: AudioOutput> ClientPlayback<O> {
    #[must_use]
    pub fn new(output: O, config: &PlaybackConfig) -> Self {
        Self {
            scheduler: PlaybackScheduler::new(output, config),
            tracker: UtteranceTracker::new(),
            fade: config.fade,
            speaking: false,
            failure: None,
            vad: VoiceDetector::default(),
        }
    }

    /// Audio is audible or still scheduled
    #[must_use]
    pub const fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Last unrecoverable error reported by the gateway
    #[must_use]
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    #[must_use]
    pub const fn scheduler(&self) -> &PlaybackScheduler<O> {
        &self.scheduler
    }

    /// Apply one server message; returns the integrity verdict on `tts_audio_done`
    pub fn on_message(&mut self, message: &ServerMessage) -> Option<Integrity> {
        match message {
            ServerMessage::Ready { protocol_version } => {
                tracing::info!(protocol_version, "gateway ready");
            }
            ServerMessage::State {
                stt,
                llm,
                tts,
                mic_enabled,
                ..
            } => {
                tracing::debug!(stt = ?stt, llm = ?llm, tts = ?tts, mic_enabled, "gateway state");
            }
            ServerMessage::SttPartial { text, .. } => tracing::debug!(%text, "partial"),
            ServerMessage::SttFinal { text, confidence } => {
                tracing::info!(%text, confidence = ?confidence, "driver");
            }
            ServerMessage::LlmDone { text, duration_ms } => {
                if !text.is_empty() {
                    tracing::info!(%text, duration_ms, "engineer");
                }
            }
            ServerMessage::TtsAudioStart {
                utterance_id,
                sample_rate,
                ..
            } => {
                if let Some(unclosed) = self.tracker.start(*utterance_id, *sample_rate) {
                    tracing::warn!(utterance_id = unclosed.id, "utterance never closed");
                }
            }
            ServerMessage::TtsAudioDone {
                utterance_id,
                chunks,
                bytes,
                ..
            } => return self.verify(*utterance_id, *chunks, *bytes),
            ServerMessage::Error {
                scope,
                message,
                recoverable,
            } => {
                if *recoverable {
                    tracing::warn!(scope = ?scope, %message, "gateway error");
                } else {
                    tracing::error!(scope = ?scope, %message, "gateway failure");
                    self.failure = Some(format!("{scope:?}: {message}"));
                }
            }
            ServerMessage::LlmDelta { .. } | ServerMessage::Unknown => {}
        }
        None
    }

    fn verify(&mut self, utterance_id: u64, chunks: u32, bytes: u64) -> Option<Integrity> {
        let verdict = self.tracker.verify(utterance_id, chunks, bytes);
        match verdict {
            Some(Integrity::Truncated {
                expected_chunks,
                observed_chunks,
                expected_bytes,
                observed_bytes,
            }) => tracing::warn!(
                utterance_id,
                expected_chunks,
                observed_chunks,
                expected_bytes,
                observed_bytes,
                "utterance truncated"
            ),
            Some(Integrity::Intact) => tracing::trace!(utterance_id, "utterance intact"),
            None => tracing::debug!(utterance_id, "done for an utterance that never started"),
        }
        verdict
    }

    /// Schedule one binary audio frame for the open utterance
    pub fn on_audio(&mut self, data: &[u8]) {
        let Some((utterance_id, sample_rate)) =
            self.tracker.current().map(|u| (u.id, u.sample_rate))
        else {
            tracing::debug!(bytes = data.len(), "audio outside any utterance");
            return;
        };
        self.tracker.record(data.len());

        match self.scheduler.enqueue(utterance_id, data, sample_rate) {
            Ok(Some(PlaybackEvent::Started)) => self.speaking = true,
            Ok(_) => {}
            Err(e) => tracing::warn!(utterance_id, error = %e, "cannot schedule audio"),
        }
    }

    /// Fade out and refuse the rest of the current utterance
    pub fn interrupt(&mut self) {
        if let Some(id) = self.tracker.current_id() {
            self.scheduler.reject(id);
        }
        self.scheduler.fade_out(self.fade);
    }

    /// Feed a mic frame to the voice detector
    ///
    /// Returns true when the driver starts talking over audible speech, after
    /// local playback has already been interrupted.
    pub fn talk_over(&mut self, frame: &[u8]) -> bool {
        if !self.vad.process(frame) || !self.speaking {
            return false;
        }
        tracing::info!("driver talking over the engineer");
        self.interrupt();
        true
    }

    /// Advance the playback clock; flips the speaking flag on drain
    pub fn poll(&mut self) -> Option<PlaybackEvent> {
        let event = self.scheduler.poll();
        if event == Some(PlaybackEvent::Drained) {
            self.speaking = false;
        }
        event
    }
}

/// Run the driver client until the gateway closes the connection
///
/// # Errors
///
/// Returns error if the gateway is unreachable or an audio device fails
pub async fn run(options: ClientOptions) -> Result<()> {
    let ws = transport::connect(&options.url, &[]).await?;
    let (mut sink, mut stream) = ws.split();
    tracing::info!(url = %options.url, ptt = options.ptt, "connected to gateway");

    sink.send(json_message(&ClientMessage::Hello {
        protocol_version: PROTOCOL_VERSION,
        client_id: Some(options.client_id.clone()),
        capabilities: Capabilities { binary_audio: true },
    })?)
    .await?;

    let mode = if options.ptt {
        MicMode::Ptt
    } else {
        MicMode::Continuous
    };
    let mut mic_enabled = !options.ptt;
    sink.send(json_message(&ClientMessage::MicState {
        enabled: mic_enabled,
        mode: Some(mode),
    })?)
    .await?;

    let (mic_tx, mut mic_rx) = mpsc::unbounded_channel();
    let capture = MicCapture::start(mic_tx)?;
    tracing::info!(device_rate = capture.device_rate(), "microphone open");

    let mut playback = ClientPlayback::new(DeviceOutput::open()?, &options.playback);

    let (key_tx, mut key_rx) = mpsc::unbounded_channel();
    if options.ptt {
        println!("Push-to-talk: press Enter to talk, Enter again to release.");
        tokio::spawn(async move {
            let mut lines = tokio::io::BufReader::new(tokio::io::stdin()).lines();
            while let Ok(Some(_)) = lines.next_line().await {
                if key_tx.send(()).is_err() {
                    break;
                }
            }
        });
    }

    let mut poll = tokio::time::interval(POLL_INTERVAL);
    poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            frame = stream.next() => match frame {
                Some(Ok(Message::Text(text))) => {
                    match serde_json::from_str::<ServerMessage>(text.as_str()) {
                        Ok(message) => {
                            playback.on_message(&message);
                        }
                        Err(e) => tracing::warn!(error = %e, "malformed gateway message"),
                    }
                }
                Some(Ok(Message::Binary(data))) => playback.on_audio(&data),
                Some(Ok(Message::Close(_))) | None => {
                    tracing::info!("gateway closed the connection");
                    break;
                }
                Some(Ok(_)) => {}
                Some(Err(e)) => return Err(e.into()),
            },
            Some(frame) = mic_rx.recv() => {
                if !mic_enabled {
                    continue;
                }
                if !options.ptt && playback.talk_over(&frame) {
                    sink.send(json_message(&ClientMessage::Interrupt {
                        reason: InterruptReason::VadVoice,
                    })?)
                    .await?;
                }
                sink.send(Message::Binary(frame.into())).await?;
            }
            Some(()) = key_rx.recv() => {
                mic_enabled = !mic_enabled;
                println!("{}", if mic_enabled { "[mic ON]" } else { "[mic off]" });
                if mic_enabled {
                    playback.interrupt();
                    sink.send(json_message(&ClientMessage::Interrupt {
                        reason: InterruptReason::PttOn,
                    })?)
                    .await?;
                }
                sink.send(json_message(&ClientMessage::MicState {
                    enabled: mic_enabled,
                    mode: Some(mode),
                })?)
                .await?;
            }
            _ = poll.tick() => {
                if playback.poll() == Some(PlaybackEvent::Drained) {
                    tracing::debug!("playback drained");
                }
            }
        }
    }

    if let Some(failure) = playback.failure() {
        eprintln!("gateway failure: {failure}");
    }
    Ok(())
}
