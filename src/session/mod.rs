//! Voice Session: the per-client protocol state machine
//!
//! A session is one tokio task owning all of its state. It waits for the
//! client's `hello`, then multiplexes client frames, STT events, the model
//! stream, TTS events, the proactive ticker and a playback poll in a single
//! `select!` loop. Nothing here is shared, so nothing is locked.
//!
//! The transport is abstracted as two channels of [`Inbound`] and
//! [`Outbound`] frames; the HTTP layer bridges them to a WebSocket.

mod protocol;
mod state;
mod utterance;

use std::collections::VecDeque;
use std::fmt::Write as _;
use std::future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::Instrument;
use uuid::Uuid;

pub use protocol::{
    AUDIO_ENCODING, Capabilities, ClientMessage, ComponentStatus, ErrorScope, InterruptReason,
    MicMode, PROTOCOL_VERSION, ServerMessage,
};
pub use state::SessionState;
pub use utterance::{Integrity, Utterance, UtteranceTracker};

use crate::config::Config;
use crate::llm::{ChatEvent, ChatMessage, ChatModel, ChatRequest};
use crate::proactive::{ProactiveEngine, TickContext};
use crate::telemetry::{TelemetryEvent, TelemetryFeed};
use crate::voice::playback::{ClockOutput, PlaybackEvent, PlaybackScheduler};
use crate::voice::sanitize::{
    Directives, Sanitized, is_likely_wrong_language, sanitize, sanitize_opening,
};
use crate::voice::stt::{SttConnector, SttEvent, SttHandle};
use crate::voice::tts::{SynthesisRequest, TtsEvent, TtsFactory, TtsProvider};
use crate::voice::{TextChunker, pcm};

/// TTS events buffered between the provider and the session loop
const TTS_EVENT_CAPACITY: usize = 256;

/// Model events buffered per turn
const TURN_EVENT_CAPACITY: usize = 64;

/// How often the virtual playback clock is checked
const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Telemetry events kept as prompt context
const RECENT_EVENTS: usize = 5;

/// Frame received from the client
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Text(String),
    /// Microphone PCM16 LE, 16 kHz mono
    Binary(Vec<u8>),
}

/// Frame to send to the client
#[derive(Debug, Clone, PartialEq)]
pub enum Outbound {
    Message(ServerMessage),
    /// TTS PCM16 LE at the declared sample rate
    Audio(Vec<u8>),
    /// Close the transport
    Close,
}

/// Collaborators shared by every session
#[derive(Clone)]
pub struct SessionDeps {
    pub config: Arc<Config>,
    pub telemetry: TelemetryFeed,
    pub stt: Arc<dyn SttConnector>,
    pub tts: Arc<dyn TtsFactory>,
    pub model: Arc<dyn ChatModel>,
}

/// The client transport went away
#[derive(Debug)]
struct PeerGone;

type Flow = std::result::Result<(), PeerGone>;

/// Drive one client connection until either side closes
pub async fn run_session(
    deps: SessionDeps,
    inbound: mpsc::Receiver<Inbound>,
    outbound: mpsc::Sender<Outbound>,
) {
    let id = Uuid::new_v4();
    let span = tracing::info_span!("session", session_id = %id);
    serve(deps, inbound, outbound).instrument(span).await;
}

async fn serve(
    deps: SessionDeps,
    mut inbound: mpsc::Receiver<Inbound>,
    outbound: mpsc::Sender<Outbound>,
) {
    let Some(version) =
        negotiate(&mut inbound, &outbound, deps.config.session.setup_timeout).await
    else {
        return;
    };

    let (tts_tx, tts_rx) = mpsc::channel(TTS_EVENT_CAPACITY);
    let tts = match deps.tts.create(tts_tx) {
        Ok(tts) => tts,
        Err(e) => {
            tracing::error!(error = %e, "cannot create TTS provider");
            let _ = outbound
                .send(Outbound::Message(ServerMessage::error(
                    ErrorScope::Tts,
                    e.to_string(),
                    false,
                )))
                .await;
            let _ = outbound.send(Outbound::Close).await;
            return;
        }
    };
    let (stt, stt_rx) = SttHandle::spawn(Arc::clone(&deps.stt), &deps.config.stt);

    let mut session = Session::new(deps, outbound, stt, tts);
    if session.start(version).await.is_ok() {
        session.run(inbound, stt_rx, tts_rx).await;
    }
    session.shutdown().await;
}

/// Wait for `hello`, returning the negotiated version
async fn negotiate(
    inbound: &mut mpsc::Receiver<Inbound>,
    outbound: &mpsc::Sender<Outbound>,
    timeout: Duration,
) -> Option<u32> {
    let deadline = tokio::time::sleep(timeout);
    tokio::pin!(deadline);

    loop {
        let frame = tokio::select! {
            frame = inbound.recv() => frame?,
            () = &mut deadline => {
                tracing::warn!(timeout_ms = pcm::millis(timeout), "no hello before setup timeout");
                reject(outbound, "setup timeout: no hello received").await;
                return None;
            }
        };

        let text = match frame {
            Inbound::Binary(data) => {
                tracing::debug!(bytes = data.len(), "dropping audio received before hello");
                continue;
            }
            Inbound::Text(text) => text,
        };

        match serde_json::from_str::<ClientMessage>(&text) {
            Ok(ClientMessage::Hello {
                protocol_version: 0,
                ..
            }) => {
                tracing::warn!("client offered protocol version 0");
                reject(outbound, "unsupported protocol version 0").await;
                return None;
            }
            Ok(ClientMessage::Hello {
                protocol_version,
                client_id,
                capabilities,
            }) => {
                let version = protocol_version.min(PROTOCOL_VERSION);
                if !capabilities.binary_audio {
                    tracing::warn!("client did not advertise binary audio; sending it anyway");
                }
                tracing::info!(version, client_id = ?client_id, "session negotiated");
                return Some(version);
            }
            Ok(other) => tracing::debug!(message = ?other, "ignoring message before hello"),
            Err(e) => tracing::warn!(error = %e, "malformed message before hello"),
        }
    }
}

async fn reject(outbound: &mpsc::Sender<Outbound>, message: &str) {
    let _ = outbound
        .send(Outbound::Message(ServerMessage::error(
            ErrorScope::Pipeline,
            message,
            false,
        )))
        .await;
    let _ = outbound.send(Outbound::Close).await;
}

/// One model completion in progress
struct Turn {
    events: mpsc::Receiver<ChatEvent>,
    prompt: String,
    reply: String,
    started: Instant,
    directives: Directives,
    /// Interrupted or silenced: keep reading, stop speaking
    muted: bool,
    /// Some text of this reply has already been sanitized for speech
    opened: bool,
}

/// What woke the session loop
enum Wake {
    Inbound(Option<Inbound>),
    Stt(SttEvent),
    Tts(TtsEvent),
    Chat(Option<ChatEvent>),
    Telemetry(TelemetryEvent),
    Tick,
    Poll,
}

async fn next_chat(turn: &mut Option<Turn>) -> Option<ChatEvent> {
    match turn {
        Some(turn) => turn.events.recv().await,
        None => future::pending().await,
    }
}

struct Session {
    config: Arc<Config>,
    outbound: mpsc::Sender<Outbound>,
    telemetry: TelemetryFeed,
    model: Arc<dyn ChatModel>,
    stt: SttHandle,
    tts: Box<dyn TtsProvider>,
    scheduler: PlaybackScheduler<ClockOutput>,
    engine: ProactiveEngine,
    chunker: TextChunker,
    tracker: UtteranceTracker,
    state: SessionState,
    published: Option<ServerMessage>,
    turn: Option<Turn>,
    transcript: String,
    history: VecDeque<ChatMessage>,
    recent_events: VecDeque<TelemetryEvent>,
    next_utterance_id: u64,
    cancelled_through: u64,
    next_tick: Instant,
}

impl Session {
    fn new(
        deps: SessionDeps,
        outbound: mpsc::Sender<Outbound>,
        stt: SttHandle,
        tts: Box<dyn TtsProvider>,
    ) -> Self {
        let config = deps.config;
        let scheduler =
            PlaybackScheduler::new(ClockOutput::new(tts.sample_rate()), &config.playback);
        Self {
            engine: ProactiveEngine::new(&config.proactive),
            chunker: TextChunker::new(config.chunker),
            next_tick: Instant::now() + config.proactive.race_interval,
            config,
            outbound,
            telemetry: deps.telemetry,
            model: deps.model,
            stt,
            tts,
            scheduler,
            tracker: UtteranceTracker::new(),
            state: SessionState::default(),
            published: None,
            turn: None,
            transcript: String::new(),
            history: VecDeque::new(),
            recent_events: VecDeque::new(),
            next_utterance_id: 1,
            cancelled_through: 0,
        }
    }

    async fn start(&mut self, version: u32) -> Flow {
        self.send(ServerMessage::Ready {
            protocol_version: version,
        })
        .await?;
        self.publish_state().await?;

        self.stt.connect();
        if let Err(e) = self.tts.connect().await {
            tracing::warn!(provider = self.tts.name(), error = %e, "TTS connect failed");
            self.state.tts_failed = true;
            self.send(ServerMessage::error(
                ErrorScope::Tts,
                e.to_string(),
                e.is_recoverable(),
            ))
            .await?;
            self.publish_state().await?;
        }
        Ok(())
    }

    async fn run(
        &mut self,
        mut inbound: mpsc::Receiver<Inbound>,
        mut stt_events: mpsc::Receiver<SttEvent>,
        mut tts_events: mpsc::Receiver<TtsEvent>,
    ) {
        let mut telemetry_events = self.telemetry.subscribe();
        let mut poll = tokio::time::interval(POLL_INTERVAL);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let proactive = self.config.proactive.enabled;

        loop {
            let next_tick = self.next_tick;
            let wake = tokio::select! {
                frame = inbound.recv() => Wake::Inbound(frame),
                Some(event) = stt_events.recv() => Wake::Stt(event),
                Some(event) = tts_events.recv() => Wake::Tts(event),
                event = next_chat(&mut self.turn) => Wake::Chat(event),
                Ok(event) = telemetry_events.recv() => Wake::Telemetry(event),
                () = tokio::time::sleep_until(next_tick), if proactive => Wake::Tick,
                _ = poll.tick() => Wake::Poll,
            };

            let flow = match wake {
                Wake::Inbound(None) => {
                    tracing::info!("client closed the connection");
                    break;
                }
                Wake::Inbound(Some(Inbound::Text(text))) => self.on_text(&text).await,
                Wake::Inbound(Some(Inbound::Binary(data))) => {
                    self.stt.send_audio(data);
                    Ok(())
                }
                Wake::Stt(event) => self.on_stt(event).await,
                Wake::Tts(event) => self.on_tts(event).await,
                Wake::Chat(event) => self.on_chat(event).await,
                Wake::Telemetry(event) => {
                    self.remember_event(event);
                    Ok(())
                }
                Wake::Tick => self.on_tick().await,
                Wake::Poll => self.on_poll().await,
            };

            if flow.is_err() {
                tracing::info!("client transport gone");
                break;
            }
        }
    }

    async fn shutdown(&mut self) {
        self.turn = None;
        self.stt.disconnect();
        self.tts.disconnect().await;
        tracing::info!("session closed");
    }

    async fn send(&self, message: ServerMessage) -> Flow {
        self.outbound
            .send(Outbound::Message(message))
            .await
            .map_err(|_| PeerGone)
    }

    /// Broadcast the full state if anything changed since the last one
    async fn publish_state(&mut self) -> Flow {
        let message = self.state.to_message();
        if self.published.as_ref() == Some(&message) {
            return Ok(());
        }
        self.published = Some(message.clone());
        self.send(message).await
    }

    async fn on_text(&mut self, text: &str) -> Flow {
        let message = match serde_json::from_str::<ClientMessage>(text) {
            Ok(message) => message,
            Err(e) => {
                tracing::warn!(error = %e, "malformed client message");
                return Ok(());
            }
        };

        match message {
            ClientMessage::Hello { .. } => {
                tracing::debug!("ignoring repeated hello");
                Ok(())
            }
            ClientMessage::MicState { enabled, mode } => {
                tracing::info!(enabled, mode = ?mode, "mic state");
                self.state.mic_enabled = enabled;
                if !enabled {
                    self.state.voice_detected = false;
                }
                self.stt.set_mic_enabled(enabled);
                self.publish_state().await
            }
            ClientMessage::Interrupt { reason } => self.on_interrupt(reason).await,
            ClientMessage::Unknown => {
                tracing::debug!("ignoring unknown message type");
                Ok(())
            }
        }
    }

    async fn on_interrupt(&mut self, reason: InterruptReason) -> Flow {
        match reason {
            InterruptReason::VadVoice if !self.state.mic_enabled => {
                tracing::debug!("ignoring voice interrupt while mic is off");
                return Ok(());
            }
            InterruptReason::VadVoice => self.state.voice_detected = true,
            InterruptReason::PttOn => {}
            InterruptReason::Other => {
                tracing::warn!("ignoring interrupt with unrecognized reason");
                return Ok(());
            }
        }
        tracing::info!(reason = ?reason, "interrupt");
        self.cancel_speech().await
    }

    /// Stop synthesis and fade playback; STT and the model stream carry on
    async fn cancel_speech(&mut self) -> Flow {
        self.tts.cancel().await;
        self.chunker.clear();
        if let Some(turn) = self.turn.as_mut() {
            turn.muted = true;
        }

        let last = self.next_utterance_id.saturating_sub(1);
        self.cancelled_through = self.cancelled_through.max(last);
        self.scheduler.reject(last);
        self.scheduler.fade_out(self.config.playback.fade);

        if let Some(open) = self.tracker.current_id() {
            self.close_utterance(open).await?;
        }
        self.state.tts_active = false;
        self.publish_state().await
    }

    async fn on_stt(&mut self, event: SttEvent) -> Flow {
        match event {
            SttEvent::Connected => {
                self.state.stt_connected = true;
                self.state.stt_failed = false;
                self.publish_state().await
            }
            SttEvent::Disconnected => {
                self.state.stt_connected = false;
                self.publish_state().await
            }
            SttEvent::Partial { text, confidence } => {
                if self.state.mic_enabled {
                    self.state.voice_detected = true;
                }
                self.send(ServerMessage::SttPartial { text, confidence }).await
            }
            SttEvent::Final {
                text,
                confidence,
                end_of_speech,
            } => {
                let text = text.trim();
                if !text.is_empty() {
                    if !self.transcript.is_empty() {
                        self.transcript.push(' ');
                    }
                    self.transcript.push_str(text);
                    self.send(ServerMessage::SttFinal {
                        text: text.to_string(),
                        confidence,
                    })
                    .await?;
                }
                if end_of_speech {
                    self.end_of_speech().await
                } else {
                    Ok(())
                }
            }
            SttEvent::UtteranceEnd => self.end_of_speech().await,
            SttEvent::Error {
                message,
                recoverable,
            } => {
                tracing::warn!(error = %message, recoverable, "STT error");
                self.state.stt_failed = true;
                self.send(ServerMessage::error(ErrorScope::Stt, message, recoverable))
                    .await?;
                self.publish_state().await
            }
        }
    }

    /// The driver stopped talking; whatever was transcribed becomes a turn
    async fn end_of_speech(&mut self) -> Flow {
        self.state.voice_detected = false;
        let transcript = std::mem::take(&mut self.transcript);
        if transcript.is_empty() {
            return Ok(());
        }

        tracing::info!(chars = transcript.len(), "driver turn");
        if self.turn.is_some() {
            tracing::debug!("driver turn supersedes the streaming reply");
            self.cancel_speech().await?;
            self.end_turn();
        }
        self.start_turn(transcript).await
    }

    fn build_request(&self, user_text: &str) -> ChatRequest {
        let mut system = self.config.llm.system_prompt.clone();
        match self.telemetry.current() {
            Some(snapshot) => {
                let _ = write!(system, "\n\nCurrent race state: {}", snapshot.summary());
            }
            None => system.push_str("\n\nNo live telemetry is available."),
        }
        if !self.recent_events.is_empty() {
            let events: Vec<String> = self.recent_events.iter().map(TelemetryEvent::describe).collect();
            let _ = write!(system, "\nRecent events: {}", events.join("; "));
        }

        let mut messages = Vec::with_capacity(self.history.len() + 2);
        messages.push(ChatMessage::system(system));
        messages.extend(self.history.iter().cloned());
        messages.push(ChatMessage::user(user_text));

        ChatRequest {
            messages,
            max_tokens: self.config.llm.max_tokens,
        }
    }

    async fn start_turn(&mut self, user_text: String) -> Flow {
        let request = self.build_request(&user_text);
        let (tx, rx) = mpsc::channel(TURN_EVENT_CAPACITY);
        let model = Arc::clone(&self.model);

        tokio::spawn(async move {
            let mut events = match model.stream_turn(request).await {
                Ok(events) => events,
                Err(e) => {
                    let _ = tx.send(ChatEvent::Error(e.to_string())).await;
                    return;
                }
            };
            loop {
                let event = tokio::select! {
                    () = tx.closed() => return,
                    event = events.recv() => event,
                };
                let Some(event) = event else { return };
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        });

        self.chunker.clear();
        self.turn = Some(Turn {
            events: rx,
            prompt: user_text,
            reply: String::new(),
            started: Instant::now(),
            directives: Directives::default(),
            muted: false,
            opened: false,
        });
        self.state.llm_active = true;
        self.state.llm_failed = false;
        self.publish_state().await
    }

    fn end_turn(&mut self) {
        self.turn = None;
        self.state.llm_active = false;
    }

    async fn on_chat(&mut self, event: Option<ChatEvent>) -> Flow {
        match event {
            Some(ChatEvent::Delta(text)) => self.on_delta(text).await,
            Some(ChatEvent::Done) | None => self.finish_turn().await,
            Some(ChatEvent::Error(message)) => {
                tracing::warn!(error = %message, "model turn failed");
                self.chunker.clear();
                self.end_turn();
                self.state.llm_failed = true;
                self.send(ServerMessage::error(ErrorScope::Llm, message, true))
                    .await?;
                self.publish_state().await
            }
        }
    }

    async fn on_delta(&mut self, text: String) -> Flow {
        let Some(turn) = self.turn.as_mut() else {
            return Ok(());
        };
        turn.reply.push_str(&text);
        let muted = turn.muted;

        let chunks = if muted { Vec::new() } else { self.chunker.push(&text) };
        self.send(ServerMessage::LlmDelta { text }).await?;
        for chunk in chunks {
            self.speak(&chunk).await?;
        }
        Ok(())
    }

    async fn finish_turn(&mut self) -> Flow {
        let muted = self.turn.as_ref().is_none_or(|t| t.muted);
        if muted {
            self.chunker.clear();
        } else {
            for chunk in self.chunker.flush() {
                self.speak(&chunk).await?;
            }
        }

        let Some(turn) = self.turn.take() else {
            return Ok(());
        };
        self.state.llm_active = false;

        let reply = sanitize_opening(&turn.reply);
        if is_likely_wrong_language(&reply.text) {
            tracing::warn!(reply = %reply.text, "reply looks like the wrong language");
        }
        let duration = turn.started.elapsed();
        tracing::debug!(
            chars = reply.text.len(),
            duration_ms = pcm::millis(duration),
            "model turn finished"
        );

        self.send(ServerMessage::LlmDone {
            text: reply.text.clone(),
            duration_ms: pcm::millis(duration),
        })
        .await?;

        if !reply.directives.silent && !reply.text.is_empty() {
            self.remember_exchange(turn.prompt, reply.text);
        }
        self.publish_state().await
    }

    fn remember_exchange(&mut self, prompt: String, reply: String) {
        self.history.push_back(ChatMessage::user(prompt));
        self.history.push_back(ChatMessage::assistant(reply));
        let limit = self.config.session.history_turns * 2;
        while self.history.len() > limit {
            self.history.pop_front();
        }
    }

    fn remember_event(&mut self, event: TelemetryEvent) {
        self.recent_events.push_back(event);
        while self.recent_events.len() > RECENT_EVENTS {
            self.recent_events.pop_front();
        }
    }

    /// Sanitize one chunk and queue it for synthesis
    async fn speak(&mut self, chunk: &str) -> Flow {
        let Some(turn) = self.turn.as_mut() else {
            return Ok(());
        };
        let Sanitized { text, directives } = if turn.opened {
            sanitize(chunk)
        } else {
            sanitize_opening(chunk)
        };
        turn.opened |= !text.is_empty();

        turn.directives.merge(&directives);
        if turn.directives.silent {
            if !turn.muted {
                tracing::debug!("model chose to stay silent");
            }
            turn.muted = true;
            self.chunker.clear();
            return Ok(());
        }
        if turn.muted || text.is_empty() {
            return Ok(());
        }
        let (emotion, speed) = (turn.directives.emotion, turn.directives.speed);

        if !self.tts.is_connected() {
            if let Err(e) = self.tts.connect().await {
                tracing::warn!(error = %e, "TTS reconnect failed");
                self.state.tts_failed = true;
                self.send(ServerMessage::error(
                    ErrorScope::Tts,
                    e.to_string(),
                    e.is_recoverable(),
                ))
                .await?;
                return self.publish_state().await;
            }
        }

        let utterance_id = self.next_utterance_id;
        self.next_utterance_id += 1;
        let request = SynthesisRequest::new(utterance_id, text)
            .with_emotion(emotion)
            .with_speed(speed);

        match self.tts.synthesize(request).await {
            Ok(()) => {
                self.state.tts_active = true;
                self.publish_state().await
            }
            Err(e) => {
                tracing::warn!(utterance_id, error = %e, "synthesis rejected");
                self.send(ServerMessage::error(
                    ErrorScope::Tts,
                    e.to_string(),
                    e.is_recoverable(),
                ))
                .await
            }
        }
    }

    async fn on_tts(&mut self, event: TtsEvent) -> Flow {
        match event {
            TtsEvent::Connected => {
                self.state.tts_connected = true;
                self.state.tts_failed = false;
                self.publish_state().await
            }
            TtsEvent::Disconnected => {
                self.state.tts_connected = false;
                self.state.tts_active = false;
                self.publish_state().await
            }
            TtsEvent::AudioChunk { utterance_id, data } => self.on_audio(utterance_id, data).await,
            TtsEvent::ChunkDone { utterance_id } => {
                if utterance_id <= self.cancelled_through {
                    return Ok(());
                }
                self.close_utterance(utterance_id).await
            }
            TtsEvent::Completed | TtsEvent::Cancelled => {
                self.state.tts_active = self.tts.is_streaming();
                self.publish_state().await
            }
            TtsEvent::Error {
                message,
                recoverable,
            } => {
                self.state.tts_failed = true;
                self.send(ServerMessage::error(ErrorScope::Tts, message, recoverable))
                    .await?;
                self.publish_state().await
            }
        }
    }

    async fn on_audio(&mut self, utterance_id: u64, data: Vec<u8>) -> Flow {
        if utterance_id <= self.cancelled_through {
            tracing::trace!(utterance_id, "dropping audio for cancelled utterance");
            return Ok(());
        }

        let sample_rate = self.tts.sample_rate();
        if self.tracker.current_id() != Some(utterance_id) {
            if let Some(stale) = self.tracker.current_id() {
                self.close_utterance(stale).await?;
            }
            self.tracker.start(utterance_id, sample_rate);
            self.send(ServerMessage::TtsAudioStart {
                utterance_id,
                sample_rate,
                encoding: AUDIO_ENCODING.to_string(),
                channels: 1,
            })
            .await?;
        }
        self.tracker.record(data.len());
        self.state.tts_failed = false;

        match self.scheduler.enqueue(utterance_id, &data, sample_rate) {
            Ok(Some(PlaybackEvent::Started)) => self.state.speaking = true,
            Ok(_) => {}
            Err(e) => tracing::warn!(utterance_id, error = %e, "cannot schedule audio"),
        }

        self.outbound
            .send(Outbound::Audio(data))
            .await
            .map_err(|_| PeerGone)?;
        self.publish_state().await
    }

    async fn close_utterance(&mut self, utterance_id: u64) -> Flow {
        let Some(done) = self.tracker.finish(utterance_id) else {
            return Ok(());
        };
        tracing::debug!(
            utterance_id,
            chunks = done.chunks,
            bytes = done.bytes,
            "utterance sent"
        );
        self.send(ServerMessage::TtsAudioDone {
            utterance_id,
            chunks: done.chunks,
            bytes: done.bytes,
            duration_ms: pcm::millis(done.duration()),
        })
        .await
    }

    async fn on_poll(&mut self) -> Flow {
        if self.scheduler.poll() == Some(PlaybackEvent::Drained) {
            self.state.speaking = false;
            return self.publish_state().await;
        }
        Ok(())
    }

    async fn on_tick(&mut self) -> Flow {
        let Some(snapshot) = self.telemetry.current() else {
            self.engine.reset();
            self.next_tick = Instant::now() + self.engine.interval();
            return Ok(());
        };

        self.engine.observe(snapshot);
        let ctx = TickContext {
            driver_speaking: self.state.driver_speaking(),
            assistant_speaking: self.state.speaking || self.state.tts_active || self.turn.is_some(),
        };
        let outcome = self.engine.tick(ctx);
        self.next_tick = Instant::now() + self.engine.interval();

        let Some(outcome) = outcome else {
            return Ok(());
        };

        if let Some(trigger) = outcome.trigger {
            if self.turn.is_some() {
                self.cancel_speech().await?;
                self.end_turn();
            }
            let prompt = format!("[PROACTIVE:{}] {}", trigger.kind.as_str(), trigger.message);
            return self.start_turn(prompt).await;
        }

        if ctx.driver_speaking || ctx.assistant_speaking {
            return Ok(());
        }
        let trend = serde_json::to_string(&outcome.context.trend).unwrap_or_default();
        let prompt = format!(
            "[PROACTIVE:periodic] Trend: {trend}. Speak only if something matters to the driver right now; otherwise reply [SILENT]."
        );
        self.start_turn(prompt).await
    }
}
