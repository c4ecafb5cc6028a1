//! Streaming speech-to-text (STT) adapter
//!
//! [`SttHandle`] fronts an actor task that owns the upstream connection and
//! the [`MicBuffer`]. Audio is always buffered; it only goes upstream while
//! the link is up and the mic is enabled. Lost links are re-established with
//! exponential backoff.

mod buffer;
mod deepgram;

use std::future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;

pub use buffer::{FLUSH_INCREMENT, MicBuffer};
pub use deepgram::DeepgramConnector;

use crate::config::SttConfig;
use crate::retry::{Backoff, RetryPolicy};
use crate::{Error, Result};

/// Capacity of the event channel handed back by [`SttHandle::spawn`]
pub const EVENT_CAPACITY: usize = 256;

/// Transcription progress reported to the session
#[derive(Debug, Clone, PartialEq)]
pub enum SttEvent {
    Connected,
    Disconnected,
    /// Interim hypothesis, may still change
    Partial {
        text: String,
        confidence: Option<f32>,
    },
    /// Settled text for a segment of speech
    Final {
        text: String,
        confidence: Option<f32>,
        /// The speaker has stopped, or a finalize request was answered
        end_of_speech: bool,
    },
    /// Upstream detected a gap after the last word
    UtteranceEnd,
    Error {
        message: String,
        recoverable: bool,
    },
}

/// Frame written to the upstream service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpstreamFrame {
    /// PCM 16-bit little-endian, 16 kHz mono
    Audio(Vec<u8>),
    KeepAlive,
    /// Ask for a final transcript of everything sent so far
    Finalize,
    CloseStream,
}

/// One live upstream connection
///
/// The link is considered lost when `inbound` closes or a send on
/// `outbound` fails.
pub struct SttLink {
    pub outbound: mpsc::Sender<UpstreamFrame>,
    pub inbound: mpsc::Receiver<SttEvent>,
}

/// Opens upstream transcription connections
#[async_trait]
pub trait SttConnector: Send + Sync {
    fn name(&self) -> &'static str;

    /// Open a new streaming connection
    ///
    /// # Errors
    ///
    /// Returns [`Error::Auth`] if credentials are rejected, or another error
    /// if the service is unreachable
    async fn connect(&self) -> Result<SttLink>;
}

/// Build the connector named in configuration
///
/// # Errors
///
/// Returns error if the provider is unknown or its credentials are missing
pub fn create_stt_connector(config: &SttConfig) -> Result<Arc<dyn SttConnector>> {
    match config.provider.as_str() {
        "deepgram" => Ok(Arc::new(DeepgramConnector::new(config)?)),
        other => Err(Error::Config(format!(
            "unknown STT provider '{other}' (expected deepgram)"
        ))),
    }
}

#[derive(Debug)]
enum SttCommand {
    Connect,
    Audio(Vec<u8>),
    SetMic(bool),
    Finalize,
    Disconnect,
}

/// Cheap handle to a running STT actor
///
/// Commands are queued on an unbounded channel so callers never wait on the
/// network. Dropping every handle stops the actor.
#[derive(Clone)]
pub struct SttHandle {
    commands: mpsc::UnboundedSender<SttCommand>,
}

impl SttHandle {
    /// Start an actor; its events arrive on the returned receiver
    #[must_use]
    pub fn spawn(
        connector: Arc<dyn SttConnector>,
        config: &SttConfig,
    ) -> (Self, mpsc::Receiver<SttEvent>) {
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (event_tx, event_rx) = mpsc::channel(EVENT_CAPACITY);

        let policy = RetryPolicy {
            max_attempts: Some(config.max_reconnect_attempts),
            ..RetryPolicy::default()
        };
        let actor = SttActor {
            connector,
            events: event_tx,
            keepalive: config.keepalive,
            buffer: MicBuffer::new(),
            mic_enabled: false,
            wanted: false,
            link: None,
            backoff: Backoff::new(policy),
            retry_at: None,
            last_sent: Instant::now(),
        };
        tokio::spawn(actor.run(command_rx));

        (Self { commands: command_tx }, event_rx)
    }

    pub fn connect(&self) {
        self.send(SttCommand::Connect);
    }

    /// Buffer microphone PCM for upload
    pub fn send_audio(&self, data: Vec<u8>) {
        self.send(SttCommand::Audio(data));
    }

    /// Gate upload; disabling flushes the buffer and requests a final
    pub fn set_mic_enabled(&self, enabled: bool) {
        self.send(SttCommand::SetMic(enabled));
    }

    pub fn finalize(&self) {
        self.send(SttCommand::Finalize);
    }

    pub fn disconnect(&self) {
        self.send(SttCommand::Disconnect);
    }

    fn send(&self, command: SttCommand) {
        if self.commands.send(command).is_err() {
            tracing::debug!("STT actor already stopped");
        }
    }
}

struct SttActor {
    connector: Arc<dyn SttConnector>,
    events: mpsc::Sender<SttEvent>,
    keepalive: Duration,
    buffer: MicBuffer,
    mic_enabled: bool,
    /// Whether the owner wants a live link (drives reconnects)
    wanted: bool,
    link: Option<SttLink>,
    backoff: Backoff,
    retry_at: Option<Instant>,
    last_sent: Instant,
}

async fn next_upstream(link: &mut Option<SttLink>) -> Option<SttEvent> {
    match link {
        Some(link) => link.inbound.recv().await,
        None => future::pending().await,
    }
}

async fn sleep_until(at: Option<Instant>) {
    match at {
        Some(at) => tokio::time::sleep_until(at).await,
        None => future::pending().await,
    }
}

impl SttActor {
    async fn run(mut self, mut commands: mpsc::UnboundedReceiver<SttCommand>) {
        loop {
            let keepalive_at = self.last_sent + self.keepalive;
            let linked = self.link.is_some();

            tokio::select! {
                command = commands.recv() => {
                    let Some(command) = command else { break };
                    self.handle(command).await;
                }
                event = next_upstream(&mut self.link) => match event {
                    Some(event) => self.emit(event).await,
                    None => self.link_lost("upstream closed").await,
                },
                () = sleep_until(self.retry_at) => self.open().await,
                () = tokio::time::sleep_until(keepalive_at), if linked => {
                    self.write(UpstreamFrame::KeepAlive).await;
                }
            }
        }

        if let Some(link) = self.link.take() {
            let _ = link.outbound.send(UpstreamFrame::CloseStream).await;
        }
        tracing::debug!(
            appended = self.buffer.appended(),
            flushed = self.buffer.flushed(),
            "STT actor stopped"
        );
    }

    async fn handle(&mut self, command: SttCommand) {
        match command {
            SttCommand::Connect => self.start(),
            SttCommand::Audio(data) => {
                self.buffer.append(&data);
                self.flush(false).await;
            }
            SttCommand::SetMic(true) => {
                self.mic_enabled = true;
                if !self.wanted || (self.link.is_none() && self.retry_at.is_none()) {
                    self.start();
                }
                self.flush(false).await;
            }
            SttCommand::SetMic(false) => {
                self.mic_enabled = false;
                self.flush(true).await;
                self.write(UpstreamFrame::Finalize).await;
            }
            SttCommand::Finalize => {
                self.flush(true).await;
                self.write(UpstreamFrame::Finalize).await;
            }
            SttCommand::Disconnect => {
                self.wanted = false;
                self.retry_at = None;
                if let Some(link) = self.link.take() {
                    let _ = link.outbound.send(UpstreamFrame::CloseStream).await;
                    self.emit(SttEvent::Disconnected).await;
                    tracing::info!(
                        provider = self.connector.name(),
                        unflushed = self.buffer.len(),
                        "STT disconnected"
                    );
                }
            }
        }
    }

    /// Begin a fresh connect cycle with a full retry budget
    fn start(&mut self) {
        self.wanted = true;
        self.backoff.reset();
        if self.link.is_none() {
            self.retry_at = Some(Instant::now());
        }
    }

    async fn open(&mut self) {
        self.retry_at = None;
        if !self.wanted || self.link.is_some() {
            return;
        }

        match self.connector.connect().await {
            Ok(link) => {
                tracing::info!(
                    provider = self.connector.name(),
                    attempts = self.backoff.attempts(),
                    "STT connected"
                );
                self.link = Some(link);
                self.backoff.reset();
                self.last_sent = Instant::now();
                self.emit(SttEvent::Connected).await;
                self.flush(false).await;
            }
            Err(e) if !e.is_recoverable() => {
                tracing::error!(provider = self.connector.name(), error = %e, "STT connect refused");
                self.wanted = false;
                self.emit(SttEvent::Error {
                    message: e.to_string(),
                    recoverable: false,
                })
                .await;
            }
            Err(e) => self.schedule_retry(&e.to_string()).await,
        }
    }

    async fn link_lost(&mut self, reason: &str) {
        self.link = None;
        self.emit(SttEvent::Disconnected).await;
        if self.wanted {
            self.schedule_retry(reason).await;
        }
    }

    async fn schedule_retry(&mut self, reason: &str) {
        if let Some(delay) = self.backoff.next_delay() {
            tracing::warn!(
                provider = self.connector.name(),
                attempt = self.backoff.attempts(),
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                reason,
                "STT reconnect scheduled"
            );
            self.retry_at = Some(Instant::now() + delay);
        } else {
            let attempts = self.backoff.attempts();
            tracing::error!(provider = self.connector.name(), attempts, reason, "STT giving up");
            self.wanted = false;
            self.emit(SttEvent::Error {
                message: format!("STT unavailable after {attempts} attempts: {reason}"),
                recoverable: true,
            })
            .await;
        }
    }

    /// Move buffered audio upstream
    ///
    /// Normal flushes need an enabled mic and only send whole increments;
    /// a forced flush also sends the trailing partial increment.
    async fn flush(&mut self, force: bool) {
        if self.link.is_none() || !(force || self.mic_enabled) {
            return;
        }

        loop {
            let chunk = match self.buffer.take_increment() {
                Some(chunk) => chunk,
                None if force => match self.buffer.take_remainder() {
                    Some(chunk) => chunk,
                    None => break,
                },
                None => break,
            };

            let sent = self.try_write(UpstreamFrame::Audio(chunk)).await;
            if let Err(UpstreamFrame::Audio(chunk)) = sent {
                self.buffer.restore(chunk);
                self.link_lost("audio write failed").await;
                break;
            }
        }
    }

    /// Send a frame, handing it back if the link is gone
    async fn try_write(&mut self, frame: UpstreamFrame) -> std::result::Result<(), UpstreamFrame> {
        let Some(link) = &self.link else {
            return Err(frame);
        };
        match link.outbound.send(frame).await {
            Ok(()) => {
                self.last_sent = Instant::now();
                Ok(())
            }
            Err(mpsc::error::SendError(frame)) => Err(frame),
        }
    }

    /// Send a control frame; a no-op without a link
    async fn write(&mut self, frame: UpstreamFrame) {
        if self.link.is_none() {
            return;
        }
        if self.try_write(frame).await.is_err() {
            self.link_lost("control write failed").await;
        }
    }

    async fn emit(&self, event: SttEvent) {
        if self.events.send(event).await.is_err() {
            tracing::trace!("STT event receiver gone");
        }
    }
}
