//! Shared test utilities: in-process fakes for every session collaborator

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use pitwall::config::Config;
use pitwall::llm::{ChatEvent, ChatModel, ChatRequest};
use pitwall::session::{ClientMessage, Inbound, Outbound, ServerMessage, SessionDeps, run_session};
use pitwall::telemetry::{TelemetryFeed, TelemetryPublisher};
use pitwall::voice::stt::{SttConnector, SttEvent, SttLink, UpstreamFrame};
use pitwall::voice::tts::{SynthesisRequest, TtsEvent, TtsFactory, TtsProvider};
use pitwall::{Error, Result};

/// Upper bound on any single wait in a test
pub const WAIT: Duration = Duration::from_secs(30);

/// The test's end of one fake STT connection
pub struct FakeLink {
    pub events: mpsc::Sender<SttEvent>,
    pub frames: mpsc::Receiver<UpstreamFrame>,
}

/// Connector that hands each new link to the test
pub struct FakeStt {
    links: mpsc::UnboundedSender<FakeLink>,
    refuse: AtomicUsize,
    auth_failure: AtomicBool,
    pub connects: AtomicUsize,
}

impl FakeStt {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<FakeLink>) {
        let (links, rx) = mpsc::unbounded_channel();
        let stt = Arc::new(Self {
            links,
            refuse: AtomicUsize::new(0),
            auth_failure: AtomicBool::new(false),
            connects: AtomicUsize::new(0),
        });
        (stt, rx)
    }

    /// Fail the next `n` connects with a transient error
    pub fn refuse_next(&self, n: usize) {
        self.refuse.store(n, Ordering::SeqCst);
    }

    /// Reject every connect with an auth error
    pub fn reject_credentials(&self) {
        self.auth_failure.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl SttConnector for FakeStt {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn connect(&self) -> Result<SttLink> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        if self.auth_failure.load(Ordering::SeqCst) {
            return Err(Error::Auth("invalid API key".to_string()));
        }
        let refused = self
            .refuse
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if refused {
            return Err(Error::Stt("connection refused".to_string()));
        }

        let (event_tx, event_rx) = mpsc::channel(64);
        let (frame_tx, frame_rx) = mpsc::channel(64);
        let _ = self.links.send(FakeLink {
            events: event_tx,
            frames: frame_rx,
        });
        Ok(SttLink {
            outbound: frame_tx,
            inbound: event_rx,
        })
    }
}

/// What every fake TTS provider did, shared with the test
#[derive(Default)]
pub struct TtsProbe {
    pub requests: Mutex<Vec<SynthesisRequest>>,
    pub cancels: AtomicUsize,
    pub connects: AtomicUsize,
}

impl TtsProbe {
    pub fn texts(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .map(|r| r.text.clone())
            .collect()
    }
}

/// Factory for [`FakeTts`]
pub struct FakeTtsFactory {
    pub probe: Arc<TtsProbe>,
    /// Audio frames emitted per request
    pub chunks: usize,
    pub chunk_bytes: usize,
    /// Emit `ChunkDone` after the audio
    pub finish: bool,
    pub fail_create: bool,
}

impl FakeTtsFactory {
    pub fn new() -> Self {
        Self {
            probe: Arc::new(TtsProbe::default()),
            chunks: 2,
            chunk_bytes: 4_800,
            finish: true,
            fail_create: false,
        }
    }
}

impl TtsFactory for FakeTtsFactory {
    fn create(&self, events: mpsc::Sender<TtsEvent>) -> Result<Box<dyn TtsProvider>> {
        if self.fail_create {
            return Err(Error::Config("missing TTS API key".to_string()));
        }
        Ok(Box::new(FakeTts {
            events,
            probe: Arc::clone(&self.probe),
            chunks: self.chunks,
            chunk_bytes: self.chunk_bytes,
            finish: self.finish,
            connected: AtomicBool::new(false),
        }))
    }
}

/// Provider that answers every request immediately with silence
pub struct FakeTts {
    events: mpsc::Sender<TtsEvent>,
    probe: Arc<TtsProbe>,
    chunks: usize,
    chunk_bytes: usize,
    finish: bool,
    connected: AtomicBool,
}

#[async_trait]
impl TtsProvider for FakeTts {
    fn name(&self) -> &'static str {
        "fake"
    }

    async fn connect(&self) -> Result<()> {
        self.probe.connects.fetch_add(1, Ordering::SeqCst);
        self.connected.store(true, Ordering::SeqCst);
        let _ = self.events.send(TtsEvent::Connected).await;
        Ok(())
    }

    async fn disconnect(&self) {
        self.connected.store(false, Ordering::SeqCst);
        let _ = self.events.send(TtsEvent::Disconnected).await;
    }

    async fn synthesize(&self, request: SynthesisRequest) -> Result<()> {
        let utterance_id = request.utterance_id;
        self.probe.requests.lock().unwrap().push(request);
        for _ in 0..self.chunks {
            let _ = self
                .events
                .send(TtsEvent::AudioChunk {
                    utterance_id,
                    data: vec![0x10; self.chunk_bytes],
                })
                .await;
        }
        if self.finish {
            let _ = self.events.send(TtsEvent::ChunkDone { utterance_id }).await;
            let _ = self.events.send(TtsEvent::Completed).await;
        }
        Ok(())
    }

    async fn cancel(&self) {
        self.probe.cancels.fetch_add(1, Ordering::SeqCst);
        let _ = self.events.send(TtsEvent::Cancelled).await;
    }

    fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    fn is_streaming(&self) -> bool {
        false
    }

    fn sample_rate(&self) -> u32 {
        24_000
    }
}

/// How one scripted model turn behaves
#[derive(Debug, Clone)]
pub enum Reply {
    /// Stream the text word by word, then finish
    Text(String),
    /// Stream the text, then stay open until the turn is dropped
    Hold(String),
    /// Fail after opening the stream
    Fail(String),
}

/// Model that plays back a fixed list of replies
pub struct ScriptedModel {
    replies: Mutex<Vec<Reply>>,
    pub requests: Mutex<Vec<ChatRequest>>,
}

impl ScriptedModel {
    pub fn new(replies: Vec<Reply>) -> Arc<Self> {
        let mut replies = replies;
        replies.reverse();
        Arc::new(Self {
            replies: Mutex::new(replies),
            requests: Mutex::new(Vec::new()),
        })
    }

    pub fn text(reply: &str) -> Reply {
        Reply::Text(reply.to_string())
    }

    /// Last user message of every request so far
    pub fn prompts(&self) -> Vec<String> {
        self.requests
            .lock()
            .unwrap()
            .iter()
            .filter_map(|r| r.messages.last().map(|m| m.content.clone()))
            .collect()
    }
}

fn words(text: &str) -> Vec<String> {
    text.split_inclusive(' ').map(ToString::to_string).collect()
}

#[async_trait]
impl ChatModel for ScriptedModel {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn stream_turn(&self, request: ChatRequest) -> Result<mpsc::Receiver<ChatEvent>> {
        self.requests.lock().unwrap().push(request);
        let reply = self
            .replies
            .lock()
            .unwrap()
            .pop()
            .unwrap_or_else(|| Reply::Text("Copy.".to_string()));

        let (tx, rx) = mpsc::channel(64);
        tokio::spawn(async move {
            match reply {
                Reply::Text(text) => {
                    for word in words(&text) {
                        let _ = tx.send(ChatEvent::Delta(word)).await;
                    }
                    let _ = tx.send(ChatEvent::Done).await;
                }
                Reply::Hold(text) => {
                    for word in words(&text) {
                        let _ = tx.send(ChatEvent::Delta(word)).await;
                    }
                    tx.closed().await;
                }
                Reply::Fail(message) => {
                    let _ = tx.send(ChatEvent::Error(message)).await;
                }
            }
        });
        Ok(rx)
    }
}

/// Configuration with proactive behaviour off and a short setup window
pub fn test_config() -> Config {
    let mut config = Config::default();
    config.proactive.enabled = false;
    config.session.setup_timeout = Duration::from_secs(2);
    config
}

/// A running session wired to fakes
pub struct Harness {
    pub inbound: mpsc::Sender<Inbound>,
    pub outbound: mpsc::Receiver<Outbound>,
    pub links: mpsc::UnboundedReceiver<FakeLink>,
    pub stt: Arc<FakeStt>,
    pub tts: Arc<TtsProbe>,
    pub model: Arc<ScriptedModel>,
    pub telemetry: TelemetryPublisher,
    pub task: JoinHandle<()>,
}

impl Harness {
    pub fn start(config: Config, tts: FakeTtsFactory, model: Arc<ScriptedModel>) -> Self {
        let (stt, links) = FakeStt::new();
        let (feed, telemetry) = TelemetryFeed::channel();
        let probe = Arc::clone(&tts.probe);

        let deps = SessionDeps {
            config: Arc::new(config),
            telemetry: feed,
            stt: Arc::clone(&stt) as Arc<dyn SttConnector>,
            tts: Arc::new(tts),
            model: Arc::clone(&model) as Arc<dyn ChatModel>,
        };

        let (inbound_tx, inbound_rx) = mpsc::channel(64);
        let (outbound_tx, outbound_rx) = mpsc::channel(1024);
        let task = tokio::spawn(run_session(deps, inbound_rx, outbound_tx));

        Self {
            inbound: inbound_tx,
            outbound: outbound_rx,
            links,
            stt,
            tts: probe,
            model,
            telemetry,
            task,
        }
    }

    pub async fn send(&self, message: &ClientMessage) {
        let text = serde_json::to_string(message).unwrap();
        self.inbound.send(Inbound::Text(text)).await.unwrap();
    }

    pub async fn hello(&self) {
        self.send(&ClientMessage::Hello {
            protocol_version: 1,
            client_id: Some("test".to_string()),
            capabilities: pitwall::session::Capabilities { binary_audio: true },
        })
        .await;
    }

    /// Next outbound frame of any kind
    pub async fn next(&mut self) -> Outbound {
        tokio::time::timeout(WAIT, self.outbound.recv())
            .await
            .expect("timed out waiting for outbound frame")
            .expect("session closed the outbound channel")
    }

    /// Skip frames until a message matches
    pub async fn expect(&mut self, matches: impl Fn(&ServerMessage) -> bool) -> ServerMessage {
        loop {
            if let Outbound::Message(message) = self.next().await {
                if matches(&message) {
                    return message;
                }
            }
        }
    }

    /// Collect every frame until a message matches, including it
    pub async fn collect_until(
        &mut self,
        matches: impl Fn(&ServerMessage) -> bool,
    ) -> Vec<Outbound> {
        let mut frames = Vec::new();
        loop {
            let frame = self.next().await;
            let done = matches!(&frame, Outbound::Message(m) if matches(m));
            frames.push(frame);
            if done {
                return frames;
            }
        }
    }

    /// Complete the handshake and return the live STT link
    pub async fn ready(&mut self) -> FakeLink {
        self.hello().await;
        self.expect(|m| matches!(m, ServerMessage::Ready { .. })).await;
        let link = tokio::time::timeout(WAIT, self.links.recv())
            .await
            .expect("timed out waiting for STT connect")
            .expect("connector dropped");
        self.expect(|m| matches!(m, ServerMessage::State { stt, .. } if *stt != pitwall::session::ComponentStatus::Idle))
            .await;
        link
    }
}
