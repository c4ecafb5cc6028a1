//! Serialized request queue shared by every TTS backend

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::task::AbortHandle;

use super::{SynthesisRequest, TtsEvent, TtsProvider};
use crate::{Error, Result};

/// A backend that can turn one request into streamed PCM
#[async_trait]
pub trait SpeechBackend: Send + Sync + 'static {
    fn name(&self) -> &'static str;

    fn sample_rate(&self) -> u32;

    /// Open a persistent connection, if the backend keeps one
    ///
    /// # Errors
    ///
    /// Returns error if the backend cannot be reached
    async fn open(&self) -> Result<()> {
        Ok(())
    }

    /// Close the persistent connection
    async fn close(&self) {}

    /// Tell the backend to stop generating audio for an aborted request
    async fn interrupt(&self, _utterance_id: u64) {}

    /// Stream PCM for `request` into `sink`
    ///
    /// # Errors
    ///
    /// Returns error if the backend rejects the request or the stream breaks
    async fn stream(&self, request: &SynthesisRequest, sink: &mut ChunkSink) -> Result<()>;
}

/// Forwards backend audio as whole 16-bit samples
pub struct ChunkSink {
    utterance_id: u64,
    events: mpsc::Sender<TtsEvent>,
    carry: Option<u8>,
    chunks: usize,
    bytes: usize,
}

impl ChunkSink {
    #[must_use]
    pub const fn new(utterance_id: u64, events: mpsc::Sender<TtsEvent>) -> Self {
        Self {
            utterance_id,
            events,
            carry: None,
            chunks: 0,
            bytes: 0,
        }
    }

    /// Emit `data`, holding back a trailing odd byte for the next call
    ///
    /// # Errors
    ///
    /// Returns error if the event receiver is gone
    pub async fn push(&mut self, data: &[u8]) -> Result<()> {
        let mut buf = Vec::with_capacity(data.len() + 1);
        if let Some(byte) = self.carry.take() {
            buf.push(byte);
        }
        buf.extend_from_slice(data);
        if buf.len() % 2 == 1 {
            self.carry = buf.pop();
        }
        if buf.is_empty() {
            return Ok(());
        }

        self.chunks += 1;
        self.bytes += buf.len();
        self.events
            .send(TtsEvent::AudioChunk {
                utterance_id: self.utterance_id,
                data: buf,
            })
            .await
            .map_err(|_| Error::Tts("event receiver closed".to_string()))
    }

    #[must_use]
    pub const fn chunks(&self) -> usize {
        self.chunks
    }

    #[must_use]
    pub const fn bytes(&self) -> usize {
        self.bytes
    }
}

struct Active {
    utterance_id: u64,
    abort: AbortHandle,
}

#[derive(Default)]
struct QueueState {
    queue: VecDeque<SynthesisRequest>,
    active: Option<Active>,
    connected: bool,
    /// Bumped on cancel so a finishing task can tell it was superseded
    generation: u64,
}

struct Inner<B> {
    backend: B,
    events: mpsc::Sender<TtsEvent>,
    state: Mutex<QueueState>,
}

impl<B> Inner<B> {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// [`TtsProvider`] that runs one backend request at a time, FIFO
pub struct QueuedProvider<B> {
    inner: Arc<Inner<B>>,
}

impl<B: SpeechBackend> QueuedProvider<B> {
    #[must_use]
    pub fn new(backend: B, events: mpsc::Sender<TtsEvent>) -> Self {
        Self {
            inner: Arc::new(Inner {
                backend,
                events,
                state: Mutex::new(QueueState::default()),
            }),
        }
    }
}

/// Start the next queued request if nothing is in flight
fn pump<B: SpeechBackend>(inner: &Arc<Inner<B>>) {
    let mut state = inner.lock();
    if state.active.is_some() {
        return;
    }
    let Some(request) = state.queue.pop_front() else {
        return;
    };

    let generation = state.generation;
    let utterance_id = request.utterance_id;
    let task_inner = Arc::clone(inner);

    let handle = tokio::spawn(async move {
        let inner = task_inner;
        let mut sink = ChunkSink::new(utterance_id, inner.events.clone());

        tracing::debug!(
            provider = inner.backend.name(),
            utterance_id,
            chars = request.text.len(),
            "synthesis started"
        );
        let result = inner.backend.stream(&request, &mut sink).await;

        let event = match result {
            Ok(()) => {
                tracing::debug!(
                    utterance_id,
                    chunks = sink.chunks(),
                    bytes = sink.bytes(),
                    "synthesis finished"
                );
                TtsEvent::ChunkDone { utterance_id }
            }
            Err(e) => {
                tracing::warn!(utterance_id, error = %e, "synthesis failed");
                TtsEvent::Error {
                    message: e.to_string(),
                    recoverable: e.is_recoverable(),
                }
            }
        };
        let failed = matches!(event, TtsEvent::Error { .. });
        if inner.events.send(event).await.is_err() {
            return;
        }
        if failed {
            // The utterance still needs closing so counters can be reported
            let _ = inner.events.send(TtsEvent::ChunkDone { utterance_id }).await;
        }

        let drained = {
            let mut state = inner.lock();
            if state.generation != generation {
                return;
            }
            state.active = None;
            state.queue.is_empty()
        };

        if drained {
            let _ = inner.events.send(TtsEvent::Completed).await;
        } else {
            pump(&inner);
        }
    });

    state.active = Some(Active {
        utterance_id,
        abort: handle.abort_handle(),
    });
}

#[async_trait]
impl<B: SpeechBackend> TtsProvider for QueuedProvider<B> {
    fn name(&self) -> &'static str {
        self.inner.backend.name()
    }

    async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        self.inner.backend.open().await?;
        self.inner.lock().connected = true;
        let _ = self.inner.events.send(TtsEvent::Connected).await;
        tracing::info!(provider = self.name(), "TTS connected");
        Ok(())
    }

    async fn disconnect(&self) {
        self.cancel().await;
        let was_connected = std::mem::take(&mut self.inner.lock().connected);
        if was_connected {
            self.inner.backend.close().await;
            let _ = self.inner.events.send(TtsEvent::Disconnected).await;
            tracing::info!(provider = self.name(), "TTS disconnected");
        }
    }

    async fn synthesize(&self, request: SynthesisRequest) -> Result<()> {
        {
            let mut state = self.inner.lock();
            if !state.connected {
                return Err(Error::Tts(format!("{} is not connected", self.name())));
            }
            state.queue.push_back(request);
        }
        pump(&self.inner);
        Ok(())
    }

    async fn cancel(&self) {
        let (aborted, had_work) = {
            let mut state = self.inner.lock();
            let had_queue = !state.queue.is_empty();
            state.queue.clear();
            state.generation += 1;
            let active = state.active.take();
            if let Some(active) = &active {
                active.abort.abort();
            }
            (active.map(|a| a.utterance_id), had_queue)
        };

        if let Some(utterance_id) = aborted {
            self.inner.backend.interrupt(utterance_id).await;
        }
        if aborted.is_some() || had_work {
            tracing::debug!(provider = self.name(), ?aborted, "synthesis cancelled");
            let _ = self.inner.events.send(TtsEvent::Cancelled).await;
        }
    }

    fn is_connected(&self) -> bool {
        self.inner.lock().connected
    }

    fn is_streaming(&self) -> bool {
        let state = self.inner.lock();
        state.active.is_some() || !state.queue.is_empty()
    }

    fn sample_rate(&self) -> u32 {
        self.inner.backend.sample_rate()
    }
}
