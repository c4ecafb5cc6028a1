//! Counting audio per utterance to catch truncated deliveries

use std::time::Duration;

use crate::voice::pcm;

/// Counters for one synthesis cycle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Utterance {
    pub id: u64,
    pub sample_rate: u32,
    pub chunks: u32,
    pub bytes: u64,
}

impl Utterance {
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub fn duration(&self) -> Duration {
        pcm::duration(self.bytes as usize, self.sample_rate)
    }
}

/// How a closed utterance compared with what the sender declared
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Integrity {
    Intact,
    Truncated {
        expected_chunks: u32,
        observed_chunks: u32,
        expected_bytes: u64,
        observed_bytes: u64,
    },
}

/// Tracks the utterance currently receiving audio
///
/// Audio frames carry no id, so chunks are credited to the most recently
/// started utterance.
#[derive(Debug, Default)]
pub struct UtteranceTracker {
    current: Option<Utterance>,
}

impl UtteranceTracker {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn current_id(&self) -> Option<u64> {
        self.current.as_ref().map(|u| u.id)
    }

    #[must_use]
    pub const fn current(&self) -> Option<&Utterance> {
        self.current.as_ref()
    }

    /// Open an utterance, returning the previous one if it was never closed
    pub fn start(&mut self, id: u64, sample_rate: u32) -> Option<Utterance> {
        self.current.replace(Utterance {
            id,
            sample_rate,
            chunks: 0,
            bytes: 0,
        })
    }

    /// Credit one audio frame; `false` when no utterance is open
    pub fn record(&mut self, bytes: usize) -> bool {
        let Some(current) = self.current.as_mut() else {
            return false;
        };
        current.chunks += 1;
        current.bytes += bytes as u64;
        true
    }

    /// Close `id` and hand back its counters
    pub fn finish(&mut self, id: u64) -> Option<Utterance> {
        if self.current_id() == Some(id) {
            self.current.take()
        } else {
            None
        }
    }

    /// Close `id` against the sender's declared totals
    ///
    /// Returns `None` when `id` is not the open utterance.
    pub fn verify(&mut self, id: u64, expected_chunks: u32, expected_bytes: u64) -> Option<Integrity> {
        let observed = self.finish(id)?;
        if observed.chunks == expected_chunks && observed.bytes == expected_bytes {
            return Some(Integrity::Intact);
        }
        Some(Integrity::Truncated {
            expected_chunks,
            observed_chunks: observed.chunks,
            expected_bytes,
            observed_bytes: observed.bytes,
        })
    }
}
