//! Virtual output that follows the tokio clock
//!
//! Nothing is rendered; the server uses this to know when audio it sent
//! would have finished playing on the client.

use std::time::Duration;

use tokio::time::Instant;

use super::{AudioOutput, Source, SourceId};

/// A source placed on the virtual timeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScheduledSource {
    pub id: SourceId,
    pub at: Duration,
    pub duration: Duration,
    pub looping: bool,
}

impl ScheduledSource {
    #[must_use]
    pub fn end(&self) -> Duration {
        self.at + self.duration
    }
}

/// [`AudioOutput`] with a monotonic clock and no device
pub struct ClockOutput {
    origin: Instant,
    sample_rate: u32,
    next_id: u64,
    gain: f32,
    timeline: Vec<ScheduledSource>,
}

impl ClockOutput {
    #[must_use]
    pub fn new(sample_rate: u32) -> Self {
        Self {
            origin: Instant::now(),
            sample_rate,
            next_id: 0,
            gain: 1.0,
            timeline: Vec::new(),
        }
    }

    /// Sources that have not finished yet
    #[must_use]
    pub fn timeline(&self) -> &[ScheduledSource] {
        &self.timeline
    }

    #[must_use]
    pub const fn gain(&self) -> f32 {
        self.gain
    }
}

impl AudioOutput for ClockOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn schedule(&mut self, source: Source, at: Duration) -> SourceId {
        let now = self.now();
        self.timeline.retain(|s| s.looping || s.end() > now);

        let id = SourceId(self.next_id);
        self.next_id += 1;
        self.timeline.push(ScheduledSource {
            id,
            at: at.max(now),
            duration: source.duration(),
            looping: source.is_looping(),
        });
        id
    }

    fn stop(&mut self, id: SourceId, _fade: Duration) {
        self.timeline.retain(|s| s.id != id);
    }

    fn stop_all(&mut self) {
        self.timeline.clear();
    }

    fn set_gain(&mut self, gain: f32) {
        self.gain = gain;
    }

    fn ramp_gain(&mut self, target: f32, _over: Duration) {
        self.gain = target;
    }
}
