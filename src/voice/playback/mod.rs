//! Gapless playback scheduling for streamed TTS audio
//!
//! Chunks are laid end to end on an output clock: each one starts at
//! `max(cursor, now + min_lead)` and pushes the cursor forward by its own
//! length. A burst of speech is bracketed by an open cue, a quiet ambience
//! bed, and a close cue once the cursor has been passed.

mod clock;
mod cues;
mod device;
mod mixer;

use std::sync::Arc;
use std::time::Duration;

pub use clock::{ClockOutput, ScheduledSource};
pub use cues::Cues;
pub use device::DeviceOutput;
pub use mixer::Mixer;

use crate::config::PlaybackConfig;
use crate::voice::pcm;
use crate::{Error, Result};

/// Fade applied to the ambience bed when a burst ends
pub const AMBIENCE_FADE: Duration = Duration::from_millis(120);

/// Handle to a scheduled source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SourceId(u64);

/// Mono audio ready to schedule
#[derive(Debug, Clone)]
pub struct Source {
    samples: Arc<[f32]>,
    sample_rate: u32,
    gain: f32,
    looping: bool,
}

impl Source {
    #[must_use]
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Self {
        Self::shared(samples.into(), sample_rate)
    }

    #[must_use]
    pub const fn shared(samples: Arc<[f32]>, sample_rate: u32) -> Self {
        Self {
            samples,
            sample_rate,
            gain: 1.0,
            looping: false,
        }
    }

    #[must_use]
    pub const fn looped(mut self) -> Self {
        self.looping = true;
        self
    }

    #[must_use]
    pub const fn with_gain(mut self, gain: f32) -> Self {
        self.gain = gain;
        self
    }

    #[must_use]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    #[must_use]
    pub const fn is_looping(&self) -> bool {
        self.looping
    }

    /// Length of one pass through the samples
    #[must_use]
    pub fn duration(&self) -> Duration {
        pcm::duration(self.samples.len() * pcm::BYTES_PER_SAMPLE, self.sample_rate)
    }
}

/// An audio clock plus somewhere to put sources on it
pub trait AudioOutput: Send {
    fn sample_rate(&self) -> u32;

    /// Position of the output clock
    fn now(&self) -> Duration;

    /// Play `source` starting at clock time `at` (or immediately if past)
    fn schedule(&mut self, source: Source, at: Duration) -> SourceId;

    /// Stop one source, fading it out over `fade`
    fn stop(&mut self, id: SourceId, fade: Duration);

    /// Silence everything immediately
    fn stop_all(&mut self);

    fn set_gain(&mut self, gain: f32);

    /// Move the master gain linearly to `target` over `over`
    fn ramp_gain(&mut self, target: f32, over: Duration);
}

/// Linear-interpolation resampler for mono audio
#[must_use]
#[allow(
    clippy::cast_possible_truncation,
    clippy::cast_precision_loss,
    clippy::cast_sign_loss
)]
pub fn resample_linear(input: &[f32], from: u32, to: u32) -> Vec<f32> {
    if from == to || from == 0 || to == 0 || input.is_empty() {
        return input.to_vec();
    }

    let out_len = (input.len() as u64 * u64::from(to) + u64::from(from) / 2) / u64::from(from);
    let step = f64::from(from) / f64::from(to);

    (0..out_len)
        .map(|i| {
            let pos = i as f64 * step;
            let index = pos.floor() as usize;
            let frac = (pos - pos.floor()) as f32;
            let a = input.get(index).copied().unwrap_or(0.0);
            let b = input.get(index + 1).copied().unwrap_or(a);
            a + (b - a) * frac
        })
        .collect()
}

/// Playback transitions worth reporting
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackEvent {
    /// First audio of a burst was scheduled
    Started,
    /// Everything scheduled has played (or a fade-out finished)
    Drained,
}

struct Bracket {
    ambience: Option<SourceId>,
}

/// Schedules utterance audio back to back on an [`AudioOutput`]
pub struct PlaybackScheduler<O> {
    output: O,
    min_lead: Duration,
    lead_in: Duration,
    ambience_gain: f32,
    cues: Option<Cues>,
    next_start: Duration,
    bracket: Option<Bracket>,
    fading_until: Option<Duration>,
    rejected_through: Option<u64>,
}

impl<O: AudioOutput> PlaybackScheduler<O> {
    #[must_use]
    pub fn new(output: O, config: &PlaybackConfig) -> Self {
        let cues = config.cues.then(|| Cues::new(output.sample_rate()));
        Self {
            output,
            min_lead: config.min_lead,
            lead_in: config.lead_in,
            ambience_gain: config.ambience_gain,
            cues,
            next_start: Duration::ZERO,
            bracket: None,
            fading_until: None,
            rejected_through: None,
        }
    }

    #[must_use]
    pub const fn output(&self) -> &O {
        &self.output
    }

    /// Where the next chunk would start if it arrived in time
    #[must_use]
    pub const fn next_start(&self) -> Duration {
        self.next_start
    }

    /// Audio is scheduled or sounding, including during a fade-out
    #[must_use]
    pub const fn is_playing(&self) -> bool {
        self.bracket.is_some()
    }

    /// Schedule one chunk of PCM16 LE mono audio
    ///
    /// Returns [`PlaybackEvent::Started`] when this chunk opens a burst.
    /// Chunks of rejected utterances are dropped.
    ///
    /// # Errors
    ///
    /// Returns error if `sample_rate` is zero
    pub fn enqueue(
        &mut self,
        utterance_id: u64,
        data: &[u8],
        sample_rate: u32,
    ) -> Result<Option<PlaybackEvent>> {
        if self.rejected_through.is_some_and(|r| utterance_id <= r) {
            tracing::debug!(utterance_id, "dropping audio for cancelled utterance");
            return Ok(None);
        }
        if sample_rate == 0 {
            return Err(Error::Audio("chunk declared a zero sample rate".to_string()));
        }

        let samples = pcm::decode(data);
        if samples.is_empty() {
            return Ok(None);
        }
        if self.fading_until.is_some() {
            self.finish_fade();
        }

        let now = self.output.now();
        let earliest = now + self.min_lead;
        let mut event = None;

        // Cues bracket a burst, not an utterance: back-to-back utterances
        // share one open cue and ambience bed, and the close cue waits for
        // the drain in `poll`
        if self.bracket.is_none() {
            self.open_bracket(earliest);
            self.next_start = earliest + self.lead_in;
            event = Some(PlaybackEvent::Started);
        } else if self.next_start < earliest {
            tracing::debug!(
                utterance_id,
                late_ms = pcm::millis(earliest - self.next_start),
                "playback underrun, re-anchoring"
            );
        }

        let at = self.next_start.max(earliest);
        let source = Source::new(samples, sample_rate);
        self.next_start = at + source.duration();
        self.output.schedule(source, at);

        Ok(event)
    }

    fn open_bracket(&mut self, at: Duration) {
        let mut ambience = None;
        if let Some(cues) = &self.cues {
            self.output.schedule(cues.open(), at);
            ambience = Some(
                self.output
                    .schedule(cues.ambience().with_gain(self.ambience_gain), at),
            );
        }
        self.bracket = Some(Bracket { ambience });
    }

    fn close_bracket(&mut self) {
        let Some(bracket) = self.bracket.take() else {
            return;
        };
        if let Some(ambience) = bracket.ambience {
            self.output.stop(ambience, AMBIENCE_FADE);
        }
        if let Some(cues) = &self.cues {
            let now = self.output.now();
            self.output.schedule(cues.close(), now);
        }
    }

    /// Check the clock; reports [`PlaybackEvent::Drained`] once per burst
    pub fn poll(&mut self) -> Option<PlaybackEvent> {
        let now = self.output.now();

        if let Some(until) = self.fading_until {
            if now < until {
                return None;
            }
            return self.finish_fade().then_some(PlaybackEvent::Drained);
        }

        if self.bracket.is_some() && now >= self.next_start {
            self.close_bracket();
            return Some(PlaybackEvent::Drained);
        }
        None
    }

    /// Halt everything now and reset the cursor
    pub fn stop(&mut self) {
        self.output.stop_all();
        self.output.set_gain(1.0);
        self.bracket = None;
        self.fading_until = None;
        self.next_start = self.output.now();
    }

    /// Ramp to silence over `duration`, then stop and restore gain
    pub fn fade_out(&mut self, duration: Duration) {
        if self.bracket.is_none() || self.fading_until.is_some() {
            return;
        }
        if duration.is_zero() {
            self.stop();
            return;
        }
        self.output.ramp_gain(0.0, duration);
        self.fading_until = Some(self.output.now() + duration);
    }

    fn finish_fade(&mut self) -> bool {
        let was_playing = self.bracket.is_some();
        self.stop();
        was_playing
    }

    /// Refuse any further audio for this utterance and every earlier one
    pub fn reject(&mut self, utterance_id: u64) {
        self.rejected_through = Some(self.rejected_through.map_or(utterance_id, |r| r.max(utterance_id)));
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    const RATE: u32 = 24_000;

    /// 100 ms of PCM at 24 kHz
    fn chunk() -> Vec<u8> {
        vec![0x10; 4_800]
    }

    fn scheduler(cues: bool) -> PlaybackScheduler<ClockOutput> {
        let config = PlaybackConfig {
            cues,
            ..PlaybackConfig::default()
        };
        PlaybackScheduler::new(ClockOutput::new(RATE), &config)
    }

    fn voice_starts(s: &PlaybackScheduler<ClockOutput>) -> Vec<u64> {
        s.output()
            .timeline()
            .iter()
            .filter(|e| e.duration == Duration::from_millis(100))
            .map(|e| pcm::millis(e.at))
            .collect()
    }

    #[tokio::test(start_paused = true)]
    async fn first_chunk_opens_bracket_after_lead_in() {
        let mut s = scheduler(true);
        let event = s.enqueue(1, &chunk(), RATE).unwrap();
        assert_eq!(event, Some(PlaybackEvent::Started));
        assert!(s.is_playing());

        let timeline = s.output().timeline();
        // open cue, ambience, voice
        assert_eq!(timeline.len(), 3);
        assert_eq!(pcm::millis(timeline[0].at), 30);
        assert!(timeline[1].looping);
        assert_eq!(voice_starts(&s), vec![110]);
    }

    #[tokio::test(start_paused = true)]
    async fn back_to_back_utterances_share_one_bracket() {
        let mut s = scheduler(true);
        assert_eq!(
            s.enqueue(1, &chunk(), RATE).unwrap(),
            Some(PlaybackEvent::Started)
        );
        assert_eq!(s.enqueue(2, &chunk(), RATE).unwrap(), None);

        // one open cue and one ambience bed for both voices
        let timeline = s.output().timeline();
        assert_eq!(timeline.len(), 4);
        assert_eq!(timeline.iter().filter(|e| e.looping).count(), 1);
        assert_eq!(voice_starts(&s), vec![110, 210]);
    }

    #[tokio::test(start_paused = true)]
    async fn chunks_are_stitched_without_gaps() {
        let mut s = scheduler(false);
        for id in 1..=3 {
            s.enqueue(id, &chunk(), RATE).unwrap();
            tokio::time::advance(Duration::from_millis(20)).await;
        }
        assert_eq!(voice_starts(&s), vec![110, 210, 310]);
        assert_eq!(pcm::millis(s.next_start()), 410);
    }

    #[tokio::test(start_paused = true)]
    async fn late_chunk_respects_min_lead() {
        let mut s = scheduler(false);
        s.enqueue(1, &chunk(), RATE).unwrap();
        tokio::time::advance(Duration::from_millis(205)).await;
        assert_eq!(s.enqueue(1, &chunk(), RATE).unwrap(), None);
        assert_eq!(voice_starts(&s), vec![110, 235]);
    }

    #[tokio::test(start_paused = true)]
    async fn drains_once_after_cursor_passes() {
        let mut s = scheduler(true);
        s.enqueue(1, &chunk(), RATE).unwrap();
        assert_eq!(s.poll(), None);

        tokio::time::advance(Duration::from_millis(210)).await;
        assert_eq!(s.poll(), Some(PlaybackEvent::Drained));
        assert_eq!(s.poll(), None);
        assert!(!s.is_playing());

        // ambience stopped, close cue scheduled
        assert!(s.output().timeline().iter().all(|e| !e.looping));
        assert_eq!(s.output().timeline().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn fade_out_then_stop_restores_gain() {
        let mut s = scheduler(true);
        s.enqueue(1, &chunk(), RATE).unwrap();
        s.enqueue(2, &chunk(), RATE).unwrap();

        s.fade_out(Duration::from_millis(150));
        assert_eq!(s.output().gain(), 0.0);
        assert!(s.is_playing());
        assert_eq!(s.poll(), None);

        tokio::time::advance(Duration::from_millis(150)).await;
        assert_eq!(s.poll(), Some(PlaybackEvent::Drained));
        assert!(!s.is_playing());
        assert_eq!(s.output().gain(), 1.0);
        assert!(s.output().timeline().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn rejected_utterances_are_refused() {
        let mut s = scheduler(false);
        s.reject(4);
        assert_eq!(s.enqueue(3, &chunk(), RATE).unwrap(), None);
        assert_eq!(s.enqueue(4, &chunk(), RATE).unwrap(), None);
        assert!(s.output().timeline().is_empty());

        assert_eq!(
            s.enqueue(5, &chunk(), RATE).unwrap(),
            Some(PlaybackEvent::Started)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn new_audio_cuts_a_pending_fade() {
        let mut s = scheduler(false);
        s.enqueue(1, &chunk(), RATE).unwrap();
        s.fade_out(Duration::from_millis(150));
        s.reject(1);

        let event = s.enqueue(2, &chunk(), RATE).unwrap();
        assert_eq!(event, Some(PlaybackEvent::Started));
        assert_eq!(s.output().gain(), 1.0);
        assert_eq!(voice_starts(&s), vec![110]);
    }

    #[test]
    fn zero_rate_is_an_error() {
        let mut s = PlaybackScheduler::new(Mixer::new(RATE), &PlaybackConfig::default());
        assert!(s.enqueue(1, &chunk(), 0).is_err());
    }

    #[test]
    fn resample_preserves_level_and_length() {
        let out = resample_linear(&[0.5; 160], 16_000, 48_000);
        assert_eq!(out.len(), 480);
        assert!(out.iter().all(|&s| (s - 0.5).abs() < 1e-6));
        assert_eq!(resample_linear(&[0.1, 0.2], 8_000, 8_000), vec![0.1, 0.2]);
    }
}
