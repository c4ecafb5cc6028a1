//! Sample-accurate software mixer

use std::time::Duration;

use super::{AudioOutput, Source, SourceId, resample_linear};

struct Voice {
    id: SourceId,
    samples: std::sync::Arc<[f32]>,
    gain: f32,
    looping: bool,
    /// Output frame at which sample 0 plays
    start: u64,
    /// Output frame where a fade-out began, and its length
    fade: Option<(u64, u64)>,
}

impl Voice {
    fn finished(&self, frame: u64) -> bool {
        if let Some((from, len)) = self.fade {
            if frame >= from + len {
                return true;
            }
        }
        !self.looping && frame >= self.start + self.samples.len() as u64
    }

    #[allow(clippy::cast_precision_loss)]
    fn sample_at(&self, frame: u64) -> f32 {
        if frame < self.start || self.samples.is_empty() {
            return 0.0;
        }
        let offset = frame - self.start;
        let len = self.samples.len() as u64;
        let index = if self.looping { offset % len } else { offset };
        let Some(&sample) = usize::try_from(index).ok().and_then(|i| self.samples.get(i)) else {
            return 0.0;
        };

        let fade = match self.fade {
            Some((from, len)) if frame >= from => {
                let done = (frame - from) as f32 / len.max(1) as f32;
                (1.0 - done).max(0.0)
            }
            _ => 1.0,
        };
        sample * self.gain * fade
    }
}

struct Ramp {
    from: f32,
    to: f32,
    start: u64,
    len: u64,
}

/// Renders scheduled sources into interleaved output frames
///
/// Time is measured in output frames rendered so far, so [`Mixer::now`]
/// advances only as the device (or a test) pulls audio.
pub struct Mixer {
    sample_rate: u32,
    frame: u64,
    voices: Vec<Voice>,
    next_id: u64,
    gain: f32,
    ramp: Option<Ramp>,
}

impl Mixer {
    #[must_use]
    pub const fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            frame: 0,
            voices: Vec::new(),
            next_id: 0,
            gain: 1.0,
            ramp: None,
        }
    }

    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    fn frames(&self, at: Duration) -> u64 {
        (at.as_secs_f64() * f64::from(self.sample_rate)).round() as u64
    }

    #[allow(clippy::cast_precision_loss)]
    fn master_gain(&mut self) -> f32 {
        let Some(ramp) = &self.ramp else {
            return self.gain;
        };
        let elapsed = self.frame.saturating_sub(ramp.start);
        if elapsed >= ramp.len {
            self.gain = ramp.to;
            self.ramp = None;
            return self.gain;
        }
        let t = elapsed as f32 / ramp.len as f32;
        ramp.from + (ramp.to - ramp.from) * t
    }

    /// Fill `out` with interleaved frames, duplicating mono to every channel
    pub fn render(&mut self, out: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        for frame in out.chunks_mut(channels) {
            let gain = self.master_gain();
            let now = self.frame;
            let mixed: f32 = self.voices.iter().map(|v| v.sample_at(now)).sum();
            let sample = (mixed * gain).clamp(-1.0, 1.0);
            frame.fill(sample);
            self.frame += 1;
        }
        let now = self.frame;
        self.voices.retain(|v| !v.finished(now));
    }

    /// Number of sources still scheduled or sounding
    #[must_use]
    pub fn active(&self) -> usize {
        self.voices.len()
    }

    #[must_use]
    pub fn gain(&self) -> f32 {
        self.gain
    }
}

impl AudioOutput for Mixer {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[allow(clippy::cast_precision_loss)]
    fn now(&self) -> Duration {
        Duration::from_secs_f64(self.frame as f64 / f64::from(self.sample_rate))
    }

    fn schedule(&mut self, source: Source, at: Duration) -> SourceId {
        let id = SourceId(self.next_id);
        self.next_id += 1;

        let samples = if source.sample_rate == self.sample_rate {
            source.samples
        } else {
            resample_linear(&source.samples, source.sample_rate, self.sample_rate).into()
        };

        self.voices.push(Voice {
            id,
            samples,
            gain: source.gain,
            looping: source.looping,
            start: self.frames(at).max(self.frame),
            fade: None,
        });
        id
    }

    fn stop(&mut self, id: SourceId, fade: Duration) {
        let len = self.frames(fade);
        let now = self.frame;
        if len == 0 {
            self.voices.retain(|v| v.id != id);
            return;
        }
        if let Some(voice) = self.voices.iter_mut().find(|v| v.id == id) {
            voice.fade = Some((now, len));
        }
    }

    fn stop_all(&mut self) {
        self.voices.clear();
    }

    fn set_gain(&mut self, gain: f32) {
        self.ramp = None;
        self.gain = gain;
    }

    fn ramp_gain(&mut self, target: f32, over: Duration) {
        let from = self.master_gain();
        self.gain = from;
        self.ramp = Some(Ramp {
            from,
            to: target,
            start: self.frame,
            len: self.frames(over).max(1),
        });
    }
}

#[cfg(test)]
#[allow(clippy::float_cmp)]
mod tests {
    use super::*;

    fn constant(value: f32, len: usize, sample_rate: u32) -> Source {
        Source::new(vec![value; len], sample_rate)
    }

    fn render(mixer: &mut Mixer, frames: usize) -> Vec<f32> {
        let mut out = vec![0.0; frames];
        mixer.render(&mut out, 1);
        out
    }

    #[test]
    fn back_to_back_sources_leave_no_gap() {
        let mut mixer = Mixer::new(1000);
        mixer.schedule(constant(0.5, 10, 1000), Duration::from_millis(5));
        mixer.schedule(constant(0.25, 10, 1000), Duration::from_millis(15));

        let out = render(&mut mixer, 30);
        assert!(out[..5].iter().all(|&s| s == 0.0));
        assert!(out[5..15].iter().all(|&s| s == 0.5));
        assert!(out[15..25].iter().all(|&s| s == 0.25));
        assert!(out[25..].iter().all(|&s| s == 0.0));
        assert_eq!(mixer.active(), 0);
    }

    #[test]
    fn late_sources_start_immediately() {
        let mut mixer = Mixer::new(1000);
        render(&mut mixer, 20);
        mixer.schedule(constant(0.5, 4, 1000), Duration::ZERO);
        let out = render(&mut mixer, 4);
        assert_eq!(out, vec![0.5; 4]);
    }

    #[test]
    fn looping_source_repeats_until_stopped() {
        let mut mixer = Mixer::new(1000);
        let id = mixer.schedule(
            Source::new(vec![0.1, 0.2], 1000).looped(),
            Duration::ZERO,
        );
        let out = render(&mut mixer, 6);
        assert_eq!(out, vec![0.1, 0.2, 0.1, 0.2, 0.1, 0.2]);

        mixer.stop(id, Duration::ZERO);
        assert_eq!(mixer.active(), 0);
    }

    #[test]
    fn fade_out_ramps_source_to_silence() {
        let mut mixer = Mixer::new(1000);
        let id = mixer.schedule(constant(1.0, 100, 1000).looped(), Duration::ZERO);
        render(&mut mixer, 10);
        mixer.stop(id, Duration::from_millis(10));

        let out = render(&mut mixer, 12);
        assert!((out[0] - 1.0).abs() < f32::EPSILON);
        assert!(out.windows(2).take(10).all(|w| w[1] <= w[0]));
        assert!(out[10..].iter().all(|&s| s == 0.0));
        assert_eq!(mixer.active(), 0);
    }

    #[test]
    fn master_ramp_reaches_target() {
        let mut mixer = Mixer::new(1000);
        mixer.schedule(constant(1.0, 100, 1000), Duration::ZERO);
        mixer.ramp_gain(0.0, Duration::from_millis(20));

        let out = render(&mut mixer, 30);
        assert!(out[10] < out[0]);
        assert!(out[20..].iter().all(|&s| s == 0.0));
        assert!(mixer.gain().abs() < f32::EPSILON);
    }

    #[test]
    fn foreign_rate_is_resampled() {
        let mut mixer = Mixer::new(48_000);
        mixer.schedule(constant(0.5, 240, 24_000), Duration::ZERO);
        let out = render(&mut mixer, 600);
        let sounding = out.iter().filter(|&&s| s != 0.0).count();
        assert_eq!(sounding, 480);
    }

    #[test]
    fn stereo_duplicates_mono() {
        let mut mixer = Mixer::new(1000);
        mixer.schedule(Source::new(vec![0.3, 0.6], 1000), Duration::ZERO);
        let mut out = vec![0.0; 4];
        mixer.render(&mut out, 2);
        assert_eq!(out, vec![0.3, 0.3, 0.6, 0.6]);
    }
}
