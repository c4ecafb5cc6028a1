//! Procedural radio cues bracketing each spoken reply

use std::f32::consts::TAU;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::Source;

const SEED: u64 = 0x5049_5457;

/// Open cue, close cue and ambience bed rendered at one sample rate
#[derive(Clone)]
pub struct Cues {
    sample_rate: u32,
    open: Arc<[f32]>,
    close: Arc<[f32]>,
    ambience: Arc<[f32]>,
}

impl Cues {
    /// Render every cue for `sample_rate`; identical input gives identical audio
    #[must_use]
    pub fn new(sample_rate: u32) -> Self {
        let mut rng = StdRng::seed_from_u64(SEED);
        Self {
            sample_rate,
            open: open_cue(sample_rate, &mut rng).into(),
            close: close_cue(sample_rate, &mut rng).into(),
            ambience: hiss(sample_rate, 1.0, &mut rng).into(),
        }
    }

    #[must_use]
    pub fn open(&self) -> Source {
        Source::shared(Arc::clone(&self.open), self.sample_rate)
    }

    #[must_use]
    pub fn close(&self) -> Source {
        Source::shared(Arc::clone(&self.close), self.sample_rate)
    }

    /// Loopable hiss, at unit gain
    #[must_use]
    pub fn ambience(&self) -> Source {
        Source::shared(Arc::clone(&self.ambience), self.sample_rate).looped()
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn samples_for(sample_rate: u32, seconds: f32) -> usize {
    (sample_rate as f32 * seconds) as usize
}

/// Sine sweep from `from` to `to` Hz with a raised-cosine envelope
#[allow(clippy::cast_precision_loss)]
fn chirp(sample_rate: u32, seconds: f32, from: f32, to: f32, gain: f32) -> Vec<f32> {
    let n = samples_for(sample_rate, seconds);
    let rate = sample_rate as f32;
    let mut phase = 0.0_f32;
    (0..n)
        .map(|i| {
            let t = i as f32 / n.max(1) as f32;
            let freq = from + (to - from) * t;
            phase = (phase + TAU * freq / rate) % TAU;
            let envelope = 0.5 - 0.5 * (TAU * t).cos();
            phase.sin() * envelope * gain
        })
        .collect()
}

/// One-pole low-passed white noise
fn hiss(sample_rate: u32, seconds: f32, rng: &mut StdRng) -> Vec<f32> {
    let n = samples_for(sample_rate, seconds);
    let mut state = 0.0_f32;
    (0..n)
        .map(|_| {
            let white: f32 = rng.gen_range(-1.0..1.0);
            state += 0.35 * (white - state);
            state
        })
        .collect()
}

/// Short click: a few milliseconds of decaying noise
#[allow(clippy::cast_precision_loss)]
fn click(sample_rate: u32, rng: &mut StdRng) -> Vec<f32> {
    let n = samples_for(sample_rate, 0.004);
    (0..n)
        .map(|i| {
            let decay = 1.0 - i as f32 / n.max(1) as f32;
            rng.gen_range(-1.0_f32..1.0) * decay * 0.5
        })
        .collect()
}

fn open_cue(sample_rate: u32, rng: &mut StdRng) -> Vec<f32> {
    let mut cue = click(sample_rate, rng);
    cue.extend(chirp(sample_rate, 0.06, 1_200.0, 1_800.0, 0.25));
    cue
}

#[allow(clippy::cast_precision_loss)]
fn close_cue(sample_rate: u32, rng: &mut StdRng) -> Vec<f32> {
    let mut cue = chirp(sample_rate, 0.06, 1_800.0, 1_100.0, 0.25);
    let tail = hiss(sample_rate, 0.09, rng);
    let len = tail.len().max(1) as f32;
    cue.extend(
        tail.iter()
            .enumerate()
            .map(|(i, s)| s * 0.3 * (1.0 - i as f32 / len)),
    );
    cue
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cues_are_deterministic() {
        let a = Cues::new(24_000);
        let b = Cues::new(24_000);
        assert_eq!(a.open().samples(), b.open().samples());
        assert_eq!(a.ambience().samples(), b.ambience().samples());
    }

    #[test]
    fn cues_fit_inside_lead_in_and_stay_quiet() {
        let cues = Cues::new(24_000);
        let open = cues.open();
        assert!(open.duration() < std::time::Duration::from_millis(80));
        for source in [open, cues.close(), cues.ambience()] {
            assert!(source.samples().iter().all(|s| s.abs() <= 1.0));
        }
        assert!(cues.ambience().is_looping());
    }
}
