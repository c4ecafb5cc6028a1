//! Energy-based voice activity detection on the capture path
//!
//! Used by the driver client to talk over the engineer in continuous-mic
//! mode. Voice is a run of loud frames long enough to be speech rather than
//! a click or a kerb strike.

use super::pcm;

/// RMS level above which a frame counts as speech
const ENERGY_THRESHOLD: f32 = 0.03;

/// Continuous speech needed before voice is reported
const MIN_SPEECH_MS: usize = 300;

/// Quiet time that ends a run of speech
const SILENCE_MS: usize = 400;

/// Capture runs at 16 kHz
const SAMPLES_PER_MS: usize = 16;

/// Root mean square level of a block of samples
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    (samples.iter().map(|s| s * s).sum::<f32>() / samples.len() as f32).sqrt()
}

/// Detects speech onsets in 16 kHz mono PCM16 frames
#[derive(Debug, Clone)]
pub struct VoiceDetector {
    threshold: f32,
    min_speech: usize,
    hangover: usize,
    speech: usize,
    silence: usize,
    reported: bool,
}

impl Default for VoiceDetector {
    fn default() -> Self {
        Self::new(ENERGY_THRESHOLD)
    }
}

impl VoiceDetector {
    #[must_use]
    pub fn new(threshold: f32) -> Self {
        Self {
            threshold,
            min_speech: MIN_SPEECH_MS * SAMPLES_PER_MS,
            hangover: SILENCE_MS * SAMPLES_PER_MS,
            speech: 0,
            silence: 0,
            reported: false,
        }
    }

    /// Feed one PCM16 frame; true exactly once per run of speech
    pub fn process(&mut self, frame: &[u8]) -> bool {
        let samples = pcm::decode(frame);
        if rms(&samples) > self.threshold {
            self.speech += samples.len();
            self.silence = 0;
        } else if self.speech > 0 {
            self.silence += samples.len();
            if self.silence >= self.hangover {
                self.reset();
            }
            return false;
        }

        if !self.reported && self.speech >= self.min_speech {
            self.reported = true;
            tracing::debug!(speech_samples = self.speech, "voice detected");
            return true;
        }
        false
    }

    pub fn reset(&mut self) {
        self.speech = 0;
        self.silence = 0;
        self.reported = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 20 ms at 16 kHz
    const FRAME: usize = 320;

    fn frame(level: f32) -> Vec<u8> {
        pcm::encode(&vec![level; FRAME])
    }

    #[test]
    fn rms_levels() {
        assert!(rms(&[]) < f32::EPSILON);
        assert!(rms(&[0.0; 100]) < 0.001);
        assert!((rms(&[0.5; 100]) - 0.5).abs() < 1e-6);
    }

    #[test]
    fn reports_once_after_sustained_speech() {
        let mut vad = VoiceDetector::default();
        let hits: Vec<bool> = (0..30).map(|_| vad.process(&frame(0.2))).collect();

        // 300 ms is the 15th 20 ms frame
        assert_eq!(hits.iter().position(|&h| h), Some(14));
        assert_eq!(hits.iter().filter(|&&h| h).count(), 1);
    }

    #[test]
    fn short_burst_is_not_voice() {
        let mut vad = VoiceDetector::default();
        for _ in 0..5 {
            assert!(!vad.process(&frame(0.5)));
        }
        for _ in 0..30 {
            assert!(!vad.process(&frame(0.0)));
        }
        for _ in 0..5 {
            assert!(!vad.process(&frame(0.5)));
        }
    }

    #[test]
    fn silence_rearms_detection() {
        let mut vad = VoiceDetector::default();
        assert!((0..15).any(|_| vad.process(&frame(0.2))));
        for _ in 0..20 {
            vad.process(&frame(0.0));
        }
        assert!((0..15).any(|_| vad.process(&frame(0.2))));
    }

    #[test]
    fn brief_pause_keeps_the_run() {
        let mut vad = VoiceDetector::default();
        for _ in 0..10 {
            vad.process(&frame(0.2));
        }
        for _ in 0..5 {
            vad.process(&frame(0.0));
        }
        // 200 ms before the pause plus 100 ms after
        let hits: Vec<bool> = (0..5).map(|_| vad.process(&frame(0.2))).collect();
        assert_eq!(hits, vec![false, false, false, false, true]);
    }
}
