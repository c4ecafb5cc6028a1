//! PCM 16-bit little-endian helpers

use std::time::Duration;

/// Bytes per mono 16-bit sample
pub const BYTES_PER_SAMPLE: usize = 2;

/// Decode PCM16 LE into `[-1.0, 1.0)` floats; a trailing odd byte is ignored
#[must_use]
pub fn decode(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(BYTES_PER_SAMPLE)
        .map(|b| f32::from(i16::from_le_bytes([b[0], b[1]])) / 32768.0)
        .collect()
}

/// Encode floats as PCM16 LE, clipping out-of-range samples
#[must_use]
#[allow(clippy::cast_possible_truncation)]
pub fn encode(samples: &[f32]) -> Vec<u8> {
    samples
        .iter()
        .flat_map(|&s| ((s * 32767.0).clamp(-32768.0, 32767.0) as i16).to_le_bytes())
        .collect()
}

/// Playback time of `bytes` of mono PCM16 at `sample_rate`
#[must_use]
pub fn duration(bytes: usize, sample_rate: u32) -> Duration {
    if sample_rate == 0 {
        return Duration::ZERO;
    }
    let samples = (bytes / BYTES_PER_SAMPLE) as u64;
    Duration::from_nanos(samples * 1_000_000_000 / u64::from(sample_rate))
}

/// Duration in whole milliseconds, saturating
#[must_use]
pub fn millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_handles_extremes() {
        let bytes = [0x00, 0x80, 0xff, 0x7f, 0x00, 0x00, 0x01];
        let samples = decode(&bytes);
        assert_eq!(samples.len(), 3);
        assert!((samples[0] + 1.0).abs() < f32::EPSILON);
        assert!(samples[1] > 0.999);
        assert!(samples[2].abs() < f32::EPSILON);
    }

    #[test]
    fn encode_clips() {
        let bytes = encode(&[2.0, -2.0, 0.0]);
        assert_eq!(bytes, vec![0xff, 0x7f, 0x00, 0x80, 0x00, 0x00]);
    }

    #[test]
    fn durations() {
        assert_eq!(duration(48_000, 24_000), Duration::from_secs(1));
        assert_eq!(duration(3_200, 16_000), Duration::from_millis(100));
        assert_eq!(duration(10, 0), Duration::ZERO);
        assert_eq!(millis(Duration::from_micros(1_999)), 1);
    }
}
