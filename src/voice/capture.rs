//! Microphone capture to 16 kHz mono PCM16

use std::sync::mpsc as std_mpsc;
use std::thread::JoinHandle;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleRate, Stream, StreamConfig};
use rubato::{FftFixedIn, Resampler};
use tokio::sync::mpsc;

use crate::voice::pcm;
use crate::{Error, Result};

/// Sample rate the gateway expects for mic audio
pub const SAMPLE_RATE: u32 = 16_000;

/// Input frames per resampler pass
const RESAMPLE_CHUNK: usize = 1024;

/// Downmixes device frames to mono and resamples them to [`SAMPLE_RATE`]
pub struct MonoConverter {
    channels: usize,
    resampler: Option<FftFixedIn<f32>>,
    pending: Vec<f32>,
}

impl MonoConverter {
    /// # Errors
    ///
    /// Returns error if the resampler cannot be built for `input_rate`
    pub fn new(input_rate: u32, channels: u16) -> Result<Self> {
        let resampler = if input_rate == SAMPLE_RATE {
            None
        } else {
            Some(
                FftFixedIn::<f32>::new(
                    input_rate as usize,
                    SAMPLE_RATE as usize,
                    RESAMPLE_CHUNK,
                    2,
                    1,
                )
                .map_err(|e| Error::Audio(format!("resampler init failed: {e}")))?,
            )
        };

        Ok(Self {
            channels: usize::from(channels.max(1)),
            resampler,
            pending: Vec::new(),
        })
    }

    /// Convert interleaved device samples into PCM16 LE bytes
    ///
    /// Resampled input is processed in fixed blocks, so output may lag input
    /// by up to one block.
    #[allow(clippy::cast_precision_loss)]
    pub fn push(&mut self, interleaved: &[f32]) -> Vec<u8> {
        let channels = self.channels;
        let mono = interleaved
            .chunks(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32);

        let Some(resampler) = self.resampler.as_mut() else {
            return pcm::encode(&mono.collect::<Vec<_>>());
        };

        self.pending.extend(mono);
        let mut out = Vec::new();
        loop {
            let needed = resampler.input_frames_next();
            if self.pending.len() < needed {
                break;
            }
            let block: Vec<f32> = self.pending.drain(..needed).collect();
            match resampler.process(&[block], None) {
                Ok(mut result) => out.append(&mut result[0]),
                Err(e) => {
                    tracing::warn!(error = %e, "resample failed, dropping block");
                }
            }
        }
        pcm::encode(&out)
    }
}

/// Streams microphone PCM to a channel until dropped
pub struct MicCapture {
    device_rate: u32,
    shutdown: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl MicCapture {
    /// Start capturing from the default input device
    ///
    /// Each device callback yields one frame of 16 kHz mono PCM16 LE on
    /// `frames`.
    ///
    /// # Errors
    ///
    /// Returns error if no input device is available or the stream fails
    pub fn start(frames: mpsc::UnboundedSender<Vec<u8>>) -> Result<Self> {
        let (ready_tx, ready_rx) = std_mpsc::channel();
        let (shutdown_tx, shutdown_rx) = std_mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("pitwall-capture".to_string())
            .spawn(move || match build_stream(frames) {
                Ok((stream, rate)) => {
                    let _ = ready_tx.send(Ok(rate));
                    let _ = shutdown_rx.recv();
                    drop(stream);
                    tracing::debug!("audio capture stopped");
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })?;

        let device_rate = ready_rx
            .recv()
            .map_err(|_| Error::Audio("capture thread exited during setup".to_string()))??;

        Ok(Self {
            device_rate,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    /// Native rate of the capture device
    #[must_use]
    pub const fn device_rate(&self) -> u32 {
        self.device_rate
    }
}

impl Drop for MicCapture {
    fn drop(&mut self) {
        drop(self.shutdown.take());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
    }
}

/// Prefer a mono 16 kHz config; otherwise take the device default
fn input_config(device: &cpal::Device) -> Result<StreamConfig> {
    let native = device
        .supported_input_configs()
        .map_err(|e| Error::Audio(e.to_string()))?
        .find(|c| {
            c.channels() == 1
                && c.min_sample_rate() <= SampleRate(SAMPLE_RATE)
                && c.max_sample_rate() >= SampleRate(SAMPLE_RATE)
        });

    if let Some(supported) = native {
        return Ok(supported.with_sample_rate(SampleRate(SAMPLE_RATE)).config());
    }

    device
        .default_input_config()
        .map(|c| c.config())
        .map_err(|e| Error::Audio(e.to_string()))
}

fn build_stream(frames: mpsc::UnboundedSender<Vec<u8>>) -> Result<(Stream, u32)> {
    let host = cpal::default_host();
    let device = host
        .default_input_device()
        .ok_or_else(|| Error::Audio("no input device available".to_string()))?;

    let config = input_config(&device)?;
    let rate = config.sample_rate.0;
    let mut converter = MonoConverter::new(rate, config.channels)?;

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate = rate,
        channels = config.channels,
        resampling = rate != SAMPLE_RATE,
        "audio capture initialized"
    );

    let stream = device
        .build_input_stream(
            &config,
            move |data: &[f32], _: &cpal::InputCallbackInfo| {
                let bytes = converter.push(data);
                if !bytes.is_empty() {
                    let _ = frames.send(bytes);
                }
            },
            |err| {
                tracing::error!(error = %err, "audio capture error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    Ok((stream, rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn native_rate_passes_through() {
        let mut c = MonoConverter::new(SAMPLE_RATE, 1).unwrap();
        let bytes = c.push(&[0.0, 0.5, -0.5]);
        assert_eq!(bytes.len(), 6);
    }

    #[test]
    fn stereo_is_downmixed() {
        let mut c = MonoConverter::new(SAMPLE_RATE, 2).unwrap();
        let bytes = c.push(&[0.5, -0.5, 1.0, 1.0]);
        assert_eq!(pcm::decode(&bytes).len(), 2);
        assert!(pcm::decode(&bytes)[0].abs() < 1e-3);
    }

    #[test]
    fn high_rate_is_resampled_in_blocks() {
        let mut c = MonoConverter::new(48_000, 1).unwrap();
        assert!(c.push(&[0.0; 512]).is_empty());

        let bytes = c.push(&[0.0; 48_000]);
        let samples = bytes.len() / 2;
        // one second in at 48 kHz, roughly a third as many samples out
        assert!((14_000..=17_000).contains(&samples), "{samples}");
    }
}
