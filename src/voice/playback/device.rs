//! Speaker output through cpal

use std::sync::mpsc as std_mpsc;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::JoinHandle;
use std::time::Duration;

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};

use super::mixer::Mixer;
use super::{AudioOutput, Source, SourceId};
use crate::{Error, Result};

/// [`AudioOutput`] backed by the default output device
///
/// The cpal stream lives on its own thread; the device callback pulls frames
/// from a shared [`Mixer`], which also serves as the audio clock.
pub struct DeviceOutput {
    mixer: Arc<Mutex<Mixer>>,
    sample_rate: u32,
    shutdown: Option<std_mpsc::Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl DeviceOutput {
    /// Open the default output device
    ///
    /// # Errors
    ///
    /// Returns error if no output device is available or the stream fails
    pub fn open() -> Result<Self> {
        let (ready_tx, ready_rx) = std_mpsc::channel();
        let (shutdown_tx, shutdown_rx) = std_mpsc::channel::<()>();

        let thread = std::thread::Builder::new()
            .name("pitwall-output".to_string())
            .spawn(move || match build_stream() {
                Ok((stream, sample_rate, mixer)) => {
                    let _ = ready_tx.send(Ok((sample_rate, mixer)));
                    // Park until the owner goes away
                    let _ = shutdown_rx.recv();
                    drop(stream);
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                }
            })?;

        let (sample_rate, mixer) = ready_rx
            .recv()
            .map_err(|_| Error::Audio("output thread exited during setup".to_string()))??;

        Ok(Self {
            mixer,
            sample_rate,
            shutdown: Some(shutdown_tx),
            thread: Some(thread),
        })
    }

    fn mixer(&self) -> MutexGuard<'_, Mixer> {
        self.mixer.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Sources still scheduled or sounding
    #[must_use]
    pub fn active(&self) -> usize {
        self.mixer().active()
    }
}

fn build_stream() -> Result<(Stream, u32, Arc<Mutex<Mixer>>)> {
    let host = cpal::default_host();
    let device = host
        .default_output_device()
        .ok_or_else(|| Error::Audio("no output device available".to_string()))?;

    let supported = device
        .default_output_config()
        .map_err(|e| Error::Audio(e.to_string()))?;
    let sample_rate = supported.sample_rate().0;
    let config: StreamConfig = supported.config();
    let channels = usize::from(config.channels);

    tracing::debug!(
        device = device.name().unwrap_or_default(),
        sample_rate,
        channels,
        "audio output initialized"
    );

    let mixer = Arc::new(Mutex::new(Mixer::new(sample_rate)));
    let callback_mixer = Arc::clone(&mixer);

    let stream = device
        .build_output_stream(
            &config,
            move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                callback_mixer
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .render(data, channels);
            },
            |err| {
                tracing::error!(error = %err, "audio output error");
            },
            None,
        )
        .map_err(|e| Error::Audio(e.to_string()))?;

    stream.play().map_err(|e| Error::Audio(e.to_string()))?;
    Ok((stream, sample_rate, mixer))
}

impl AudioOutput for DeviceOutput {
    fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    fn now(&self) -> Duration {
        self.mixer().now()
    }

    fn schedule(&mut self, source: Source, at: Duration) -> SourceId {
        self.mixer().schedule(source, at)
    }

    fn stop(&mut self, id: SourceId, fade: Duration) {
        self.mixer().stop(id, fade);
    }

    fn stop_all(&mut self) {
        self.mixer().stop_all();
    }

    fn set_gain(&mut self, gain: f32) {
        self.mixer().set_gain(gain);
    }

    fn ramp_gain(&mut self, target: f32, over: Duration) {
        self.mixer().ramp_gain(target, over);
    }
}

impl Drop for DeviceOutput {
    fn drop(&mut self) {
        drop(self.shutdown.take());
        if let Some(thread) = self.thread.take() {
            let _ = thread.join();
        }
        tracing::debug!("audio output closed");
    }
}
