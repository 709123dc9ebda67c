use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use super::Synth;
use crate::error::AudioInitError;

/// Something that can run a `Synth` on its own rendering thread.
pub trait AudioBackend {
    fn name(&self) -> &str;

    /// Takes ownership of the synth and starts pulling samples from it.
    /// Only returns `Ok` once output is actually running.
    fn start(&mut self, synth: Synth) -> Result<(), AudioInitError>;

    /// Stops rendering and drops the synth. Safe to call when not running.
    fn stop(&mut self);
}

/// Default output device through cpal.
#[derive(Default)]
pub struct CpalBackend {
    stream: Option<cpal::Stream>,
}

impl CpalBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl AudioBackend for CpalBackend {
    fn name(&self) -> &str {
        "cpal"
    }

    fn start(&mut self, mut synth: Synth) -> Result<(), AudioInitError> {
        if self.stream.is_some() {
            return Ok(());
        }

        let host = cpal::default_host();
        let device = host
            .default_output_device()
            .ok_or(AudioInitError::NoDevice)?;
        let supported_config = device
            .default_output_config()
            .map_err(|e| AudioInitError::Config(e.to_string()))?;
        let stream_config: cpal::StreamConfig = supported_config.into();

        let num_channels = stream_config.channels as usize;
        synth.prepare(stream_config.sample_rate);
        tracing::info!(
            channels = num_channels,
            sample_rate = stream_config.sample_rate,
            "audio output"
        );

        let bank = synth.bank().clone();
        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _: &cpal::OutputCallbackInfo| {
                    synth.render(data, num_channels);
                },
                move |err| bank.record_stream_error(err.to_string()),
                None,
            )
            .map_err(|e| AudioInitError::Stream(e.to_string()))?;

        stream
            .play()
            .map_err(|e| AudioInitError::NotRunning(e.to_string()))?;

        self.stream = Some(stream);
        Ok(())
    }

    fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.pause();
        }
    }
}

/// Renders into a scratch buffer at real-time pace and throws the samples
/// away. Used for `--silent` runs and in tests.
pub struct SilentBackend {
    sample_rate: u32,
    block: usize,
    running: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl SilentBackend {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate: sample_rate.max(1),
            block: 256,
            running: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }
}

impl Default for SilentBackend {
    fn default() -> Self {
        Self::new(44_100)
    }
}

impl AudioBackend for SilentBackend {
    fn name(&self) -> &str {
        "silent"
    }

    fn start(&mut self, mut synth: Synth) -> Result<(), AudioInitError> {
        if self.handle.is_some() {
            return Ok(());
        }

        synth.prepare(self.sample_rate);
        self.running.store(true, Ordering::Release);

        let running = self.running.clone();
        let block = self.block;
        let period = Duration::from_secs_f64(block as f64 / self.sample_rate as f64);

        let handle = std::thread::Builder::new()
            .name("silent-audio".into())
            .spawn(move || {
                let mut buffer = vec![0.0_f32; block];
                let mut deadline = Instant::now();
                while running.load(Ordering::Acquire) {
                    synth.render(&mut buffer, 1);
                    deadline += period;
                    let now = Instant::now();
                    if deadline > now {
                        std::thread::sleep(deadline - now);
                    }
                }
            })
            .map_err(|e| AudioInitError::Stream(e.to_string()))?;

        self.handle = Some(handle);
        Ok(())
    }

    fn stop(&mut self) {
        self.running.store(false, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for SilentBackend {
    fn drop(&mut self) {
        self.stop();
    }
}
