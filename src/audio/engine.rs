use parking_lot::Mutex;
use ringbuf::traits::{Producer, Split};
use ringbuf::{HeapCons, HeapProd, HeapRb};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};

use super::{AudioBackend, NoteSink, Synth, VoiceEvent, VoiceFamily};
use crate::config::PlayerConfig;
use crate::error::{AudioInitError, PlaybackError};
use crate::midi::Pitch;

/// Control-side handle to one running synth.
///
/// Scheduled parts push notes through it; the backend's render thread reads
/// the clock and gain fields it publishes.
pub struct VoiceBank {
    families: Arc<[VoiceFamily]>,
    producer: Mutex<HeapProd<VoiceEvent>>,
    epoch: AtomicU64,
    /// f32 bits
    volume: AtomicU32,
    muted: AtomicBool,
    sample_clock: AtomicU64,
    sample_rate: AtomicU32,
    disposed: AtomicBool,
    stream_error: Mutex<Option<String>>,
    triggered: Arc<AtomicU64>,
}

impl VoiceBank {
    pub fn new(
        families: Arc<[VoiceFamily]>,
        capacity: usize,
        triggered: Arc<AtomicU64>,
    ) -> (Self, HeapCons<VoiceEvent>) {
        let ring_buffer = HeapRb::<VoiceEvent>::new(capacity.max(1));
        let (producer, consumer) = ring_buffer.split();

        let bank = Self {
            families,
            producer: Mutex::new(producer),
            epoch: AtomicU64::new(0),
            volume: AtomicU32::new(1.0_f32.to_bits()),
            muted: AtomicBool::new(false),
            sample_clock: AtomicU64::new(0),
            sample_rate: AtomicU32::new(44_100),
            disposed: AtomicBool::new(false),
            stream_error: Mutex::new(None),
            triggered,
        };
        (bank, consumer)
    }

    pub fn families(&self) -> Arc<[VoiceFamily]> {
        self.families.clone()
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    pub fn sample_clock(&self) -> u64 {
        self.sample_clock.load(Ordering::Acquire)
    }

    pub(super) fn advance_clock(&self, frames: u64) {
        self.sample_clock.fetch_add(frames, Ordering::Release);
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate.load(Ordering::Acquire)
    }

    pub(super) fn set_sample_rate(&self, sample_rate: u32) {
        self.sample_rate.store(sample_rate, Ordering::Release);
    }

    pub fn volume(&self) -> f32 {
        f32::from_bits(self.volume.load(Ordering::Relaxed))
    }

    pub fn set_volume(&self, volume: f32) {
        self.volume
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn is_muted(&self) -> bool {
        self.muted.load(Ordering::Relaxed)
    }

    pub fn set_muted(&self, muted: bool) {
        self.muted.store(muted, Ordering::Relaxed);
    }

    /// Master gain the renderer multiplies every family's mix by.
    pub fn output_gain(&self) -> f32 {
        if self.is_muted() { 0.0 } else { self.volume() }
    }

    /// Drop every queued note and cut every sounding voice. Takes effect at
    /// the next render block.
    pub fn silence(&self) {
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }

    pub fn dispose(&self) {
        self.disposed.store(true, Ordering::Release);
        self.silence();
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed.load(Ordering::Acquire)
    }

    /// Called from the backend's error callback.
    pub fn record_stream_error(&self, message: String) {
        tracing::error!(error = %message, "audio stream error");
        let mut slot = self.stream_error.lock();
        if slot.is_none() {
            *slot = Some(message);
        }
    }
}

impl NoteSink for VoiceBank {
    fn current_time(&self) -> f64 {
        self.sample_clock() as f64 / self.sample_rate().max(1) as f64
    }

    fn voice_count(&self) -> usize {
        self.families.len()
    }

    fn trigger_note(
        &self,
        family: usize,
        pitch: Pitch,
        duration: f64,
        time: f64,
        velocity: f32,
    ) -> Result<(), PlaybackError> {
        // A part still draining after teardown lands here
        if self.is_disposed() {
            return Ok(());
        }
        if let Some(message) = self.stream_error.lock().clone() {
            return Err(PlaybackError::StreamFailed(message));
        }

        let rate = self.sample_rate() as f64;
        let event = VoiceEvent {
            epoch: self.epoch(),
            start: (time.max(0.0) * rate).round() as u64,
            length: (duration.max(0.0) * rate).round() as u64,
            family: family % self.families.len().max(1),
            pitch,
            velocity: velocity.clamp(0.0, 1.0),
        };

        self.producer
            .lock()
            .try_push(event)
            .map_err(|_| PlaybackError::QueueFull)?;
        self.triggered.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}

/// Owns the audio backend and, once initialized, the voice bank feeding it.
///
/// Nothing touches the output device until `initialize`.
pub struct AudioEngine {
    backend: Box<dyn AudioBackend>,
    families: Arc<[VoiceFamily]>,
    bank: Option<Arc<VoiceBank>>,
    queue_capacity: usize,
    polyphony: usize,
    volume: f32,
    muted: bool,
    triggered_total: Arc<AtomicU64>,
}

impl AudioEngine {
    pub fn new(backend: Box<dyn AudioBackend>, config: &PlayerConfig) -> Self {
        Self {
            backend,
            families: config.voice_families.clone().into(),
            bank: None,
            queue_capacity: config.queue_capacity,
            polyphony: config.polyphony,
            volume: config.initial_volume.clamp(0.0, 1.0),
            muted: false,
            triggered_total: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Bring the backend to a running state. Calling it again once running
    /// does nothing.
    pub fn initialize(&mut self) -> Result<(), AudioInitError> {
        if self.bank.is_some() {
            return Ok(());
        }

        let (bank, consumer) = VoiceBank::new(
            self.families.clone(),
            self.queue_capacity,
            self.triggered_total.clone(),
        );
        bank.set_volume(self.volume);
        bank.set_muted(self.muted);
        let bank = Arc::new(bank);

        let synth = Synth::new(bank.clone(), consumer, self.polyphony);
        if let Err(e) = self.backend.start(synth) {
            tracing::warn!(
                backend = self.backend.name(),
                error = %e,
                "audio backend failed to start"
            );
            return Err(e);
        }

        tracing::info!(
            backend = self.backend.name(),
            sample_rate = bank.sample_rate(),
            families = self.families.len(),
            "audio engine initialized"
        );
        self.bank = Some(bank);
        Ok(())
    }

    pub fn is_initialized(&self) -> bool {
        self.bank.is_some()
    }

    pub fn sink(&self) -> Option<Arc<dyn NoteSink>> {
        self.bank
            .as_ref()
            .map(|bank| bank.clone() as Arc<dyn NoteSink>)
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    pub fn set_volume(&mut self, volume: f32) {
        self.volume = if volume.is_finite() {
            volume.clamp(0.0, 1.0)
        } else {
            0.0
        };
        if let Some(bank) = &self.bank {
            bank.set_volume(self.volume);
        }
    }

    pub fn is_muted(&self) -> bool {
        self.muted
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.muted = muted;
        if let Some(bank) = &self.bank {
            bank.set_muted(muted);
        }
    }

    /// Before `initialize` or after `dispose` this drops the note.
    pub fn trigger_note(
        &self,
        family: usize,
        pitch: Pitch,
        duration: f64,
        time: f64,
        velocity: f32,
    ) -> Result<(), PlaybackError> {
        match &self.bank {
            Some(bank) => bank.trigger_note(family, pitch, duration, time, velocity),
            None => Ok(()),
        }
    }

    pub fn silence(&self) {
        if let Some(bank) = &self.bank {
            bank.silence();
        }
    }

    /// Notes accepted across every bank this engine has run.
    pub fn triggered_notes(&self) -> u64 {
        self.triggered_total.load(Ordering::Relaxed)
    }

    pub fn dispose(&mut self) {
        if let Some(bank) = self.bank.take() {
            bank.dispose();
            self.backend.stop();
            tracing::debug!(backend = self.backend.name(), "audio engine disposed");
        }
    }
}

impl Drop for AudioEngine {
    fn drop(&mut self) {
        self.dispose();
    }
}
