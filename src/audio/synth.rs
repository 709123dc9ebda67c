use ringbuf::HeapCons;
use ringbuf::traits::{Consumer, Observer};
use std::sync::Arc;

use super::{Voice, VoiceBank, VoiceFamily};
use crate::midi::Pitch;

/// A note handed from the control side to the render side.
#[derive(Debug, Clone, Copy)]
pub struct VoiceEvent {
    /// Bank epoch at queue time. Events from an older epoch are dropped.
    pub epoch: u64,
    /// Sample counter value to start at
    pub start: u64,
    /// Samples until release
    pub length: u64,
    pub family: usize,
    pub pitch: Pitch,
    pub velocity: f32,
}

/// The render side of a voice bank. Lives on the backend's audio thread.
pub struct Synth {
    bank: Arc<VoiceBank>,
    consumer: HeapCons<VoiceEvent>,
    families: Arc<[VoiceFamily]>,
    family_gains: Vec<f32>,
    /// Popped but not started yet, sorted by start
    pending: Vec<VoiceEvent>,
    voices: Vec<Voice>,
    polyphony: usize,
    sample_rate: f32,
    seen_epoch: u64,
}

impl Synth {
    pub fn new(bank: Arc<VoiceBank>, consumer: HeapCons<VoiceEvent>, polyphony: usize) -> Self {
        let families = bank.families();
        let family_gains = families.iter().map(VoiceFamily::gain).collect();
        let polyphony = polyphony.max(1);
        Self {
            seen_epoch: bank.epoch(),
            bank,
            pending: Vec::with_capacity(consumer.capacity().get()),
            consumer,
            families,
            family_gains,
            voices: Vec::with_capacity(polyphony),
            polyphony,
            sample_rate: 44_100.0,
        }
    }

    pub fn bank(&self) -> &Arc<VoiceBank> {
        &self.bank
    }

    /// Called by the backend once the output rate is known, before the
    /// first `render`.
    pub fn prepare(&mut self, sample_rate: u32) {
        self.sample_rate = sample_rate.max(1) as f32;
        self.bank.set_sample_rate(sample_rate.max(1));
    }

    pub fn active_voices(&self) -> usize {
        self.voices.len()
    }

    /// Fill an interleaved buffer and advance the bank's sample clock.
    pub fn render(&mut self, data: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let num_frames = data.len() / channels;
        let clock = self.bank.sample_clock();

        let epoch = self.bank.epoch();
        if epoch != self.seen_epoch {
            self.voices.clear();
            self.pending.clear();
            self.seen_epoch = epoch;
        }

        let mut received = false;
        while let Some(event) = self.consumer.try_pop() {
            if event.epoch == epoch && self.pending.len() < self.pending.capacity() {
                self.pending.push(event);
                received = true;
            }
        }
        if received {
            self.pending.sort_unstable_by_key(|e| e.start);
        }

        let master = self.bank.output_gain();
        data.fill(0.0);

        let mut next_event = 0;
        for frame in 0..num_frames {
            let now = clock + frame as u64;

            while let Some(event) = self.pending.get(next_event) {
                if event.start > now {
                    break;
                }
                let event = *event;
                self.start_voice(&event, now);
                next_event += 1;
            }

            let mut mixed = 0.0;
            for voice in &mut self.voices {
                let Some(family) = self.families.get(voice.family) else {
                    continue;
                };
                mixed += voice.next_sample(family.wave, &family.adsr, self.sample_rate, now)
                    * self.family_gains[voice.family];
            }

            let out = (mixed * master).clamp(-1.0, 1.0);
            for sample in &mut data[frame * channels..(frame + 1) * channels] {
                *sample = out;
            }
        }

        self.pending.drain(..next_event);
        self.voices.retain(|v| !v.is_done());
        self.bank.advance_clock(num_frames as u64);
    }

    fn start_voice(&mut self, event: &VoiceEvent, now: u64) {
        if self.voices.len() >= self.polyphony {
            if let Some(oldest) = self
                .voices
                .iter()
                .enumerate()
                .min_by_key(|(_, v)| v.started_at)
                .map(|(i, _)| i)
            {
                self.voices.swap_remove(oldest);
            }
        }
        let family = event.family.min(self.families.len().saturating_sub(1));
        self.voices.push(Voice::new(
            family,
            event.pitch.frequency(),
            event.velocity,
            now,
            event.start.saturating_add(event.length.max(1)),
        ));
    }
}
