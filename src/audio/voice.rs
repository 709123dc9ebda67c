use serde::{Deserialize, Serialize};

use super::Wave;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ADSRConfig {
    /// Seconds
    pub attack: f32,
    /// Seconds
    pub decay: f32,
    /// 0.0 -> 1.0
    pub sustain: f32,
    /// Seconds
    pub release: f32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EnvelopeState {
    Attack { time: f32 },
    Decay { time: f32 },
    Sustain,
    Release { time: f32, from: f32 },
    Done,
}

/// One sounding note.
#[derive(Debug, Clone)]
pub struct Voice {
    pub family: usize,
    pub freq: f32,
    pub velocity: f32,
    pub phase: f32,
    pub envelope_state: EnvelopeState,
    pub envelope_level: f32,
    /// Sample counter value at note on
    pub started_at: u64,
    /// Sample counter value the release phase begins at
    pub release_at: u64,
}

impl Voice {
    pub fn new(family: usize, freq: f32, velocity: f32, started_at: u64, release_at: u64) -> Self {
        Self {
            family,
            freq,
            velocity,
            phase: 0.0,
            envelope_state: EnvelopeState::Attack { time: 0.0 },
            envelope_level: 0.0,
            started_at,
            release_at,
        }
    }

    pub fn release(&mut self) {
        if !matches!(
            self.envelope_state,
            EnvelopeState::Release { .. } | EnvelopeState::Done
        ) {
            self.envelope_state = EnvelopeState::Release {
                time: 0.0,
                from: self.envelope_level,
            };
        }
    }

    pub fn is_done(&self) -> bool {
        self.envelope_state == EnvelopeState::Done
    }

    /// Render one sample and advance oscillator and envelope. `clock` is the
    /// sample counter value for this sample.
    pub fn next_sample(
        &mut self,
        wave: Wave,
        adsr: &ADSRConfig,
        sample_rate: f32,
        clock: u64,
    ) -> f32 {
        if clock >= self.release_at {
            self.release();
        }

        let level = calculate_envelope(self, adsr);
        let sample = wave.sample(self.phase) * level * self.velocity;

        self.phase += self.freq / sample_rate;
        if self.phase >= 1.0 {
            self.phase -= self.phase.floor();
        }
        advance_envelope(self, adsr, 1.0 / sample_rate);

        sample
    }
}

pub fn calculate_envelope(voice: &Voice, adsr: &ADSRConfig) -> f32 {
    match voice.envelope_state {
        EnvelopeState::Attack { time } => {
            if adsr.attack == 0.0 {
                1.0
            } else {
                (time / adsr.attack).min(1.0)
            }
        }
        EnvelopeState::Decay { time } => {
            let decay_progress = if adsr.decay == 0.0 {
                1.0
            } else {
                (time / adsr.decay).min(1.0)
            };
            1.0 - (1.0 - adsr.sustain) * decay_progress
        }
        EnvelopeState::Sustain => adsr.sustain,
        EnvelopeState::Release { time, from } => {
            let release_progress = if adsr.release == 0.0 {
                1.0
            } else {
                (time / adsr.release).min(1.0)
            };
            from * (1.0 - release_progress)
        }
        EnvelopeState::Done => 0.0,
    }
}

pub fn advance_envelope(voice: &mut Voice, adsr: &ADSRConfig, dt: f32) {
    match &mut voice.envelope_state {
        EnvelopeState::Attack { time } => {
            *time += dt;
            if *time >= adsr.attack {
                voice.envelope_state = EnvelopeState::Decay { time: 0.0 };
                voice.envelope_level = 1.0;
            } else {
                voice.envelope_level = calculate_envelope(voice, adsr);
            }
        }
        EnvelopeState::Decay { time } => {
            *time += dt;
            if *time >= adsr.decay {
                voice.envelope_state = EnvelopeState::Sustain;
                voice.envelope_level = adsr.sustain;
            } else {
                voice.envelope_level = calculate_envelope(voice, adsr);
            }
        }
        EnvelopeState::Sustain => {
            voice.envelope_level = adsr.sustain;
        }
        EnvelopeState::Release { time, .. } => {
            *time += dt;
            if *time >= adsr.release {
                voice.envelope_state = EnvelopeState::Done;
                voice.envelope_level = 0.0;
            } else {
                voice.envelope_level = calculate_envelope(voice, adsr);
            }
        }
        EnvelopeState::Done => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: f32 = 1000.0;

    fn adsr() -> ADSRConfig {
        ADSRConfig {
            attack: 0.01,
            decay: 0.01,
            sustain: 0.5,
            release: 0.02,
        }
    }

    #[test]
    fn test_envelope_walks_through_phases() {
        let adsr = adsr();
        let mut voice = Voice::new(0, 100.0, 1.0, 0, 100);

        for clock in 0..30 {
            voice.next_sample(Wave::Sine, &adsr, SR, clock);
        }
        assert_eq!(voice.envelope_state, EnvelopeState::Sustain);
        assert_eq!(voice.envelope_level, 0.5);

        // Scheduled release at sample 100
        for clock in 30..101 {
            voice.next_sample(Wave::Sine, &adsr, SR, clock);
        }
        assert!(matches!(voice.envelope_state, EnvelopeState::Release { from, .. } if from == 0.5));

        for clock in 101..130 {
            voice.next_sample(Wave::Sine, &adsr, SR, clock);
        }
        assert!(voice.is_done());
        assert_eq!(voice.next_sample(Wave::Sine, &adsr, SR, 131), 0.0);
    }

    #[test]
    fn test_early_release_fades_from_current_level() {
        let adsr = adsr();
        let mut voice = Voice::new(0, 100.0, 1.0, 0, u64::MAX);
        for clock in 0..5 {
            voice.next_sample(Wave::Square, &adsr, SR, clock);
        }
        let level = voice.envelope_level;
        assert!(level > 0.0 && level < 1.0);

        voice.release();
        assert_eq!(calculate_envelope(&voice, &adsr), level);
        // Releasing twice does not restart the fade
        voice.next_sample(Wave::Square, &adsr, SR, 6);
        voice.release();
        assert!(calculate_envelope(&voice, &adsr) < level);
    }

    #[test]
    fn test_zero_length_stages() {
        let adsr = ADSRConfig {
            attack: 0.0,
            decay: 0.0,
            sustain: 1.0,
            release: 0.0,
        };
        let mut voice = Voice::new(0, 100.0, 1.0, 0, 3);
        for clock in 0..5 {
            let s = voice.next_sample(Wave::Square, &adsr, SR, clock);
            assert!(s.is_finite());
        }
        assert!(voice.is_done());
    }
}
