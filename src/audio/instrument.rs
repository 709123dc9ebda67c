use serde::{Deserialize, Serialize};

use super::ADSRConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Wave {
    Sine,
    Triangle,
    Square,
    Saw,
}

impl Wave {
    /// One sample at `phase` in [0, 1)
    pub fn sample(self, phase: f32) -> f32 {
        match self {
            Wave::Sine => (phase * 2.0 * std::f32::consts::PI).sin(),
            Wave::Triangle => 1.0 - 4.0 * (phase - 0.5).abs(),
            Wave::Square => {
                if phase < 0.5 {
                    -1.0
                } else {
                    1.0
                }
            }
            Wave::Saw => phase * 2.0 - 1.0,
        }
    }
}

/// A synthesizer preset. Tracks are spread over the families by
/// `track % families.len()`, which is a timbral hint, not General MIDI.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VoiceFamily {
    pub name: String,
    pub wave: Wave,
    pub adsr: ADSRConfig,
    /// Relative level in dB, 0.0 for the loudest family
    pub gain_db: f32,
}

impl VoiceFamily {
    pub fn gain(&self) -> f32 {
        db_to_gain(self.gain_db)
    }
}

const fn adsr(attack: f32, decay: f32, sustain: f32, release: f32) -> ADSRConfig {
    ADSRConfig {
        attack,
        decay,
        sustain,
        release,
    }
}

/// Each family after the first sits a couple of dB lower.
const DEFAULT_FAMILIES: [(&str, Wave, ADSRConfig, f32); 4] = [
    ("triangle", Wave::Triangle, adsr(0.005, 0.1, 0.3, 1.0), 0.0),
    ("sine", Wave::Sine, adsr(0.01, 0.2, 0.5, 0.8), -2.0),
    ("square", Wave::Square, adsr(0.01, 0.15, 0.4, 0.5), -4.0),
    ("saw", Wave::Saw, adsr(0.02, 0.2, 0.4, 0.6), -6.0),
];

pub fn default_voice_families() -> Vec<VoiceFamily> {
    DEFAULT_FAMILIES
        .iter()
        .map(|(name, wave, adsr, gain_db)| VoiceFamily {
            name: name.to_string(),
            wave: *wave,
            adsr: *adsr,
            gain_db: *gain_db,
        })
        .collect()
}

pub fn db_to_gain(db: f32) -> f32 {
    10.0_f32.powf(db / 20.0)
}
