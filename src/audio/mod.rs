mod backend;
mod engine;
mod instrument;
mod synth;
mod voice;

pub use backend::{AudioBackend, CpalBackend, SilentBackend};
pub use engine::{AudioEngine, VoiceBank};
pub use instrument::{VoiceFamily, Wave, db_to_gain, default_voice_families};
pub use synth::{Synth, VoiceEvent};
pub use voice::{ADSRConfig, EnvelopeState, Voice};

use crate::error::PlaybackError;
use crate::midi::Pitch;

pub fn midi_to_freq(note: u8) -> f32 {
    440.0 * 2.0_f32.powf((note as f32 - 69.0) / 12.0)
}

/// Where a scheduled part sends its notes.
pub trait NoteSink: Send + Sync {
    /// Seconds on the sink's own clock. `trigger_note` times are on it too.
    fn current_time(&self) -> f64;

    fn voice_count(&self) -> usize;

    fn trigger_note(
        &self,
        family: usize,
        pitch: Pitch,
        duration: f64,
        time: f64,
        velocity: f32,
    ) -> Result<(), PlaybackError>;
}
