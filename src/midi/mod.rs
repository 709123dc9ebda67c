//! MIDI file decoding
//!
//! Turns a standard MIDI file into immutable tracks of notes with times in
//! seconds. Tempo changes are resolved here so nothing downstream has to
//! know about ticks.

mod parser;
mod source;
mod tempo;

use serde::Serialize;
use std::fmt;

pub use parser::{MidiSummary, parse, probe, probe_bytes};
pub use source::{MidiBytes, MidiSource, ResourceInfo};
pub use tempo::{DEFAULT_US_PER_QUARTER, TempoChange, TempoMap};

use crate::error::LoadError;

const NOTE_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// General MIDI program families, eight programs each.
const GM_FAMILIES: [&str; 16] = [
    "Piano",
    "Chromatic Percussion",
    "Organ",
    "Guitar",
    "Bass",
    "Strings",
    "Ensemble",
    "Brass",
    "Reed",
    "Pipe",
    "Synth Lead",
    "Synth Pad",
    "Synth Effects",
    "Ethnic",
    "Percussive",
    "Sound Effects",
];

pub const DRUM_CHANNEL: u8 = 9;

/// A MIDI key number. Displays as scientific pitch, key 60 being "C4".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct Pitch(pub u8);

impl Pitch {
    pub fn key(self) -> u8 {
        self.0
    }

    pub fn name(self) -> &'static str {
        NOTE_NAMES[(self.0 % 12) as usize]
    }

    pub fn octave(self) -> i8 {
        (self.0 / 12) as i8 - 1
    }

    pub fn frequency(self) -> f32 {
        crate::audio::midi_to_freq(self.0)
    }
}

impl fmt::Display for Pitch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.name(), self.octave())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Note {
    pub pitch: Pitch,
    /// Seconds from the start of the file
    pub time: f64,
    /// Seconds
    pub duration: f64,
    /// 0.0 -> 1.0
    pub velocity: f32,
}

impl Note {
    pub fn new(key: u8, time: f64, duration: f64, velocity: f32) -> Self {
        Self {
            pitch: Pitch(key),
            time,
            duration,
            velocity,
        }
    }

    pub fn end(&self) -> f64 {
        self.time + self.duration
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Track {
    pub index: usize,
    pub name: Option<String>,
    pub instrument: String,
    pub channel: Option<u8>,
    /// Sorted by start time
    pub notes: Vec<Note>,
}

impl Track {
    pub fn new(index: usize, notes: Vec<Note>) -> Self {
        Self {
            index,
            name: None,
            instrument: GM_FAMILIES[0].to_string(),
            channel: None,
            notes,
        }
    }

    pub fn end(&self) -> f64 {
        self.notes.iter().map(Note::end).fold(0.0, f64::max)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct MidiFile {
    pub name: String,
    /// Latest note end, file-relative seconds
    pub duration: f64,
    pub tracks: Vec<Track>,
    pub tempo_map: Option<TempoMap>,
}

impl MidiFile {
    pub fn load(source: &dyn MidiSource) -> Result<Self, LoadError> {
        let bytes = source.read_bytes()?;
        parse(&source.label(), &bytes)
    }

    pub fn from_tracks(name: impl Into<String>, tracks: Vec<Track>) -> Self {
        let duration = tracks.iter().map(Track::end).fold(0.0, f64::max);
        Self {
            name: name.into(),
            duration,
            tracks,
            tempo_map: None,
        }
    }

    pub fn track_count(&self) -> usize {
        self.tracks.len()
    }

    pub fn note_count(&self) -> usize {
        self.tracks.iter().map(|t| t.notes.len()).sum()
    }

    /// Earliest note start across every track
    pub fn first_note_time(&self) -> Option<f64> {
        self.tracks
            .iter()
            .flat_map(|t| t.notes.iter())
            .map(|n| n.time)
            .min_by(f64::total_cmp)
    }
}

pub fn instrument_label(channel: Option<u8>, program: Option<u8>) -> String {
    if channel == Some(DRUM_CHANNEL) {
        return "Drums".to_string();
    }
    let family = program.map_or(0, |p| (p as usize / 8).min(GM_FAMILIES.len() - 1));
    GM_FAMILIES[family].to_string()
}
