//! MIDI file playback on a small built-in synthesizer.
//!
//! A [`PlaybackController`] loads a standard MIDI file, flattens its notes
//! into a time-sorted schedule and plays it against a transport clock. The
//! audio backend is only touched on the first `play()`.

pub mod audio;
pub mod config;
pub mod controller;
pub mod engine;
pub mod error;
pub mod midi;
pub mod progress;
pub mod timing;

pub use config::PlayerConfig;
pub use controller::{LoadSummary, PlaybackController, PlaybackSnapshot, PlaybackState};
pub use engine::{EngineCommand, EngineHandle, EngineUpdate, spawn_engine, spawn_engine_with};
pub use error::{AudioInitError, ConfigError, Error, LoadError, PlaybackError, ScheduleError};
pub use midi::{MidiBytes, MidiFile, MidiSource, MidiSummary, ResourceInfo, probe};
