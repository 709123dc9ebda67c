#![allow(dead_code)]

use midly::num::{u4, u7, u15, u28};
use midly::{Format, Header, MetaMessage, MidiMessage, Smf, Timing, TrackEvent, TrackEventKind};
use std::path::{Path, PathBuf};

/// Ticks per quarter note in every fixture. At the default 120 BPM one tick
/// is 1/960 s.
pub const PPQ: u16 = 480;
pub const TICKS_PER_SECOND: f64 = 960.0;

/// `(start, duration, key)` in seconds at the default tempo.
pub type FixtureNote = (f64, f64, u8);

fn to_ticks(seconds: f64) -> u64 {
    (seconds * TICKS_PER_SECOND).round() as u64
}

fn track_events(name: Option<&'static str>, notes: &[FixtureNote]) -> Vec<TrackEvent<'static>> {
    // (tick, is_on, key); offs sort before ons on the same tick
    let mut edges: Vec<(u64, bool, u8)> = Vec::with_capacity(notes.len() * 2);
    for &(start, duration, key) in notes {
        edges.push((to_ticks(start), true, key));
        edges.push((to_ticks(start + duration), false, key));
    }
    edges.sort_by_key(|&(tick, on, _)| (tick, on));

    let mut events = Vec::with_capacity(edges.len() + 2);
    if let Some(name) = name {
        events.push(TrackEvent {
            delta: u28::from(0),
            kind: TrackEventKind::Meta(MetaMessage::TrackName(name.as_bytes())),
        });
    }

    let mut last = 0;
    for (tick, on, key) in edges {
        let message = if on {
            MidiMessage::NoteOn {
                key: u7::from(key),
                vel: u7::from(100),
            }
        } else {
            MidiMessage::NoteOff {
                key: u7::from(key),
                vel: u7::from(0),
            }
        };
        events.push(TrackEvent {
            delta: u28::from((tick - last) as u32),
            kind: TrackEventKind::Midi {
                channel: u4::from(0),
                message,
            },
        });
        last = tick;
    }

    events.push(TrackEvent {
        delta: u28::from(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });
    events
}

/// A format 1 file with one MIDI track per entry of `tracks`.
pub fn smf_bytes(name: Option<&'static str>, tracks: &[&[FixtureNote]]) -> Vec<u8> {
    let mut smf = Smf::new(Header::new(
        Format::Parallel,
        Timing::Metrical(u15::from(PPQ)),
    ));
    smf.tracks = tracks
        .iter()
        .enumerate()
        .map(|(i, notes)| track_events(if i == 0 { name } else { None }, notes))
        .collect();

    let mut bytes = Vec::new();
    smf.write_std(&mut bytes).expect("fixture encodes");
    bytes
}

pub fn write_midi(dir: &Path, file_name: &str, tracks: &[&[FixtureNote]]) -> PathBuf {
    let path = dir.join(file_name);
    std::fs::write(&path, smf_bytes(None, tracks)).expect("fixture written");
    path
}

/// `count` short notes, one every `spacing` seconds, on a single track.
pub fn evenly_spaced(count: usize, spacing: f64) -> Vec<FixtureNote> {
    (0..count)
        .map(|i| (i as f64 * spacing, spacing / 2.0, 60 + (i % 12) as u8))
        .collect()
}
