use std::collections::{HashMap, VecDeque};

use midly::{MetaMessage, MidiMessage, Smf, TrackEventKind};
use serde::Serialize;
use tracing::{debug, warn};

use super::{MidiFile, MidiSource, Note, Pitch, TempoMap, Track, instrument_label};
use crate::error::LoadError;

/// What metadata-only loading extracts. Enough to show a duration before
/// anything has touched the audio device.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MidiSummary {
    pub name: String,
    /// Playable seconds: latest note end minus earliest note start
    pub duration: f64,
    pub track_count: usize,
    pub note_count: usize,
}

fn decode<'a>(label: &str, bytes: &'a [u8]) -> Result<Smf<'a>, LoadError> {
    if bytes.is_empty() {
        return Err(LoadError::Empty(label.to_string()));
    }
    Smf::parse(bytes).map_err(|source| LoadError::Malformed {
        label: label.to_string(),
        source,
    })
}

/// Decode a complete file into tracks of notes.
pub fn parse(label: &str, bytes: &[u8]) -> Result<MidiFile, LoadError> {
    let smf = decode(label, bytes)?;
    let tempo_map = TempoMap::from_smf(&smf);

    let mut tracks = Vec::with_capacity(smf.tracks.len());
    for (index, events) in smf.tracks.iter().enumerate() {
        tracks.push(parse_track(index, events, &tempo_map));
    }

    let name = tracks
        .first()
        .and_then(|t: &Track| t.name.clone())
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| label.to_string());

    let mut file = MidiFile::from_tracks(name, tracks);
    file.tempo_map = Some(tempo_map);

    debug!(
        label,
        tracks = file.track_count(),
        notes = file.note_count(),
        duration = file.duration,
        "parsed MIDI file"
    );
    Ok(file)
}

/// Metadata-only load.
pub fn probe(source: &dyn MidiSource) -> Result<MidiSummary, LoadError> {
    let bytes = source.read_bytes()?;
    probe_bytes(&source.label(), &bytes)
}

pub fn probe_bytes(label: &str, bytes: &[u8]) -> Result<MidiSummary, LoadError> {
    let smf = decode(label, bytes)?;
    let tempo_map = TempoMap::from_smf(&smf);

    let mut name: Option<String> = None;
    let mut first_tick: Option<u64> = None;
    let mut last_tick: u64 = 0;
    let mut note_count = 0;

    for (index, events) in smf.tracks.iter().enumerate() {
        let mut open: HashMap<(u8, u8), u32> = HashMap::new();
        let mut tick: u64 = 0;

        for event in events {
            tick += event.delta.as_int() as u64;
            match event.kind {
                TrackEventKind::Meta(MetaMessage::TrackName(raw)) if index == 0 => {
                    name = Some(String::from_utf8_lossy(raw).into_owned());
                }
                TrackEventKind::Midi { channel, message } => {
                    let Some((key, on)) = note_edge(message) else {
                        continue;
                    };
                    let slot = open.entry((channel.as_int(), key)).or_default();
                    if on {
                        *slot += 1;
                        note_count += 1;
                        first_tick = Some(first_tick.map_or(tick, |t| t.min(tick)));
                    } else if *slot > 0 {
                        *slot -= 1;
                        last_tick = last_tick.max(tick);
                    }
                }
                _ => {}
            }
        }

        if open.values().any(|n| *n > 0) {
            last_tick = last_tick.max(tick);
        }
    }

    let duration = match first_tick {
        Some(first) => (tempo_map.seconds_at(last_tick) - tempo_map.seconds_at(first)).max(0.0),
        None => 0.0,
    };

    Ok(MidiSummary {
        name: name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| label.to_string()),
        duration,
        track_count: smf.tracks.len(),
        note_count,
    })
}

/// `Some((key, true))` for a sounding NoteOn, `Some((key, false))` for
/// anything that ends a note.
fn note_edge(message: MidiMessage) -> Option<(u8, bool)> {
    match message {
        MidiMessage::NoteOn { key, vel } => Some((key.as_int(), vel.as_int() > 0)),
        MidiMessage::NoteOff { key, .. } => Some((key.as_int(), false)),
        _ => None,
    }
}

fn parse_track(index: usize, events: &[midly::TrackEvent<'_>], tempo_map: &TempoMap) -> Track {
    let mut name: Option<String> = None;
    let mut channel: Option<u8> = None;
    let mut program: Option<u8> = None;
    let mut notes: Vec<Note> = Vec::new();
    // Same key struck twice before release: first on, first off
    let mut active: HashMap<(u8, u8), VecDeque<(u64, u8)>> = HashMap::new();
    let mut tick: u64 = 0;

    let close = |start_tick: u64, end_tick: u64, key: u8, vel: u8, notes: &mut Vec<Note>| {
        let time = tempo_map.seconds_at(start_tick);
        let duration = (tempo_map.seconds_at(end_tick) - time).max(0.0);
        notes.push(Note {
            pitch: Pitch(key),
            time,
            duration,
            velocity: vel as f32 / 127.0,
        });
    };

    for event in events {
        tick += event.delta.as_int() as u64;

        match event.kind {
            TrackEventKind::Meta(MetaMessage::TrackName(raw)) => {
                name = Some(String::from_utf8_lossy(raw).into_owned());
            }
            TrackEventKind::Midi {
                channel: ch,
                message,
            } => {
                let ch = ch.as_int();
                if let MidiMessage::ProgramChange { program: p } = message {
                    program.get_or_insert(p.as_int());
                }
                let Some((key, on)) = note_edge(message) else {
                    continue;
                };
                channel.get_or_insert(ch);

                if on {
                    let vel = match message {
                        MidiMessage::NoteOn { vel, .. } => vel.as_int(),
                        _ => 0,
                    };
                    active.entry((ch, key)).or_default().push_back((tick, vel));
                } else if let Some((start, vel)) =
                    active.get_mut(&(ch, key)).and_then(VecDeque::pop_front)
                {
                    close(start, tick, key, vel, &mut notes);
                }
            }
            _ => {}
        }
    }

    let mut dangling = 0;
    for ((_, key), starts) in active {
        for (start, vel) in starts {
            close(start, tick, key, vel, &mut notes);
            dangling += 1;
        }
    }
    if dangling > 0 {
        warn!(track = index, dangling, "closed notes still sounding at end of track");
    }

    notes.sort_by(|a, b| a.time.total_cmp(&b.time).then(a.pitch.cmp(&b.pitch)));

    Track {
        index,
        name,
        instrument: instrument_label(channel, program),
        channel,
        notes,
    }
}
