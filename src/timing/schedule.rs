use serde::Serialize;
use tracing::warn;

use crate::error::ScheduleError;
use crate::midi::{MidiFile, Pitch};

pub const DEFAULT_MAX_EVENTS: usize = 10_000;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ScheduledEvent {
    /// Seconds, shifted so the earliest note of the file is at 0
    pub time: f64,
    pub pitch: Pitch,
    pub duration: f64,
    pub velocity: f32,
    pub track: usize,
}

/// Every note of a file, flattened into one time-ordered list.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Schedule {
    pub events: Vec<ScheduledEvent>,
    /// Start time of the earliest note in the file (`T0`)
    pub offset: f64,
    /// Latest note end minus `offset`
    pub duration: f64,
    pub truncated: bool,
    pub discarded: usize,
}

impl Schedule {
    pub fn build(file: &MidiFile, max_events: usize) -> Result<Self, ScheduleError> {
        let mut events: Vec<ScheduledEvent> = Vec::with_capacity(file.note_count());
        let mut offset = f64::INFINITY;
        let mut end: f64 = 0.0;

        for track in &file.tracks {
            for (index, note) in track.notes.iter().enumerate() {
                if !note.time.is_finite() || !note.duration.is_finite() {
                    return Err(ScheduleError::NonFiniteTime {
                        track: track.index,
                        index,
                        time: note.time,
                    });
                }
                offset = offset.min(note.time);
                end = end.max(note.end());
                events.push(ScheduledEvent {
                    time: note.time,
                    pitch: note.pitch,
                    duration: note.duration.max(0.0),
                    velocity: note.velocity.clamp(0.0, 1.0),
                    track: track.index,
                });
            }
        }

        if events.is_empty() {
            return Ok(Schedule::default());
        }

        for event in &mut events {
            event.time -= offset;
        }

        // Stable: equal times keep track order, then the track's own order
        events.sort_by(|a, b| a.time.total_cmp(&b.time).then(a.track.cmp(&b.track)));

        let discarded = events.len().saturating_sub(max_events);
        if discarded > 0 {
            warn!(
                kept = max_events,
                discarded, "schedule exceeds the event cap, dropping the latest notes"
            );
            events.truncate(max_events);
        }

        Ok(Schedule {
            events,
            offset,
            duration: (end - offset).max(0.0),
            truncated: discarded > 0,
            discarded,
        })
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    /// Index of the first event at or after `time`
    pub fn first_index_at(&self, time: f64) -> usize {
        self.events.partition_point(|e| e.time < time)
    }
}
