use midly::{MetaMessage, Smf, Timing, TrackEventKind};
use serde::Serialize;

/// 500_000 microseconds per quarter note = 120 BPM
pub const DEFAULT_US_PER_QUARTER: u32 = 500_000;

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TempoChange {
    pub tick: u64,
    pub us_per_quarter: u32,
    /// Seconds elapsed at `tick`
    pub seconds: f64,
}

impl TempoChange {
    pub fn bpm(&self) -> f64 {
        60_000_000.0 / self.us_per_quarter as f64
    }
}

/// Converts absolute ticks to seconds for one file.
#[derive(Debug, Clone, Serialize)]
pub enum TempoMap {
    Metrical {
        ticks_per_quarter: u16,
        changes: Vec<TempoChange>,
    },
    Timecode {
        ticks_per_second: f64,
    },
}

impl TempoMap {
    /// Tempo events are collected from every track: in multi-track files the
    /// conductor track holds them but they apply file-wide.
    pub fn from_smf(smf: &Smf<'_>) -> Self {
        let ticks_per_quarter = match smf.header.timing {
            Timing::Metrical(tpq) => tpq.as_int().max(1),
            Timing::Timecode(fps, ticks_per_frame) => {
                let ticks_per_second = fps.as_f32() as f64 * ticks_per_frame.max(1) as f64;
                return TempoMap::Timecode { ticks_per_second };
            }
        };

        let mut raw: Vec<(u64, u32)> = Vec::new();
        for track in &smf.tracks {
            let mut tick: u64 = 0;
            for event in track {
                tick += event.delta.as_int() as u64;
                if let TrackEventKind::Meta(MetaMessage::Tempo(tempo)) = event.kind {
                    raw.push((tick, tempo.as_int().max(1)));
                }
            }
        }
        raw.sort_by_key(|(tick, _)| *tick);

        if raw.first().is_none_or(|(tick, _)| *tick > 0) {
            raw.insert(0, (0, DEFAULT_US_PER_QUARTER));
        }

        let mut changes: Vec<TempoChange> = Vec::with_capacity(raw.len());
        for (tick, us_per_quarter) in raw {
            let seconds = match changes.last() {
                Some(prev) => {
                    prev.seconds
                        + ticks_to_seconds(tick - prev.tick, prev.us_per_quarter, ticks_per_quarter)
                }
                None => 0.0,
            };
            // A later event on the same tick wins
            match changes.last_mut() {
                Some(prev) if prev.tick == tick => {
                    prev.us_per_quarter = us_per_quarter;
                    continue;
                }
                _ => {}
            }
            changes.push(TempoChange {
                tick,
                us_per_quarter,
                seconds,
            });
        }

        TempoMap::Metrical {
            ticks_per_quarter,
            changes,
        }
    }

    pub fn seconds_at(&self, tick: u64) -> f64 {
        match self {
            TempoMap::Timecode { ticks_per_second } => tick as f64 / ticks_per_second,
            TempoMap::Metrical {
                ticks_per_quarter,
                changes,
            } => {
                let idx = changes.partition_point(|c| c.tick <= tick);
                let Some(change) = idx.checked_sub(1).and_then(|i| changes.get(i)) else {
                    return ticks_to_seconds(tick, DEFAULT_US_PER_QUARTER, *ticks_per_quarter);
                };
                let since = tick - change.tick;
                change.seconds + ticks_to_seconds(since, change.us_per_quarter, *ticks_per_quarter)
            }
        }
    }

    pub fn initial_bpm(&self) -> Option<f64> {
        match self {
            TempoMap::Metrical { changes, .. } => changes.first().map(TempoChange::bpm),
            TempoMap::Timecode { .. } => None,
        }
    }

    pub fn ticks_per_quarter(&self) -> Option<u16> {
        match self {
            TempoMap::Metrical {
                ticks_per_quarter, ..
            } => Some(*ticks_per_quarter),
            TempoMap::Timecode { .. } => None,
        }
    }
}

fn ticks_to_seconds(ticks: u64, us_per_quarter: u32, ticks_per_quarter: u16) -> f64 {
    ticks as f64 / ticks_per_quarter as f64 * (us_per_quarter as f64 / 1_000_000.0)
}
