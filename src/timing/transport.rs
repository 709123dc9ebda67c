use parking_lot::Mutex;
use serde::Serialize;
use std::time::Instant;

/// Transport state (running/paused/stopped)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportState {
    #[default]
    Stopped,
    Running,
    Paused,
}

impl TransportState {
    pub fn is_running(&self) -> bool {
        matches!(self, TransportState::Running)
    }
}

#[derive(Debug)]
struct Clock {
    state: TransportState,
    /// Position when the clock last changed state
    offset: f64,
    /// Wall-clock instant `offset` was taken at, while running
    anchor: Option<Instant>,
    duration: f64,
}

impl Clock {
    fn position_at(&self, now: Instant) -> f64 {
        let elapsed = match (self.state, self.anchor) {
            (TransportState::Running, Some(anchor)) => {
                now.saturating_duration_since(anchor).as_secs_f64()
            }
            _ => 0.0,
        };
        (self.offset + elapsed).clamp(0.0, self.duration)
    }
}

/// Authoritative playback position in seconds, bounded to `[0, duration]`.
///
/// Shared between the controller, the scheduled part and the progress
/// reporter.
#[derive(Debug)]
pub struct Transport {
    clock: Mutex<Clock>,
}

impl Transport {
    pub fn new() -> Self {
        Self {
            clock: Mutex::new(Clock {
                state: TransportState::Stopped,
                offset: 0.0,
                anchor: None,
                duration: 0.0,
            }),
        }
    }

    pub fn state(&self) -> TransportState {
        self.clock.lock().state
    }

    pub fn is_running(&self) -> bool {
        self.state().is_running()
    }

    pub fn duration(&self) -> f64 {
        self.clock.lock().duration
    }

    /// Also stops the clock: a new duration means a new session.
    pub fn set_duration(&self, duration: f64) {
        let mut clock = self.clock.lock();
        clock.duration = duration.max(0.0);
        clock.state = TransportState::Stopped;
        clock.offset = 0.0;
        clock.anchor = None;
    }

    pub fn position(&self) -> f64 {
        self.clock.lock().position_at(Instant::now())
    }

    /// Reached the end while running
    pub fn is_finished(&self) -> bool {
        let clock = self.clock.lock();
        clock.state.is_running() && clock.position_at(Instant::now()) >= clock.duration
    }

    /// Start running from `from`, whatever the current state.
    pub fn start(&self, from: f64) {
        let mut clock = self.clock.lock();
        clock.offset = from.clamp(0.0, clock.duration);
        clock.anchor = Some(Instant::now());
        clock.state = TransportState::Running;
    }

    /// Freeze the position. Returns it.
    pub fn pause(&self) -> f64 {
        let mut clock = self.clock.lock();
        let position = clock.position_at(Instant::now());
        if clock.state.is_running() {
            clock.offset = position;
            clock.anchor = None;
            clock.state = TransportState::Paused;
        }
        position
    }

    pub fn resume(&self) {
        let mut clock = self.clock.lock();
        if clock.state == TransportState::Paused {
            clock.anchor = Some(Instant::now());
            clock.state = TransportState::Running;
        }
    }

    /// Back to 0 from any state.
    pub fn stop(&self) {
        let mut clock = self.clock.lock();
        clock.state = TransportState::Stopped;
        clock.offset = 0.0;
        clock.anchor = None;
    }

    /// Move to `time` keeping the current state. Returns the clamped position.
    pub fn seek(&self, time: f64) -> f64 {
        let mut clock = self.clock.lock();
        let target = if time.is_finite() { time } else { 0.0 };
        clock.offset = target.clamp(0.0, clock.duration);
        if clock.state.is_running() {
            clock.anchor = Some(Instant::now());
        }
        clock.offset
    }
}

impl Default for Transport {
    fn default() -> Self {
        Self::new()
    }
}
