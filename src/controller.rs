use arc_swap::ArcSwap;
use crossbeam::channel::Sender;
use serde::Serialize;
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info, warn};

use crate::audio::{AudioBackend, AudioEngine, NoteSink};
use crate::config::PlayerConfig;
use crate::engine::EngineUpdate;
use crate::error::{AudioInitError, Error};
use crate::midi::{MidiFile, MidiSource, ResourceInfo};
use crate::progress::ProgressReporter;
use crate::timing::{Schedule, ScheduledPart, Transport};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PlaybackState {
    #[default]
    Idle,
    Loading,
    Ready,
    Initializing,
    Playing,
    Paused,
    Stopped,
    Error,
}

impl fmt::Display for PlaybackState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PlaybackState::Idle => "idle",
            PlaybackState::Loading => "loading",
            PlaybackState::Ready => "ready",
            PlaybackState::Initializing => "initializing",
            PlaybackState::Playing => "playing",
            PlaybackState::Paused => "paused",
            PlaybackState::Stopped => "stopped",
            PlaybackState::Error => "error",
        };
        f.pad(name)
    }
}

/// What the host gets to see, on every progress tick and every transition.
#[derive(Debug, Clone, PartialEq, Default, Serialize)]
pub struct PlaybackSnapshot {
    pub state: PlaybackState,
    pub position: f64,
    pub duration: f64,
    pub track_count: usize,
    pub volume: f32,
    pub muted: bool,
    pub truncated: bool,
    pub resource: Option<ResourceInfo>,
    pub error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadSummary {
    pub name: String,
    /// Seconds, measured from the first note
    pub duration: f64,
    pub track_count: usize,
    pub truncated: bool,
}

struct Session {
    file: MidiFile,
    schedule: Arc<Schedule>,
    resource: Option<ResourceInfo>,
}

/// Owns one playback session end to end: the loaded file, the audio engine,
/// the transport, and at most one scheduled part and progress reporter.
///
/// Every method runs on the owning thread. `dispose` (or dropping the
/// controller) releases everything.
pub struct PlaybackController {
    config: PlayerConfig,
    engine: AudioEngine,
    transport: Arc<Transport>,
    session: Option<Session>,
    part: Option<ScheduledPart>,
    reporter: Option<ProgressReporter>,
    status: Arc<ArcSwap<PlaybackSnapshot>>,
    updates: Sender<EngineUpdate>,
    state: PlaybackState,
    error: Option<String>,
}

impl PlaybackController {
    pub fn new(
        config: PlayerConfig,
        backend: Box<dyn AudioBackend>,
        updates: Sender<EngineUpdate>,
    ) -> Self {
        let engine = AudioEngine::new(backend, &config);
        let controller = Self {
            config,
            engine,
            transport: Arc::new(Transport::new()),
            session: None,
            part: None,
            reporter: None,
            status: Arc::new(ArcSwap::from_pointee(PlaybackSnapshot::default())),
            updates,
            state: PlaybackState::Idle,
            error: None,
        };
        controller.status.store(Arc::new(controller.snapshot()));
        controller
    }

    pub fn state(&self) -> PlaybackState {
        self.state
    }

    pub fn position(&self) -> f64 {
        self.transport.position()
    }

    pub fn file(&self) -> Option<&MidiFile> {
        self.session.as_ref().map(|s| &s.file)
    }

    /// Shared view of the latest published snapshot.
    pub fn status(&self) -> Arc<ArcSwap<PlaybackSnapshot>> {
        self.status.clone()
    }

    /// Notes handed to the audio engine since the controller was created.
    pub fn triggered_notes(&self) -> u64 {
        self.engine.triggered_notes()
    }

    pub fn has_active_part(&self) -> bool {
        self.part.as_ref().is_some_and(ScheduledPart::is_active)
    }

    pub fn snapshot(&self) -> PlaybackSnapshot {
        let session = self.session.as_ref();
        PlaybackSnapshot {
            state: self.state,
            position: self.transport.position(),
            duration: session.map_or(0.0, |s| s.schedule.duration),
            track_count: session.map_or(0, |s| s.file.track_count()),
            volume: self.engine.volume(),
            muted: self.engine.is_muted(),
            truncated: session.is_some_and(|s| s.schedule.truncated),
            resource: session.and_then(|s| s.resource.clone()),
            error: self.error.clone(),
        }
    }

    /// Replace whatever is loaded. Any running playback is torn down first.
    pub fn load(&mut self, source: &dyn MidiSource) -> Result<LoadSummary, Error> {
        self.teardown();
        self.session = None;
        self.error = None;
        self.transport.set_duration(0.0);
        self.set_state(PlaybackState::Loading);

        let result = MidiFile::load(source)
            .map_err(Error::from)
            .and_then(|file| {
                let schedule = Schedule::build(&file, self.config.max_events)?;
                Ok((file, schedule))
            });

        let (file, schedule) = match result {
            Ok(loaded) => loaded,
            Err(e) => {
                warn!(source = %source.label(), error = %e, "load failed");
                self.fail(e.to_string());
                return Err(e);
            }
        };

        let summary = LoadSummary {
            name: file.name.clone(),
            duration: schedule.duration,
            track_count: file.track_count(),
            truncated: schedule.truncated,
        };
        info!(
            name = %summary.name,
            duration = summary.duration,
            tracks = summary.track_count,
            events = schedule.len(),
            "loaded"
        );

        self.transport.set_duration(schedule.duration);
        self.session = Some(Session {
            file,
            schedule: Arc::new(schedule),
            resource: source.resource_info(),
        });
        let _ = self.updates.send(EngineUpdate::Loaded(summary.clone()));
        self.set_state(PlaybackState::Ready);
        Ok(summary)
    }

    /// Start from the top, or resume when paused. The first call brings the
    /// audio engine up; if that fails the state is left where it was and the
    /// next call tries again.
    pub fn play(&mut self) -> Result<(), Error> {
        match self.state {
            PlaybackState::Paused => {
                self.transport.resume();
                if let Some(part) = &self.part {
                    part.wake();
                }
                self.set_state(PlaybackState::Playing);
                self.start_reporter();
                Ok(())
            }
            PlaybackState::Ready | PlaybackState::Stopped => self.play_from_start(),
            _ => Ok(()),
        }
    }

    fn play_from_start(&mut self) -> Result<(), Error> {
        let Some(schedule) = self.session.as_ref().map(|s| s.schedule.clone()) else {
            return Ok(());
        };

        if !self.engine.is_initialized() {
            let prior = self.state;
            self.set_state(PlaybackState::Initializing);
            if let Err(e) = self.engine.initialize() {
                self.error = Some(e.to_string());
                self.set_state(prior);
                return Err(e.into());
            }
        }
        let Some(sink) = self.engine.sink() else {
            let e = AudioInitError::NotRunning("audio engine has no voice bank".into());
            self.error = Some(e.to_string());
            self.publish();
            return Err(e.into());
        };

        // Never two parts at once
        self.cancel_part();
        self.stop_reporter();
        self.engine.silence();
        self.error = None;

        self.transport.start(0.0);
        self.start_part(schedule, 0.0, sink)?;
        self.set_state(PlaybackState::Playing);
        self.start_reporter();
        Ok(())
    }

    pub fn pause(&mut self) {
        if self.state != PlaybackState::Playing {
            return;
        }
        let position = self.transport.pause();
        if let Some(part) = &self.part {
            part.rewind(position);
        }
        // Notes already handed over for the next look-ahead window
        self.engine.silence();
        self.stop_reporter();
        debug!(position, "paused");
        self.set_state(PlaybackState::Paused);
    }

    pub fn stop(&mut self) {
        match self.state {
            PlaybackState::Idle | PlaybackState::Loading | PlaybackState::Error => {}
            _ => {
                self.teardown();
                self.set_state(PlaybackState::Stopped);
            }
        }
    }

    /// Reposition within the loaded file. Only meaningful while playing or
    /// paused; the part is cancelled and rebuilt from the new position.
    pub fn seek(&mut self, seconds: f64) -> Result<(), Error> {
        if !matches!(self.state, PlaybackState::Playing | PlaybackState::Paused) {
            return Ok(());
        }
        let Some(schedule) = self.session.as_ref().map(|s| s.schedule.clone()) else {
            return Ok(());
        };
        let Some(sink) = self.engine.sink() else {
            return Ok(());
        };

        self.cancel_part();
        self.engine.silence();
        let position = self.transport.seek(seconds);
        self.start_part(schedule, position, sink)?;
        debug!(requested = seconds, position, "seek");
        self.publish();
        Ok(())
    }

    pub fn set_volume(&mut self, gain: f32) {
        self.engine.set_volume(gain);
        self.publish();
    }

    pub fn set_muted(&mut self, muted: bool) {
        self.engine.set_muted(muted);
        self.publish();
    }

    /// Release the part, the reporter, the voice bank and the loaded file,
    /// and return to Idle. Idempotent.
    pub fn dispose(&mut self) {
        let was_idle = self.state == PlaybackState::Idle
            && self.session.is_none()
            && !self.engine.is_initialized();
        self.teardown();
        self.engine.dispose();
        self.session = None;
        self.error = None;
        self.transport.set_duration(0.0);
        if !was_idle {
            debug!("controller disposed");
            self.set_state(PlaybackState::Idle);
        }
    }

    /// Housekeeping the owner calls between commands: notices the end of
    /// the file and failures reported by the scheduled part.
    pub fn poll(&mut self) {
        if self.state != PlaybackState::Playing {
            return;
        }

        if let Some(failure) = self.part.as_ref().and_then(ScheduledPart::take_failure) {
            warn!(error = %failure, "playback failed");
            self.teardown();
            // The bank may sit on a dead stream; the next play builds a new one
            self.engine.dispose();
            self.fail(failure.to_string());
            return;
        }

        if self.transport.is_finished() {
            self.cancel_part();
            self.stop_reporter();
            self.transport.stop();
            info!("reached end of file");
            self.set_state(PlaybackState::Stopped);
        }
    }

    fn fail(&mut self, message: String) {
        let _ = self.updates.send(EngineUpdate::Error {
            message: message.clone(),
        });
        self.error = Some(message);
        self.set_state(PlaybackState::Error);
    }

    /// Cancel part and reporter, flush queued notes, rewind the transport.
    fn teardown(&mut self) {
        self.cancel_part();
        self.stop_reporter();
        self.engine.silence();
        self.transport.stop();
    }

    /// On failure the session is torn down and the controller moves to Error.
    fn start_part(
        &mut self,
        schedule: Arc<Schedule>,
        from: f64,
        sink: Arc<dyn NoteSink>,
    ) -> Result<(), Error> {
        match ScheduledPart::start(
            schedule,
            from,
            self.transport.clone(),
            sink,
            self.config.part_config(),
        ) {
            Ok(part) => {
                self.part = Some(part);
                Ok(())
            }
            Err(e) => {
                self.teardown();
                self.fail(e.to_string());
                Err(e.into())
            }
        }
    }

    fn cancel_part(&mut self) {
        if let Some(mut part) = self.part.take() {
            part.cancel();
            debug!(fired = part.fired(), "scheduled part cancelled");
        }
    }

    fn start_reporter(&mut self) {
        self.stop_reporter();
        self.reporter = Some(ProgressReporter::start(
            self.config.progress_interval(),
            self.transport.clone(),
            self.status.clone(),
            self.updates.clone(),
        ));
    }

    fn stop_reporter(&mut self) {
        if let Some(mut reporter) = self.reporter.take() {
            reporter.stop();
        }
    }

    fn set_state(&mut self, state: PlaybackState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "state transition");
        }
        self.state = state;
        self.publish();
    }

    fn publish(&self) {
        let snapshot = self.snapshot();
        self.status.store(Arc::new(snapshot.clone()));
        let _ = self.updates.send(EngineUpdate::Snapshot(snapshot));
    }
}

impl Drop for PlaybackController {
    fn drop(&mut self) {
        self.dispose();
    }
}
