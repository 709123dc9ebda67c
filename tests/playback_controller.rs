mod common;

use crossbeam::channel::Receiver;
use midiplay::audio::{AudioBackend, SilentBackend, Synth};
use midiplay::{
    AudioInitError, EngineUpdate, Error, MidiBytes, PlaybackController, PlaybackState,
    PlayerConfig,
};
use std::thread::sleep;
use std::time::{Duration, Instant};

const RATE: u32 = 8_000;

/// Refuses to start a set number of times, then behaves like the silent
/// backend. Stands in for a platform that wants a user gesture first.
struct GestureBackend {
    refusals: usize,
    inner: SilentBackend,
}

impl GestureBackend {
    fn new(refusals: usize) -> Self {
        Self {
            refusals,
            inner: SilentBackend::new(RATE),
        }
    }
}

impl AudioBackend for GestureBackend {
    fn name(&self) -> &str {
        "gesture"
    }

    fn start(&mut self, synth: Synth) -> Result<(), AudioInitError> {
        if self.refusals > 0 {
            self.refusals -= 1;
            return Err(AudioInitError::NotRunning("no user gesture yet".into()));
        }
        self.inner.start(synth)
    }

    fn stop(&mut self) {
        self.inner.stop();
    }
}

/// Starts normally, but the first stream it opens dies straight away, the
/// way an unplugged device reports through cpal's error callback.
struct DyingBackend {
    failed: bool,
    inner: SilentBackend,
}

impl DyingBackend {
    fn new() -> Self {
        Self {
            failed: false,
            inner: SilentBackend::new(RATE),
        }
    }
}

impl AudioBackend for DyingBackend {
    fn name(&self) -> &str {
        "dying"
    }

    fn start(&mut self, synth: Synth) -> Result<(), AudioInitError> {
        if !self.failed {
            self.failed = true;
            synth.bank().record_stream_error("device unplugged".into());
        }
        self.inner.start(synth)
    }

    fn stop(&mut self) {
        self.inner.stop();
    }
}

fn controller_with(backend: Box<dyn AudioBackend>) -> (PlaybackController, Receiver<EngineUpdate>) {
    let (tx, rx) = crossbeam::channel::unbounded();
    (PlaybackController::new(PlayerConfig::default(), backend, tx), rx)
}

fn controller() -> (PlaybackController, Receiver<EngineUpdate>) {
    controller_with(Box::new(SilentBackend::new(RATE)))
}

fn source(notes: &[common::FixtureNote]) -> MidiBytes {
    MidiBytes::new("fixture", common::smf_bytes(None, &[notes]))
}

/// Poll until `state` or the deadline.
fn wait_for(controller: &mut PlaybackController, state: PlaybackState, limit: Duration) -> bool {
    let deadline = Instant::now() + limit;
    while Instant::now() < deadline {
        controller.poll();
        if controller.state() == state {
            return true;
        }
        sleep(Duration::from_millis(10));
    }
    false
}

#[test]
fn test_load_reaches_ready_without_touching_audio() {
    let (mut controller, rx) = controller_with(Box::new(GestureBackend::new(usize::MAX)));
    let summary = controller
        .load(&source(&[(2.0, 1.0, 60), (3.0, 1.0, 62)]))
        .unwrap();

    assert_eq!(summary.track_count, 1);
    assert!((summary.duration - 2.0).abs() < 1e-6);
    assert_eq!(controller.state(), PlaybackState::Ready);
    assert_eq!(controller.file().map(|f| f.note_count()), Some(2));

    let snapshot = controller.snapshot();
    assert_eq!(snapshot.state, PlaybackState::Ready);
    assert_eq!(snapshot.position, 0.0);
    assert!((snapshot.duration - 2.0).abs() < 1e-6);
    assert_eq!(snapshot.error, None);

    let states: Vec<PlaybackState> = rx
        .try_iter()
        .filter_map(|u| match u {
            EngineUpdate::Snapshot(s) => Some(s.state),
            _ => None,
        })
        .collect();
    assert_eq!(states, vec![PlaybackState::Loading, PlaybackState::Ready]);
}

#[test]
fn test_resource_info_passes_through() {
    let (mut controller, _rx) = controller();
    let dir = tempfile::tempdir().unwrap();
    let path = common::write_midi(dir.path(), "prelude.mid", &[&[(0.0, 1.0, 60)]]);
    controller.load(&path).unwrap();
    let resource = controller.snapshot().resource.unwrap();
    assert_eq!(resource.filename, "prelude.mid");
    assert!(resource.size > 0);
}

#[test]
fn test_play_twice_keeps_a_single_part() {
    let (mut controller, _rx) = controller();
    let notes = common::evenly_spaced(10, 0.05);
    controller.load(&source(&notes)).unwrap();

    controller.play().unwrap();
    controller.play().unwrap();
    assert_eq!(controller.state(), PlaybackState::Playing);
    assert!(controller.has_active_part());

    assert!(wait_for(&mut controller, PlaybackState::Stopped, Duration::from_secs(3)));
    assert_eq!(controller.triggered_notes(), 10, "every note fired exactly once");

    // And again from Stopped
    controller.play().unwrap();
    assert!(wait_for(&mut controller, PlaybackState::Stopped, Duration::from_secs(3)));
    assert_eq!(controller.triggered_notes(), 20);
}

#[test]
fn test_refused_audio_leaves_ready_and_retries_on_next_play() {
    let (mut controller, rx) = controller_with(Box::new(GestureBackend::new(1)));
    controller.load(&source(&[(0.0, 0.5, 60)])).unwrap();

    let err = controller.play().unwrap_err();
    assert!(matches!(err, Error::AudioInit(AudioInitError::NotRunning(_))));
    assert_eq!(controller.state(), PlaybackState::Ready);
    assert!(controller.snapshot().error.is_some());
    assert!(
        rx.try_iter().any(|u| matches!(
            u,
            EngineUpdate::Snapshot(ref s) if s.state == PlaybackState::Initializing
        ))
    );

    controller.play().unwrap();
    assert_eq!(controller.state(), PlaybackState::Playing);
    assert_eq!(controller.snapshot().error, None);
}

#[test]
fn test_stream_failure_moves_to_error() {
    let (mut controller, rx) = controller_with(Box::new(DyingBackend::new()));
    controller.load(&source(&[(0.0, 0.5, 60), (0.5, 0.5, 62)])).unwrap();
    rx.try_iter().for_each(drop);

    controller.play().unwrap();
    assert!(wait_for(&mut controller, PlaybackState::Error, Duration::from_secs(2)));
    assert!(!controller.has_active_part());
    assert_eq!(controller.triggered_notes(), 0);

    let error = controller.snapshot().error.unwrap();
    assert!(error.contains("device unplugged"), "{}", error);
    let messages: Vec<String> = rx
        .try_iter()
        .filter_map(|u| match u {
            EngineUpdate::Error { message } => Some(message),
            _ => None,
        })
        .collect();
    assert_eq!(messages, vec![error]);
}

#[test]
fn test_reload_after_stream_failure_rebuilds_audio() {
    let (mut controller, _rx) = controller_with(Box::new(DyingBackend::new()));
    let fixture = source(&[(0.0, 0.1, 60), (0.1, 0.1, 62)]);
    controller.load(&fixture).unwrap();
    controller.play().unwrap();
    assert!(wait_for(&mut controller, PlaybackState::Error, Duration::from_secs(2)));

    controller.load(&fixture).unwrap();
    assert_eq!(controller.state(), PlaybackState::Ready);
    controller.play().unwrap();
    assert!(wait_for(&mut controller, PlaybackState::Stopped, Duration::from_secs(2)));
    assert_eq!(controller.snapshot().error, None);
    assert_eq!(controller.triggered_notes(), 2);
}

#[test]
fn test_stop_cancels_every_future_trigger() {
    let (mut controller, _rx) = controller();
    let notes = common::evenly_spaced(20, 0.1);
    controller.load(&source(&notes)).unwrap();

    controller.play().unwrap();
    sleep(Duration::from_millis(300));
    controller.stop();
    assert_eq!(controller.state(), PlaybackState::Stopped);
    assert_eq!(controller.position(), 0.0);
    assert!(!controller.has_active_part());

    let fired = controller.triggered_notes();
    assert!(fired > 0 && fired < 20, "fired {}", fired);
    sleep(Duration::from_millis(400));
    assert_eq!(controller.triggered_notes(), fired);
}

#[test]
fn test_pause_freezes_and_resume_continues() {
    let (mut controller, _rx) = controller();
    let notes = common::evenly_spaced(20, 0.1);
    controller.load(&source(&notes)).unwrap();

    // Outside Playing pause does nothing
    controller.pause();
    assert_eq!(controller.state(), PlaybackState::Ready);

    controller.play().unwrap();
    sleep(Duration::from_millis(200));
    controller.pause();
    assert_eq!(controller.state(), PlaybackState::Paused);
    assert!(controller.has_active_part());

    let frozen = controller.position();
    let fired = controller.triggered_notes();
    sleep(Duration::from_millis(200));
    assert_eq!(controller.position(), frozen);
    assert_eq!(controller.triggered_notes(), fired);

    controller.pause();
    assert_eq!(controller.state(), PlaybackState::Paused);

    controller.play().unwrap();
    assert_eq!(controller.state(), PlaybackState::Playing);
    assert!(wait_for(&mut controller, PlaybackState::Stopped, Duration::from_secs(4)));
    // Notes flushed at the pause are handed over again after resuming
    assert!(controller.triggered_notes() >= 20);
}

#[test]
fn test_seek_positions() {
    let (mut controller, _rx) = controller();
    let notes = common::evenly_spaced(40, 0.1);
    controller.load(&source(&notes)).unwrap();

    // Not playing yet: ignored
    controller.seek(1.0).unwrap();
    assert_eq!(controller.position(), 0.0);

    controller.play().unwrap();
    controller.pause();
    controller.seek(1.5).unwrap();
    assert_eq!(controller.state(), PlaybackState::Paused);
    assert_eq!(controller.position(), 1.5);

    controller.seek(1_000.0).unwrap();
    assert_eq!(controller.position(), controller.snapshot().duration);

    controller.play().unwrap();
    controller.seek(1.0).unwrap();
    let position = controller.position();
    assert_eq!(controller.state(), PlaybackState::Playing);
    assert!((1.0..1.06).contains(&position), "position {}", position);
    assert!(controller.has_active_part());
}

#[test]
fn test_seek_rebuilds_the_part_from_the_new_position() {
    let (mut controller, rx) = controller();
    controller.load(&source(&common::evenly_spaced(30, 0.1))).unwrap();
    controller.play().unwrap();
    controller.pause();
    let before = controller.triggered_notes();
    rx.try_iter().for_each(drop);

    controller.seek(2.5).unwrap();
    assert!(controller.has_active_part());
    assert_eq!(controller.triggered_notes(), before, "nothing fires while paused");

    controller.play().unwrap();
    assert!(wait_for(&mut controller, PlaybackState::Stopped, Duration::from_secs(2)));
    // 2.5, 2.6, 2.7, 2.8 and 2.9
    assert_eq!(controller.triggered_notes() - before, 5);
    assert!(rx.try_iter().all(|u| !matches!(u, EngineUpdate::Error { .. })));
}

#[test]
fn test_playing_is_published_before_any_progress() {
    let (mut controller, rx) = controller();
    controller.load(&source(&common::evenly_spaced(20, 0.1))).unwrap();
    rx.try_iter().for_each(drop);

    controller.play().unwrap();
    sleep(Duration::from_millis(200));
    controller.pause();
    controller.play().unwrap();
    sleep(Duration::from_millis(200));
    controller.stop();

    let mut states: Vec<PlaybackState> = rx
        .try_iter()
        .filter_map(|u| match u {
            EngineUpdate::Snapshot(s) => Some(s.state),
            _ => None,
        })
        .collect();
    states.dedup();
    assert_eq!(
        states,
        vec![
            PlaybackState::Initializing,
            PlaybackState::Playing,
            PlaybackState::Paused,
            PlaybackState::Playing,
            PlaybackState::Stopped,
        ]
    );
}

#[test]
fn test_progress_is_reported_while_playing_only() {
    let (mut controller, rx) = controller();
    let notes = common::evenly_spaced(20, 0.1);
    controller.load(&source(&notes)).unwrap();
    rx.try_iter().for_each(drop);

    controller.play().unwrap();
    sleep(Duration::from_millis(250));
    controller.pause();

    let positions: Vec<f64> = rx
        .try_iter()
        .filter_map(|u| match u {
            EngineUpdate::Snapshot(s) if s.state == PlaybackState::Playing => Some(s.position),
            _ => None,
        })
        .collect();
    assert!(positions.len() >= 3, "{:?}", positions);
    assert!(positions.iter().any(|p| *p > 0.0));

    sleep(Duration::from_millis(150));
    let playing = |u: &EngineUpdate| {
        matches!(u, EngineUpdate::Snapshot(s) if s.state == PlaybackState::Playing)
    };
    assert!(!rx.try_iter().any(|u| playing(&u)));
}

#[test]
fn test_dispose_twice_and_reload() {
    let (mut controller, _rx) = controller();
    controller.load(&source(&[(0.0, 1.0, 60)])).unwrap();
    controller.play().unwrap();

    controller.dispose();
    controller.dispose();
    assert_eq!(controller.state(), PlaybackState::Idle);
    assert!(!controller.has_active_part());
    assert_eq!(controller.snapshot().duration, 0.0);

    controller.load(&source(&[(0.0, 0.2, 60)])).unwrap();
    controller.play().unwrap();
    assert_eq!(controller.state(), PlaybackState::Playing);
}

#[test]
fn test_volume_and_mute_do_not_change_state() {
    let (mut controller, _rx) = controller();
    controller.load(&source(&[(0.0, 1.0, 60)])).unwrap();
    controller.set_volume(0.4);
    controller.set_muted(true);
    assert_eq!(controller.state(), PlaybackState::Ready);

    controller.play().unwrap();
    controller.set_volume(2.0);
    let snapshot = controller.snapshot();
    assert_eq!(snapshot.state, PlaybackState::Playing);
    assert_eq!(snapshot.volume, 1.0);
    assert!(snapshot.muted);
}
