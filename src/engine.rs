use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};
use std::path::PathBuf;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::audio::{AudioBackend, CpalBackend};
use crate::config::PlayerConfig;
use crate::controller::{LoadSummary, PlaybackController, PlaybackSnapshot};
use crate::error::Error;
use crate::midi::MidiBytes;

/// How often the engine thread checks for end of file and part failures
/// while no command arrives.
const POLL: Duration = Duration::from_millis(20);

#[derive(Debug, Clone)]
pub enum EngineCommand {
    Load(PathBuf),
    LoadBytes(MidiBytes),
    Play,
    Pause,
    Stop,
    Seek(f64),
    SetVolume(f32),
    SetMuted(bool),
    Dispose,
}

#[derive(Debug, Clone)]
pub enum EngineUpdate {
    Snapshot(PlaybackSnapshot),
    Loaded(LoadSummary),
    Error { message: String },
}

pub struct EngineHandle {
    pub command_tx: Sender<EngineCommand>,
    pub update_rx: Receiver<EngineUpdate>,
    thread: Option<JoinHandle<()>>,
}

impl EngineHandle {
    /// Drop the command channel and wait for the engine thread to dispose
    /// everything.
    pub fn shutdown(mut self) {
        let thread = self.thread.take();
        drop(self);
        if let Some(thread) = thread {
            let _ = thread.join();
        }
    }
}

/// Run a controller on the default output device.
pub fn spawn_engine(config: PlayerConfig) -> EngineHandle {
    spawn_engine_with(config, || -> Box<dyn AudioBackend> {
        Box::new(CpalBackend::new())
    })
}

/// Run a controller on a backend built inside the engine thread. The backend
/// never crosses threads, which matters for device handles that are not
/// `Send`.
pub fn spawn_engine_with<F>(config: PlayerConfig, backend: F) -> EngineHandle
where
    F: FnOnce() -> Box<dyn AudioBackend> + Send + 'static,
{
    let (command_tx, command_rx) = crossbeam::channel::unbounded();
    let (update_tx, update_rx) = crossbeam::channel::unbounded();

    let thread = std::thread::Builder::new()
        .name("engine".into())
        .spawn(move || {
            let controller = PlaybackController::new(config, backend(), update_tx.clone());
            engine_thread(controller, command_rx, update_tx);
        });

    let thread = match thread {
        Ok(thread) => Some(thread),
        Err(e) => {
            tracing::error!(error = %e, "failed to spawn engine thread");
            None
        }
    };

    EngineHandle {
        command_tx,
        update_rx,
        thread,
    }
}

fn engine_thread(
    mut controller: PlaybackController,
    command_rx: Receiver<EngineCommand>,
    update_tx: Sender<EngineUpdate>,
) {
    loop {
        let command = match command_rx.recv_timeout(POLL) {
            Ok(command) => command,
            Err(RecvTimeoutError::Timeout) => {
                controller.poll();
                continue;
            }
            Err(RecvTimeoutError::Disconnected) => break,
        };

        match command {
            EngineCommand::Load(path) => {
                let _ = controller.load(&path);
            }
            EngineCommand::LoadBytes(bytes) => {
                let _ = controller.load(&bytes);
            }
            EngineCommand::Play => match controller.play() {
                Ok(()) => {}
                // A part failure has already gone out through the controller
                Err(Error::Playback(e)) => tracing::warn!(error = %e, "play failed"),
                Err(e) => {
                    let _ = update_tx.send(EngineUpdate::Error {
                        message: format!("Failed to start playback: {}", e),
                    });
                }
            },
            EngineCommand::Pause => controller.pause(),
            EngineCommand::Stop => controller.stop(),
            EngineCommand::Seek(seconds) => {
                // Already published as an Error update by the controller
                if let Err(e) = controller.seek(seconds) {
                    tracing::warn!(seconds, error = %e, "seek failed");
                }
            }
            EngineCommand::SetVolume(gain) => controller.set_volume(gain),
            EngineCommand::SetMuted(muted) => controller.set_muted(muted),
            EngineCommand::Dispose => controller.dispose(),
        }
        controller.poll();
    }

    controller.dispose();
    tracing::debug!("engine thread exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::SilentBackend;
    use crate::controller::PlaybackState;

    fn wait_for_state(handle: &EngineHandle, state: PlaybackState) -> bool {
        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while std::time::Instant::now() < deadline {
            let update = handle.update_rx.recv_timeout(Duration::from_millis(50));
            if let Ok(EngineUpdate::Snapshot(s)) = update {
                if s.state == state {
                    return true;
                }
            }
        }
        false
    }

    #[test]
    fn test_load_failure_is_reported() {
        let handle = spawn_engine_with(PlayerConfig::default(), || -> Box<dyn AudioBackend> {
            Box::new(SilentBackend::new(8_000))
        });
        handle
            .command_tx
            .send(EngineCommand::LoadBytes(MidiBytes::new("junk", vec![1, 2, 3])))
            .unwrap();
        assert!(wait_for_state(&handle, PlaybackState::Error));
        handle.command_tx.send(EngineCommand::Dispose).unwrap();
        assert!(wait_for_state(&handle, PlaybackState::Idle));
        handle.shutdown();
    }
}
