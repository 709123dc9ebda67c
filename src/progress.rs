use arc_swap::ArcSwap;
use crossbeam::channel::{Sender, select, tick};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::controller::PlaybackSnapshot;
use crate::engine::EngineUpdate;
use crate::timing::Transport;

/// Samples the transport position on a fixed interval and publishes it.
///
/// Only runs while playing. `stop` joins the sampler thread, so nothing is
/// published once it returns.
pub struct ProgressReporter {
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl ProgressReporter {
    pub fn start(
        interval: Duration,
        transport: Arc<Transport>,
        status: Arc<ArcSwap<PlaybackSnapshot>>,
        updates: Sender<EngineUpdate>,
    ) -> Self {
        let (stop_tx, stop_rx) = crossbeam::channel::bounded::<()>(1);
        let ticker = tick(interval.max(Duration::from_millis(1)));

        let handle = std::thread::Builder::new()
            .name("progress-reporter".into())
            .spawn(move || {
                loop {
                    select! {
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            let position = transport.position();
                            status.rcu(|current| PlaybackSnapshot {
                                position,
                                ..(**current).clone()
                            });
                            let published = (*status.load_full()).clone();
                            if updates.send(EngineUpdate::Snapshot(published)).is_err() {
                                break;
                            }
                        }
                    }
                }
            })
            .ok();

        if handle.is_none() {
            tracing::warn!("failed to spawn progress reporter thread");
        }

        Self {
            stop_tx: Some(stop_tx),
            handle,
        }
    }

    pub fn is_running(&self) -> bool {
        self.handle.is_some()
    }

    /// Idempotent.
    pub fn stop(&mut self) {
        // Dropping the sender wakes the select as well
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.try_send(());
        }
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for ProgressReporter {
    fn drop(&mut self) {
        self.stop();
    }
}
