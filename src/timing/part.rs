use crossbeam::channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{debug, trace, warn};

use super::{Schedule, Transport};
use crate::audio::NoteSink;
use crate::error::PlaybackError;

const MIN_WAIT: Duration = Duration::from_millis(1);

#[derive(Debug, Clone, Copy)]
pub struct PartConfig {
    /// How far ahead of the transport notes are handed to the sink
    pub lookahead: Duration,
    /// Longest sleep between two looks at the transport
    pub tick: Duration,
}

impl Default for PartConfig {
    fn default() -> Self {
        Self {
            lookahead: Duration::from_millis(100),
            tick: Duration::from_millis(25),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum PartSignal {
    Wake,
    Cancel,
}

struct Cursor {
    next: usize,
    cancelled: bool,
}

struct PartShared {
    /// Held for the whole of every firing pass
    cursor: Mutex<Cursor>,
    fired: AtomicUsize,
    failure: Mutex<Option<PlaybackError>>,
}

/// A schedule bound to the transport: fires each event into the sink once
/// the transport gets within the look-ahead window of it.
///
/// Runs on its own thread. `cancel` joins that thread, so once it returns no
/// further `trigger_note` call can happen.
pub struct ScheduledPart {
    schedule: Arc<Schedule>,
    shared: Arc<PartShared>,
    signal_tx: Sender<PartSignal>,
    handle: Option<JoinHandle<()>>,
}

impl ScheduledPart {
    /// Bind the events at or after `from` to the transport. Fails only when
    /// the firing thread cannot be spawned.
    pub fn start(
        schedule: Arc<Schedule>,
        from: f64,
        transport: Arc<Transport>,
        sink: Arc<dyn NoteSink>,
        config: PartConfig,
    ) -> Result<Self, PlaybackError> {
        let first = schedule.first_index_at(from);
        let shared = Arc::new(PartShared {
            cursor: Mutex::new(Cursor {
                next: first,
                cancelled: false,
            }),
            fired: AtomicUsize::new(0),
            failure: Mutex::new(None),
        });
        let (signal_tx, signal_rx) = crossbeam::channel::unbounded();

        debug!(
            from,
            first,
            pending = schedule.len() - first,
            "starting scheduled part"
        );

        let thread_schedule = schedule.clone();
        let thread_shared = shared.clone();
        let handle = thread::Builder::new()
            .name("scheduled-part".into())
            .spawn(move || {
                part_thread(
                    thread_schedule,
                    transport,
                    sink,
                    thread_shared,
                    signal_rx,
                    config,
                );
            })
            .map_err(|e| {
                warn!(error = %e, "failed to spawn scheduled part thread");
                PlaybackError::Spawn(e.to_string())
            })?;

        Ok(Self {
            schedule,
            shared,
            signal_tx,
            handle: Some(handle),
        })
    }

    /// Re-evaluate the transport now, e.g. right after it resumed.
    pub fn wake(&self) {
        let _ = self.signal_tx.send(PartSignal::Wake);
    }

    /// Make the next firing pass start at the first event at or after
    /// `position`. Used on pause, after queued notes have been flushed.
    pub fn rewind(&self, position: f64) {
        let mut cursor = self.shared.cursor.lock();
        cursor.next = self.schedule.first_index_at(position);
    }

    /// Stop firing and join the thread. Idempotent.
    pub fn cancel(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        self.shared.cursor.lock().cancelled = true;
        let _ = self.signal_tx.send(PartSignal::Cancel);
        if handle.join().is_err() {
            warn!("scheduled part thread panicked");
        }
    }

    pub fn is_active(&self) -> bool {
        self.handle.is_some()
    }

    /// Number of trigger calls made so far
    pub fn fired(&self) -> usize {
        self.shared.fired.load(Ordering::Acquire)
    }

    pub fn take_failure(&self) -> Option<PlaybackError> {
        self.shared.failure.lock().take()
    }
}

impl Drop for ScheduledPart {
    fn drop(&mut self) {
        self.cancel();
    }
}

fn part_thread(
    schedule: Arc<Schedule>,
    transport: Arc<Transport>,
    sink: Arc<dyn NoteSink>,
    shared: Arc<PartShared>,
    signal_rx: Receiver<PartSignal>,
    config: PartConfig,
) {
    let lookahead = config.lookahead.as_secs_f64();
    let voices = sink.voice_count().max(1);

    loop {
        let wait = {
            let mut cursor = shared.cursor.lock();
            if cursor.cancelled {
                break;
            }

            if !transport.is_running() {
                None
            } else {
                let position = transport.position();
                let horizon = position + lookahead;
                let now = sink.current_time();

                while let Some(event) = schedule.events.get(cursor.next) {
                    if event.time > horizon {
                        break;
                    }
                    let at = now + (event.time - position).max(0.0);
                    let family = event.track % voices;
                    if let Err(err) =
                        sink.trigger_note(family, event.pitch, event.duration, at, event.velocity)
                    {
                        warn!(error = %err, index = cursor.next, "trigger failed, part halted");
                        *shared.failure.lock() = Some(err);
                        return;
                    }
                    trace!(index = cursor.next, time = event.time, pitch = %event.pitch, "fired");
                    cursor.next += 1;
                    shared.fired.fetch_add(1, Ordering::Release);
                }

                schedule.events.get(cursor.next).map(|next| {
                    Duration::from_secs_f64((next.time - horizon).max(0.0))
                        .clamp(MIN_WAIT, config.tick.max(MIN_WAIT))
                })
            }
        };

        let signal = match wait {
            Some(timeout) => match signal_rx.recv_timeout(timeout) {
                Ok(signal) => Some(signal),
                Err(RecvTimeoutError::Timeout) => None,
                Err(RecvTimeoutError::Disconnected) => break,
            },
            // Paused, or nothing left to fire: sleep until told otherwise
            None => match signal_rx.recv() {
                Ok(signal) => Some(signal),
                Err(_) => break,
            },
        };

        if let Some(PartSignal::Cancel) = signal {
            break;
        }
    }
}
