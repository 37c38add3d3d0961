// SPDX-License-Identifier: GPL-3.0-only
//! Thread lifecycle management for the pipeline's execution contexts
//!
//! Two primitives live here:
//!
//! - [`SerialQueue`]: a named single-consumer work queue running on its own
//!   thread. The capture context and the presentation context are both
//!   serial queues.
//! - [`CaptureLoopController`]: a stoppable loop thread, used by synthetic
//!   devices to produce samples and by the periodic status timer.

use std::cell::Cell;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::mpsc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

type Job = Box<dyn FnOnce() + Send + 'static>;

static NEXT_QUEUE_ID: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static CURRENT_QUEUE: Cell<u64> = const { Cell::new(0) };
}

/// Serial execution context
///
/// Jobs run one at a time, in submission order, on a dedicated thread.
/// Handles are cheap to clone; the worker exits once every handle is gone
/// and the backlog is drained.
#[derive(Clone)]
pub struct SerialQueue {
    id: u64,
    name: Arc<str>,
    sender: mpsc::Sender<Job>,
}

impl SerialQueue {
    pub fn new(name: &str) -> Self {
        let id = NEXT_QUEUE_ID.fetch_add(1, Ordering::Relaxed);
        let (sender, receiver) = mpsc::channel::<Job>();
        let thread_name = name.to_string();

        let spawned = thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                CURRENT_QUEUE.with(|current| current.set(id));
                debug!(name = %thread_name, "Serial queue started");
                for job in receiver {
                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!(name = %thread_name, "Job panicked on serial queue");
                    }
                }
                debug!(name = %thread_name, "Serial queue drained, exiting");
            });
        if let Err(e) = spawned {
            error!(name = %name, error = %e, "Failed to spawn serial queue thread");
        }

        Self {
            id,
            name: Arc::from(name),
            sender,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the calling thread is this queue's worker
    pub fn is_current(&self) -> bool {
        CURRENT_QUEUE.with(|current| current.get() == self.id)
    }

    /// Enqueue a job and return immediately
    pub fn dispatch<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        if self.sender.send(Box::new(job)).is_err() {
            warn!(name = %self.name, "Serial queue is gone, dropping job");
        }
    }

    /// Run a job on the queue and wait for its result
    ///
    /// Runs inline when called from the queue itself.
    pub fn sync<R, F>(&self, job: F) -> Option<R>
    where
        R: Send + 'static,
        F: FnOnce() -> R + Send + 'static,
    {
        if self.is_current() {
            return Some(job());
        }
        let (tx, rx) = mpsc::sync_channel(1);
        self.dispatch(move || {
            let _ = tx.send(job());
        });
        rx.recv().ok()
    }

    /// Wait until every job enqueued before this call has run
    pub fn flush(&self) {
        let _ = self.sync(|| ());
    }
}

impl std::fmt::Debug for SerialQueue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SerialQueue")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish()
    }
}

/// Action returned by the loop callback to control loop behavior
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopAction {
    /// Continue running the loop
    Continue,
    /// Stop the loop gracefully
    Stop,
}

/// Controller for a loop running in a separate thread
pub struct CaptureLoopController {
    thread_handle: Option<JoinHandle<()>>,
    stop_signal: Arc<AtomicBool>,
    name: String,
}

impl CaptureLoopController {
    /// Start a loop calling `loop_fn` until it returns `LoopAction::Stop`
    /// or the controller is stopped.
    pub fn start<F>(name: &str, loop_fn: F) -> Self
    where
        F: FnMut() -> LoopAction + Send + 'static,
    {
        Self::spawn(name, Arc::new(AtomicBool::new(false)), loop_fn)
    }

    fn spawn<F>(name: &str, stop_signal: Arc<AtomicBool>, mut loop_fn: F) -> Self
    where
        F: FnMut() -> LoopAction + Send + 'static,
    {
        let stop_signal_clone = Arc::clone(&stop_signal);
        let name_clone = name.to_string();

        info!(name = %name, "Starting loop thread");

        let thread_handle = thread::Builder::new()
            .name(name.to_string())
            .spawn(move || {
                debug!(name = %name_clone, "Loop thread started");
                loop {
                    if stop_signal_clone.load(Ordering::SeqCst) {
                        debug!(name = %name_clone, "Stop signal received");
                        break;
                    }
                    if loop_fn() == LoopAction::Stop {
                        debug!(name = %name_clone, "Loop requested stop");
                        break;
                    }
                }
                debug!(name = %name_clone, "Loop thread exiting");
            })
            .map_err(|e| error!(name = %name, error = %e, "Failed to spawn loop thread"))
            .ok();

        Self {
            thread_handle,
            stop_signal,
            name: name.to_string(),
        }
    }

    /// Start a loop calling `tick_fn` once per `interval`
    ///
    /// The first tick happens one interval after the start. Stopping takes
    /// effect within a few milliseconds, not a full interval.
    pub fn start_periodic<F>(name: &str, interval: Duration, mut tick_fn: F) -> Self
    where
        F: FnMut() -> LoopAction + Send + 'static,
    {
        let stop_signal = Arc::new(AtomicBool::new(false));
        let stop_for_wait = Arc::clone(&stop_signal);
        let slice = interval.min(Duration::from_millis(10));
        let mut next_tick = Instant::now() + interval;

        Self::spawn(name, stop_signal, move || {
            while Instant::now() < next_tick {
                if stop_for_wait.load(Ordering::SeqCst) {
                    return LoopAction::Stop;
                }
                thread::sleep(slice.min(next_tick.saturating_duration_since(Instant::now())));
            }
            next_tick += interval;
            tick_fn()
        })
    }

    /// Check if the loop is still running
    pub fn is_running(&self) -> bool {
        self.thread_handle
            .as_ref()
            .map(|h| !h.is_finished())
            .unwrap_or(false)
    }

    /// Signal the loop to stop without waiting
    pub fn request_stop(&self) {
        debug!(name = %self.name, "Requesting loop stop");
        self.stop_signal.store(true, Ordering::SeqCst);
    }

    /// Stop the loop and wait for the thread to finish
    pub fn stop(&mut self) {
        self.request_stop();
        self.join();
    }

    /// Wait for the thread to finish without sending the stop signal
    pub fn join(&mut self) {
        if let Some(handle) = self.thread_handle.take() {
            if handle.thread().id() == thread::current().id() {
                // Stopped from inside its own tick: the loop ends on return.
                return;
            }
            if let Err(e) = handle.join() {
                warn!(name = %self.name, "Loop thread panicked: {:?}", e);
            }
        }
    }
}

impl Drop for CaptureLoopController {
    fn drop(&mut self) {
        if self.thread_handle.is_some() {
            self.stop();
        }
    }
}
