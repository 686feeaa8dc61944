//! The cooperative reactor (C8): a bounded poll loop over a set of
//! registered state machines, with no per-runnable thread.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::thread;
use std::time::Duration;

/// A cooperatively-scheduled state machine. `poll_once` should do a small,
/// bounded amount of work and return whether it made progress; the reactor
/// uses that to decide whether to keep spinning or back off.
pub trait Runnable: Send {
    /// Name used in tracing spans, e.g. `"block_coordinator"`.
    fn name(&self) -> &str;

    /// Advance the state machine by one step. Returns `true` if it made
    /// progress (so the reactor should poll again immediately) or `false`
    /// if it is waiting on something external (so the reactor may idle).
    fn poll_once(&mut self) -> bool;
}

/// Polls a set of [`Runnable`]s until told to stop, idling briefly whenever
/// a full sweep makes no progress.
///
/// Runnables are held by [`Weak`] reference: once every strong reference
/// held elsewhere is dropped, the reactor quietly drops the entry instead
/// of keeping it alive.
pub struct Reactor {
    runnables: Vec<Weak<Mutex<dyn Runnable>>>,
    idle_sleep: Duration,
    stop: Arc<AtomicBool>,
}

impl Reactor {
    /// Build a reactor that sleeps `idle_sleep` after a sweep makes no
    /// progress across any attached runnable.
    pub fn new(idle_sleep: Duration) -> Self {
        Self {
            runnables: Vec::new(),
            idle_sleep,
            stop: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Attach a runnable. The reactor does not own it; the caller keeps the
    /// `Arc` alive for as long as it should keep running.
    pub fn attach(&mut self, runnable: &Arc<Mutex<dyn Runnable>>) {
        self.runnables.push(Arc::downgrade(runnable));
    }

    /// A handle the caller can use to stop [`run`](Self::run) from another
    /// thread.
    pub fn stop_handle(&self) -> Arc<AtomicBool> {
        self.stop.clone()
    }

    /// Run one sweep over all live runnables, dropping any whose strong
    /// references have gone away. Returns `true` if any runnable made
    /// progress.
    pub fn poll_once(&mut self) -> bool {
        let mut progressed = false;
        self.runnables.retain(|weak| {
            let Some(strong) = weak.upgrade() else {
                return false;
            };
            let mut guard = strong.lock().expect("runnable mutex poisoned");
            let name = guard.name().to_string();
            if guard.poll_once() {
                progressed = true;
                tracing::trace!(runnable = %name, "made progress");
            }
            true
        });
        progressed
    }

    /// Loop [`poll_once`](Self::poll_once) until [`stop_handle`](Self::stop_handle)
    /// is set, sleeping `idle_sleep` after any sweep with no progress.
    pub fn run(&mut self) {
        while !self.stop.load(Ordering::Relaxed) {
            if !self.poll_once() {
                thread::sleep(self.idle_sleep);
            }
        }
    }
}
