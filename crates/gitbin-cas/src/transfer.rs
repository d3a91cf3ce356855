//! Bounded Parallel Transfer Engine
//!
//! Runs one operation per item with at most [`MAX_IN_FLIGHT`] operations
//! running at once. Used for both chunk downloads (smudge) and uploads (push);
//! the engine itself does no I/O.
//!
//! # Architecture
//!
//! ```text
//! Dispatcher ──spawn──▶ Worker (item i) ──outcome──▶ channel ──▶ Dispatcher
//! (index order)         (≤ C at once)                            (bookkeeping)
//! ```
//!
//! All bookkeeping (in-flight count, first failure, progress boundary) lives
//! on the dispatching thread, which consumes worker outcomes one at a time.
//! Progress reports are therefore serialized and strictly increasing.
//!
//! # Failure Policy
//!
//! - The first failure is kept; later failures are discarded.
//! - Once a failure is seen nothing new is dispatched.
//! - Workers already running are never interrupted; the call returns only
//!   after they have all finished.

use std::io;
use std::sync::Arc;
use std::thread;

use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, warn};

/// Maximum number of item operations in flight at once.
pub const MAX_IN_FLIGHT: usize = 10;

/// Receives coarse progress updates from a running transfer.
pub trait ProgressReporter: Send + Sync {
    /// Called with the completed percentage each time it reaches a new
    /// multiple of ten.
    fn on_progress(&self, percent: u32);
}

/// A reporter that discards progress.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpProgress;

impl ProgressReporter for NoOpProgress {
    fn on_progress(&self, _percent: u32) {}
}

/// Result of a successful transfer run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransferStats {
    /// Items handed to a worker
    pub dispatched: usize,
    /// Items whose operation succeeded
    pub succeeded: usize,
}

enum Outcome<E> {
    Done(Result<(), E>),
    Panicked,
}

/// Sends exactly one outcome per worker, including when the item operation
/// unwinds.
struct Completion<E> {
    tx: Sender<Outcome<E>>,
    reported: bool,
}

impl<E> Completion<E> {
    fn new(tx: Sender<Outcome<E>>) -> Self {
        Self {
            tx,
            reported: false,
        }
    }

    fn report(mut self, result: Result<(), E>) {
        self.reported = true;
        let _ = self.tx.send(Outcome::Done(result));
    }
}

impl<E> Drop for Completion<E> {
    fn drop(&mut self) {
        if !self.reported {
            let _ = self.tx.send(Outcome::Panicked);
        }
    }
}

/// Dispatcher-side state for one run.
struct Schedule<'p, E> {
    total: usize,
    in_flight: usize,
    dispatched: usize,
    finished: usize,
    succeeded: usize,
    next_report: u32,
    failure: Option<E>,
    panicked: bool,
    progress: &'p dyn ProgressReporter,
}

impl<'p, E> Schedule<'p, E> {
    fn new(total: usize, progress: &'p dyn ProgressReporter) -> Self {
        Self {
            total,
            in_flight: 0,
            dispatched: 0,
            finished: 0,
            succeeded: 0,
            next_report: 10,
            failure: None,
            panicked: false,
            progress,
        }
    }

    fn halted(&self) -> bool {
        self.failure.is_some() || self.panicked
    }

    fn fail(&mut self, error: E) {
        if self.failure.is_none() {
            self.failure = Some(error);
        } else {
            debug!("discarding subsequent transfer failure");
        }
    }

    fn settle(&mut self, outcome: Outcome<E>) {
        self.in_flight -= 1;
        self.finished += 1;

        match outcome {
            Outcome::Done(Ok(())) => {
                self.succeeded += 1;
                let percent = (100 * self.finished / self.total) as u32;
                if percent >= self.next_report {
                    self.progress.on_progress(percent);
                    self.next_report = (percent / 10 + 1) * 10;
                }
            }
            Outcome::Done(Err(e)) => {
                if self.failure.is_none() {
                    warn!(in_flight = self.in_flight, "transfer failed, draining in-flight work");
                }
                self.fail(e);
            }
            Outcome::Panicked => self.panicked = true,
        }
    }

    /// Account for every outcome that has already arrived.
    fn collect_ready(&mut self, rx: &Receiver<Outcome<E>>) {
        while self.in_flight > 0 {
            match rx.try_recv() {
                Ok(outcome) => self.settle(outcome),
                Err(_) => break,
            }
        }
    }

    /// Block for one outcome.
    fn wait_one(&mut self, rx: &Receiver<Outcome<E>>) {
        // The dispatcher holds a sender, so recv only fails if that invariant breaks
        if let Ok(outcome) = rx.recv() {
            self.settle(outcome);
        }
    }
}

/// Generic bounded-parallelism executor.
///
/// The progress reporter is supplied at construction and shared by every run.
#[derive(Clone)]
pub struct TransferEngine {
    concurrency: usize,
    progress: Arc<dyn ProgressReporter>,
}

impl Default for TransferEngine {
    fn default() -> Self {
        Self::new(Arc::new(NoOpProgress))
    }
}

impl TransferEngine {
    pub fn new(progress: Arc<dyn ProgressReporter>) -> Self {
        Self {
            concurrency: MAX_IN_FLIGHT,
            progress,
        }
    }

    /// Override the in-flight cap (clamped to at least 1).
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Run `process(items, i)` for every index of `items`.
    ///
    /// Items are dispatched in index order; completion order is arbitrary.
    /// Returns once every dispatched operation has finished. If any operation
    /// failed, the first failure is returned and items not yet dispatched at
    /// that point are never started.
    pub fn run<T, E, F>(&self, items: &[T], process: F) -> Result<TransferStats, E>
    where
        T: Sync,
        E: Send + From<io::Error>,
        F: Fn(&[T], usize) -> Result<(), E> + Sync,
    {
        if items.is_empty() {
            return Ok(TransferStats::default());
        }

        debug!(
            items = items.len(),
            concurrency = self.concurrency,
            "starting transfer batch"
        );

        let (tx, rx) = unbounded::<Outcome<E>>();
        let process = &process;

        let mut schedule = thread::scope(|scope| {
            let mut schedule = Schedule::new(items.len(), self.progress.as_ref());

            for index in 0..items.len() {
                schedule.collect_ready(&rx);
                while !schedule.halted() && schedule.in_flight >= self.concurrency {
                    schedule.wait_one(&rx);
                }
                if schedule.halted() {
                    break;
                }

                let tx = tx.clone();
                let spawned = thread::Builder::new()
                    .name(format!("gitbin-transfer-{}", index))
                    .spawn_scoped(scope, move || {
                        let completion = Completion::new(tx);
                        completion.report(process(items, index));
                    });

                match spawned {
                    Ok(_) => {
                        schedule.in_flight += 1;
                        schedule.dispatched += 1;
                    }
                    Err(e) => {
                        schedule.fail(E::from(e));
                        break;
                    }
                }
            }

            // Drain: nothing in flight is ever abandoned
            while schedule.in_flight > 0 {
                schedule.wait_one(&rx);
            }

            schedule
        });

        if let Some(error) = schedule.failure.take() {
            return Err(error);
        }

        Ok(TransferStats {
            dispatched: schedule.dispatched,
            succeeded: schedule.succeeded,
        })
    }
}
