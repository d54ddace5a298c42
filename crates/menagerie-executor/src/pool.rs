//! The fixed-size worker pool.
//!
//! A [`Pool`] owns `max_workers` worker threads, a jobs channel, a results
//! channel, and a metrics aggregator. Channels are rendezvous by default
//! (`buffer == 0`): `submit` hands a job directly to a waiting worker, and
//! back-pressure is immediate. Three ways down:
//!
//! * [`Pool::shutdown`] closes input, drains workers, and closes the
//!   results and metrics streams.
//! * [`Pool::stop`] is like shutdown, but the results stream stays open so
//!   the embedder can drain buffered results afterwards. Idempotent.
//! * [`Pool::terminate`] closes everything immediately; in-flight jobs may
//!   produce no result at all. Best effort.

use std::collections::HashMap;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{Receiver, Sender, bounded, unbounded};
use thiserror::Error;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::job::{Job, JobResult};
use crate::metrics::{MetricEvent, PoolMetrics, PoolMetricsSnapshot};
use crate::worker::Worker;

/// Tracing target for pool operations.
const POOL_TARGET: &str = "menagerie_executor::pool";

/// Errors surfaced by pool operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ExecutorError {
    /// The pool no longer accepts submissions.
    #[error("pool is closed to new submissions")]
    PoolClosed,
}

/// Observable pool lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PoolState {
    /// Constructed, workers not yet running.
    Idle,
    /// Workers are serving jobs.
    Running,
    /// A terminal transition (`shutdown`/`stop`/`terminate`) has begun.
    Stopped,
}

/// Outcome of a batch submission.
#[derive(Debug, Default)]
pub struct BatchOutcome {
    /// Jobs accepted into the pool.
    pub submitted: usize,
    /// Jobs rejected.
    pub failed: usize,
    /// Rejection reasons keyed by job id.
    pub errors: HashMap<Uuid, ExecutorError>,
}

/// A fixed-size worker pool.
///
/// # Example
///
/// ```
/// use menagerie_executor::job::Job;
/// use menagerie_executor::pool::Pool;
///
/// let mut pool = Pool::new(2, 8);
/// pool.run();
///
/// let results = pool.results();
/// pool.submit(Job::new(|_ctx| Ok::<_, menagerie_executor::job::WorkError>(42)))
///     .expect("pool accepts the job");
///
/// let result = results.recv().expect("one result arrives");
/// assert_eq!(result.value, Some(42));
/// pool.shutdown();
/// ```
pub struct Pool<T> {
    max_workers: usize,
    jobs_tx: Option<Sender<Job<T>>>,
    jobs_rx: Receiver<Job<T>>,
    results_tx: Option<Sender<JobResult<T>>>,
    results_rx: Receiver<JobResult<T>>,
    metrics_tx: Option<Sender<MetricEvent>>,
    metrics_rx: Option<Receiver<MetricEvent>>,
    quit_tx: Option<Sender<()>>,
    quit_rx: Receiver<()>,
    state: PoolState,
    metrics: Arc<PoolMetrics>,
    workers: Vec<JoinHandle<()>>,
    aggregator: Option<JoinHandle<()>>,
}

impl<T: Send + 'static> Pool<T> {
    /// Constructs a pool of `max_workers` workers (clamped to at least
    /// one) with channels of capacity `buffer` (zero means rendezvous).
    #[must_use]
    pub fn new(max_workers: usize, buffer: usize) -> Self {
        let max_workers = max_workers.max(1);
        let (jobs_tx, jobs_rx) = bounded(buffer);
        let (results_tx, results_rx) = bounded(buffer);
        let (metrics_tx, metrics_rx) = unbounded();
        let (quit_tx, quit_rx) = bounded(0);

        Self {
            max_workers,
            jobs_tx: Some(jobs_tx),
            jobs_rx,
            results_tx: Some(results_tx),
            results_rx,
            metrics_tx: Some(metrics_tx),
            metrics_rx: Some(metrics_rx),
            quit_tx: Some(quit_tx),
            quit_rx,
            state: PoolState::Idle,
            metrics: Arc::new(PoolMetrics::default()),
            workers: Vec::new(),
            aggregator: None,
        }
    }

    /// Spawns the workers and the metrics aggregator. Idempotent.
    pub fn run(&mut self) {
        if self.state != PoolState::Idle {
            return;
        }
        self.state = PoolState::Running;
        self.metrics.mark_started();

        let results_tx = self
            .results_tx
            .clone()
            .expect("results sender exists while idle");
        let metrics_tx = self
            .metrics_tx
            .clone()
            .expect("metrics sender exists while idle");

        for worker_id in 1..=self.max_workers {
            let worker = Worker::new(
                worker_id,
                self.jobs_rx.clone(),
                results_tx.clone(),
                metrics_tx.clone(),
                self.quit_rx.clone(),
            );
            self.workers
                .push(std::thread::spawn(move || worker.run()));
        }

        let aggregate = Arc::clone(&self.metrics);
        let events = self
            .metrics_rx
            .take()
            .expect("metrics receiver exists while idle");
        self.aggregator = Some(std::thread::spawn(move || {
            for event in events.iter() {
                match event {
                    MetricEvent::Success => aggregate.record_success(),
                    MetricEvent::Failure => aggregate.record_failure(),
                }
                aggregate.mark_completed();
            }
        }));

        debug!(
            target: POOL_TARGET,
            max_workers = self.max_workers,
            "pool running"
        );
    }

    /// Submits one job.
    ///
    /// The submission timestamp is stamped before the enqueue attempt, so
    /// even rejected jobs carry it.
    ///
    /// # Errors
    ///
    /// Returns [`ExecutorError::PoolClosed`] unless the pool is running
    /// (not yet started, or a terminal transition has begun); the failure
    /// is counted in the pool metrics.
    pub fn submit(&self, mut job: Job<T>) -> Result<(), ExecutorError> {
        job.mark_submitted();

        if self.state != PoolState::Running {
            self.metrics.record_submission_failure();
            return Err(ExecutorError::PoolClosed);
        }
        let Some(jobs_tx) = &self.jobs_tx else {
            self.metrics.record_submission_failure();
            return Err(ExecutorError::PoolClosed);
        };

        match jobs_tx.send(job) {
            Ok(()) => {
                self.metrics.record_submission();
                Ok(())
            }
            Err(_) => {
                self.metrics.record_submission_failure();
                Err(ExecutorError::PoolClosed)
            }
        }
    }

    /// Submits a batch, continuing past individual rejections.
    pub fn submit_batch(&self, jobs: Vec<Job<T>>) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for job in jobs {
            let id = job.id();
            match self.submit(job) {
                Ok(()) => outcome.submitted += 1,
                Err(err) => {
                    outcome.failed += 1;
                    outcome.errors.insert(id, err);
                }
            }
        }
        outcome
    }

    /// The consumer side of the results stream.
    ///
    /// Results arrive in completion order; ordering between workers is
    /// unspecified. The stream ends when the pool has shut down and every
    /// worker has exited.
    #[must_use]
    pub fn results(&self) -> Receiver<JobResult<T>> {
        self.results_rx.clone()
    }

    /// Takes a snapshot of the pool metrics.
    #[must_use]
    pub fn metrics(&self) -> PoolMetricsSnapshot {
        self.metrics.snapshot()
    }

    /// The pool's observable lifecycle state.
    #[must_use]
    pub const fn state(&self) -> PoolState {
        self.state
    }

    /// Graceful shutdown: close input, drain workers, close the results
    /// and metrics streams.
    pub fn shutdown(&mut self) {
        if self.begin_stop("shutdown") {
            self.drain_workers();
            self.results_tx = None;
            self.finish_metrics();
        }
    }

    /// Like [`Pool::shutdown`], but leaves the results stream open so the
    /// embedder can drain remaining results at leisure. Idempotent.
    pub fn stop(&mut self) {
        if self.begin_stop("stop") {
            self.drain_workers();
            // results_tx intentionally survives: the consumer drains with
            // `try_iter` and the stream stays connected.
            self.finish_metrics();
        }
    }

    /// Immediate teardown: input and results close without draining, and
    /// workers exit as soon as they observe either closure. In-flight jobs
    /// may produce no result. Best effort.
    pub fn terminate(&mut self) {
        if self.begin_stop("terminate") {
            self.quit_tx = None;
            self.drain_workers();
            self.results_tx = None;
            self.finish_metrics();
        }
    }

    /// Marks the terminal transition; returns `false` when already done.
    ///
    /// The state flip is ordered before any channel close so consumers
    /// observe `Stopped` no later than a disconnect.
    fn begin_stop(&mut self, how: &str) -> bool {
        if self.state == PoolState::Stopped {
            return false;
        }
        debug!(target: POOL_TARGET, how, "pool stopping");
        self.state = PoolState::Stopped;
        self.metrics.mark_stopped();
        self.jobs_tx = None;
        true
    }

    fn drain_workers(&mut self) {
        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                warn!(target: POOL_TARGET, "worker thread panicked");
            }
        }
    }

    fn finish_metrics(&mut self) {
        // Workers are gone; dropping our sender ends the aggregator.
        self.metrics_tx = None;
        if let Some(handle) = self.aggregator.take() {
            if handle.join().is_err() {
                warn!(target: POOL_TARGET, "metrics aggregator panicked");
            }
        }
        self.metrics.finalize_duration();
    }
}

impl<T> std::fmt::Debug for Pool<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Pool")
            .field("max_workers", &self.max_workers)
            .field("state", &self.state)
            .field("workers", &self.workers.len())
            .finish_non_exhaustive()
    }
}
