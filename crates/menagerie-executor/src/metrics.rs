//! Job and pool lifetime metrics.
//!
//! [`JobMetrics`] is owned by the job and stamped by the pool and worker;
//! user code never writes it. A copy rides inside every
//! [`crate::job::JobResult`]. [`PoolMetrics`] aggregates across the pool's
//! lifetime behind a lock; readers take [`PoolMetricsSnapshot`] copies.

use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Timing and attempt counters for one job.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JobMetrics {
    /// When the job entered [`crate::pool::Pool::submit`].
    pub submitted_at: Option<Instant>,
    /// When a worker picked the job up.
    pub started_at: Option<Instant>,
    /// When the final attempt finished.
    pub finished_at: Option<Instant>,
    /// `finished_at - started_at`.
    pub duration: Option<Duration>,
    /// Index of the last attempt executed (zero-based).
    pub attempts: u32,
}

impl JobMetrics {
    pub(crate) fn mark_submitted(&mut self) {
        self.submitted_at = Some(Instant::now());
    }

    pub(crate) fn mark_started(&mut self) {
        self.started_at = Some(Instant::now());
    }

    pub(crate) fn mark_finished(&mut self) {
        let finished = Instant::now();
        self.finished_at = Some(finished);
        self.duration = self.started_at.map(|started| finished - started);
    }
}

/// Success/failure events flowing from workers to the aggregator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum MetricEvent {
    /// A job finished without error.
    Success,
    /// A job finished with an error (including cancellation and panic).
    Failure,
}

#[derive(Debug, Default)]
struct PoolMetricsInner {
    started_at: Option<Instant>,
    stopped_at: Option<Instant>,
    completed_at: Option<Instant>,
    duration: Option<Duration>,
    submissions: u64,
    submission_failures: u64,
    successes: u64,
    failures: u64,
}

/// Aggregate pool metrics; all updates are atomic relative to readers.
#[derive(Debug, Default)]
pub struct PoolMetrics {
    inner: Mutex<PoolMetricsInner>,
}

impl PoolMetrics {
    fn lock(&self) -> std::sync::MutexGuard<'_, PoolMetricsInner> {
        self.inner.lock().unwrap_or_else(|poison| poison.into_inner())
    }

    pub(crate) fn mark_started(&self) {
        self.lock().started_at = Some(Instant::now());
    }

    pub(crate) fn mark_stopped(&self) {
        let mut inner = self.lock();
        if inner.stopped_at.is_none() {
            inner.stopped_at = Some(Instant::now());
        }
    }

    pub(crate) fn mark_completed(&self) {
        self.lock().completed_at = Some(Instant::now());
    }

    /// Computes the pool duration once the run is over. Falls back to the
    /// stop time when no job ever completed.
    pub(crate) fn finalize_duration(&self) {
        let mut inner = self.lock();
        if inner.completed_at.is_none() {
            inner.completed_at = inner.stopped_at;
        }
        inner.duration = match (inner.started_at, inner.completed_at) {
            (Some(started), Some(completed)) => Some(completed - started),
            _ => None,
        };
    }

    pub(crate) fn record_submission(&self) {
        self.lock().submissions += 1;
    }

    pub(crate) fn record_submission_failure(&self) {
        self.lock().submission_failures += 1;
    }

    pub(crate) fn record_success(&self) {
        self.lock().successes += 1;
    }

    pub(crate) fn record_failure(&self) {
        self.lock().failures += 1;
    }

    /// Takes a consistent copy of the aggregate counters.
    #[must_use]
    pub fn snapshot(&self) -> PoolMetricsSnapshot {
        let inner = self.lock();
        PoolMetricsSnapshot {
            started_at: inner.started_at,
            stopped_at: inner.stopped_at,
            completed_at: inner.completed_at,
            duration: inner.duration,
            submissions: inner.submissions,
            submission_failures: inner.submission_failures,
            successes: inner.successes,
            failures: inner.failures,
        }
    }
}

/// A point-in-time copy of [`PoolMetrics`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolMetricsSnapshot {
    /// When `run()` was called.
    pub started_at: Option<Instant>,
    /// When `shutdown()`, `stop()`, or `terminate()` was called.
    pub stopped_at: Option<Instant>,
    /// When the last job result was aggregated.
    pub completed_at: Option<Instant>,
    /// From start to completion.
    pub duration: Option<Duration>,
    /// Jobs accepted by `submit`.
    pub submissions: u64,
    /// Jobs rejected by `submit`.
    pub submission_failures: u64,
    /// Jobs that finished without error.
    pub successes: u64,
    /// Jobs that finished with an error.
    pub failures: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn job_metrics_are_monotonic() {
        let mut metrics = JobMetrics::default();
        metrics.mark_submitted();
        metrics.mark_started();
        metrics.mark_finished();

        let submitted = metrics.submitted_at.expect("submitted");
        let started = metrics.started_at.expect("started");
        let finished = metrics.finished_at.expect("finished");
        assert!(submitted <= started);
        assert!(started <= finished);
        assert_eq!(metrics.duration, Some(finished - started));
    }

    #[test]
    fn pool_counters_accumulate() {
        let metrics = PoolMetrics::default();
        metrics.record_submission();
        metrics.record_submission();
        metrics.record_submission_failure();
        metrics.record_success();
        metrics.record_failure();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.submissions, 2);
        assert_eq!(snapshot.submission_failures, 1);
        assert_eq!(snapshot.successes, 1);
        assert_eq!(snapshot.failures, 1);
    }

    #[test]
    fn duration_falls_back_to_stop_time() {
        let metrics = PoolMetrics::default();
        metrics.mark_started();
        metrics.mark_stopped();
        metrics.finalize_duration();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.completed_at, snapshot.stopped_at);
        assert!(snapshot.duration.is_some());
    }

    #[test]
    fn stop_time_is_first_writer_wins() {
        let metrics = PoolMetrics::default();
        metrics.mark_stopped();
        let first = metrics.snapshot().stopped_at;
        metrics.mark_stopped();
        assert_eq!(metrics.snapshot().stopped_at, first);
    }
}
