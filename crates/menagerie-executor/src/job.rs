//! Jobs: a unit of work with context, retries, and bounded lifetime.
//!
//! A [`Job`] wraps a work function together with the knobs the worker needs
//! to drive it: retry bounds, a cancellation handle, and an optional
//! deadline. Builders consume and return the job so configuration chains;
//! after submission the job is immutable except for its metrics, which the
//! pool and worker stamp.

use std::time::{Duration, Instant};

use thiserror::Error;
use uuid::Uuid;

use crate::context::{CancelCause, CancelCauseHandle, CancelHandle, JobContext};
use crate::metrics::JobMetrics;

/// Error type produced by work functions.
pub type WorkError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// The work function executed by a worker, possibly several times.
pub type WorkFn<T> = Box<dyn FnMut(&JobContext) -> Result<T, WorkError> + Send + 'static>;

/// Why a job produced no value.
#[derive(Debug, Error)]
pub enum JobError {
    /// The job's context was canceled before or during execution.
    #[error("job canceled: {0}")]
    Canceled(CancelCause),

    /// The work function returned an error on its final attempt.
    #[error("job failed: {0}")]
    Work(WorkError),

    /// The work function panicked; the worker recovered.
    #[error("worker panicked: {0}")]
    Panic(String),
}

impl JobError {
    /// Returns `true` for cancellation outcomes.
    #[must_use]
    pub const fn is_canceled(&self) -> bool {
        matches!(self, Self::Canceled(_))
    }

    /// Returns `true` for recovered panics.
    #[must_use]
    pub const fn is_panic(&self) -> bool {
        matches!(self, Self::Panic(_))
    }
}

/// A submitted unit of work.
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use menagerie_executor::job::Job;
///
/// let job = Job::new(|_ctx| Ok::<_, menagerie_executor::job::WorkError>(21 * 2))
///     .with_retry(2, 5)
///     .with_timeout(Duration::from_secs(1));
/// assert_eq!(job.max_retries(), 2);
/// assert!(job.cancel_handle().is_some());
/// ```
pub struct Job<T> {
    id: Uuid,
    context: JobContext,
    work: WorkFn<T>,
    max_retries: u32,
    retry_delay: Duration,
    metrics: JobMetrics,
    cancel: Option<CancelHandle>,
    cancel_cause: Option<CancelCauseHandle>,
}

impl<T> Job<T> {
    /// Creates a job with a fresh time-sortable id and a new context.
    #[must_use]
    pub fn new(work: impl FnMut(&JobContext) -> Result<T, WorkError> + Send + 'static) -> Self {
        let id = Uuid::now_v7();
        Self {
            id,
            context: JobContext::new(id),
            work: Box::new(work),
            max_retries: 0,
            retry_delay: Duration::ZERO,
            metrics: JobMetrics::default(),
            cancel: None,
            cancel_cause: None,
        }
    }

    /// Configures the retry loop: up to `max_retries` re-executions with
    /// `retry_delay_ms` between attempts. Zero retries means one attempt.
    #[must_use]
    pub const fn with_retry(mut self, max_retries: u32, retry_delay_ms: u64) -> Self {
        self.max_retries = max_retries;
        self.retry_delay = Duration::from_millis(retry_delay_ms);
        self
    }

    /// Attaches a plain cancellation handle, replacing any prior handle.
    #[must_use]
    pub fn with_cancel(mut self) -> Self {
        self.cancel = Some(self.context.cancel_handle());
        self.cancel_cause = None;
        self
    }

    /// Attaches a cause-carrying cancellation handle, replacing any prior
    /// handle.
    #[must_use]
    pub fn with_cancel_cause(mut self) -> Self {
        self.cancel_cause = Some(self.context.cancel_cause_handle());
        self.cancel = None;
        self
    }

    /// Bounds the job's lifetime to `timeout` from now.
    #[must_use]
    pub fn with_timeout(self, timeout: Duration) -> Self {
        self.with_deadline(Instant::now() + timeout)
    }

    /// Bounds the job's lifetime to `timeout` from now, reporting `cause`
    /// on expiry.
    #[must_use]
    pub fn with_timeout_cause(self, timeout: Duration, cause: impl Into<String>) -> Self {
        self.with_deadline_cause(Instant::now() + timeout, cause)
    }

    /// Bounds the job's lifetime to an absolute deadline.
    #[must_use]
    pub fn with_deadline(mut self, deadline: Instant) -> Self {
        self.context.set_deadline(deadline, None);
        self.cancel = Some(self.context.cancel_handle());
        self.cancel_cause = None;
        self
    }

    /// Bounds the job's lifetime to an absolute deadline, reporting
    /// `cause` on expiry.
    #[must_use]
    pub fn with_deadline_cause(mut self, deadline: Instant, cause: impl Into<String>) -> Self {
        self.context.set_deadline(deadline, Some(cause.into()));
        self.cancel = Some(self.context.cancel_handle());
        self.cancel_cause = None;
        self
    }

    /// The job's unique, time-sortable id.
    #[must_use]
    pub const fn id(&self) -> Uuid {
        self.id
    }

    /// The job's context.
    #[must_use]
    pub const fn context(&self) -> &JobContext {
        &self.context
    }

    /// The configured retry bound.
    #[must_use]
    pub const fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// The configured delay between attempts.
    #[must_use]
    pub const fn retry_delay(&self) -> Duration {
        self.retry_delay
    }

    /// Current metrics; stamped by the pool and worker.
    #[must_use]
    pub const fn metrics(&self) -> &JobMetrics {
        &self.metrics
    }

    /// The plain cancellation handle, when one is active.
    #[must_use]
    pub const fn cancel_handle(&self) -> Option<&CancelHandle> {
        self.cancel.as_ref()
    }

    /// The cause-carrying cancellation handle, when one is active.
    #[must_use]
    pub const fn cancel_cause_handle(&self) -> Option<&CancelCauseHandle> {
        self.cancel_cause.as_ref()
    }

    pub(crate) fn mark_submitted(&mut self) {
        self.metrics.mark_submitted();
    }

    pub(crate) fn into_parts(self) -> (Uuid, JobContext, WorkFn<T>, u32, Duration, JobMetrics) {
        (
            self.id,
            self.context,
            self.work,
            self.max_retries,
            self.retry_delay,
            self.metrics,
        )
    }
}

impl<T> std::fmt::Debug for Job<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Job")
            .field("id", &self.id)
            .field("max_retries", &self.max_retries)
            .field("retry_delay", &self.retry_delay)
            .finish_non_exhaustive()
    }
}

/// The outcome of one job, published on the results stream.
#[derive(Debug)]
pub struct JobResult<T> {
    /// Id of the job that produced this result.
    pub job_id: Uuid,
    /// Worker that served the job.
    pub worker_id: usize,
    /// Final metrics copy.
    pub metrics: JobMetrics,
    /// The produced value; present iff no error occurred.
    pub value: Option<T>,
    /// The failure; present iff the job produced no value.
    pub error: Option<JobError>,
}

impl<T> JobResult<T> {
    /// Returns `true` when the job produced a value.
    #[must_use]
    pub const fn is_success(&self) -> bool {
        self.error.is_none()
    }
}
