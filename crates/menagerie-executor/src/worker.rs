//! The worker loop: one job at a time, with retries and panic recovery.

use std::backtrace::Backtrace;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::time::Duration;

use crossbeam::channel::{Receiver, Sender, select};
use tracing::{debug, error, warn};

use crate::context::JobContext;
use crate::job::{Job, JobError, JobResult, WorkFn};
use crate::metrics::MetricEvent;

/// Tracing target for worker operations.
const WORKER_TARGET: &str = "menagerie_executor::worker";

/// A pool worker. Created and started by [`crate::pool::Pool::run`].
pub(crate) struct Worker<T> {
    id: usize,
    jobs: Receiver<Job<T>>,
    results: Sender<JobResult<T>>,
    metrics: Sender<MetricEvent>,
    quit: Receiver<()>,
}

impl<T: Send + 'static> Worker<T> {
    pub(crate) const fn new(
        id: usize,
        jobs: Receiver<Job<T>>,
        results: Sender<JobResult<T>>,
        metrics: Sender<MetricEvent>,
        quit: Receiver<()>,
    ) -> Self {
        Self {
            id,
            jobs,
            results,
            metrics,
            quit,
        }
    }

    /// Serves jobs until the input closes or the pool terminates.
    pub(crate) fn run(self) {
        debug!(target: WORKER_TARGET, worker_id = self.id, "worker started");
        loop {
            select! {
                recv(self.jobs) -> incoming => match incoming {
                    Ok(job) => {
                        if !self.serve(job) {
                            break;
                        }
                    }
                    // Input closed and drained: orderly shutdown.
                    Err(_) => break,
                },
                recv(self.quit) -> _ => break,
            }
        }
        debug!(target: WORKER_TARGET, worker_id = self.id, "worker stopped");
    }

    /// Runs one job and publishes its result.
    ///
    /// Returns `false` when the pool terminated while publishing, which
    /// ends the worker.
    fn serve(&self, job: Job<T>) -> bool {
        let (job_id, mut context, mut work, max_retries, retry_delay, mut metrics) =
            job.into_parts();
        context.set_worker_id(self.id);
        metrics.mark_started();

        let (value, job_error) = run_attempts(
            &mut work,
            &context,
            &mut metrics,
            max_retries,
            retry_delay,
            self.id,
        );
        metrics.mark_finished();

        match &job_error {
            Some(err) => {
                error!(
                    target: WORKER_TARGET,
                    worker_id = self.id,
                    job_id = %job_id,
                    error = %err,
                    "job failed"
                );
            }
            None => {
                debug!(
                    target: WORKER_TARGET,
                    worker_id = self.id,
                    job_id = %job_id,
                    attempts = metrics.attempts,
                    "job completed"
                );
            }
        }

        let event = if job_error.is_none() {
            MetricEvent::Success
        } else {
            MetricEvent::Failure
        };
        let result = JobResult {
            job_id,
            worker_id: self.id,
            metrics,
            value,
            error: job_error,
        };

        select! {
            send(self.results, result) -> delivered => {
                if delivered.is_err() {
                    warn!(
                        target: WORKER_TARGET,
                        worker_id = self.id,
                        job_id = %job_id,
                        "results stream closed, dropping result"
                    );
                    return false;
                }
                let _ = self.metrics.send(event);
                true
            }
            recv(self.quit) -> _ => {
                warn!(
                    target: WORKER_TARGET,
                    worker_id = self.id,
                    job_id = %job_id,
                    "pool terminated before result delivery, dropping result"
                );
                false
            }
        }
    }
}

/// The retry loop for one job.
///
/// Cancellation is checked before every attempt and preempts the retry
/// sleep. A panicking work function is recovered into
/// [`JobError::Panic`]; the worker itself survives.
fn run_attempts<T>(
    work: &mut WorkFn<T>,
    context: &JobContext,
    metrics: &mut crate::metrics::JobMetrics,
    max_retries: u32,
    retry_delay: Duration,
    worker_id: usize,
) -> (Option<T>, Option<JobError>) {
    for attempt in 0.. {
        metrics.attempts = attempt;

        if let Some(cause) = context.cancel_cause() {
            return (None, Some(JobError::Canceled(cause)));
        }

        match catch_unwind(AssertUnwindSafe(|| work(context))) {
            Err(payload) => {
                return (None, Some(JobError::Panic(panic_description(&payload))));
            }
            Ok(Ok(value)) => return (Some(value), None),
            Ok(Err(err)) => {
                // A failed attempt on a canceled context reports the
                // cancellation, not the attempt's error.
                if let Some(cause) = context.cancel_cause() {
                    return (None, Some(JobError::Canceled(cause)));
                }
                if attempt >= max_retries {
                    return (None, Some(JobError::Work(err)));
                }
                warn!(
                    target: WORKER_TARGET,
                    worker_id,
                    job_id = %context.job_id(),
                    attempt = attempt + 1,
                    max_retries,
                    error = %err,
                    "retrying job"
                );
                if !retry_delay.is_zero() {
                    if let Err(cause) = context.sleep(retry_delay) {
                        return (None, Some(JobError::Canceled(cause)));
                    }
                }
            }
        }
    }
    unreachable!("the attempt loop always returns");
}

fn panic_description(payload: &(dyn std::any::Any + Send)) -> String {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| (*s).to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| String::from("opaque panic payload"));
    format!("{message}\nstack backtrace:\n{}", Backtrace::force_capture())
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::job::Job;

    #[test]
    fn panic_description_includes_message_and_stack() {
        let payload: Box<dyn std::any::Any + Send> = Box::new("boom");
        let description = panic_description(payload.as_ref());
        assert!(description.contains("boom"));
        assert!(description.contains("stack backtrace:"));
    }

    #[rstest]
    #[case::no_retries(0, 0)]
    #[case::two_retries(2, 2)]
    #[case::five_retries(5, 5)]
    fn retry_loop_is_bounded(#[case] max: u32, #[case] expected_last_attempt: u32) {
        let job: Job<()> = Job::new(|_ctx| Err("always failing".into())).with_retry(max, 0);
        let (_, context, mut work, max_retries, retry_delay, mut metrics) = job.into_parts();

        let (value, error) =
            run_attempts(&mut work, &context, &mut metrics, max_retries, retry_delay, 1);

        assert!(value.is_none());
        assert!(matches!(error, Some(JobError::Work(_))));
        assert_eq!(metrics.attempts, expected_last_attempt);
    }

    #[test]
    fn canceled_context_skips_execution() {
        let job: Job<()> = Job::new(|_ctx| panic!("must not run")).with_cancel();
        job.cancel_handle().expect("handle").cancel();
        let (_, context, mut work, max_retries, retry_delay, mut metrics) = job.into_parts();

        let (value, error) =
            run_attempts(&mut work, &context, &mut metrics, max_retries, retry_delay, 1);

        assert!(value.is_none());
        assert!(matches!(error, Some(JobError::Canceled(_))));
    }

    #[test]
    fn panic_is_recovered_into_a_job_error() {
        let job: Job<()> = Job::new(|_ctx| panic!("kaboom"));
        let (_, context, mut work, max_retries, retry_delay, mut metrics) = job.into_parts();

        let (value, error) =
            run_attempts(&mut work, &context, &mut metrics, max_retries, retry_delay, 1);

        assert!(value.is_none());
        match error {
            Some(JobError::Panic(stack)) => assert!(stack.contains("kaboom")),
            other => panic!("expected Panic, got {other:?}"),
        }
    }
}
