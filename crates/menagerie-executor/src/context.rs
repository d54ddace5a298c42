//! Job contexts: cancellation, deadlines, and identity.
//!
//! A [`JobContext`] travels with each job into the worker. Work functions
//! receive a reference to it and are expected to consult
//! [`JobContext::cancel_cause`] (or sleep through
//! [`JobContext::sleep`], which is preempted by cancellation) at natural
//! suspension points. Cancellation is edge-triggered state shared with the
//! handles returned by the job builders; a deadline behaves like a
//! cancellation that fires by itself.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

use uuid::Uuid;

/// Why a job's context was canceled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CancelCause {
    /// Canceled through a plain handle; no cause attached.
    Canceled,
    /// The context's deadline passed.
    DeadlineExceeded,
    /// Canceled with an explicit cause.
    Cause(String),
}

impl std::fmt::Display for CancelCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Canceled => f.write_str("context canceled"),
            Self::DeadlineExceeded => f.write_str("deadline exceeded"),
            Self::Cause(cause) => write!(f, "canceled: {cause}"),
        }
    }
}

impl std::error::Error for CancelCause {}

#[derive(Debug, Default)]
struct CancelFlag {
    canceled: bool,
    cause: Option<CancelCause>,
}

/// Shared cancellation state between a context and its handles.
#[derive(Debug, Default)]
pub(crate) struct CancelState {
    flag: Mutex<CancelFlag>,
    wakeup: Condvar,
}

impl CancelState {
    fn cancel(&self, cause: Option<CancelCause>) {
        let mut flag = self.flag.lock().unwrap_or_else(|poison| poison.into_inner());
        if !flag.canceled {
            flag.canceled = true;
            flag.cause = cause;
        }
        self.wakeup.notify_all();
    }

    fn recorded_cause(&self) -> Option<CancelCause> {
        let flag = self.flag.lock().unwrap_or_else(|poison| poison.into_inner());
        flag.canceled
            .then(|| flag.cause.clone().unwrap_or(CancelCause::Canceled))
    }
}

/// Cancels a job without carrying a cause.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    state: Arc<CancelState>,
}

impl CancelHandle {
    /// Cancels the associated context.
    pub fn cancel(&self) {
        self.state.cancel(None);
    }
}

/// Cancels a job with an explicit cause value.
#[derive(Debug, Clone)]
pub struct CancelCauseHandle {
    state: Arc<CancelState>,
}

impl CancelCauseHandle {
    /// Cancels the associated context, recording `cause`.
    pub fn cancel(&self, cause: impl Into<String>) {
        self.state.cancel(Some(CancelCause::Cause(cause.into())));
    }
}

/// Per-job context handed to the work function on every attempt.
#[derive(Debug, Clone)]
pub struct JobContext {
    job_id: Uuid,
    worker_id: Option<usize>,
    deadline: Option<Instant>,
    deadline_cause: Option<String>,
    cancel: Arc<CancelState>,
}

impl JobContext {
    pub(crate) fn new(job_id: Uuid) -> Self {
        Self {
            job_id,
            worker_id: None,
            deadline: None,
            deadline_cause: None,
            cancel: Arc::new(CancelState::default()),
        }
    }

    /// The id of the job this context belongs to.
    #[must_use]
    pub const fn job_id(&self) -> Uuid {
        self.job_id
    }

    /// The worker serving the job; `None` before the job is picked up.
    #[must_use]
    pub const fn worker_id(&self) -> Option<usize> {
        self.worker_id
    }

    /// The absolute deadline, when one was configured.
    #[must_use]
    pub const fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub(crate) fn set_worker_id(&mut self, id: usize) {
        self.worker_id = Some(id);
    }

    pub(crate) fn set_deadline(&mut self, deadline: Instant, cause: Option<String>) {
        self.deadline = Some(deadline);
        self.deadline_cause = cause;
    }

    pub(crate) fn cancel_handle(&self) -> CancelHandle {
        CancelHandle {
            state: Arc::clone(&self.cancel),
        }
    }

    pub(crate) fn cancel_cause_handle(&self) -> CancelCauseHandle {
        CancelCauseHandle {
            state: Arc::clone(&self.cancel),
        }
    }

    /// Returns `true` once the context is canceled or past its deadline.
    #[must_use]
    pub fn is_canceled(&self) -> bool {
        self.cancel_cause().is_some()
    }

    /// Returns the effective cancellation cause, if any.
    ///
    /// An explicit cancellation wins over an expired deadline; an expired
    /// deadline reports the cause configured at build time, defaulting to
    /// [`CancelCause::DeadlineExceeded`].
    #[must_use]
    pub fn cancel_cause(&self) -> Option<CancelCause> {
        if let Some(cause) = self.cancel.recorded_cause() {
            return Some(cause);
        }
        match self.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                Some(match &self.deadline_cause {
                    Some(cause) => CancelCause::Cause(cause.clone()),
                    None => CancelCause::DeadlineExceeded,
                })
            }
            _ => None,
        }
    }

    /// Sleeps for `duration`, waking early on cancellation or deadline.
    ///
    /// # Errors
    ///
    /// Returns the cancellation cause when the sleep was preempted (or the
    /// context was already canceled on entry).
    pub fn sleep(&self, duration: Duration) -> Result<(), CancelCause> {
        let until = Instant::now() + duration;
        let end = match self.deadline {
            Some(deadline) => until.min(deadline),
            None => until,
        };

        let mut flag = self
            .cancel
            .flag
            .lock()
            .unwrap_or_else(|poison| poison.into_inner());
        loop {
            if flag.canceled {
                return Err(flag.cause.clone().unwrap_or(CancelCause::Canceled));
            }
            let now = Instant::now();
            if now >= end {
                break;
            }
            let (next, _timeout) = self
                .cancel
                .wakeup
                .wait_timeout(flag, end - now)
                .unwrap_or_else(|poison| poison.into_inner());
            flag = next;
        }
        drop(flag);

        // The loop may have ended on the deadline rather than the duration.
        match self.cancel_cause() {
            Some(cause) => Err(cause),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn context() -> JobContext {
        JobContext::new(Uuid::now_v7())
    }

    #[test]
    fn fresh_context_is_not_canceled() {
        let ctx = context();
        assert!(!ctx.is_canceled());
        assert!(ctx.cancel_cause().is_none());
        assert!(ctx.worker_id().is_none());
    }

    #[test]
    fn plain_cancel_reports_no_cause_value() {
        let ctx = context();
        ctx.cancel_handle().cancel();
        assert_eq!(ctx.cancel_cause(), Some(CancelCause::Canceled));
    }

    #[test]
    fn cause_cancel_carries_the_value() {
        let ctx = context();
        ctx.cancel_cause_handle().cancel("operator abort");
        assert_eq!(
            ctx.cancel_cause(),
            Some(CancelCause::Cause(String::from("operator abort")))
        );
    }

    #[test]
    fn first_cancellation_wins() {
        let ctx = context();
        ctx.cancel_cause_handle().cancel("first");
        ctx.cancel_cause_handle().cancel("second");
        assert_eq!(
            ctx.cancel_cause(),
            Some(CancelCause::Cause(String::from("first")))
        );
    }

    #[test]
    fn expired_deadline_reads_as_canceled() {
        let mut ctx = context();
        ctx.set_deadline(Instant::now() - Duration::from_millis(1), None);
        assert_eq!(ctx.cancel_cause(), Some(CancelCause::DeadlineExceeded));
    }

    #[test]
    fn deadline_cause_overrides_the_default() {
        let mut ctx = context();
        ctx.set_deadline(
            Instant::now() - Duration::from_millis(1),
            Some(String::from("too slow")),
        );
        assert_eq!(
            ctx.cancel_cause(),
            Some(CancelCause::Cause(String::from("too slow")))
        );
    }

    #[test]
    fn sleep_completes_when_nothing_intervenes() {
        let ctx = context();
        let started = Instant::now();
        ctx.sleep(Duration::from_millis(20)).expect("should finish");
        assert!(started.elapsed() >= Duration::from_millis(20));
    }

    #[test]
    fn sleep_is_preempted_by_cancellation() {
        let ctx = context();
        let handle = ctx.cancel_handle();
        let waker = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(10));
            handle.cancel();
        });

        let started = Instant::now();
        let err = ctx.sleep(Duration::from_secs(5)).expect_err("preempted");
        assert_eq!(err, CancelCause::Canceled);
        assert!(started.elapsed() < Duration::from_secs(1));
        waker.join().expect("waker thread");
    }

    #[test]
    fn sleep_is_bounded_by_the_deadline() {
        let mut ctx = context();
        ctx.set_deadline(Instant::now() + Duration::from_millis(15), None);
        let started = Instant::now();
        let err = ctx.sleep(Duration::from_secs(5)).expect_err("deadline");
        assert_eq!(err, CancelCause::DeadlineExceeded);
        assert!(started.elapsed() < Duration::from_secs(1));
    }
}
