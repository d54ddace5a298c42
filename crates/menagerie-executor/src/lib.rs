//! A concurrent job executor for the menagerie host runtime.
//!
//! The `menagerie-executor` crate provides a fixed-size worker pool over OS
//! threads and blocking channels. Applications wrap work in a
//! [`job::Job`], configure retries and bounded lifetimes with the job
//! builders, and submit to a [`pool::Pool`]; results arrive on a consumer
//! stream in completion order. Workers recover panicking work functions
//! into typed errors, so one bad job never takes down the pool.
//!
//! The executor shares the host's observability substrate: structured
//! `tracing` events with per-module targets, and lock-protected
//! [`metrics::PoolMetrics`] with snapshot reads.
//!
//! # Example
//!
//! ```
//! use menagerie_executor::job::{Job, WorkError};
//! use menagerie_executor::pool::Pool;
//!
//! let mut pool = Pool::new(4, 16);
//! pool.run();
//!
//! let results = pool.results();
//! pool.submit(
//!     Job::new(|_ctx| Ok::<_, WorkError>("woof")).with_retry(2, 10),
//! )
//! .expect("pool accepts the job");
//!
//! let result = results.recv().expect("one result");
//! assert_eq!(result.value, Some("woof"));
//! pool.shutdown();
//! ```

pub mod context;
pub mod job;
pub mod metrics;
pub mod pool;

mod worker;

pub use self::context::{CancelCause, CancelCauseHandle, CancelHandle, JobContext};
pub use self::job::{Job, JobError, JobResult, WorkError, WorkFn};
pub use self::metrics::{JobMetrics, PoolMetricsSnapshot};
pub use self::pool::{BatchOutcome, ExecutorError, Pool, PoolState};
