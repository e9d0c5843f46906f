//! Background job scheduling for page rendering, text extraction, and OCR.
//!
//! Structural mutation stays synchronous on the owning thread; everything
//! slow runs here. Jobs are keyed by (page uid, kind): submitting a new job
//! for a key with one already pending cancels the stale job, except OCR,
//! where requests collapse into the in-flight task. Every job carries a
//! generation stamp so results from a closed document can be recognized and
//! dropped by the consumer.

pub mod cancel;
pub mod job;
pub mod scheduler;
pub mod worker;

pub use cancel::{CancellationRegistry, CancellationToken};
pub use job::{Generation, Job, JobId, JobKey, JobKind, JobPriority, JobRequest};
pub use scheduler::JobScheduler;
pub use worker::{default_worker_count, JobExecutor, WorkerPool, DEFAULT_POLL_INTERVAL};
