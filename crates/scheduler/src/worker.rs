//! Bounded worker pool draining the job queue.

use crate::cancel::CancellationToken;
use crate::job::Job;
use crate::scheduler::JobScheduler;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::debug;

/// How long an idle worker sleeps before polling the queue again.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Work function run for each job. Cancellation is cooperative: the executor
/// should check the token between expensive steps and bail out early.
pub type JobExecutor = Arc<dyn Fn(&Job, &CancellationToken) + Send + Sync>;

/// Fixed set of worker threads executing jobs until shutdown.
///
/// Workers skip jobs whose token was cancelled while they sat in the queue,
/// and always complete a job's bookkeeping, even if it was skipped.
pub struct WorkerPool {
    scheduler: Arc<JobScheduler>,
    shutdown: Arc<AtomicBool>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn start(scheduler: Arc<JobScheduler>, worker_count: usize, executor: JobExecutor) -> Self {
        Self::start_with_poll_interval(scheduler, worker_count, executor, DEFAULT_POLL_INTERVAL)
    }

    pub fn start_with_poll_interval(
        scheduler: Arc<JobScheduler>,
        worker_count: usize,
        executor: JobExecutor,
        poll_interval: Duration,
    ) -> Self {
        let shutdown = Arc::new(AtomicBool::new(false));
        let worker_count = worker_count.max(1);

        let workers = (0..worker_count)
            .map(|index| {
                let scheduler = Arc::clone(&scheduler);
                let shutdown = Arc::clone(&shutdown);
                let executor = Arc::clone(&executor);

                thread::Builder::new()
                    .name(format!("quire-worker-{index}"))
                    .spawn(move || {
                        worker_loop(&scheduler, &shutdown, executor.as_ref(), poll_interval)
                    })
                    .unwrap_or_else(|err| panic!("failed to spawn worker thread: {err}"))
            })
            .collect();

        Self { scheduler, shutdown, workers }
    }

    pub fn worker_count(&self) -> usize {
        self.workers.len()
    }

    /// Signals shutdown, cancels outstanding jobs, and joins every worker.
    pub fn shutdown(mut self) {
        self.begin_shutdown();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }

    fn begin_shutdown(&self) {
        self.shutdown.store(true, Ordering::Release);
        self.scheduler.cancel_all();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.begin_shutdown();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(
    scheduler: &JobScheduler,
    shutdown: &AtomicBool,
    executor: &(dyn Fn(&Job, &CancellationToken) + Send + Sync),
    poll_interval: Duration,
) {
    while !shutdown.load(Ordering::Acquire) {
        let Some(job) = scheduler.next_job() else {
            thread::sleep(poll_interval);
            continue;
        };

        let token = scheduler.token(job.id).unwrap_or_default();
        if token.is_cancelled() {
            debug!(job = job.id.0, "skipping cancelled job");
        } else {
            executor(&job, &token);
        }

        scheduler.complete_job(job.id);
    }
}

/// Worker count matching the machine, with a fallback when parallelism is
/// unknown.
pub fn default_worker_count() -> usize {
    thread::available_parallelism().map(usize::from).unwrap_or(4)
}
