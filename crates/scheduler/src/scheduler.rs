//! Priority queue with per-key deduplication.

use crate::cancel::{CancellationRegistry, CancellationToken};
use crate::job::{Generation, Job, JobId, JobKey, JobKind, JobRequest};
use quire_doc_model::PageUid;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use tracing::debug;

struct QueueState {
    heap: BinaryHeap<Job>,
    /// Live (queued or running) job per key; replaced on stale-cancel.
    by_key: HashMap<JobKey, JobId>,
    /// Key lookup for completion, kept until `complete_job`.
    keys: HashMap<JobId, JobKey>,
    /// Generation stamps for queued and running jobs, for predicate sweeps.
    generations: HashMap<JobId, Generation>,
    next_insertion: u64,
}

/// Job queue shared between the document thread (submit/cancel) and the
/// worker pool (next_job/complete_job).
///
/// Submitting a request whose (uid, kind) key already has a live job cancels
/// that job and queues the new one, so a rotate-while-rendering never leaves
/// two renders racing for the same slot. OCR is the exception: its requests
/// collapse into the job already under way and the caller gets the existing
/// id and token back.
pub struct JobScheduler {
    state: Mutex<QueueState>,
    registry: CancellationRegistry,
    next_id: AtomicU64,
}

impl Default for JobScheduler {
    fn default() -> Self {
        Self::new()
    }
}

impl JobScheduler {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(QueueState {
                heap: BinaryHeap::new(),
                by_key: HashMap::new(),
                keys: HashMap::new(),
                generations: HashMap::new(),
                next_insertion: 0,
            }),
            registry: CancellationRegistry::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Queues a request. Returns the job id and its cancellation token; for
    /// a collapsed OCR request these belong to the already-pending job.
    pub fn submit(&self, request: JobRequest, generation: Generation) -> (JobId, CancellationToken) {
        let key = request.key();
        let mut state = self.state.lock().unwrap();

        if let Some(&existing) = state.by_key.get(&key) {
            if key.kind == JobKind::Ocr {
                if let Some(token) = self.registry.token(existing) {
                    debug!(uid = %key.uid, job = existing.0, "collapsed ocr request into pending job");
                    return (existing, token);
                }
            } else {
                self.registry.cancel(existing);
                debug!(uid = %key.uid, job = existing.0, "cancelled stale job for resubmitted key");
            }
        }

        let id = JobId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let token = self.registry.register(id);

        let insertion_order = state.next_insertion;
        state.next_insertion += 1;

        state.by_key.insert(key, id);
        state.keys.insert(id, key);
        state.generations.insert(id, generation);
        state.heap.push(Job { id, request, generation, insertion_order });

        (id, token)
    }

    /// Highest-priority job that has not been cancelled. Cancelled entries
    /// found on the way are completed and dropped.
    pub fn next_job(&self) -> Option<Job> {
        loop {
            let job = {
                let mut state = self.state.lock().unwrap();
                state.heap.pop()?
            };

            match self.registry.token(job.id) {
                Some(token) if !token.is_cancelled() => return Some(job),
                _ => self.complete_job(job.id),
            }
        }
    }

    /// Releases a job's bookkeeping once it has run, been skipped, or been
    /// dropped. Safe to call for ids that are already gone.
    pub fn complete_job(&self, id: JobId) {
        let mut state = self.state.lock().unwrap();

        if let Some(key) = state.keys.remove(&id) {
            // A resubmit may have replaced this key with a newer job.
            if state.by_key.get(&key) == Some(&id) {
                state.by_key.remove(&key);
            }
        }
        state.generations.remove(&id);
        drop(state);

        self.registry.remove(id);
    }

    pub fn cancel_job(&self, id: JobId) -> bool {
        self.registry.cancel(id)
    }

    /// Cancels every live job touching `uid`, any kind. Used when a page is
    /// removed from the working set.
    pub fn cancel_for_uid(&self, uid: PageUid) -> usize {
        let ids: Vec<JobId> = {
            let state = self.state.lock().unwrap();
            state
                .keys
                .iter()
                .filter(|(_, key)| key.uid == uid)
                .map(|(id, _)| *id)
                .collect()
        };

        let mut cancelled = 0;
        for id in ids {
            if self.registry.cancel(id) {
                cancelled += 1;
            }
        }
        cancelled
    }

    /// Cancels every live job whose generation stamp is older than
    /// `current`. Used when a document closes.
    pub fn cancel_generations_before(&self, current: Generation) -> usize {
        let ids: Vec<JobId> = {
            let state = self.state.lock().unwrap();
            state
                .generations
                .iter()
                .filter(|(_, generation)| **generation < current)
                .map(|(id, _)| *id)
                .collect()
        };

        let mut cancelled = 0;
        for id in ids {
            if self.registry.cancel(id) {
                cancelled += 1;
            }
        }
        if cancelled > 0 {
            debug!(cancelled, "cancelled jobs from closed generations");
        }
        cancelled
    }

    pub fn cancel_all(&self) {
        self.registry.cancel_all();
    }

    /// Jobs queued but not yet handed to a worker.
    pub fn queued_len(&self) -> usize {
        self.state.lock().unwrap().heap.len()
    }

    /// Jobs queued or running.
    pub fn live_len(&self) -> usize {
        self.state.lock().unwrap().keys.len()
    }

    pub fn is_idle(&self) -> bool {
        self.live_len() == 0
    }

    pub(crate) fn token(&self, id: JobId) -> Option<CancellationToken> {
        self.registry.token(id)
    }
}
