//! Cooperative cancellation for background jobs.

use crate::job::JobId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Shared flag checked by workers between units of work. Cloning yields a
/// handle to the same flag.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }
}

/// Tokens for every queued or running job, so jobs can be cancelled by id
/// without holding onto the job itself.
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    tokens: Mutex<HashMap<JobId, CancellationToken>>,
}

impl CancellationRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, id: JobId) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens.lock().unwrap().insert(id, token.clone());
        token
    }

    pub fn token(&self, id: JobId) -> Option<CancellationToken> {
        self.tokens.lock().unwrap().get(&id).cloned()
    }

    pub fn cancel(&self, id: JobId) -> bool {
        if let Some(token) = self.tokens.lock().unwrap().get(&id) {
            token.cancel();
            true
        } else {
            false
        }
    }

    /// Drops the token once its job has finished or been skipped.
    pub fn remove(&self, id: JobId) {
        self.tokens.lock().unwrap().remove(&id);
    }

    pub fn cancel_all(&self) {
        for token in self.tokens.lock().unwrap().values() {
            token.cancel();
        }
    }

    pub fn len(&self) -> usize {
        self.tokens.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tokens.lock().unwrap().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_starts_active_and_stays_cancelled() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());

        token.cancel();
        assert!(token.is_cancelled());

        token.cancel();
        assert!(token.is_cancelled());
    }

    #[test]
    fn cloned_tokens_share_state() {
        let token = CancellationToken::new();
        let clone = token.clone();

        clone.cancel();

        assert!(token.is_cancelled());
    }

    #[test]
    fn registry_cancels_by_id() {
        let registry = CancellationRegistry::new();
        let token = registry.register(JobId(1));

        assert!(registry.cancel(JobId(1)));
        assert!(token.is_cancelled());
        assert!(!registry.cancel(JobId(99)));
    }

    #[test]
    fn removed_token_is_gone_but_holders_keep_state() {
        let registry = CancellationRegistry::new();
        let token = registry.register(JobId(1));

        registry.remove(JobId(1));

        assert!(registry.token(JobId(1)).is_none());
        assert!(!token.is_cancelled());
    }

    #[test]
    fn cancel_all_hits_every_registered_token() {
        let registry = CancellationRegistry::new();
        let first = registry.register(JobId(1));
        let second = registry.register(JobId(2));

        registry.cancel_all();

        assert!(first.is_cancelled());
        assert!(second.is_cancelled());
    }
}
