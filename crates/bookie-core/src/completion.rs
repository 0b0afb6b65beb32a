//! One-shot completion handles for journal-backed writes.
//!
//! `completion_pair` returns the two halves of a single outcome: the
//! `Resolver` is owned by whoever will decide the outcome (the journal
//! thread), the `Completion` is handed to the caller and may be cloned and
//! awaited from any number of threads. Resolution happens exactly once:
//! `Resolver::resolve` consumes the resolver, and a resolver dropped without
//! resolving settles its completion with `StorageError::ShuttingDown`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::error::{StorageError, StorageResult};

#[derive(Debug, Default)]
struct Shared {
    outcome: Mutex<Option<StorageResult<()>>>,
    resolved: Condvar,
}

impl Shared {
    fn settle(&self, result: StorageResult<()>) {
        let mut outcome = self.outcome.lock();
        if outcome.is_none() {
            *outcome = Some(result);
            self.resolved.notify_all();
        }
    }
}

/// Create an unresolved completion and the resolver that settles it.
pub fn completion_pair() -> (Resolver, Completion) {
    let shared = Arc::new(Shared::default());
    (
        Resolver { shared: Some(Arc::clone(&shared)) },
        Completion { shared },
    )
}

/// Write side of a completion. Not cloneable.
#[derive(Debug)]
pub struct Resolver {
    shared: Option<Arc<Shared>>,
}

impl Resolver {
    pub fn resolve(mut self, result: StorageResult<()>) {
        if let Some(shared) = self.shared.take() {
            shared.settle(result);
        }
    }
}

impl Drop for Resolver {
    fn drop(&mut self) {
        if let Some(shared) = self.shared.take() {
            shared.settle(Err(StorageError::ShuttingDown));
        }
    }
}

/// Read side of a completion.
#[derive(Debug, Clone)]
pub struct Completion {
    shared: Arc<Shared>,
}

impl Completion {
    /// An already-settled completion.
    pub fn ready(result: StorageResult<()>) -> Self {
        let shared = Shared {
            outcome: Mutex::new(Some(result)),
            resolved: Condvar::new(),
        };
        Completion { shared: Arc::new(shared) }
    }

    pub fn is_resolved(&self) -> bool {
        self.shared.outcome.lock().is_some()
    }

    /// The outcome if already settled, without blocking.
    pub fn try_result(&self) -> Option<StorageResult<()>> {
        self.shared.outcome.lock().clone()
    }

    /// Block until the outcome is settled.
    pub fn wait(&self) -> StorageResult<()> {
        let mut outcome = self.shared.outcome.lock();
        loop {
            if let Some(result) = outcome.as_ref() {
                return result.clone();
            }
            self.shared.resolved.wait(&mut outcome);
        }
    }

    /// Block for at most `timeout`; `None` if still unresolved afterwards.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<StorageResult<()>> {
        let deadline = Instant::now() + timeout;
        let mut outcome = self.shared.outcome.lock();
        loop {
            if let Some(result) = outcome.as_ref() {
                return Some(result.clone());
            }
            if self.shared.resolved.wait_until(&mut outcome, deadline).timed_out() {
                return outcome.clone();
            }
        }
    }
}
