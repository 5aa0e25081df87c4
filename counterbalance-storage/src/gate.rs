//! In-process advisory lock gate.
//!
//! The in-memory counterpart of `pg_advisory_xact_lock`: one async mutex per
//! named lock, created on first use. Acquisition waits rather than fails, and
//! the guard releases the lock when dropped, so every exit path of the holder
//! (commit, error, panic unwind) lets the next waiter in.

use counterbalance_core::AdvisoryLockName;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Registry of named advisory locks.
#[derive(Debug, Default)]
pub struct LockGate {
    locks: Mutex<HashMap<i64, Arc<AsyncMutex<()>>>>,
}

impl LockGate {
    pub fn new() -> Self {
        Self::default()
    }

    fn slot(&self, name: AdvisoryLockName) -> Arc<AsyncMutex<()>> {
        // The registry only maps keys to mutexes; a panic elsewhere cannot
        // leave it half-updated, so a poisoned registry is still usable.
        let mut locks = self
            .locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        Arc::clone(locks.entry(name.key).or_default())
    }

    /// Wait until `name` is free and take it.
    pub async fn acquire(&self, name: AdvisoryLockName) -> LockGuard {
        let guard = self.slot(name).lock_owned().await;
        tracing::trace!(lock = name.name, key = name.key, "advisory lock acquired");
        LockGuard {
            name,
            _guard: guard,
        }
    }

    /// Take `name` only if nobody holds it.
    pub fn try_acquire(&self, name: AdvisoryLockName) -> Option<LockGuard> {
        self.slot(name)
            .try_lock_owned()
            .ok()
            .map(|guard| LockGuard {
                name,
                _guard: guard,
            })
    }

    pub fn is_held(&self, name: AdvisoryLockName) -> bool {
        self.slot(name).try_lock().is_err()
    }
}

/// Held advisory lock. Released on drop.
#[derive(Debug)]
pub struct LockGuard {
    name: AdvisoryLockName,
    _guard: OwnedMutexGuard<()>,
}

impl LockGuard {
    pub fn name(&self) -> AdvisoryLockName {
        self.name
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        tracing::trace!(lock = self.name.name, "advisory lock released");
    }
}
