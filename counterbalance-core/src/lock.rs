//! Named advisory locks.
//!
//! Every process that can allocate assignments serialises on the same named
//! lock. Postgres advisory locks are keyed by `i64`, so names are hashed with
//! FNV-1a, which is stable across Rust versions and compilations.

use serde::{Deserialize, Serialize};
use std::fmt;

/// A well-known advisory lock and its derived key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AdvisoryLockName {
    pub name: &'static str,
    pub key: i64,
}

impl AdvisoryLockName {
    /// Guards every read of per-group counts and every allocation write.
    pub const ASSIGNMENT_BALANCER: AdvisoryLockName = AdvisoryLockName::new("assignment-balancer");

    pub const fn new(name: &'static str) -> Self {
        Self {
            name,
            key: advisory_lock_key(name),
        }
    }
}

impl fmt::Display for AdvisoryLockName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.name, self.key)
    }
}

/// Compute a stable i64 key for an advisory lock name using FNV-1a.
pub const fn advisory_lock_key(name: &str) -> i64 {
    const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
    const FNV_PRIME: u64 = 0x100000001b3;

    let bytes = name.as_bytes();
    let mut hash = FNV_OFFSET_BASIS;
    let mut i = 0;
    while i < bytes.len() {
        hash ^= bytes[i] as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
        i += 1;
    }
    hash as i64
}
