//! Assignment store abstraction.
//!
//! Allocation is split into three layers so that the balancing and rotation
//! logic can be written once against any backend:
//!
//! - [`AssignmentStore`]: shared handle, non-allocating operations.
//! - [`StoreSession`]: one exclusive connection.
//! - [`AllocationTx`]: a transaction on that connection that holds the
//!   `assignment-balancer` advisory lock from its first statement until
//!   commit or drop. Dropping without committing rolls everything back.

use async_trait::async_trait;
use counterbalance_core::{
    AssignmentId, AssignmentRecord, AssignmentResult, GroupId, GroupLoad, ParticipantResults,
    ResultId, ResultsSubmission, Timestamp,
};
use std::collections::HashMap;

#[async_trait]
pub trait AssignmentStore: Send + Sync {
    /// Check out an exclusive session for allocation.
    async fn session(&self) -> AssignmentResult<Box<dyn StoreSession>>;

    async fn get(&self, id: AssignmentId) -> AssignmentResult<Option<AssignmentRecord>>;

    /// Persist results and mark every referenced record completed, atomically.
    ///
    /// Fails with `NotFound` if any id is unknown and `AlreadyCompleted` if any
    /// record is already completed; in both cases nothing is written. Records
    /// that were abandoned but not reclaimed are accepted and un-abandoned.
    async fn record_completion(
        &self,
        ids: &[AssignmentId],
        submission: &ResultsSubmission,
        now: Timestamp,
    ) -> AssignmentResult<ParticipantResults>;

    async fn get_results(&self, id: ResultId) -> AssignmentResult<Option<ParticipantResults>>;

    /// Mark every incomplete, non-abandoned record claimed before `cutoff` as
    /// abandoned in one atomic statement. Returns the affected records.
    async fn mark_stale_abandoned(&self, cutoff: Timestamp) -> AssignmentResult<Vec<AssignmentRecord>>;

    /// Delete every incomplete, non-abandoned record claimed before `cutoff`.
    async fn delete_stale(&self, cutoff: Timestamp) -> AssignmentResult<Vec<AssignmentRecord>>;

    /// Per-group counts for every group that has records. Lock-free snapshot.
    async fn group_loads(&self) -> AssignmentResult<HashMap<GroupId, GroupLoad>>;

    async fn health_check(&self) -> AssignmentResult<()>;
}

#[async_trait]
pub trait StoreSession: Send {
    /// Open a transaction and block until the balancer lock is held.
    async fn begin_allocation<'a>(&'a mut self) -> AssignmentResult<Box<dyn AllocationTx + 'a>>;
}

/// Reads and writes performed while holding the balancer lock.
///
/// Reads observe this transaction's own uncommitted writes.
#[async_trait]
pub trait AllocationTx: Send {
    /// Non-abandoned record count per group (completed records included).
    async fn active_counts(&mut self) -> AssignmentResult<HashMap<GroupId, u64>>;

    /// The abandoned record with the lowest rotation counter in `group`.
    async fn oldest_abandoned(&mut self, group: &GroupId) -> AssignmentResult<Option<AssignmentRecord>>;

    /// Clear `abandoned`/`completed` and reset the claim time of an abandoned
    /// record, keeping its id and counter.
    async fn reclaim(&mut self, id: AssignmentId, now: Timestamp) -> AssignmentResult<AssignmentRecord>;

    /// Highest counter ever issued in `group`, abandoned records included.
    async fn max_rotation_counter(&mut self, group: &GroupId) -> AssignmentResult<Option<i64>>;

    async fn insert(&mut self, record: &AssignmentRecord) -> AssignmentResult<()>;

    /// Make the writes visible and release the lock. Calling twice is an error.
    async fn commit(&mut self) -> AssignmentResult<()>;
}
