//! In-memory assignment store.
//!
//! Tables live behind a `std::sync::RwLock` that is never held across an
//! await point. Allocation transactions take the named lock from the
//! [`LockGate`], stage their writes privately and apply them in one critical
//! section on commit. Used by tests and by the `memory` store mode.

use crate::gate::{LockGate, LockGuard};
use crate::store::{AllocationTx, AssignmentStore, StoreSession};
use async_trait::async_trait;
use counterbalance_core::{
    AdvisoryLockName, AssignmentError, AssignmentId, AssignmentRecord, AssignmentResult, GroupId,
    GroupLoad, ParticipantResults, ResultId, ResultsSubmission, Timestamp,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

#[derive(Debug, Default)]
struct Tables {
    assignments: HashMap<AssignmentId, AssignmentRecord>,
    results: HashMap<ResultId, ParticipantResults>,
}

impl Tables {
    fn counter_taken(&self, group: &GroupId, counter: i64) -> bool {
        self.assignments
            .values()
            .any(|r| &r.group == group && r.rotation_counter == counter)
    }
}

#[derive(Debug, Default)]
struct Inner {
    tables: RwLock<Tables>,
    gate: Arc<LockGate>,
    unavailable: AtomicBool,
    fail_next_commit: AtomicBool,
}

impl Inner {
    fn check_available(&self) -> AssignmentResult<()> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(AssignmentError::store_unavailable("in-memory store is offline"));
        }
        Ok(())
    }

    fn read(&self) -> AssignmentResult<RwLockReadGuard<'_, Tables>> {
        self.check_available()?;
        self.tables
            .read()
            .map_err(|_| AssignmentError::storage("assignment tables lock poisoned"))
    }

    fn write(&self) -> AssignmentResult<RwLockWriteGuard<'_, Tables>> {
        self.check_available()?;
        self.tables
            .write()
            .map_err(|_| AssignmentError::storage("assignment tables lock poisoned"))
    }
}

/// Thread-safe in-memory store. Clones share the same tables and lock gate.
#[derive(Debug, Clone, Default)]
pub struct InMemoryAssignmentStore {
    inner: Arc<Inner>,
}

impl InMemoryAssignmentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Share an existing gate, e.g. to contend with a lock held by a test.
    pub fn with_gate(gate: Arc<LockGate>) -> Self {
        Self {
            inner: Arc::new(Inner {
                gate,
                ..Inner::default()
            }),
        }
    }

    pub fn lock_gate(&self) -> Arc<LockGate> {
        Arc::clone(&self.inner.gate)
    }

    /// Simulate losing the backing store. Every operation fails with
    /// `StoreUnavailable` while set.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.inner.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make the next allocation commit fail after its writes were staged.
    pub fn fail_next_commit(&self) {
        self.inner.fail_next_commit.store(true, Ordering::SeqCst);
    }

    /// Insert a record directly, bypassing allocation. For test fixtures.
    pub fn seed(&self, record: AssignmentRecord) -> AssignmentResult<()> {
        let mut tables = self.inner.write()?;
        if tables.counter_taken(&record.group, record.rotation_counter) {
            return Err(AssignmentError::storage(format!(
                "rotation counter {} already issued in group {}",
                record.rotation_counter, record.group
            )));
        }
        tables.assignments.insert(record.id, record);
        Ok(())
    }

    /// Snapshot of every record, ordered by group then counter.
    pub fn records(&self) -> AssignmentResult<Vec<AssignmentRecord>> {
        let tables = self.inner.read()?;
        let mut records: Vec<AssignmentRecord> = tables.assignments.values().cloned().collect();
        records.sort_by(|a, b| {
            a.group
                .cmp(&b.group)
                .then(a.rotation_counter.cmp(&b.rotation_counter))
        });
        Ok(records)
    }

    pub fn assignment_count(&self) -> AssignmentResult<usize> {
        Ok(self.inner.read()?.assignments.len())
    }

    pub fn results_count(&self) -> AssignmentResult<usize> {
        Ok(self.inner.read()?.results.len())
    }

    fn take_stale(&self, cutoff: Timestamp, delete: bool) -> AssignmentResult<Vec<AssignmentRecord>> {
        let mut tables = self.inner.write()?;
        let stale: Vec<AssignmentId> = tables
            .assignments
            .values()
            .filter(|r| r.is_reapable(cutoff))
            .map(|r| r.id)
            .collect();

        let mut affected = Vec::with_capacity(stale.len());
        for id in stale {
            if delete {
                if let Some(record) = tables.assignments.remove(&id) {
                    affected.push(record);
                }
            } else if let Some(record) = tables.assignments.get_mut(&id) {
                record.abandoned = true;
                affected.push(record.clone());
            }
        }
        Ok(affected)
    }
}

#[async_trait]
impl AssignmentStore for InMemoryAssignmentStore {
    async fn session(&self) -> AssignmentResult<Box<dyn StoreSession>> {
        self.inner.check_available()?;
        Ok(Box::new(MemorySession {
            inner: Arc::clone(&self.inner),
        }))
    }

    async fn get(&self, id: AssignmentId) -> AssignmentResult<Option<AssignmentRecord>> {
        Ok(self.inner.read()?.assignments.get(&id).cloned())
    }

    async fn record_completion(
        &self,
        ids: &[AssignmentId],
        submission: &ResultsSubmission,
        now: Timestamp,
    ) -> AssignmentResult<ParticipantResults> {
        if ids.is_empty() {
            return Err(AssignmentError::invalid_input(
                "assignmentIds",
                "at least one assignment id is required",
            ));
        }

        let mut tables = self.inner.write()?;
        for id in ids {
            match tables.assignments.get(id) {
                None => return Err(AssignmentError::not_found("Assignment", id)),
                Some(record) if record.completed => {
                    return Err(AssignmentError::already_completed(id))
                }
                Some(_) => {}
            }
        }

        let results = ParticipantResults::new(ids.to_vec(), submission.clone(), now);
        for id in ids {
            if let Some(record) = tables.assignments.get_mut(id) {
                record.completed = true;
                record.abandoned = false;
            }
        }
        tables.results.insert(results.id, results.clone());
        Ok(results)
    }

    async fn get_results(&self, id: ResultId) -> AssignmentResult<Option<ParticipantResults>> {
        Ok(self.inner.read()?.results.get(&id).cloned())
    }

    async fn mark_stale_abandoned(&self, cutoff: Timestamp) -> AssignmentResult<Vec<AssignmentRecord>> {
        self.take_stale(cutoff, false)
    }

    async fn delete_stale(&self, cutoff: Timestamp) -> AssignmentResult<Vec<AssignmentRecord>> {
        self.take_stale(cutoff, true)
    }

    async fn group_loads(&self) -> AssignmentResult<HashMap<GroupId, GroupLoad>> {
        let tables = self.inner.read()?;
        let mut loads: HashMap<GroupId, GroupLoad> = HashMap::new();
        for record in tables.assignments.values() {
            loads.entry(record.group.clone()).or_default().observe(record);
        }
        Ok(loads)
    }

    async fn health_check(&self) -> AssignmentResult<()> {
        self.inner.read().map(|_| ())
    }
}

// ============================================================================
// SESSION / TRANSACTION
// ============================================================================

struct MemorySession {
    inner: Arc<Inner>,
}

#[async_trait]
impl StoreSession for MemorySession {
    async fn begin_allocation<'a>(&'a mut self) -> AssignmentResult<Box<dyn AllocationTx + 'a>> {
        self.inner.check_available()?;
        let guard = self
            .inner
            .gate
            .acquire(AdvisoryLockName::ASSIGNMENT_BALANCER)
            .await;
        Ok(Box::new(MemoryAllocationTx {
            inner: self.inner.as_ref(),
            guard: Some(guard),
            staged: Vec::new(),
        }))
    }
}

#[derive(Debug)]
enum Staged {
    Insert(AssignmentRecord),
    /// `record` replaces the abandoned row `previous` under a new id.
    Reclaim {
        previous: AssignmentId,
        record: AssignmentRecord,
    },
}

impl Staged {
    fn apply(self, assignments: &mut HashMap<AssignmentId, AssignmentRecord>) {
        match self {
            Staged::Insert(record) => {
                assignments.insert(record.id, record);
            }
            Staged::Reclaim { previous, record } => {
                assignments.remove(&previous);
                assignments.insert(record.id, record);
            }
        }
    }
}

struct MemoryAllocationTx<'a> {
    inner: &'a Inner,
    guard: Option<LockGuard>,
    staged: Vec<Staged>,
}

impl MemoryAllocationTx<'_> {
    fn ensure_open(&self) -> AssignmentResult<()> {
        if self.guard.is_none() {
            return Err(AssignmentError::storage("allocation transaction already finished"));
        }
        self.inner.check_available()
    }

    /// Committed records with this transaction's staged writes applied.
    fn view(&self) -> AssignmentResult<HashMap<AssignmentId, AssignmentRecord>> {
        self.ensure_open()?;
        let mut view = self.inner.read()?.assignments.clone();
        for staged in &self.staged {
            match staged {
                Staged::Insert(record) => {
                    view.insert(record.id, record.clone());
                }
                Staged::Reclaim { previous, record } => {
                    view.remove(previous);
                    view.insert(record.id, record.clone());
                }
            }
        }
        Ok(view)
    }

    fn validate(tables: &Tables, staged: &[Staged]) -> AssignmentResult<()> {
        for write in staged {
            match write {
                Staged::Insert(record) => {
                    if tables.assignments.contains_key(&record.id)
                        || tables.counter_taken(&record.group, record.rotation_counter)
                    {
                        return Err(AssignmentError::storage(format!(
                            "rotation counter {} already issued in group {}",
                            record.rotation_counter, record.group
                        )));
                    }
                }
                Staged::Reclaim { previous, .. } => match tables.assignments.get(previous) {
                    Some(current) if current.abandoned => {}
                    // Completed by a late finisher (or deleted) since it was read.
                    _ => {
                        return Err(AssignmentError::store_unavailable(format!(
                            "assignment {} changed while being reclaimed",
                            previous
                        )))
                    }
                },
            }
        }
        Ok(())
    }
}

#[async_trait]
impl AllocationTx for MemoryAllocationTx<'_> {
    async fn active_counts(&mut self) -> AssignmentResult<HashMap<GroupId, u64>> {
        let mut counts: HashMap<GroupId, u64> = HashMap::new();
        for record in self.view()?.values().filter(|r| r.is_active()) {
            *counts.entry(record.group.clone()).or_insert(0) += 1;
        }
        Ok(counts)
    }

    async fn oldest_abandoned(&mut self, group: &GroupId) -> AssignmentResult<Option<AssignmentRecord>> {
        Ok(self
            .view()?
            .into_values()
            .filter(|r| &r.group == group && r.abandoned)
            .min_by_key(|r| r.rotation_counter))
    }

    async fn reclaim(&mut self, id: AssignmentId, now: Timestamp) -> AssignmentResult<AssignmentRecord> {
        let mut record = self
            .view()?
            .remove(&id)
            .ok_or_else(|| AssignmentError::not_found("Assignment", id))?;
        if !record.abandoned {
            return Err(AssignmentError::storage(format!(
                "assignment {} is not abandoned",
                id
            )));
        }
        record.reclaim(now);
        self.staged.push(Staged::Reclaim {
            previous: id,
            record: record.clone(),
        });
        Ok(record)
    }

    async fn max_rotation_counter(&mut self, group: &GroupId) -> AssignmentResult<Option<i64>> {
        Ok(self
            .view()?
            .values()
            .filter(|r| &r.group == group)
            .map(|r| r.rotation_counter)
            .max())
    }

    async fn insert(&mut self, record: &AssignmentRecord) -> AssignmentResult<()> {
        let view = self.view()?;
        let clash = view.contains_key(&record.id)
            || view
                .values()
                .any(|r| r.group == record.group && r.rotation_counter == record.rotation_counter);
        if clash {
            return Err(AssignmentError::storage(format!(
                "rotation counter {} already issued in group {}",
                record.rotation_counter, record.group
            )));
        }
        self.staged.push(Staged::Insert(record.clone()));
        Ok(())
    }

    async fn commit(&mut self) -> AssignmentResult<()> {
        self.ensure_open()?;
        let staged = std::mem::take(&mut self.staged);
        // Whatever happens below, the transaction is over once commit starts.
        let _guard = self.guard.take();

        if self.inner.fail_next_commit.swap(false, Ordering::SeqCst) {
            return Err(AssignmentError::store_unavailable("commit failed"));
        }

        let mut tables = self.inner.write()?;
        Self::validate(&tables, &staged)?;
        for write in staged {
            write.apply(&mut tables.assignments);
        }
        Ok(())
    }
}

impl Drop for MemoryAllocationTx<'_> {
    fn drop(&mut self) {
        if self.guard.is_some() && !self.staged.is_empty() {
            tracing::debug!(
                writes = self.staged.len(),
                "allocation transaction dropped without commit, rolling back"
            );
        }
    }
}
