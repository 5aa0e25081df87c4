//! Assignment records and derived per-group load.

use crate::{AssignmentId, GroupId, Timestamp};
use serde::{Deserialize, Serialize};

/// One reservation of an experimental slot.
///
/// `rotation_counter` is unique within its group among records that are not
/// abandoned. An abandoned record keeps its counter until the next claimant
/// for the group reclaims it; the claimant gets a fresh id, so a late
/// submission under the old id can never complete the new participant's slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct AssignmentRecord {
    pub id: AssignmentId,
    pub group: GroupId,
    pub rotation_counter: i64,
    pub completed: bool,
    pub abandoned: bool,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub created_at: Timestamp,
    /// Most recent claim. Equal to `created_at` until the record is reclaimed.
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub claimed_at: Timestamp,
}

impl AssignmentRecord {
    pub fn new(group: GroupId, rotation_counter: i64, now: Timestamp) -> Self {
        Self {
            id: AssignmentId::now_v7(),
            group,
            rotation_counter,
            completed: false,
            abandoned: false,
            created_at: now,
            claimed_at: now,
        }
    }

    /// Counts toward its group's load: anything not abandoned, completed or not.
    pub fn is_active(&self) -> bool {
        !self.abandoned
    }

    /// Incomplete, not yet abandoned, and last claimed strictly before `cutoff`.
    pub fn is_reapable(&self, cutoff: Timestamp) -> bool {
        !self.completed && !self.abandoned && self.claimed_at < cutoff
    }

    /// Hand an abandoned slot to a new participant under a fresh id.
    pub fn reclaim(&mut self, now: Timestamp) {
        self.id = AssignmentId::now_v7();
        self.abandoned = false;
        self.completed = false;
        self.claimed_at = now;
    }
}

/// Per-group record counts for operators. `active` is what the balancer
/// compares.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
pub struct GroupLoad {
    pub active: u64,
    pub completed: u64,
    pub abandoned: u64,
}

impl GroupLoad {
    pub fn observe(&mut self, record: &AssignmentRecord) {
        if record.abandoned {
            self.abandoned += 1;
        } else {
            self.active += 1;
        }
        if record.completed {
            self.completed += 1;
        }
    }
}
