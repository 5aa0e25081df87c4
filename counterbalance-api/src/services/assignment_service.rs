//! Assignment Service
//!
//! Allocation of a group and rotation counter to a new participant.

use std::collections::BTreeMap;
use std::time::Instant;

use chrono::Utc;
use counterbalance_core::{
    choose_least_loaded, latin_square_rotation, AssignmentError, AssignmentId, AssignmentRecord,
    AssignmentResult, GroupId, GroupLoad, StimulusCounts,
};
use counterbalance_storage::AssignmentStore;
use serde::{Deserialize, Serialize};

use crate::config::{AllocationMode, AssignmentConfig};
use crate::telemetry::metrics::with_metrics;

/// A committed allocation together with its stimulus orders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct Assignment {
    pub group: GroupId,
    pub assignment_id: AssignmentId,
    pub rotation_counter: i64,
    /// 1-based question order.
    pub question_array: Vec<u32>,
    /// 1-based syntax order, rotated opposite to the questions.
    pub syntax_array: Vec<u32>,
    /// True when an abandoned slot was handed out again.
    pub reclaimed: bool,
}

/// Per-group load as seen by operators.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct AssignmentStats {
    pub mode: String,
    /// Every configured group, including ones with no records yet.
    pub groups: BTreeMap<String, GroupLoad>,
}

/// Resolve the requested group, or `None` when the balancer should choose.
///
/// Runs before any lock is taken.
fn requested_group(
    config: &AssignmentConfig,
    group: Option<&str>,
) -> AssignmentResult<Option<GroupId>> {
    match group.map(str::trim).filter(|g| !g.is_empty()) {
        Some(raw) => config.groups.resolve(raw).map(Some),
        None => match config.mode {
            AllocationMode::Balanced => Ok(None),
            AllocationMode::ClientAssigned => Err(AssignmentError::invalid_input(
                "group",
                "a group is required in client-assigned mode",
            )),
        },
    }
}

/// Allocate a group and rotation counter and return the stimulus orders.
///
/// Balancing, reclamation and counter assignment run inside one allocation
/// transaction holding the `assignment-balancer` lock. Any failure before
/// commit rolls the transaction back, so no record is left behind.
///
/// # Errors
/// - `InvalidInput` for bad counts or an unknown group (nothing is locked)
/// - `StoreUnavailable` when the store cannot be reached
pub async fn request_assignment(
    store: &dyn AssignmentStore,
    config: &AssignmentConfig,
    group: Option<&str>,
    question_count: i64,
    syntax_count: i64,
) -> AssignmentResult<Assignment> {
    let counts = StimulusCounts::new(question_count, syntax_count)?;
    let requested = requested_group(config, group)?;

    let started = Instant::now();
    let mut session = store.session().await?;
    let mut tx = session.begin_allocation().await?;

    let group = match requested {
        Some(group) => group,
        None => {
            let active = tx.active_counts().await?;
            // ThreadRng is !Send; drop it before the next await.
            let chosen = choose_least_loaded(&config.groups, &active, &mut rand::rng())?;
            chosen
        }
    };

    let now = Utc::now();
    let (record, reclaimed) = match tx.oldest_abandoned(&group).await? {
        Some(abandoned) => (tx.reclaim(abandoned.id, now).await?, true),
        None => {
            let counter = tx
                .max_rotation_counter(&group)
                .await?
                .map_or(0, |max| max + 1);
            let record = AssignmentRecord::new(group.clone(), counter, now);
            tx.insert(&record).await?;
            (record, false)
        }
    };

    tx.commit().await?;
    let elapsed = started.elapsed();

    with_metrics(|m| m.record_allocation(record.group.as_str(), reclaimed, elapsed.as_secs_f64()));
    tracing::info!(
        group = %record.group,
        assignment_id = %record.id,
        counter = record.rotation_counter,
        reclaimed,
        elapsed_ms = elapsed.as_millis(),
        "Assignment allocated"
    );

    let rotation = latin_square_rotation(record.rotation_counter, counts);
    Ok(Assignment {
        group: record.group,
        assignment_id: record.id,
        rotation_counter: record.rotation_counter,
        question_array: rotation.question_order,
        syntax_array: rotation.syntax_order,
        reclaimed,
    })
}

/// Fetch a single assignment record.
pub async fn get_assignment(
    store: &dyn AssignmentStore,
    id: AssignmentId,
) -> AssignmentResult<AssignmentRecord> {
    store
        .get(id)
        .await?
        .ok_or_else(|| AssignmentError::not_found("Assignment", id))
}

/// Lock-free load snapshot for every configured group.
///
/// Groups that only exist in the store (e.g. removed from configuration) are
/// reported too.
pub async fn assignment_stats(
    store: &dyn AssignmentStore,
    config: &AssignmentConfig,
) -> AssignmentResult<AssignmentStats> {
    let loads = store.group_loads().await?;
    let mut groups: BTreeMap<String, GroupLoad> = config
        .groups
        .iter()
        .map(|g| (g.to_string(), GroupLoad::default()))
        .collect();
    for (group, load) in loads {
        groups.insert(group.to_string(), load);
    }
    Ok(AssignmentStats {
        mode: config.mode.to_string(),
        groups,
    })
}
