//! Integration tests against a live PostgreSQL.
//!
//! Requires the `db-tests` feature and `DB_TESTS=1`; connection settings are
//! read from `COUNTERBALANCE_DB_*`.

#![cfg(feature = "db-tests")]

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{Duration, Utc};
use counterbalance_api::jobs::{sweep_once, ReaperConfig, ReaperPolicy};
use counterbalance_api::services::{record_completion, request_assignment};
use counterbalance_api::AllocationMode;
use counterbalance_core::{AssignmentError, AssignmentRecord};
use counterbalance_storage::AssignmentStore;
use counterbalance_test_utils::{assertions, fixtures};

#[path = "support/db.rs"]
mod test_db_support;
use test_db_support::{db_tests_enabled, isolated_config, test_db_client};

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn pg_concurrent_allocations_are_serialized() -> Result<(), String> {
    if !db_tests_enabled() {
        return Ok(());
    }
    let db = test_db_client().await?;
    let config = Arc::new(isolated_config(AllocationMode::Balanced)?);

    let mut handles = Vec::new();
    for _ in 0..30 {
        let db = db.clone();
        let config = Arc::clone(&config);
        handles.push(tokio::spawn(async move {
            request_assignment(&db, &config, None, 5, 7).await
        }));
    }

    let mut per_group: HashMap<String, Vec<i64>> = HashMap::new();
    for handle in handles {
        let assignment = handle
            .await
            .map_err(|e| format!("task panicked: {}", e))?
            .map_err(|e| format!("allocation failed: {}", e))?;
        per_group
            .entry(assignment.group.to_string())
            .or_default()
            .push(assignment.rotation_counter);
    }

    assert_eq!(per_group.len(), 3);
    for counters in per_group.values_mut() {
        counters.sort_unstable();
        assert_eq!(*counters, (0..10).collect::<Vec<i64>>());
    }
    Ok(())
}

#[tokio::test]
async fn pg_completion_then_duplicate_conflicts() -> Result<(), String> {
    if !db_tests_enabled() {
        return Ok(());
    }
    let db = test_db_client().await?;
    let config = isolated_config(AllocationMode::Balanced)?;

    let assignment = request_assignment(&db, &config, None, 5, 7)
        .await
        .map_err(|e| e.to_string())?;
    let ids = vec![assignment.assignment_id];

    let results = record_completion(&db, &config, ids.clone(), fixtures::submission())
        .await
        .map_err(|e| e.to_string())?;
    let stored = db
        .get_results(results.id)
        .await
        .map_err(|e| e.to_string())?
        .ok_or("results not stored")?;
    assert_eq!(stored.submission.question_ids, vec![2, 0, 1]);
    assert_eq!(stored.assignment_ids, ids);

    let duplicate = record_completion(&db, &config, ids, fixtures::submission()).await;
    assert!(matches!(duplicate, Err(AssignmentError::AlreadyCompleted { .. })));
    Ok(())
}

#[tokio::test]
async fn pg_reaper_marks_then_allocation_reclaims() -> Result<(), String> {
    if !db_tests_enabled() {
        return Ok(());
    }
    let db = test_db_client().await?;
    let config = isolated_config(AllocationMode::Balanced)?;
    let group = config
        .groups
        .iter()
        .next()
        .cloned()
        .ok_or("no groups configured")?;

    let assignment = request_assignment(&db, &config, Some(group.as_str()), 5, 7)
        .await
        .map_err(|e| e.to_string())?;

    // Sweep "two hours from now" so the fresh record is already stale.
    let reaper = ReaperConfig {
        policy: ReaperPolicy::MarkAbandoned,
        ..ReaperConfig::default()
    };
    let reaped = sweep_once(&db, &reaper, Utc::now() + Duration::hours(2))
        .await
        .map_err(|e| e.to_string())?;
    let ours: Vec<&AssignmentRecord> = reaped
        .iter()
        .filter(|r| r.id == assignment.assignment_id)
        .collect();
    assert_eq!(ours.len(), 1);
    assert!(ours[0].abandoned);

    let next = request_assignment(&db, &config, Some(group.as_str()), 5, 7)
        .await
        .map_err(|e| e.to_string())?;
    assert!(next.reclaimed);
    assert_ne!(next.assignment_id, assignment.assignment_id);
    assert_eq!(next.rotation_counter, 0);

    let late = record_completion(&db, &config, vec![assignment.assignment_id], fixtures::submission()).await;
    assertions::assert_not_found(&late);
    record_completion(&db, &config, vec![next.assignment_id], fixtures::submission())
        .await
        .map_err(|e| e.to_string())?;
    Ok(())
}
