//! Completion Service
//!
//! Records a participant's results and closes the assignments they used.

use chrono::Utc;
use counterbalance_core::{
    AssignmentError, AssignmentId, AssignmentResult, ParticipantResults, ResultId,
    ResultsSubmission,
};
use counterbalance_storage::AssignmentStore;

use crate::config::AssignmentConfig;
use crate::constants::MAX_COMPLETION_IDS;
use crate::telemetry::metrics::with_metrics;

fn outcome_label(result: &AssignmentResult<ParticipantResults>) -> &'static str {
    match result {
        Ok(_) => "recorded",
        Err(AssignmentError::AlreadyCompleted { .. }) => "already_completed",
        Err(AssignmentError::NotFound { .. }) => "not_found",
        Err(AssignmentError::InvalidInput { .. }) => "invalid",
        Err(_) => "error",
    }
}

/// Drop repeated ids, keeping first-seen order.
fn dedup_ids(ids: Vec<AssignmentId>) -> Vec<AssignmentId> {
    let mut unique = Vec::with_capacity(ids.len());
    for id in ids {
        if !unique.contains(&id) {
            unique.push(id);
        }
    }
    unique
}

fn validate(
    config: &AssignmentConfig,
    ids: &[AssignmentId],
    submission: &ResultsSubmission,
) -> AssignmentResult<()> {
    if ids.is_empty() {
        return Err(AssignmentError::invalid_input(
            "assignmentIds",
            "at least one assignment id is required",
        ));
    }
    if ids.len() > MAX_COMPLETION_IDS {
        return Err(AssignmentError::invalid_input(
            "assignmentIds",
            format!("at most {} assignment ids per completion", MAX_COMPLETION_IDS),
        ));
    }
    submission.validate()?;
    if let Some(group) = &submission.group {
        if !config.groups.contains(group) {
            return Err(AssignmentError::invalid_input(
                "group",
                format!("unknown group {}", group),
            ));
        }
    }
    Ok(())
}

/// Persist results and mark every referenced assignment completed.
///
/// Duplicate ids are collapsed. The store applies the whole change or
/// nothing; a repeated submission for the same assignment fails with
/// `AlreadyCompleted` and writes no second result.
pub async fn record_completion(
    store: &dyn AssignmentStore,
    config: &AssignmentConfig,
    ids: Vec<AssignmentId>,
    submission: ResultsSubmission,
) -> AssignmentResult<ParticipantResults> {
    let ids = dedup_ids(ids);
    let result = match validate(config, &ids, &submission) {
        Ok(()) => store.record_completion(&ids, &submission, Utc::now()).await,
        Err(e) => Err(e),
    };

    with_metrics(|m| m.record_completion(outcome_label(&result)));
    match &result {
        Ok(results) => tracing::info!(
            result_id = %results.id,
            assignments = results.assignment_ids.len(),
            "Completion recorded"
        ),
        Err(AssignmentError::AlreadyCompleted { id }) => {
            tracing::warn!(assignment_id = %id, "Duplicate completion rejected")
        }
        Err(e) => tracing::debug!(error = %e, "Completion rejected"),
    }
    result
}

/// Fetch stored results by id.
pub async fn get_results(
    store: &dyn AssignmentStore,
    id: ResultId,
) -> AssignmentResult<ParticipantResults> {
    store
        .get_results(id)
        .await?
        .ok_or_else(|| AssignmentError::not_found("Results", id))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AllocationMode;
    use crate::services::request_assignment;
    use crate::jobs::{sweep_once, ReaperConfig};
    use counterbalance_core::{GroupId, GroupSet, ParticipantProfile, ProgrammingLanguage, Sex};
    use counterbalance_storage::InMemoryAssignmentStore;
    use counterbalance_test_utils::{assertions, fixtures};

    fn config() -> AssignmentConfig {
        let groups = GroupSet::parse_list("AngleBracket,Backslash").expect("valid groups");
        AssignmentConfig::new(groups, AllocationMode::Balanced)
    }

    fn submission() -> ResultsSubmission {
        ResultsSubmission {
            profile: ParticipantProfile {
                years_programming: 3,
                age: 24,
                sex: Sex::Other,
                language: ProgrammingLanguage::Python,
                email: Some("p@example.org".to_string()),
            },
            group: None,
            accuracy: 0.5,
            task_accuracy: vec![true, false],
            question_ids: vec![4, 2],
            durations_ms: vec![1200, 950],
            total_time_ms: 2150,
        }
    }

    #[test]
    fn test_dedup_keeps_first_seen_order() {
        let a = AssignmentId::now_v7();
        let b = AssignmentId::now_v7();
        assert_eq!(dedup_ids(vec![b, a, b, a]), vec![b, a]);
    }

    #[tokio::test]
    async fn test_record_then_duplicate() {
        let store = InMemoryAssignmentStore::new();
        let config = config();
        let assignment = request_assignment(&store, &config, None, 5, 7)
            .await
            .expect("allocation");

        let stored = record_completion(&store, &config, vec![assignment.assignment_id], submission())
            .await
            .expect("first completion");
        assert_eq!(stored.assignment_ids, vec![assignment.assignment_id]);

        let err = record_completion(&store, &config, vec![assignment.assignment_id], submission())
            .await
            .expect_err("second completion");
        assert!(matches!(err, AssignmentError::AlreadyCompleted { .. }));
        assert_eq!(store.results_count(), Ok(1));

        let fetched = get_results(&store, stored.id).await.expect("stored results");
        assert_eq!(fetched, stored);
    }

    #[tokio::test]
    async fn test_repeated_id_in_one_request_is_collapsed() {
        let store = InMemoryAssignmentStore::new();
        let config = config();
        let assignment = request_assignment(&store, &config, None, 5, 7)
            .await
            .expect("allocation");
        let id = assignment.assignment_id;

        let stored = record_completion(&store, &config, vec![id, id], submission())
            .await
            .expect("completion");
        assert_eq!(stored.assignment_ids, vec![id]);
    }

    #[tokio::test]
    async fn test_rejects_empty_and_oversized_id_lists() {
        let store = InMemoryAssignmentStore::new();
        let config = config();

        let err = record_completion(&store, &config, Vec::new(), submission())
            .await
            .expect_err("empty");
        assert!(matches!(err, AssignmentError::InvalidInput { .. }));

        let many: Vec<AssignmentId> = (0..=MAX_COMPLETION_IDS).map(|_| AssignmentId::now_v7()).collect();
        let err = record_completion(&store, &config, many, submission())
            .await
            .expect_err("too many");
        assert!(matches!(err, AssignmentError::InvalidInput { .. }));
    }

    #[tokio::test]
    async fn test_rejects_unknown_reported_group() {
        let store = InMemoryAssignmentStore::new();
        let config = config();
        let assignment = request_assignment(&store, &config, None, 5, 7)
            .await
            .expect("allocation");

        let mut bad = submission();
        bad.group = Some(GroupId::new("TemplateLiteral").expect("well-formed"));
        let result = record_completion(&store, &config, vec![assignment.assignment_id], bad).await;
        assertions::assert_invalid_input(&result, "group");
        assert_eq!(store.results_count(), Ok(0));
    }

    #[tokio::test]
    async fn test_unknown_assignment_writes_nothing() {
        let store = InMemoryAssignmentStore::new();
        let err = record_completion(&store, &config(), vec![AssignmentId::now_v7()], submission())
            .await
            .expect_err("unknown");
        assert!(matches!(err, AssignmentError::NotFound { .. }));
        assert_eq!(store.results_count(), Ok(0));
    }

    #[tokio::test]
    async fn test_completes_several_assignments_together() {
        let store = InMemoryAssignmentStore::new();
        let config = config();
        let first = request_assignment(&store, &config, Some("AngleBracket"), 5, 7)
            .await
            .expect("first allocation");
        let second = request_assignment(&store, &config, Some("Backslash"), 5, 7)
            .await
            .expect("second allocation");
        let ids = vec![first.assignment_id, second.assignment_id];

        let stored = record_completion(&store, &config, ids.clone(), submission())
            .await
            .expect("completion");

        assert_eq!(stored.assignment_ids, ids);
        for id in ids {
            let record = store.get(id).await.expect("lookup").expect("record");
            assert!(record.completed);
        }
        assert_eq!(store.results_count(), Ok(1));
    }

    #[tokio::test]
    async fn test_one_completed_id_rejects_the_whole_list() {
        let store = InMemoryAssignmentStore::new();
        let config = config();
        let done = request_assignment(&store, &config, None, 5, 7)
            .await
            .expect("allocation");
        let fresh = request_assignment(&store, &config, None, 5, 7)
            .await
            .expect("allocation");
        record_completion(&store, &config, vec![done.assignment_id], submission())
            .await
            .expect("first completion");

        let result = record_completion(
            &store,
            &config,
            vec![fresh.assignment_id, done.assignment_id],
            submission(),
        )
        .await;

        assert!(matches!(result, Err(AssignmentError::AlreadyCompleted { .. })));
        let record = store
            .get(fresh.assignment_id)
            .await
            .expect("lookup")
            .expect("record");
        assert!(!record.completed);
        assert_eq!(store.results_count(), Ok(1));
    }

    #[tokio::test]
    async fn test_late_submission_cannot_take_reclaimed_slot() {
        let store = InMemoryAssignmentStore::new();
        let config = config();
        let claimed_at = Utc::now() - chrono::Duration::hours(2);
        let original = fixtures::record("Backslash", 0, claimed_at);
        let original_id = original.id;
        store.seed(original).expect("seed");

        let reaped = sweep_once(&store, &ReaperConfig::default(), Utc::now())
            .await
            .expect("sweep");
        assert_eq!(reaped.len(), 1);

        let reclaimed = request_assignment(&store, &config, Some("Backslash"), 5, 7)
            .await
            .expect("reclaim");
        assert!(reclaimed.reclaimed);
        assert_eq!(reclaimed.rotation_counter, 0);
        assert_ne!(reclaimed.assignment_id, original_id);

        let late = record_completion(&store, &config, vec![original_id], submission()).await;
        assertions::assert_not_found(&late);

        let stored = record_completion(&store, &config, vec![reclaimed.assignment_id], submission())
            .await
            .expect("new claimant completes");
        assert_eq!(stored.assignment_ids, vec![reclaimed.assignment_id]);
        assert_eq!(store.results_count(), Ok(1));
    }

    #[tokio::test]
    async fn test_unavailable_store_is_retryable() {
        let store = InMemoryAssignmentStore::new();
        store.set_unavailable(true);
        let result = record_completion(&store, &config(), vec![AssignmentId::now_v7()], submission()).await;
        assertions::assert_store_unavailable(&result);
    }

    #[tokio::test]
    async fn test_missing_results_are_not_found() {
        let store = InMemoryAssignmentStore::new();
        let err = get_results(&store, ResultId::now_v7()).await.expect_err("missing");
        assert!(matches!(err, AssignmentError::NotFound { entity: "Results", .. }));
    }
}
