//! Counterbalance Test Utilities
//!
//! Shared test infrastructure for the workspace:
//! - Proptest generators for groups, stimulus counts and submissions
//! - Fixtures for common scenarios
//! - Assertions on `AssignmentResult`

// Re-export the in-memory store from its source crate
pub use counterbalance_storage::InMemoryAssignmentStore;

pub use counterbalance_core::{
    AssignmentError, AssignmentId, AssignmentRecord, AssignmentResult, GroupId, GroupSet,
    ParticipantProfile, ProgrammingLanguage, ResultsSubmission, Sex, StimulusCounts, Timestamp,
};

use chrono::Utc;

/// The three bracket-syntax conditions used across the test suites.
pub const TEST_GROUPS: &str = "AngleBracket,Backslash,TemplateLiteral";

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

pub mod generators {
    //! Proptest strategies for the counterbalance domain types.

    use super::*;
    use proptest::prelude::*;
    use uuid::Uuid;

    /// Generate a random AssignmentId.
    pub fn arb_assignment_id() -> impl Strategy<Value = AssignmentId> {
        any::<[u8; 16]>().prop_map(|bytes| AssignmentId::from_uuid(Uuid::from_bytes(bytes)))
    }

    /// Generate a valid group name.
    pub fn arb_group_id() -> impl Strategy<Value = GroupId> {
        "[A-Za-z][A-Za-z0-9_-]{0,15}".prop_filter_map("valid group id", |s| GroupId::new(&s).ok())
    }

    /// Generate a non-empty group set of up to `max` groups.
    pub fn arb_group_set(max: usize) -> impl Strategy<Value = GroupSet> {
        prop::collection::vec(arb_group_id(), 1..=max.max(1))
            .prop_filter_map("non-empty group set", |groups| GroupSet::new(groups).ok())
    }

    /// Generate question/syntax counts in a realistic range.
    pub fn arb_stimulus_counts() -> impl Strategy<Value = StimulusCounts> {
        (1i64..=20, 1i64..=12)
            .prop_filter_map("valid counts", |(q, s)| StimulusCounts::new(q, s).ok())
    }

    /// Generate a Timestamp within 2020-2030.
    pub fn arb_timestamp() -> impl Strategy<Value = Timestamp> {
        (1577836800i64..1893456000i64).prop_map(|secs| {
            chrono::DateTime::from_timestamp(secs, 0).unwrap_or_else(Utc::now)
        })
    }

    pub fn arb_sex() -> impl Strategy<Value = Sex> {
        prop_oneof![Just(Sex::Male), Just(Sex::Female), Just(Sex::Other)]
    }

    pub fn arb_language() -> impl Strategy<Value = ProgrammingLanguage> {
        prop_oneof![
            Just(ProgrammingLanguage::Cpp),
            Just(ProgrammingLanguage::Java),
            Just(ProgrammingLanguage::Csharp),
            Just(ProgrammingLanguage::Js),
            Just(ProgrammingLanguage::Ts),
            Just(ProgrammingLanguage::Python),
            Just(ProgrammingLanguage::Other),
        ]
    }

    pub fn arb_profile() -> impl Strategy<Value = ParticipantProfile> {
        (0i32..50, 16i32..90, arb_sex(), arb_language()).prop_map(
            |(years_programming, age, sex, language)| ParticipantProfile {
                years_programming,
                age,
                sex,
                language,
                email: None,
            },
        )
    }

    /// Generate a submission that passes `ResultsSubmission::validate`.
    pub fn arb_submission() -> impl Strategy<Value = ResultsSubmission> {
        (arb_profile(), 0usize..12)
            .prop_flat_map(|(profile, n)| {
                (
                    Just(profile),
                    prop::collection::vec(any::<bool>(), n),
                    prop::collection::vec(0i32..100, n),
                    prop::collection::vec(0i64..120_000, n),
                )
            })
            .prop_map(|(profile, task_accuracy, question_ids, durations_ms)| {
                let correct = task_accuracy.iter().filter(|c| **c).count();
                let accuracy = if task_accuracy.is_empty() {
                    0.0
                } else {
                    correct as f64 / task_accuracy.len() as f64
                };
                let total_time_ms = durations_ms.iter().sum();
                ResultsSubmission {
                    profile,
                    group: None,
                    accuracy,
                    task_accuracy,
                    question_ids,
                    durations_ms,
                    total_time_ms,
                }
            })
    }
}

// ============================================================================
// TEST FIXTURES
// ============================================================================

pub mod fixtures {
    //! Pre-built fixtures for common testing scenarios.

    use super::*;

    /// The default three-group set.
    pub fn group_set() -> GroupSet {
        GroupSet::parse_list(TEST_GROUPS).unwrap_or_else(|e| panic!("test groups: {}", e))
    }

    pub fn group(name: &str) -> GroupId {
        GroupId::new(name).unwrap_or_else(|e| panic!("test group {:?}: {}", name, e))
    }

    /// A fresh, incomplete record claimed at `claimed_at`.
    pub fn record(group_name: &str, counter: i64, claimed_at: Timestamp) -> AssignmentRecord {
        AssignmentRecord::new(group(group_name), counter, claimed_at)
    }

    /// A record that has already been marked abandoned.
    pub fn abandoned_record(group_name: &str, counter: i64, claimed_at: Timestamp) -> AssignmentRecord {
        let mut record = record(group_name, counter, claimed_at);
        record.abandoned = true;
        record
    }

    /// A three-question submission from a TypeScript developer.
    pub fn submission() -> ResultsSubmission {
        ResultsSubmission {
            profile: ParticipantProfile {
                years_programming: 6,
                age: 31,
                sex: Sex::Other,
                language: ProgrammingLanguage::Ts,
                email: Some("participant@example.org".to_string()),
            },
            group: None,
            accuracy: 2.0 / 3.0,
            task_accuracy: vec![true, false, true],
            question_ids: vec![2, 0, 1],
            durations_ms: vec![5400, 8100, 3900],
            total_time_ms: 17_400,
        }
    }

    /// An empty in-memory store.
    pub fn memory_store() -> InMemoryAssignmentStore {
        InMemoryAssignmentStore::new()
    }

    /// An in-memory store pre-seeded with `records`.
    pub fn seeded_store(records: impl IntoIterator<Item = AssignmentRecord>) -> InMemoryAssignmentStore {
        let store = InMemoryAssignmentStore::new();
        for record in records {
            store
                .seed(record)
                .unwrap_or_else(|e| panic!("seed record: {}", e));
        }
        store
    }
}

// ============================================================================
// CUSTOM ASSERTIONS
// ============================================================================

pub mod assertions {
    //! Assertions on `AssignmentResult` variants.

    use super::*;

    #[track_caller]
    pub fn assert_invalid_input<T: std::fmt::Debug>(result: &AssignmentResult<T>, field: &str) {
        match result {
            Err(AssignmentError::InvalidInput { field: f, .. }) => {
                assert_eq!(f, field, "Wrong field in InvalidInput error");
            }
            other => panic!("Expected InvalidInput for {:?}, got: {:?}", field, other),
        }
    }

    #[track_caller]
    pub fn assert_not_found<T: std::fmt::Debug>(result: &AssignmentResult<T>) {
        match result {
            Err(AssignmentError::NotFound { .. }) => {}
            other => panic!("Expected NotFound error, got: {:?}", other),
        }
    }

    #[track_caller]
    pub fn assert_store_unavailable<T: std::fmt::Debug>(result: &AssignmentResult<T>) {
        match result {
            Err(AssignmentError::StoreUnavailable { .. }) => {}
            other => panic!("Expected StoreUnavailable error, got: {:?}", other),
        }
    }

    /// Counters within each group must be unique among non-abandoned records.
    #[track_caller]
    pub fn assert_unique_active_counters(records: &[AssignmentRecord]) {
        let mut seen = std::collections::HashSet::new();
        for record in records.iter().filter(|r| r.is_active()) {
            assert!(
                seen.insert((record.group.clone(), record.rotation_counter)),
                "Duplicate active counter {} in group {}",
                record.rotation_counter,
                record.group
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_fixture_submission_is_valid() {
        assert!(fixtures::submission().validate().is_ok());
        assert_eq!(fixtures::group_set().len(), 3);
    }

    #[test]
    fn test_seeded_store_holds_records() {
        let now = Utc::now();
        let store = fixtures::seeded_store([
            fixtures::record("AngleBracket", 0, now),
            fixtures::abandoned_record("Backslash", 0, now),
        ]);
        assert_eq!(store.assignment_count(), Ok(2));
    }

    #[test]
    fn test_unique_counter_assertion_ignores_abandoned() {
        let now = Utc::now();
        assertions::assert_unique_active_counters(&[
            fixtures::record("AngleBracket", 0, now),
            fixtures::abandoned_record("AngleBracket", 0, now),
        ]);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(50))]

        #[test]
        fn prop_generated_submission_validates(submission in generators::arb_submission()) {
            prop_assert!(submission.validate().is_ok());
        }

        #[test]
        fn prop_generated_group_set_is_non_empty(groups in generators::arb_group_set(5)) {
            prop_assert!(!groups.is_empty());
            prop_assert!(groups.len() <= 5);
        }
    }
}
