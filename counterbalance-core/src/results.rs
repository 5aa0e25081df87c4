//! Participant results submitted on completion.

use crate::{AssignmentError, AssignmentId, AssignmentResult, GroupId, ResultId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

// ============================================================================
// PROFILE ENUMS
// ============================================================================

/// Self-reported sex from the survey.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum Sex {
    Male,
    Female,
    Other,
}

impl Sex {
    /// Convert to database string representation.
    pub fn as_db_str(&self) -> &'static str {
        match self {
            Sex::Male => "male",
            Sex::Female => "female",
            Sex::Other => "other",
        }
    }

    /// Parse from database string representation. Case-insensitive.
    pub fn from_db_str(s: &str) -> Result<Self, SexParseError> {
        match s.trim().to_lowercase().as_str() {
            "male" => Ok(Sex::Male),
            "female" => Ok(Sex::Female),
            "other" => Ok(Sex::Other),
            _ => Err(SexParseError(s.to_string())),
        }
    }
}

impl fmt::Display for Sex {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

impl FromStr for Sex {
    type Err = SexParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_db_str(s)
    }
}

/// Error when parsing an invalid sex string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SexParseError(pub String);

impl fmt::Display for SexParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid sex: {}", self.0)
    }
}

impl std::error::Error for SexParseError {}

impl From<SexParseError> for AssignmentError {
    fn from(err: SexParseError) -> Self {
        AssignmentError::invalid_input("sex", err.to_string())
    }
}

/// Primary programming language from the survey.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "lowercase")]
pub enum ProgrammingLanguage {
    Cpp,
    Java,
    Csharp,
    Js,
    Ts,
    Python,
    Other,
}

impl ProgrammingLanguage {
    pub fn as_db_str(&self) -> &'static str {
        match self {
            ProgrammingLanguage::Cpp => "cpp",
            ProgrammingLanguage::Java => "java",
            ProgrammingLanguage::Csharp => "csharp",
            ProgrammingLanguage::Js => "js",
            ProgrammingLanguage::Ts => "ts",
            ProgrammingLanguage::Python => "python",
            ProgrammingLanguage::Other => "other",
        }
    }

    /// Lenient parse: common aliases are recognised, anything else is `Other`.
    pub fn from_db_str(s: &str) -> Self {
        match s.trim().to_lowercase().as_str() {
            "cpp" | "c++" => ProgrammingLanguage::Cpp,
            "java" => ProgrammingLanguage::Java,
            "csharp" | "c#" => ProgrammingLanguage::Csharp,
            "js" | "javascript" => ProgrammingLanguage::Js,
            "ts" | "typescript" => ProgrammingLanguage::Ts,
            "python" => ProgrammingLanguage::Python,
            _ => ProgrammingLanguage::Other,
        }
    }
}

impl fmt::Display for ProgrammingLanguage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_db_str())
    }
}

// ============================================================================
// SUBMISSION
// ============================================================================

/// Survey answers describing the participant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct ParticipantProfile {
    pub years_programming: i32,
    pub age: i32,
    pub sex: Sex,
    pub language: ProgrammingLanguage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

/// Everything a client reports when a participant finishes.
///
/// `task_accuracy`, `question_ids` and `durations_ms` are parallel arrays,
/// one entry per answered question, in presentation order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct ResultsSubmission {
    pub profile: ParticipantProfile,
    /// Condition the client finished in, if it reports one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub group: Option<GroupId>,
    /// Client-computed score, stored verbatim.
    pub accuracy: f64,
    #[serde(default)]
    pub task_accuracy: Vec<bool>,
    #[serde(default)]
    pub question_ids: Vec<i32>,
    #[serde(default)]
    pub durations_ms: Vec<i64>,
    pub total_time_ms: i64,
}

impl ResultsSubmission {
    pub fn validate(&self) -> AssignmentResult<()> {
        if !self.accuracy.is_finite() || self.accuracy < 0.0 {
            return Err(AssignmentError::invalid_input(
                "accuracy",
                "must be a finite, non-negative number",
            ));
        }
        if self.total_time_ms < 0 {
            return Err(AssignmentError::invalid_input(
                "totalTimeMs",
                "must not be negative",
            ));
        }
        let n = self.task_accuracy.len();
        if self.question_ids.len() != n || self.durations_ms.len() != n {
            return Err(AssignmentError::invalid_input(
                "taskAccuracy",
                format!(
                    "taskAccuracy ({}), questionIds ({}) and durationsMs ({}) must have equal lengths",
                    n,
                    self.question_ids.len(),
                    self.durations_ms.len()
                ),
            ));
        }
        if let Some(d) = self.durations_ms.iter().find(|d| **d < 0) {
            return Err(AssignmentError::invalid_input(
                "durationsMs",
                format!("negative duration {}", d),
            ));
        }
        Ok(())
    }

    /// Per-question rows in presentation order, positions starting at 1.
    pub fn question_rows(&self) -> Vec<QuestionResult> {
        self.question_ids
            .iter()
            .zip(&self.task_accuracy)
            .zip(&self.durations_ms)
            .enumerate()
            .map(|(i, ((question_id, correct), duration_ms))| QuestionResult {
                position: i as i32 + 1,
                question_id: *question_id,
                correct: *correct,
                duration_ms: *duration_ms,
            })
            .collect()
    }
}

/// One answered question.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct QuestionResult {
    pub position: i32,
    pub question_id: i32,
    pub correct: bool,
    pub duration_ms: i64,
}

/// A stored submission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct ParticipantResults {
    pub id: ResultId,
    pub assignment_ids: Vec<AssignmentId>,
    #[serde(flatten)]
    pub submission: ResultsSubmission,
    #[cfg_attr(feature = "openapi", schema(value_type = String, format = "date-time"))]
    pub submitted_at: Timestamp,
}

impl ParticipantResults {
    pub fn new(assignment_ids: Vec<AssignmentId>, submission: ResultsSubmission, now: Timestamp) -> Self {
        Self {
            id: ResultId::now_v7(),
            assignment_ids,
            submission,
            submitted_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn submission() -> ResultsSubmission {
        ResultsSubmission {
            profile: ParticipantProfile {
                years_programming: 4,
                age: 27,
                sex: Sex::Female,
                language: ProgrammingLanguage::Ts,
                email: None,
            },
            group: None,
            accuracy: 0.75,
            task_accuracy: vec![true, false, true, true],
            question_ids: vec![3, 1, 4, 2],
            durations_ms: vec![1200, 3400, 800, 950],
            total_time_ms: 6350,
        }
    }

    #[test]
    fn test_sex_parse_is_case_insensitive_and_strict() {
        assert_eq!(Sex::from_db_str("MALE"), Ok(Sex::Male));
        assert_eq!("Female".parse::<Sex>(), Ok(Sex::Female));
        assert!(Sex::from_db_str("unknown").is_err());

        let err: AssignmentError = Sex::from_db_str("x").unwrap_err().into();
        assert!(matches!(err, AssignmentError::InvalidInput { .. }));
    }

    #[test]
    fn test_language_aliases() {
        assert_eq!(ProgrammingLanguage::from_db_str("C++"), ProgrammingLanguage::Cpp);
        assert_eq!(ProgrammingLanguage::from_db_str("c#"), ProgrammingLanguage::Csharp);
        assert_eq!(ProgrammingLanguage::from_db_str("JavaScript"), ProgrammingLanguage::Js);
        assert_eq!(ProgrammingLanguage::from_db_str("typescript"), ProgrammingLanguage::Ts);
        assert_eq!(ProgrammingLanguage::from_db_str("rust"), ProgrammingLanguage::Other);
    }

    #[test]
    fn test_validate_accepts_consistent_submission() {
        assert!(submission().validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_mismatched_arrays() {
        let mut s = submission();
        s.durations_ms.pop();
        assert!(matches!(s.validate(), Err(AssignmentError::InvalidInput { .. })));
    }

    #[test]
    fn test_validate_rejects_bad_accuracy() {
        let mut s = submission();
        s.accuracy = f64::NAN;
        assert!(s.validate().is_err());
        s.accuracy = -0.1;
        assert!(s.validate().is_err());
    }

    #[test]
    fn test_question_rows_follow_presentation_order() {
        let rows = submission().question_rows();
        assert_eq!(rows.len(), 4);
        assert_eq!(
            rows[1],
            QuestionResult {
                position: 2,
                question_id: 1,
                correct: false,
                duration_ms: 3400
            }
        );
    }

    #[test]
    fn test_results_flatten_submission() -> Result<(), serde_json::Error> {
        let stored = ParticipantResults::new(vec![AssignmentId::now_v7()], submission(), chrono::Utc::now());
        let value = serde_json::to_value(&stored)?;
        assert_eq!(value["accuracy"], 0.75);
        assert_eq!(value["profile"]["sex"], "female");
        assert_eq!(value["assignmentIds"].as_array().map(Vec::len), Some(1));

        let back: ParticipantResults = serde_json::from_value(value)?;
        assert_eq!(back, stored);
        Ok(())
    }
}
