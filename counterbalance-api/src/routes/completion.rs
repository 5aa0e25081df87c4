//! Completion REST API Routes
//!
//! Accepts the survey + experiment submission and closes the assignments it
//! references. Field names from the legacy client are accepted as aliases,
//! and numeric survey fields may arrive as strings.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::post, Json, Router};
use counterbalance_core::{
    AssignmentError, AssignmentId, GroupId, ParticipantProfile, ParticipantResults,
    ProgrammingLanguage, ResultsSubmission, Sex,
};
use counterbalance_storage::AssignmentStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{
    config::AssignmentConfig,
    error::{ApiError, ApiResult},
    extractors::ApiJson,
    services,
    state::AppState,
};

// ============================================================================
// LENIENT NUMBERS
// ============================================================================

/// A number that may be sent as JSON number or string.
///
/// Unparsable strings read as zero, matching how the survey form has always
/// been interpreted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LooseNumber {
    Int(i64),
    Float(f64),
    Text(String),
}

impl Default for LooseNumber {
    fn default() -> Self {
        LooseNumber::Int(0)
    }
}

impl LooseNumber {
    pub fn as_i64(&self) -> i64 {
        match self {
            LooseNumber::Int(v) => *v,
            LooseNumber::Float(v) if v.is_finite() => v.trunc() as i64,
            LooseNumber::Float(_) => 0,
            LooseNumber::Text(s) => {
                let s = s.trim();
                s.parse::<i64>()
                    .ok()
                    .or_else(|| s.parse::<f64>().ok().filter(|v| v.is_finite()).map(|v| v.trunc() as i64))
                    .unwrap_or(0)
            }
        }
    }

    pub fn as_i32(&self) -> i32 {
        self.as_i64().clamp(i32::MIN as i64, i32::MAX as i64) as i32
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            LooseNumber::Int(v) => *v as f64,
            LooseNumber::Float(v) => *v,
            LooseNumber::Text(s) => s.trim().parse::<f64>().unwrap_or(0.0),
        }
    }
}

// ============================================================================
// REQUEST TYPE
// ============================================================================

/// Body of `POST /api/v1/completions`.
///
/// At least one of `assignmentId` / `assignmentIds` must be present.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct CompletionRequest {
    #[serde(default)]
    pub assignment_id: Option<String>,
    #[serde(default)]
    pub assignment_ids: Vec<String>,

    #[serde(default)]
    #[cfg_attr(feature = "openapi", schema(value_type = i32))]
    pub years_programming: LooseNumber,
    #[serde(default)]
    #[cfg_attr(feature = "openapi", schema(value_type = i32))]
    pub age: LooseNumber,
    /// `male`, `female` or `other` (case-insensitive)
    pub sex: String,
    /// Primary language; unknown values are stored as `other`
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Group the client finished in, if it reports one
    #[serde(default)]
    pub group: Option<String>,

    #[serde(default, alias = "overallAccuracy")]
    #[cfg_attr(feature = "openapi", schema(value_type = f64))]
    pub accuracy: LooseNumber,
    #[serde(default, alias = "task_accuracy")]
    pub task_accuracy: Vec<bool>,
    #[serde(default, alias = "ids")]
    #[cfg_attr(feature = "openapi", schema(value_type = Vec<i32>))]
    pub question_ids: Vec<LooseNumber>,
    #[serde(default, alias = "durations")]
    pub durations_ms: Vec<i64>,
    #[serde(default, alias = "totalTime")]
    pub total_time_ms: i64,
}

impl CompletionRequest {
    /// Collect ids from both fields, preserving order.
    fn assignment_ids(&self) -> ApiResult<Vec<AssignmentId>> {
        let raw: Vec<&String> = self
            .assignment_id
            .iter()
            .chain(self.assignment_ids.iter())
            .filter(|id| !id.trim().is_empty())
            .collect();
        if raw.is_empty() {
            return Err(ApiError::missing_field("assignmentId"));
        }
        raw.into_iter()
            .map(|id| {
                id.parse::<AssignmentId>()
                    .map_err(|_| ApiError::invalid_format("assignmentIds", "UUIDs"))
            })
            .collect()
    }

    /// Split into the id list and the domain submission.
    pub fn into_parts(self) -> ApiResult<(Vec<AssignmentId>, ResultsSubmission)> {
        let ids = self.assignment_ids()?;
        let sex = Sex::from_db_str(&self.sex).map_err(AssignmentError::from)?;
        let group = match self.group.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => Some(GroupId::new(raw)?),
            _ => None,
        };
        let email = self
            .email
            .map(|e| e.trim().to_string())
            .filter(|e| !e.is_empty());

        let submission = ResultsSubmission {
            profile: ParticipantProfile {
                years_programming: self.years_programming.as_i32(),
                age: self.age.as_i32(),
                sex,
                language: ProgrammingLanguage::from_db_str(&self.language),
                email,
            },
            group,
            accuracy: self.accuracy.as_f64(),
            task_accuracy: self.task_accuracy,
            question_ids: self.question_ids.iter().map(LooseNumber::as_i32).collect(),
            durations_ms: self.durations_ms,
            total_time_ms: self.total_time_ms,
        };
        Ok((ids, submission))
    }
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// POST /api/v1/completions - Record results and complete assignments
#[utoipa::path(
    post,
    path = "/api/v1/completions",
    tag = "Completions",
    request_body = CompletionRequest,
    responses(
        (status = 201, description = "Results recorded", body = ParticipantResults),
        (status = 400, description = "Invalid submission", body = ApiError),
        (status = 404, description = "Assignment not found", body = ApiError),
        (status = 409, description = "Assignment already completed", body = ApiError),
        (status = 503, description = "Store unavailable, retry", body = ApiError),
    ),
)]
pub async fn create_completion(
    State(store): State<Arc<dyn AssignmentStore>>,
    State(config): State<Arc<AssignmentConfig>>,
    ApiJson(req): ApiJson<CompletionRequest>,
) -> ApiResult<impl IntoResponse> {
    let (ids, submission) = req.into_parts()?;
    let results = services::record_completion(store.as_ref(), &config, ids, submission).await?;
    Ok((StatusCode::CREATED, Json(results)))
}

// ============================================================================
// ROUTER
// ============================================================================

/// Create the completion router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", post(create_completion))
        .with_state(state)
}
