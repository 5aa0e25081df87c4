//! Assignment REST API Routes
//!
//! Allocation of groups and rotation counters, plus read-only lookups.

use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use counterbalance_core::{AssignmentId, AssignmentRecord};
use counterbalance_storage::AssignmentStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::{
    config::AssignmentConfig,
    error::{ApiError, ApiResult},
    extractors::{ApiJson, ApiQuery, PathId},
    services::{self, Assignment, AssignmentStats},
    state::AppState,
};

// ============================================================================
// REQUEST TYPES
// ============================================================================

/// Body of `POST /api/v1/assignments`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct AssignmentRequest {
    /// Requested group. Omit to let the balancer choose.
    #[serde(default)]
    pub group: Option<String>,
    pub question_count: i64,
    pub syntax_count: i64,
}

/// Query of `GET /api/v1/assignments/next-group`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::IntoParams))]
#[cfg_attr(feature = "openapi", into_params(parameter_in = Query))]
#[serde(rename_all = "camelCase")]
pub struct NextGroupQuery {
    pub group: Option<String>,
    pub question_count: Option<i64>,
    pub syntax_count: Option<i64>,
}

// ============================================================================
// ROUTE HANDLERS
// ============================================================================

/// POST /api/v1/assignments - Allocate a group and rotation
#[utoipa::path(
    post,
    path = "/api/v1/assignments",
    tag = "Assignments",
    request_body = AssignmentRequest,
    responses(
        (status = 201, description = "Assignment allocated", body = Assignment),
        (status = 400, description = "Invalid counts or group", body = ApiError),
        (status = 503, description = "Store unavailable, retry", body = ApiError),
    ),
)]
pub async fn create_assignment(
    State(store): State<Arc<dyn AssignmentStore>>,
    State(config): State<Arc<AssignmentConfig>>,
    ApiJson(req): ApiJson<AssignmentRequest>,
) -> ApiResult<impl IntoResponse> {
    let assignment = services::request_assignment(
        store.as_ref(),
        &config,
        req.group.as_deref(),
        req.question_count,
        req.syntax_count,
    )
    .await?;

    Ok((StatusCode::CREATED, Json(assignment)))
}

/// GET /api/v1/assignments/next-group - Allocate using query parameters
///
/// Counts fall back to the configured defaults when omitted.
#[utoipa::path(
    get,
    path = "/api/v1/assignments/next-group",
    tag = "Assignments",
    params(NextGroupQuery),
    responses(
        (status = 200, description = "Assignment allocated", body = Assignment),
        (status = 400, description = "Invalid counts or group", body = ApiError),
        (status = 503, description = "Store unavailable, retry", body = ApiError),
    ),
)]
pub async fn next_group(
    State(store): State<Arc<dyn AssignmentStore>>,
    State(config): State<Arc<AssignmentConfig>>,
    ApiQuery(query): ApiQuery<NextGroupQuery>,
) -> ApiResult<Json<Assignment>> {
    let assignment = services::request_assignment(
        store.as_ref(),
        &config,
        query.group.as_deref(),
        query.question_count.unwrap_or(config.default_question_count),
        query.syntax_count.unwrap_or(config.default_syntax_count),
    )
    .await?;

    Ok(Json(assignment))
}

/// GET /api/v1/assignments/stats - Per-group load
#[utoipa::path(
    get,
    path = "/api/v1/assignments/stats",
    tag = "Assignments",
    responses(
        (status = 200, description = "Per-group counts", body = AssignmentStats),
        (status = 503, description = "Store unavailable", body = ApiError),
    ),
)]
pub async fn assignment_stats(
    State(store): State<Arc<dyn AssignmentStore>>,
    State(config): State<Arc<AssignmentConfig>>,
) -> ApiResult<Json<AssignmentStats>> {
    let stats = services::assignment_stats(store.as_ref(), &config).await?;
    Ok(Json(stats))
}

/// GET /api/v1/assignments/{id} - Get an assignment record
#[utoipa::path(
    get,
    path = "/api/v1/assignments/{id}",
    tag = "Assignments",
    params(
        ("id" = String, Path, description = "Assignment ID (UUID)")
    ),
    responses(
        (status = 200, description = "Assignment record", body = AssignmentRecord),
        (status = 400, description = "Malformed id", body = ApiError),
        (status = 404, description = "Assignment not found", body = ApiError),
    ),
)]
pub async fn get_assignment(
    State(store): State<Arc<dyn AssignmentStore>>,
    PathId(id): PathId<AssignmentId>,
) -> ApiResult<Json<AssignmentRecord>> {
    let record = services::get_assignment(store.as_ref(), id).await?;
    Ok(Json(record))
}

// ============================================================================
// ROUTER
// ============================================================================

/// Create the assignment router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/", post(create_assignment))
        .route("/next-group", get(next_group))
        .route("/stats", get(assignment_stats))
        .route("/:id", get(get_assignment))
        .with_state(state)
}
