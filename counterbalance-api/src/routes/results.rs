//! Results REST API Routes

use axum::{extract::State, routing::get, Json, Router};
use counterbalance_core::{ParticipantResults, ResultId};
use counterbalance_storage::AssignmentStore;
use std::sync::Arc;

use crate::{
    error::{ApiError, ApiResult},
    extractors::PathId,
    services,
    state::AppState,
};

/// GET /api/v1/results/{id} - Get stored participant results
#[utoipa::path(
    get,
    path = "/api/v1/results/{id}",
    tag = "Results",
    params(
        ("id" = String, Path, description = "Result ID (UUID)")
    ),
    responses(
        (status = 200, description = "Stored results", body = ParticipantResults),
        (status = 400, description = "Malformed id", body = ApiError),
        (status = 404, description = "Results not found", body = ApiError),
    ),
)]
pub async fn get_results(
    State(store): State<Arc<dyn AssignmentStore>>,
    PathId(id): PathId<ResultId>,
) -> ApiResult<Json<ParticipantResults>> {
    let results = services::get_results(store.as_ref(), id).await?;
    Ok(Json(results))
}

/// Create the results router.
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/:id", get(get_results))
        .with_state(state)
}
