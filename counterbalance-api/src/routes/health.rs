//! Health endpoints.
//!
//! `/health/ping` answers as long as the process serves requests;
//! `/health/ready` additionally round-trips the assignment store and reports
//! how long that took. Neither requires authentication.

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;

use counterbalance_storage::AssignmentStore;

/// Body of `GET /health/ready`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "openapi", derive(utoipa::ToSchema))]
#[serde(rename_all = "camelCase")]
pub struct Readiness {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub store_latency_ms: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// GET /health/ping
#[utoipa::path(
    get,
    path = "/health/ping",
    tag = "Health",
    responses(
        (status = 200, description = "Service is responding", body = String),
    ),
)]
pub async fn ping() -> impl IntoResponse {
    (StatusCode::OK, "pong")
}

/// GET /health/ready - 503 while the store cannot be reached.
#[utoipa::path(
    get,
    path = "/health/ready",
    tag = "Health",
    responses(
        (status = 200, description = "Store reachable", body = Readiness),
        (status = 503, description = "Store unreachable", body = Readiness),
    ),
)]
pub async fn readiness(State(store): State<Arc<dyn AssignmentStore>>) -> impl IntoResponse {
    let start = Instant::now();
    match store.health_check().await {
        Ok(()) => {
            let readiness = Readiness {
                ready: true,
                store_latency_ms: Some(start.elapsed().as_millis() as u64),
                error: None,
            };
            (StatusCode::OK, Json(readiness))
        }
        Err(e) => {
            tracing::warn!(error = %e, "Readiness check failed");
            let readiness = Readiness {
                ready: false,
                store_latency_ms: None,
                error: Some(e.to_string()),
            };
            (StatusCode::SERVICE_UNAVAILABLE, Json(readiness))
        }
    }
}

pub fn create_router(store: Arc<dyn AssignmentStore>) -> Router {
    Router::new()
        .route("/ping", get(ping))
        .route("/ready", get(readiness))
        .with_state(store)
}
