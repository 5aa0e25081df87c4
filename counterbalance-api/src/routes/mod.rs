//! REST API Routes Module
//!
//! Route handlers organized by resource:
//! - Assignments (allocation, stats, lookup)
//! - Completions (results submission)
//! - Results (lookup)
//! - Health check endpoints (Kubernetes-compatible)
//! - CORS support for the browser-based experiment client

pub mod assignment;
pub mod completion;
pub mod health;
pub mod results;

use std::time::Duration;

use axum::{
    http::{header, HeaderValue, Method},
    middleware::from_fn,
    routing::get,
    Router,
};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
#[cfg(feature = "openapi")]
use utoipa::OpenApi;

use crate::config::ApiConfig;
#[cfg(feature = "openapi")]
use crate::openapi::ApiDoc;
use crate::state::AppState;
use crate::telemetry::{metrics_handler, observability_middleware};

// ============================================================================
// OPENAPI ENDPOINTS
// ============================================================================

/// Handler for /openapi.json endpoint.
#[cfg(feature = "openapi")]
async fn openapi_json() -> impl axum::response::IntoResponse {
    axum::Json(ApiDoc::openapi())
}

// ============================================================================
// CORS LAYER
// ============================================================================

/// Build the CORS layer from ApiConfig.
///
/// In development mode (empty origins), allows all origins.
/// In production mode, only allows configured origins.
fn build_cors_layer(config: &ApiConfig) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::ACCEPT])
        .max_age(Duration::from_secs(config.cors_max_age_secs));

    if config.cors_origins.is_empty() {
        // Development mode: allow all origins
        tracing::info!("CORS: Development mode - allowing all origins");
        cors.allow_origin(Any).allow_headers(Any)
    } else {
        tracing::info!(
            "CORS: Production mode - allowing origins: {:?}",
            config.cors_origins
        );
        let origins: Vec<HeaderValue> = config
            .cors_origins
            .iter()
            .filter_map(|o| o.parse().ok())
            .collect();

        if config.cors_allow_credentials {
            cors.allow_origin(origins).allow_credentials(true)
        } else {
            cors.allow_origin(origins)
        }
    }
}

// ============================================================================
// ROUTER
// ============================================================================

/// Create the complete API router.
///
/// - `/api/v1/assignments`, `/api/v1/completions`, `/api/v1/results`
/// - Health checks at `/health/*`
/// - Metrics at `/metrics`
/// - OpenAPI spec at `/openapi.json`
/// - Swagger UI at `/swagger-ui` (when the swagger-ui feature is enabled)
///
/// # Middleware Order (outer to inner)
/// 1. CORS - handles preflight requests
/// 2. HTTP trace layer
/// 3. Observability - span + Prometheus metrics per matched route
pub fn create_api_router(state: AppState, api_config: &ApiConfig) -> Router {
    let api_routes = Router::new()
        .nest("/assignments", assignment::create_router(state.clone()))
        .nest("/completions", completion::create_router(state.clone()))
        .nest("/results", results::create_router(state.clone()));

    #[allow(unused_mut)]
    let mut router = Router::new()
        .nest("/api/v1", api_routes)
        .nest("/health", health::create_router(state.store.clone()))
        .route("/metrics", get(metrics_handler));

    #[cfg(feature = "openapi")]
    {
        router = router.route("/openapi.json", get(openapi_json));
    }

    #[cfg(all(feature = "openapi", feature = "swagger-ui"))]
    {
        use utoipa_swagger_ui::SwaggerUi;
        // /openapi.json is already routed above.
        router = router.merge(
            SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", ApiDoc::openapi()),
        );
    }

    router
        .layer(from_fn(observability_middleware))
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer(api_config))
}
