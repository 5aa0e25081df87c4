//! OpenAPI Specification for the counterbalance API
//!
//! Generated with utoipa from the route annotations and the domain types.

use utoipa::OpenApi;

use crate::error::{ApiError, ErrorCode};
use crate::routes::{assignment, completion, health, results};
use crate::services::{Assignment, AssignmentStats};
use crate::telemetry::metrics;

use counterbalance_core::{
    AssignmentRecord, GroupLoad, ParticipantProfile, ParticipantResults, ProgrammingLanguage,
    QuestionResult, ResultsSubmission, Sex,
};

/// OpenAPI document for the counterbalance API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Counterbalance API",
        version = "0.4.0",
        description = "Group assignment and latin-square counterbalancing for controlled experiments",
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "http://localhost:3000", description = "Local Development")
    ),
    tags(
        (name = "Assignments", description = "Group allocation and stimulus rotation"),
        (name = "Completions", description = "Results submission"),
        (name = "Results", description = "Stored participant results"),
        (name = "Health", description = "Liveness and readiness probes"),
        (name = "Observability", description = "Prometheus metrics")
    ),
    paths(
        // === Assignment Routes ===
        assignment::create_assignment,
        assignment::next_group,
        assignment::assignment_stats,
        assignment::get_assignment,

        // === Completion Routes ===
        completion::create_completion,

        // === Results Routes ===
        results::get_results,

        // === Health / Metrics ===
        health::ping,
        health::readiness,
        metrics::metrics_handler,
    ),
    components(
        schemas(
            // === Error Types ===
            ApiError, ErrorCode,

            // === Request / Response Types ===
            assignment::AssignmentRequest,
            completion::CompletionRequest,
            Assignment, AssignmentStats,
            health::Readiness,

            // === Domain Types ===
            AssignmentRecord, GroupLoad, ParticipantProfile, ParticipantResults,
            ProgrammingLanguage, QuestionResult, ResultsSubmission, Sex,
        )
    )
)]
pub struct ApiDoc;

impl ApiDoc {
    /// Generate OpenAPI spec as JSON string.
    pub fn to_json() -> Result<String, serde_json::Error> {
        let openapi = Self::openapi();
        serde_json::to_string_pretty(&openapi)
    }
}
