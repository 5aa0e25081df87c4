//! Counterbalance API - REST Layer and Background Jobs
//!
//! HTTP surface of the assignment service: participants are placed into
//! the least-loaded experiment group, handed a latin-square rotation of the
//! stimuli, and later report their results. Allocation is serialized by a
//! store-level advisory lock; a background reaper reclaims slots whose
//! participant never finished.
//!
//! The PostgreSQL store lives in [`db`]; an in-memory store from
//! `counterbalance-storage` can stand in for development and tests.

#[macro_use]
mod macros;

pub mod config;
pub mod constants;
pub mod db;
pub mod error;
pub mod extractors;
pub mod jobs;
#[cfg(feature = "openapi")]
pub mod openapi;
pub mod routes;
pub mod services;
pub mod state;
pub mod telemetry;

// Re-export commonly used types
pub use config::{AllocationMode, ApiConfig, AssignmentConfig, StoreKind};
pub use db::{DbClient, DbConfig};
pub use error::{ApiError, ApiResult, ErrorCode};
#[cfg(feature = "openapi")]
pub use openapi::ApiDoc;
pub use routes::create_api_router;
pub use state::AppState;
