//! Shared application state for Axum routers.

use std::sync::Arc;

use counterbalance_storage::AssignmentStore;

use crate::config::AssignmentConfig;

/// Application-wide state shared across all routes.
#[derive(Clone)]
pub struct AppState {
    /// Backing store (Postgres in production, in-memory for development/tests).
    pub store: Arc<dyn AssignmentStore>,
    /// Configured groups and allocation mode.
    pub assignment: Arc<AssignmentConfig>,
}

impl AppState {
    pub fn new(store: Arc<dyn AssignmentStore>, assignment: AssignmentConfig) -> Self {
        Self {
            store,
            assignment: Arc::new(assignment),
        }
    }
}

// Use macro to reduce boilerplate for FromRef implementations
crate::impl_from_ref!(Arc<dyn AssignmentStore>, store);
crate::impl_from_ref!(Arc<AssignmentConfig>, assignment);
