//! Shared HTTP harness: an API router over an in-memory store.

use axum::{
    body::{to_bytes, Body},
    http::{header, Method, Request, StatusCode},
    Router,
};
use counterbalance_api::{create_api_router, AllocationMode, ApiConfig, AppState, AssignmentConfig};
use counterbalance_storage::InMemoryAssignmentStore;
use counterbalance_test_utils::fixtures;
use serde_json::Value;
use std::sync::Arc;
use tower::ServiceExt;

pub struct TestApp {
    pub router: Router,
    pub store: InMemoryAssignmentStore,
}

impl TestApp {
    pub fn new(mode: AllocationMode) -> Self {
        Self::with_store(fixtures::memory_store(), mode)
    }

    pub fn with_store(store: InMemoryAssignmentStore, mode: AllocationMode) -> Self {
        let config = AssignmentConfig::new(fixtures::group_set(), mode);
        let state = AppState::new(Arc::new(store.clone()), config);
        let router = create_api_router(state, &ApiConfig::default());
        Self { router, store }
    }

    pub async fn get(&self, uri: &str) -> Result<(StatusCode, Value), String> {
        let request = Request::builder()
            .method(Method::GET)
            .uri(uri)
            .body(Body::empty())
            .map_err(|e| e.to_string())?;
        self.send(request).await
    }

    pub async fn post(&self, uri: &str, body: Value) -> Result<(StatusCode, Value), String> {
        let request = Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .map_err(|e| e.to_string())?;
        self.send(request).await
    }

    async fn send(&self, request: Request<Body>) -> Result<(StatusCode, Value), String> {
        let response = self
            .router
            .clone()
            .oneshot(request)
            .await
            .map_err(|e| format!("request failed: {}", e))?;
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX)
            .await
            .map_err(|e| format!("body read failed: {}", e))?;
        let json = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or(Value::Null)
        };
        Ok((status, json))
    }
}

pub fn assignment_body(group: Option<&str>) -> Value {
    match group {
        Some(group) => serde_json::json!({ "group": group, "questionCount": 5, "syntaxCount": 7 }),
        None => serde_json::json!({ "questionCount": 5, "syntaxCount": 7 }),
    }
}

pub fn completion_body(ids: &[&str]) -> Value {
    serde_json::json!({
        "assignmentIds": ids,
        "yearsProgramming": 6,
        "age": "31",
        "sex": "female",
        "language": "typescript",
        "accuracy": 0.5,
        "taskAccuracy": [true, false],
        "questionIds": [2, 1],
        "durationsMs": [4200, 6100],
        "totalTimeMs": 10300
    })
}

pub fn str_field<'a>(value: &'a Value, field: &str) -> Result<&'a str, String> {
    value
        .get(field)
        .and_then(Value::as_str)
        .ok_or_else(|| format!("missing string field {:?} in {}", field, value))
}
