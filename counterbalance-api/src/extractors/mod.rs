//! Custom extractors that reject with [`ApiError`] instead of axum's
//! plain-text rejections, so every 4xx body has the same JSON shape.

use axum::{
    async_trait,
    extract::{
        rejection::{JsonRejection, QueryRejection},
        FromRequest, FromRequestParts, Path, Query, Request,
    },
    http::request::Parts,
    Json,
};
use counterbalance_core::{AssignmentId, ResultId};
use serde::de::DeserializeOwned;
use std::str::FromStr;

use crate::error::ApiError;

// ============================================================================
// PATH IDS
// ============================================================================

/// Identifier types that can be parsed from a single path segment.
pub trait PathEntityId: FromStr + Send {
    /// Name used in error messages and the `field` detail.
    const ENTITY_NAME: &'static str;
}

impl PathEntityId for AssignmentId {
    const ENTITY_NAME: &'static str = "assignment";
}

impl PathEntityId for ResultId {
    const ENTITY_NAME: &'static str = "results";
}

/// Extractor for a typed id from the `:id` path parameter.
///
/// A malformed UUID becomes a 400 `InvalidFormat` error.
#[derive(Debug, Clone, Copy)]
pub struct PathId<T: PathEntityId>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for PathId<T>
where
    S: Send + Sync,
    T: PathEntityId,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Path(raw): Path<String> = Path::from_request_parts(parts, state)
            .await
            .map_err(|e| ApiError::invalid_input(format!("Invalid path: {}", e)))?;

        raw.parse::<T>()
            .map(PathId)
            .map_err(|_| ApiError::invalid_format(T::ENTITY_NAME, "a UUID"))
    }
}

// ============================================================================
// BODY / QUERY
// ============================================================================

/// `Json<T>` whose rejection is a 400 [`ApiError`].
#[derive(Debug, Clone)]
pub struct ApiJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ApiJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        Json::<T>::from_request(req, state)
            .await
            .map(|Json(value)| ApiJson(value))
            .map_err(|rejection: JsonRejection| ApiError::invalid_input(rejection.body_text()))
    }
}

/// `Query<T>` whose rejection is a 400 [`ApiError`].
#[derive(Debug, Clone)]
pub struct ApiQuery<T>(pub T);

#[async_trait]
impl<S, T> FromRequestParts<S> for ApiQuery<T>
where
    S: Send + Sync,
    T: DeserializeOwned,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        Query::<T>::from_request_parts(parts, state)
            .await
            .map(|Query(value)| ApiQuery(value))
            .map_err(|rejection: QueryRejection| ApiError::invalid_input(rejection.body_text()))
    }
}
