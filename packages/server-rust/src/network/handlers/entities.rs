//! Entity CRUD handlers for `/{prefix}/{entity}` and `/{prefix}/{entity}/{id}`.
//!
//! The domain comes from the [`RequestContext`] inserted by the domain
//! middleware, never from the path parameters. Every successful response
//! carries `x-binding-status` naming the store that served it.

use axum::extract::{Extension, Path, Query, State};
use axum::http::header::{HeaderName, RETRY_AFTER};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use serde_json::json;
use storefront_core::{Document, RequestContext};
use tracing::{info, warn};

use super::AppState;
use crate::binding::BoundHandle;
use crate::error::{BindError, HandleError};

pub const X_BINDING_STATUS: &str = "x-binding-status";

/// Seconds a client should wait before retrying a 503.
const RETRY_AFTER_SECS: &str = "5";

/// Error returned by the entity handlers.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Binding(#[from] BindError),
    #[error("invalid {entity}: {}", errors.join("; "))]
    Invalid { entity: String, errors: Vec<String> },
    #[error("{entity} '{id}' not found")]
    NotFound { entity: String, id: String },
    #[error("store error: {0:#}")]
    Backend(anyhow::Error),
}

impl From<HandleError> for ApiError {
    fn from(err: HandleError) -> Self {
        match err {
            HandleError::Binding(err) => Self::Binding(err),
            HandleError::Invalid { entity, errors } => Self::Invalid { entity, errors },
            HandleError::Backend(err) => Self::Backend(err),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let message = self.to_string();
        match self {
            Self::Binding(BindError::UnknownEntity { .. } | BindError::UnknownDomain { .. })
            | Self::NotFound { .. } => {
                (StatusCode::NOT_FOUND, Json(json!({ "error": message }))).into_response()
            }
            Self::Binding(BindError::BindingUnavailable { .. }) => (
                StatusCode::SERVICE_UNAVAILABLE,
                [(RETRY_AFTER, RETRY_AFTER_SECS)],
                Json(json!({ "error": message })),
            )
                .into_response(),
            Self::Invalid { errors, .. } => (
                StatusCode::UNPROCESSABLE_ENTITY,
                Json(json!({ "error": message, "errors": errors })),
            )
                .into_response(),
            Self::Backend(_) => {
                warn!(error = %message, "entity request failed");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error": "internal store error" })),
                )
                    .into_response()
            }
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct ListParams {
    pub limit: Option<usize>,
}

fn binding_header(handle: &BoundHandle) -> [(HeaderName, &'static str); 1] {
    [(
        HeaderName::from_static(X_BINDING_STATUS),
        handle.status().as_str(),
    )]
}

async fn handle_for(state: &AppState, ctx: &RequestContext, entity: &str) -> Result<BoundHandle, ApiError> {
    Ok(state.binder.resolve(&ctx.domain, entity).await?)
}

/// `GET /{prefix}/{entity}?limit=N`
pub async fn list_entities(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(entity): Path<String>,
    Query(params): Query<ListParams>,
) -> Result<Response, ApiError> {
    let handle = handle_for(&state, &ctx, &entity).await?;
    let records = handle.list(params.limit).await?;
    Ok((binding_header(&handle), Json(records)).into_response())
}

/// `POST /{prefix}/{entity}`: validates and creates, 201 on success.
pub async fn create_entity(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path(entity): Path<String>,
    Json(data): Json<Document>,
) -> Result<Response, ApiError> {
    let handle = handle_for(&state, &ctx, &entity).await?;
    let record = handle.insert(data).await?;
    info!(
        domain = %ctx.domain,
        entity = %entity,
        id = %record.id,
        subject = %ctx.subject(),
        request_id = %ctx.request_id,
        binding = %handle.status(),
        "record created"
    );
    Ok((StatusCode::CREATED, binding_header(&handle), Json(record)).into_response())
}

/// `GET /{prefix}/{entity}/{id}`
pub async fn get_entity(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((entity, id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let handle = handle_for(&state, &ctx, &entity).await?;
    let Some(record) = handle.get(&id).await? else {
        return Err(ApiError::NotFound { entity, id });
    };
    Ok((binding_header(&handle), Json(record)).into_response())
}

/// `PUT /{prefix}/{entity}/{id}`: shallow-merges the body into the record.
pub async fn update_entity(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((entity, id)): Path<(String, String)>,
    Json(patch): Json<Document>,
) -> Result<Response, ApiError> {
    let handle = handle_for(&state, &ctx, &entity).await?;
    let Some(record) = handle.update(&id, patch).await? else {
        return Err(ApiError::NotFound { entity, id });
    };
    info!(
        domain = %ctx.domain,
        entity = %entity,
        id = %id,
        subject = %ctx.subject(),
        request_id = %ctx.request_id,
        binding = %handle.status(),
        "record updated"
    );
    Ok((binding_header(&handle), Json(record)).into_response())
}

/// `DELETE /{prefix}/{entity}/{id}`: 204 on success.
pub async fn delete_entity(
    State(state): State<AppState>,
    Extension(ctx): Extension<RequestContext>,
    Path((entity, id)): Path<(String, String)>,
) -> Result<Response, ApiError> {
    let handle = handle_for(&state, &ctx, &entity).await?;
    if !handle.delete(&id).await? {
        return Err(ApiError::NotFound { entity, id });
    }
    info!(
        domain = %ctx.domain,
        entity = %entity,
        id = %id,
        subject = %ctx.subject(),
        request_id = %ctx.request_id,
        binding = %handle.status(),
        "record deleted"
    );
    Ok((StatusCode::NO_CONTENT, binding_header(&handle)).into_response())
}
