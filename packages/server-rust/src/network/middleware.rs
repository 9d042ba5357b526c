//! HTTP middleware for the storefront server.
//!
//! Transport layers ([`build_http_layers`]) wrap every route. The request
//! middlewares below wrap only the entity API routes, outer to inner:
//! in-flight tracking, bearer auth, domain resolution.

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::header::{HeaderName, AUTHORIZATION, WWW_AUTHENTICATE};
use axum::http::{HeaderValue, Method, StatusCode};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use storefront_core::{Principal, RequestContext};
use tower::ServiceBuilder;
use tower_http::cors::{AllowOrigin, Any, CorsLayer};
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;
use tracing::{debug, warn};

use super::config::NetworkConfig;
use super::handlers::AppState;

pub const X_REQUEST_ID: &str = "x-request-id";

/// The composed Tower layer type produced by [`build_http_layers`].
type HttpLayers = tower::layer::util::Stack<
    PropagateRequestIdLayer,
    tower::layer::util::Stack<
        TimeoutLayer,
        tower::layer::util::Stack<
            CorsLayer,
            tower::layer::util::Stack<
                TraceLayer<
                    tower_http::classify::SharedClassifier<
                        tower_http::classify::ServerErrorsAsFailures,
                    >,
                >,
                tower::layer::util::Stack<
                    SetRequestIdLayer<MakeRequestUuid>,
                    tower::layer::util::Identity,
                >,
            >,
        >,
    >,
>;

/// Builds the transport-level Tower stack from the network configuration.
///
/// **Ordering (outermost to innermost):**
/// 1. `SetRequestId` -- assigns a UUID v4 `X-Request-Id` unless one is present
/// 2. `Tracing` -- request/response spans
/// 3. `CORS` -- configured origins
/// 4. `Timeout` -- 408 after `request_timeout`
/// 5. `PropagateRequestId` -- copies `X-Request-Id` onto the response
#[must_use]
pub fn build_http_layers(config: &NetworkConfig) -> HttpLayers {
    let x_request_id = HeaderName::from_static(X_REQUEST_ID);

    ServiceBuilder::new()
        .layer(SetRequestIdLayer::new(x_request_id.clone(), MakeRequestUuid))
        .layer(TraceLayer::new_for_http())
        .layer(build_cors_layer(&config.cors_origins))
        .layer(TimeoutLayer::with_status_code(
            StatusCode::REQUEST_TIMEOUT,
            config.request_timeout,
        ))
        .layer(PropagateRequestIdLayer::new(x_request_id))
        .into_inner()
}

/// A wildcard `"*"` allows any origin; otherwise each entry is parsed into an
/// explicit allowlist and unparseable entries are dropped.
fn build_cors_layer(origins: &[String]) -> CorsLayer {
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let parsed: Vec<HeaderValue> = origins.iter().filter_map(|o| o.parse().ok()).collect();
        AllowOrigin::list(parsed)
    };

    CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any)
}

/// Rejects API requests with 503 once draining has begun; otherwise counts
/// the request as in flight until its response is produced.
pub async fn track_in_flight(State(state): State<AppState>, request: Request, next: Next) -> Response {
    if !state.shutdown.health_state().accepts_requests() {
        return (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({ "error": "server is shutting down" })),
        )
            .into_response();
    }
    let _guard = state.shutdown.in_flight_guard();
    next.run(request).await
}

/// Verifies the bearer token and stores the [`Principal`] in the request
/// extensions.
pub async fn require_auth(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let header = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    match state.auth.verify_header(header) {
        Ok(principal) => {
            request.extensions_mut().insert(principal);
            next.run(request).await
        }
        Err(err) => {
            debug!(path = %request.uri().path(), error = %err, "rejected unauthenticated request");
            let mut response = (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": err.to_string() })),
            )
                .into_response();
            response
                .headers_mut()
                .insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
            response
        }
    }
}

/// Resolves the request path to a domain and inserts the [`RequestContext`].
///
/// An API path that matches no configured prefix is rejected with 404 rather
/// than served from the default domain.
pub async fn resolve_domain(State(state): State<AppState>, mut request: Request, next: Next) -> Response {
    let path = request.uri().path().to_string();
    let resolution = state.resolver.resolve(&path);
    if !resolution.matched {
        warn!(path = %path, "rejected API request for unconfigured domain");
        return (
            StatusCode::NOT_FOUND,
            Json(json!({ "error": format!("no domain is configured for {path}") })),
        )
            .into_response();
    }

    let request_id = request
        .headers()
        .get(X_REQUEST_ID)
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    let mut context = RequestContext::new(resolution.domain, request_id);
    if let Some(principal) = request.extensions().get::<Principal>().cloned() {
        context = context.with_principal(principal);
    }
    request.extensions_mut().insert(context);
    next.run(request).await
}

/// Router fallback: 404 for anything no route matched.
pub async fn not_found(State(state): State<AppState>, request: Request<Body>) -> Response {
    let path = request.uri().path();
    // Logs the unmatched path (warn unless it is an infrastructure path).
    let resolution = state.resolver.resolve(path);
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "error": format!("no route for {path}"),
            "domain": resolution.matched.then_some(resolution.domain),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn build_http_layers_with_defaults() {
        let _layers = build_http_layers(&NetworkConfig::default());
    }

    #[test]
    fn build_http_layers_with_custom_timeout() {
        let config = NetworkConfig {
            request_timeout: Duration::from_secs(5),
            ..NetworkConfig::default()
        };
        let _layers = build_http_layers(&config);
    }

    #[test]
    fn build_cors_layer_specific_origins() {
        let origins = vec![
            "http://localhost:3000".to_string(),
            "https://example.com".to_string(),
            "not a header\n".to_string(),
        ];
        let _cors = build_cors_layer(&origins);
    }
}
