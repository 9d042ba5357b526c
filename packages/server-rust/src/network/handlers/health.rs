//! Health, liveness, readiness and domain status handlers.
//!
//! None of these touch a backing-store connection: they read in-memory state
//! only, so they answer while every domain is still connecting.

use axum::extract::State;
use axum::http::StatusCode;
use axum::Json;
use serde_json::json;

use super::AppState;
use crate::network::HealthState;

/// Process liveness details. Always 200; `state` carries the health state.
pub async fn health_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(json!({
        "state": state.shutdown.health_state().as_str(),
        "uptime_secs": state.shutdown.uptime().as_secs(),
        "in_flight": state.shutdown.in_flight_count(),
    }))
}

/// Liveness probe. Always 200.
pub async fn liveness_handler() -> StatusCode {
    StatusCode::OK
}

/// Readiness probe: 200 when `Ready`, 503 otherwise.
pub async fn readiness_handler(State(state): State<AppState>) -> StatusCode {
    if state.shutdown.health_state() == HealthState::Ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    }
}

/// Connection status per domain plus every cached entity binding.
pub async fn domains_handler(State(state): State<AppState>) -> Json<serde_json::Value> {
    let registry = state.binder.registry();
    Json(json!({
        "default_domain": state.resolver.default_domain(),
        "domains": registry.snapshot(),
        "fallback": registry.fallback_snapshot(),
        "bindings": state.binder.bindings(),
    }))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use storefront_core::SchemaCatalog;

    use super::*;
    use crate::binding::{ConnectionRegistry, DomainResolver, EntityBinder, RegistryConfig};
    use crate::network::auth::JwtVerifier;
    use crate::network::ShutdownController;
    use crate::storage::{ConnectionSpec, StoreDriver};
    use crate::test_support::ScriptedDriver;

    fn test_state(driver: &Arc<ScriptedDriver>) -> AppState {
        let registry = ConnectionRegistry::new(
            Arc::clone(driver) as Arc<dyn StoreDriver>,
            [("flowers".to_string(), ConnectionSpec::new("memory://flowers"))],
            Some(ConnectionSpec::new("memory://fallback")),
            RegistryConfig::default(),
        );
        AppState {
            binder: EntityBinder::new(Arc::new(registry), SchemaCatalog::storefront()),
            resolver: Arc::new(DomainResolver::new(
                [("flowers".to_string(), "/api/flowers".to_string())],
                "flowers",
            )),
            auth: Arc::new(JwtVerifier::from_secret(b"secret")),
            shutdown: Arc::new(ShutdownController::new()),
        }
    }

    #[tokio::test]
    async fn health_reports_state_without_connecting() {
        let driver = ScriptedDriver::new();
        driver.hang("memory://flowers", true);
        let state = test_state(&driver);
        state.shutdown.set_ready();
        let _guard = state.shutdown.in_flight_guard();

        let json = health_handler(State(state)).await.0;

        assert_eq!(json["state"], "ready");
        assert_eq!(json["in_flight"], 1);
        assert!(json["uptime_secs"].is_number());
        assert_eq!(driver.attempts("memory://flowers"), 0);
    }

    #[tokio::test]
    async fn health_reports_draining_state() {
        let state = test_state(&ScriptedDriver::new());
        state.shutdown.set_ready();
        state.shutdown.trigger_shutdown();

        let json = health_handler(State(state)).await.0;
        assert_eq!(json["state"], "draining");
    }

    #[tokio::test]
    async fn liveness_always_returns_200() {
        assert_eq!(liveness_handler().await, StatusCode::OK);
    }

    #[tokio::test]
    async fn readiness_follows_health_state() {
        let state = test_state(&ScriptedDriver::new());
        assert_eq!(
            readiness_handler(State(state.clone())).await,
            StatusCode::SERVICE_UNAVAILABLE
        );

        state.shutdown.set_ready();
        assert_eq!(readiness_handler(State(state.clone())).await, StatusCode::OK);

        state.shutdown.trigger_shutdown();
        assert_eq!(
            readiness_handler(State(state)).await,
            StatusCode::SERVICE_UNAVAILABLE
        );
    }

    #[tokio::test(start_paused = true)]
    async fn domains_lists_connections_and_bindings() {
        let driver = ScriptedDriver::new();
        driver.delay("memory://flowers", Duration::from_secs(1));
        let state = test_state(&driver);
        state.binder.resolve("flowers", "order").await.unwrap();

        let json = domains_handler(State(state)).await.0;

        assert_eq!(json["default_domain"], "flowers");
        assert_eq!(json["domains"][0]["domain"], "flowers");
        assert_eq!(json["domains"][0]["status"], "connecting");
        assert_eq!(json["fallback"]["status"], "connected");
        assert_eq!(json["bindings"][0]["entity"], "order");
        assert_eq!(json["bindings"][0]["status"], "bound_fallback");
    }
}
