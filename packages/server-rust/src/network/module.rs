//! Network module with deferred startup lifecycle.
//!
//! `new()` assembles shared state, `start()` binds the TCP listener, and
//! `serve()` accepts connections until the shutdown signal fires. The split
//! lets the caller learn the bound port before serving.

use std::future::Future;
use std::sync::Arc;

use anyhow::Context;
use axum::middleware::from_fn_with_state;
use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tracing::{info, warn};

use super::auth::JwtVerifier;
use super::config::NetworkConfig;
use super::handlers::{
    create_entity, delete_entity, domains_handler, get_entity, health_handler, list_entities,
    liveness_handler, readiness_handler, update_entity, AppState,
};
use super::middleware::{
    build_http_layers, not_found, require_auth, resolve_domain, track_in_flight,
};
use super::shutdown::ShutdownController;
use crate::binding::{DomainResolver, EntityBinder};

/// Owns the HTTP server lifecycle.
pub struct NetworkModule {
    config: NetworkConfig,
    listener: Option<TcpListener>,
    state: AppState,
}

impl NetworkModule {
    /// Creates the module without binding any port.
    #[must_use]
    pub fn new(
        config: NetworkConfig,
        binder: EntityBinder,
        resolver: Arc<DomainResolver>,
        auth: Arc<JwtVerifier>,
    ) -> Self {
        Self {
            config,
            listener: None,
            state: AppState {
                binder,
                resolver,
                auth,
                shutdown: Arc::new(ShutdownController::new()),
            },
        }
    }

    /// Shared shutdown controller, for health checks and draining.
    #[must_use]
    pub fn shutdown_controller(&self) -> Arc<ShutdownController> {
        Arc::clone(&self.state.shutdown)
    }

    /// Assembles the router.
    ///
    /// Routes:
    /// - `GET /health`, `/health/live`, `/health/ready`, `/health/domains`
    /// - for every domain prefix `P`: `GET|POST P/{entity}` and
    ///   `GET|PUT|DELETE P/{entity}/{id}`
    ///
    /// Entity routes sit behind in-flight tracking, bearer auth and domain
    /// resolution; health routes are open.
    pub fn build_router(&self) -> Router {
        let state = self.state.clone();

        let mut api = Router::new();
        for route in state.resolver.routes() {
            api = api
                .route(
                    &format!("{}/{{entity}}", route.prefix),
                    get(list_entities).post(create_entity),
                )
                .route(
                    &format!("{}/{{entity}}/{{id}}", route.prefix),
                    get(get_entity).put(update_entity).delete(delete_entity),
                );
        }
        // route_layer: the last one added runs first.
        let api = api
            .route_layer(from_fn_with_state(state.clone(), resolve_domain))
            .route_layer(from_fn_with_state(state.clone(), require_auth))
            .route_layer(from_fn_with_state(state.clone(), track_in_flight));

        Router::new()
            .route("/health", get(health_handler))
            .route("/health/live", get(liveness_handler))
            .route("/health/ready", get(readiness_handler))
            .route("/health/domains", get(domains_handler))
            .merge(api)
            .fallback(not_found)
            .layer(build_http_layers(&self.config))
            .with_state(state)
    }

    /// Binds the TCP listener and returns the bound port (OS-assigned when
    /// the configured port is 0).
    ///
    /// # Errors
    ///
    /// Returns an error if the address cannot be bound.
    pub async fn start(&mut self) -> anyhow::Result<u16> {
        let addr = format!("{}:{}", self.config.host, self.config.port);
        let listener = TcpListener::bind(&addr)
            .await
            .with_context(|| format!("failed to bind {addr}"))?;
        let port = listener.local_addr()?.port();

        info!(host = %self.config.host, port, "TCP listener bound");

        self.listener = Some(listener);
        Ok(port)
    }

    /// Serves until `shutdown` resolves, then drains in-flight API requests
    /// for up to the configured drain timeout.
    ///
    /// Health moves to `Ready` when serving begins and to `Draining` as soon
    /// as the signal fires, so new API requests get 503 while existing ones
    /// finish.
    ///
    /// # Errors
    ///
    /// Returns an error if `start()` was not called or the server hits a
    /// fatal I/O error.
    pub async fn serve(
        self,
        shutdown: impl Future<Output = ()> + Send + 'static,
    ) -> anyhow::Result<()> {
        let router = self.build_router();
        let listener = self
            .listener
            .context("start() must be called before serve()")?;
        let controller = self.state.shutdown;

        controller.set_ready();
        info!("serving HTTP");

        let draining = Arc::clone(&controller);
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                shutdown.await;
                draining.trigger_shutdown();
                info!("shutdown signal received, draining");
            })
            .await?;

        controller.trigger_shutdown();
        if controller.wait_for_drain(self.config.drain_timeout).await {
            info!("all in-flight requests drained");
        } else {
            warn!(
                in_flight = controller.in_flight_count(),
                "drain timeout expired with requests still in flight"
            );
        }
        Ok(())
    }
}
