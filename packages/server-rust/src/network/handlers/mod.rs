//! HTTP handler definitions.
//!
//! `AppState` is the shared state carried through axum extractors. Every
//! field is an `Arc` or cheap handle, so cloning per request is fine.

pub mod entities;
pub mod health;

pub use entities::{
    create_entity, delete_entity, get_entity, list_entities, update_entity, ApiError,
};
pub use health::{domains_handler, health_handler, liveness_handler, readiness_handler};

use std::sync::Arc;

use super::auth::JwtVerifier;
use super::ShutdownController;
use crate::binding::{DomainResolver, EntityBinder};

#[derive(Clone)]
pub struct AppState {
    /// Entity bindings; also reaches the connection registry.
    pub binder: EntityBinder,
    pub resolver: Arc<DomainResolver>,
    pub auth: Arc<JwtVerifier>,
    /// Health state and in-flight tracking.
    pub shutdown: Arc<ShutdownController>,
}
