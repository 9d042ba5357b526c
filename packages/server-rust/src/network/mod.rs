//! HTTP surface: configuration, auth, middleware, handlers and the server
//! lifecycle with graceful shutdown.

pub mod auth;
pub mod config;
pub mod handlers;
pub mod middleware;
pub mod module;
pub mod shutdown;

pub use auth::{AuthError, Claims, JwtVerifier};
pub use config::NetworkConfig;
pub use handlers::AppState;
pub use module::NetworkModule;
pub use shutdown::{HealthState, InFlightGuard, ShutdownController};
