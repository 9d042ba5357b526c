//! Storefront Server: multi-domain storefront API with per-domain backing
//! stores, lazy entity binding and a shared fallback store for cold starts.

pub mod app;
pub mod binding;
pub mod error;
pub mod network;
pub mod scheduler;
pub mod service;
pub mod storage;
pub mod telemetry;

#[cfg(test)]
mod test_support;

pub use app::App;
pub use binding::{BindingStatus, BoundHandle, ConnectionRegistry, DomainResolver, EntityBinder};
pub use error::{BindError, ConnectError, HandleError, RegistryError};
pub use scheduler::{ScheduledTask, Scheduler};
