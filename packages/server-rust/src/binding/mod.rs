//! Domain-scoped connections and entity bindings.
//!
//! - [`ConnectionRegistry`]: one coalesced connection per domain plus the fallback
//! - [`EntityBinder`]: lazy `(domain, entity)` bindings and [`BoundHandle`]s
//! - [`DomainResolver`]: request path to domain name

pub mod binder;
pub mod connections;
pub mod resolver;

pub use binder::{BindingKey, BindingSnapshot, BindingStatus, BoundHandle, EntityBinder};
pub use connections::{ConnectionRegistry, DomainSnapshot, DomainStatus, RegistryConfig};
pub use resolver::{DomainResolver, Resolution};
