//! Service lifecycle and process configuration.
//!
//! 1. **Configuration** (`config`): CLI/env settings validated into `AppConfig`
//! 2. **Registry** (`registry`): `ManagedService` init/shutdown sequencing

pub mod config;
pub mod registry;

pub use config::{AppConfig, Cli, ConfigError, DomainConfig};
pub use registry::{ManagedService, ServiceContext, ServiceRegistry};
