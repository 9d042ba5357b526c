//! Application assembly: one [`App`] owns everything a running server needs.
//!
//! Nothing here is global, so several `App`s can live in one process (the
//! tests rely on that).

use std::sync::Arc;

use anyhow::Context;
use storefront_core::SchemaCatalog;
use tracing::info;

use crate::binding::{ConnectionRegistry, DomainResolver, EntityBinder, RegistryConfig};
use crate::network::{JwtVerifier, NetworkModule};
use crate::scheduler::Scheduler;
use crate::service::{AppConfig, ServiceContext, ServiceRegistry};
use crate::storage::{SchemeDriver, StoreDriver};

pub struct App {
    config: Arc<AppConfig>,
    registry: Arc<ConnectionRegistry>,
    binder: EntityBinder,
    resolver: Arc<DomainResolver>,
    scheduler: Arc<Scheduler>,
    services: ServiceRegistry,
}

impl App {
    /// Builds an app with the built-in drivers, dispatched by URL scheme.
    ///
    /// # Errors
    ///
    /// Returns an error if a configured URL uses a scheme no driver handles.
    pub fn build(config: AppConfig) -> anyhow::Result<Self> {
        let driver = SchemeDriver::with_builtin_drivers();
        let specs = config
            .domains
            .iter()
            .map(|d| (d.name.as_str(), &d.url))
            .chain(config.fallback.iter().map(|spec| ("fallback", spec)));
        for (name, spec) in specs {
            if !driver.supports(spec) {
                anyhow::bail!(
                    "no store driver for scheme '{}' (used by {name})",
                    spec.scheme()
                );
            }
        }
        Ok(Self::with_driver(config, Arc::new(driver)))
    }

    /// Builds an app on an explicit driver.
    #[must_use]
    pub fn with_driver(config: AppConfig, driver: Arc<dyn StoreDriver>) -> Self {
        let registry = Arc::new(ConnectionRegistry::new(
            driver,
            config.connection_specs(),
            config.fallback.clone(),
            RegistryConfig {
                connect_timeout: config.connect_timeout,
            },
        ));
        let binder = EntityBinder::new(Arc::clone(&registry), SchemaCatalog::storefront());
        let resolver = Arc::new(DomainResolver::new(
            config.routes(),
            config.default_domain.clone(),
        ));
        let scheduler = Arc::new(Scheduler::new(binder.clone()));

        // Connections come up before the scheduler and go down after it.
        let services = ServiceRegistry::new();
        services.register(Arc::clone(&registry));
        services.register(Arc::clone(&scheduler));

        Self {
            config: Arc::new(config),
            registry,
            binder,
            resolver,
            scheduler,
            services,
        }
    }

    /// Starts the managed services: connection warm-up, then the scheduler.
    ///
    /// # Errors
    ///
    /// Returns the first service initialization failure.
    pub async fn init(&self) -> anyhow::Result<()> {
        let ctx = ServiceContext {
            config: Arc::clone(&self.config),
        };
        self.services
            .init_all(&ctx)
            .await
            .context("service initialization failed")?;
        info!(
            domains = ?self.config.domain_names(),
            default_domain = %self.config.default_domain,
            fallback = self.config.fallback.is_some(),
            "storefront initialized"
        );
        Ok(())
    }

    /// A network module serving this app's binder and resolver.
    #[must_use]
    pub fn network(&self) -> NetworkModule {
        NetworkModule::new(
            self.config.network.clone(),
            self.binder.clone(),
            Arc::clone(&self.resolver),
            Arc::new(JwtVerifier::from_secret(self.config.auth_secret.as_bytes())),
        )
    }

    /// Stops the scheduler, then closes every connection.
    ///
    /// # Errors
    ///
    /// Returns the first shutdown failure; later services are still stopped.
    pub async fn shutdown(&self) -> anyhow::Result<()> {
        self.services.shutdown_all(false).await
    }

    #[must_use]
    pub fn config(&self) -> &Arc<AppConfig> {
        &self.config
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.registry
    }

    #[must_use]
    pub fn binder(&self) -> &EntityBinder {
        &self.binder
    }

    #[must_use]
    pub fn resolver(&self) -> &Arc<DomainResolver> {
        &self.resolver
    }

    #[must_use]
    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }
}
