//! Scheme-dispatching [`StoreDriver`].
//!
//! Routes `connect` to the driver registered for the spec's URL scheme, so a
//! single registry can hold `memory://` and `postgres://` domains side by side.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use super::{ConnectionSpec, MemoryDriver, StoreConnection, StoreDriver};

/// Dispatches connections by spec scheme.
#[derive(Default)]
pub struct SchemeDriver {
    drivers: HashMap<String, Arc<dyn StoreDriver>>,
}

impl SchemeDriver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Drivers compiled into this build: `memory`, plus `postgres`/`postgresql`
    /// with the `postgres` feature.
    #[must_use]
    pub fn with_builtin_drivers() -> Self {
        let driver = Self::new().with("memory", Arc::new(MemoryDriver::new()));
        #[cfg(feature = "postgres")]
        let driver = {
            let pg: Arc<dyn StoreDriver> = Arc::new(super::PostgresDriver::default());
            driver.with("postgres", Arc::clone(&pg)).with("postgresql", pg)
        };
        driver
    }

    /// Registers `driver` for `scheme`, replacing any previous registration.
    #[must_use]
    pub fn with(mut self, scheme: &str, driver: Arc<dyn StoreDriver>) -> Self {
        self.drivers.insert(scheme.to_ascii_lowercase(), driver);
        self
    }

    /// Whether a driver is registered for the spec's scheme.
    #[must_use]
    pub fn supports(&self, spec: &ConnectionSpec) -> bool {
        self.drivers.contains_key(&spec.scheme())
    }
}

#[async_trait]
impl StoreDriver for SchemeDriver {
    async fn connect(&self, spec: &ConnectionSpec) -> anyhow::Result<Arc<dyn StoreConnection>> {
        let scheme = spec.scheme();
        let driver = self
            .drivers
            .get(&scheme)
            .ok_or_else(|| anyhow::anyhow!("no driver registered for scheme '{scheme}' ({spec})"))?;
        driver.connect(spec).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn dispatches_by_scheme() {
        let driver = SchemeDriver::with_builtin_drivers();
        let spec = ConnectionSpec::new("MEMORY://flowers");
        assert!(driver.supports(&spec));

        let conn = driver.connect(&spec).await.unwrap();
        assert_eq!(conn.label(), "MEMORY://flowers");
    }

    #[tokio::test]
    async fn unknown_scheme_is_a_connect_error() {
        let driver = SchemeDriver::new();
        let err = driver
            .connect(&ConnectionSpec::new("mongodb://u:pw@cluster/shop"))
            .await
            .err()
            .unwrap();
        let message = err.to_string();
        assert!(message.contains("mongodb"));
        assert!(!message.contains("pw"), "spec must be redacted: {message}");
    }
}
