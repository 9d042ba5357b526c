//! Built-in scheduled tasks.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use storefront_core::{entity_names, now_millis, order_status, Document};
use tracing::{info, warn};

use super::ScheduledTask;
use crate::binding::EntityBinder;

/// Marks pending orders untouched for `abandon_after` as abandoned, in every
/// domain.
///
/// Binds through `resolve_ready`, so it waits for each domain's own store and
/// never sweeps the fallback.
#[derive(Debug, Clone)]
pub struct AbandonedOrderSweep {
    domains: Vec<String>,
    abandon_after: Duration,
}

impl AbandonedOrderSweep {
    #[must_use]
    pub fn new(domains: Vec<String>, abandon_after: Duration) -> Self {
        Self {
            domains,
            abandon_after,
        }
    }

    async fn sweep_domain(
        &self,
        binder: &EntityBinder,
        domain: &str,
        cutoff: i64,
    ) -> anyhow::Result<usize> {
        let orders = binder.resolve_ready(domain, entity_names::ORDER).await?;
        let mut abandoned = 0;
        for order in orders.list(None).await? {
            if order.str_field("status") != Some(order_status::PENDING) || order.updated_at >= cutoff {
                continue;
            }
            let mut patch = Document::new();
            patch.insert(
                "status".to_string(),
                Value::String(order_status::ABANDONED.to_string()),
            );
            if orders.update(&order.id, patch).await?.is_some() {
                abandoned += 1;
            }
        }
        Ok(abandoned)
    }
}

#[async_trait]
impl ScheduledTask for AbandonedOrderSweep {
    async fn run(&self, binder: &EntityBinder) -> anyhow::Result<()> {
        let age = i64::try_from(self.abandon_after.as_millis()).unwrap_or(i64::MAX);
        let cutoff = now_millis().saturating_sub(age);

        let mut failed = Vec::new();
        for domain in &self.domains {
            match self.sweep_domain(binder, domain, cutoff).await {
                Ok(0) => {}
                Ok(count) => info!(domain = %domain, abandoned = count, "marked stale orders abandoned"),
                Err(err) => {
                    warn!(domain = %domain, error = %err, "abandoned-order sweep failed");
                    failed.push(domain.as_str());
                }
            }
        }
        if !failed.is_empty() {
            anyhow::bail!("abandoned-order sweep failed for: {}", failed.join(", "));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use serde_json::json;
    use storefront_core::{EntityRecord, SchemaCatalog};

    use super::*;
    use crate::binding::{ConnectionRegistry, RegistryConfig};
    use crate::storage::{ConnectionSpec, MemoryDriver, StoreDriver};
    use crate::test_support::ScriptedDriver;

    const HOUR_MS: i64 = 3_600_000;

    fn order(id: &str, status: &str, updated_at: i64) -> EntityRecord {
        let data = json!({"user_id": "u-1", "items": [], "status": status})
            .as_object()
            .cloned()
            .unwrap();
        EntityRecord {
            id: id.to_string(),
            data,
            created_at: updated_at,
            updated_at,
        }
    }

    fn binder(driver: Arc<dyn StoreDriver>) -> EntityBinder {
        let registry = ConnectionRegistry::new(
            driver,
            [
                ("flowers".to_string(), ConnectionSpec::new("memory://flowers")),
                ("laptops".to_string(), ConnectionSpec::new("memory://laptops")),
            ],
            Some(ConnectionSpec::new("memory://fallback")),
            RegistryConfig::default(),
        );
        EntityBinder::new(Arc::new(registry), SchemaCatalog::storefront())
    }

    #[tokio::test]
    async fn marks_only_stale_pending_orders() {
        let binder = binder(Arc::new(MemoryDriver::new()));
        let now = now_millis();
        let flowers = binder.resolve_ready("flowers", "order").await.unwrap();
        flowers.upsert(order("stale", "pending", now - 2 * HOUR_MS)).await.unwrap();
        flowers.upsert(order("fresh", "pending", now)).await.unwrap();
        flowers.upsert(order("paid", "paid", now - 2 * HOUR_MS)).await.unwrap();

        let sweep = AbandonedOrderSweep::new(
            vec!["flowers".to_string(), "laptops".to_string()],
            Duration::from_secs(3_600),
        );
        sweep.run(&binder).await.unwrap();

        let status = |record: Option<EntityRecord>| record.unwrap().str_field("status").map(str::to_string);
        assert_eq!(status(flowers.get("stale").await.unwrap()).as_deref(), Some("abandoned"));
        assert_eq!(status(flowers.get("fresh").await.unwrap()).as_deref(), Some("pending"));
        assert_eq!(status(flowers.get("paid").await.unwrap()).as_deref(), Some("paid"));
    }

    #[tokio::test(start_paused = true)]
    async fn one_failing_domain_does_not_stop_the_others() {
        let driver = ScriptedDriver::new();
        driver.fail_times("memory://flowers", 1);
        let binder = binder(driver.clone());

        let laptops = binder.resolve_ready("laptops", "order").await.unwrap();
        laptops
            .upsert(order("old", "pending", now_millis() - 2 * HOUR_MS))
            .await
            .unwrap();

        let sweep = AbandonedOrderSweep::new(
            vec!["flowers".to_string(), "laptops".to_string()],
            Duration::from_secs(3_600),
        );
        let err = sweep.run(&binder).await.unwrap_err();

        assert!(err.to_string().contains("flowers"));
        let old = laptops.get("old").await.unwrap().unwrap();
        assert_eq!(old.str_field("status"), Some("abandoned"));
    }

    #[tokio::test(start_paused = true)]
    async fn never_touches_the_fallback_store() {
        let driver = ScriptedDriver::new();
        driver.delay("memory://flowers", Duration::from_secs(1));
        let binder = binder(driver.clone());

        // Cold resolve parks a pending order in the fallback.
        let early = binder.resolve("flowers", "order").await.unwrap();
        assert_eq!(early.status(), crate::binding::BindingStatus::BoundFallback);
        let fallback_store = early.store().await.unwrap();
        fallback_store
            .upsert(order("parked", "pending", now_millis() - 2 * HOUR_MS))
            .await
            .unwrap();

        let sweep = AbandonedOrderSweep::new(vec!["flowers".to_string()], Duration::from_secs(3_600));
        sweep.run(&binder).await.unwrap();

        let parked = fallback_store.get("parked").await.unwrap().unwrap();
        assert_eq!(parked.str_field("status"), Some("pending"));
    }
}
