//! Lazy `(domain, entity)` binding with fallback-then-upgrade semantics.
//!
//! A binding pairs one entity schema with one connection. Bindings are
//! created on first use:
//!
//! - domain `Connected`: bind to the domain connection, status `BoundReal`.
//!   A `BoundReal` binding is permanent and never re-checked.
//! - otherwise: start the domain's connect in the background and bind to the
//!   fallback connection, status `BoundFallback`. Every later resolution
//!   re-checks the domain and upgrades to `BoundReal` once it is connected.
//!
//! [`BoundHandle`] is an indirection over the `(domain, entity)` key, not over
//! a store: each operation re-runs the binding algorithm, so a handle taken
//! during cold start moves to the real store by itself after the upgrade.

use std::fmt;
use std::sync::Arc;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use storefront_core::{Document, EntityRecord, EntitySchema, SchemaCatalog, ValidationResult};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use super::connections::ConnectionRegistry;
use crate::error::{BindError, ConnectError, HandleError};
use crate::storage::{ConnectionId, EntityStore, StoreConnection};

/// Binding state of a `(domain, entity)` pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BindingStatus {
    Unbound,
    BoundFallback,
    BoundReal,
}

impl BindingStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Unbound => "unbound",
            Self::BoundFallback => "bound_fallback",
            Self::BoundReal => "bound_real",
        }
    }
}

impl fmt::Display for BindingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindingKey {
    pub domain: String,
    pub entity: String,
}

impl BindingKey {
    #[must_use]
    pub fn new(domain: &str, entity: &str) -> Self {
        Self {
            domain: domain.to_string(),
            entity: entity.to_string(),
        }
    }

    fn unavailable(&self, reason: impl Into<String>) -> BindError {
        BindError::BindingUnavailable {
            domain: self.domain.clone(),
            entity: self.entity.clone(),
            reason: reason.into(),
        }
    }
}

impl fmt::Display for BindingKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.domain, self.entity)
    }
}

/// The authoritative binding of a pair at the moment it was read.
#[derive(Clone)]
pub struct Binding {
    pub status: BindingStatus,
    pub connection_id: ConnectionId,
    pub store: Arc<dyn EntityStore>,
}

/// Audit view of one cached binding.
#[derive(Debug, Clone, Serialize)]
pub struct BindingSnapshot {
    pub domain: String,
    pub entity: String,
    pub status: BindingStatus,
    pub connection_id: u64,
}

/// How a handle re-binds on each operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BindMode {
    /// Fallback allowed while the domain is not connected.
    Lenient,
    /// Wait for the domain connection; never use the fallback.
    Strict,
}

struct BinderInner {
    registry: Arc<ConnectionRegistry>,
    catalog: SchemaCatalog,
    bindings: DashMap<BindingKey, Binding>,
    /// Serializes `bind_schema` per pair; at most one bind is in flight.
    bind_locks: DashMap<BindingKey, Arc<Mutex<()>>>,
}

/// Owns all entity bindings. Cheap to clone; clones share state.
#[derive(Clone)]
pub struct EntityBinder {
    inner: Arc<BinderInner>,
}

impl EntityBinder {
    #[must_use]
    pub fn new(registry: Arc<ConnectionRegistry>, catalog: SchemaCatalog) -> Self {
        Self {
            inner: Arc::new(BinderInner {
                registry,
                catalog,
                bindings: DashMap::new(),
                bind_locks: DashMap::new(),
            }),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ConnectionRegistry> {
        &self.inner.registry
    }

    #[must_use]
    pub fn catalog(&self) -> &SchemaCatalog {
        &self.inner.catalog
    }

    /// Resolves a handle for `(domain, entity)`, binding on first use.
    ///
    /// Falls back to the fallback store while the domain is not connected and
    /// starts the domain's connect in the background.
    ///
    /// # Errors
    ///
    /// [`BindError::UnknownEntity`] / [`BindError::UnknownDomain`] for names
    /// outside the configuration; [`BindError::BindingUnavailable`] when
    /// neither the domain nor the fallback connection can be used.
    pub async fn resolve(&self, domain: &str, entity: &str) -> Result<BoundHandle, BindError> {
        let schema = self.schema(entity)?;
        let key = BindingKey::new(domain, entity);
        let binding = self.bind(&key, &schema).await?;
        metrics::counter!("storefront_resolve_total", "status" => binding.status.as_str())
            .increment(1);
        Ok(self.handle(key, schema, BindMode::Lenient))
    }

    /// Resolves a handle that only ever uses the domain's own connection,
    /// waiting for the (coalesced) connect if necessary.
    ///
    /// # Errors
    ///
    /// As [`resolve`](Self::resolve); connect failures surface as
    /// [`BindError::BindingUnavailable`].
    pub async fn resolve_ready(&self, domain: &str, entity: &str) -> Result<BoundHandle, BindError> {
        let schema = self.schema(entity)?;
        let key = BindingKey::new(domain, entity);
        self.bind_ready(&key, &schema).await?;
        metrics::counter!("storefront_resolve_total", "status" => BindingStatus::BoundReal.as_str())
            .increment(1);
        Ok(self.handle(key, schema, BindMode::Strict))
    }

    /// Cached status of a pair. Never connects or binds.
    #[must_use]
    pub fn status(&self, domain: &str, entity: &str) -> BindingStatus {
        self.status_of(&BindingKey::new(domain, entity))
    }

    /// Every cached binding, sorted by domain then entity.
    #[must_use]
    pub fn bindings(&self) -> Vec<BindingSnapshot> {
        let mut snapshots: Vec<BindingSnapshot> = self
            .inner
            .bindings
            .iter()
            .map(|entry| BindingSnapshot {
                domain: entry.key().domain.clone(),
                entity: entry.key().entity.clone(),
                status: entry.value().status,
                connection_id: entry.value().connection_id.0,
            })
            .collect();
        snapshots.sort_by(|a, b| (&a.domain, &a.entity).cmp(&(&b.domain, &b.entity)));
        snapshots
    }

    fn schema(&self, entity: &str) -> Result<Arc<EntitySchema>, BindError> {
        self.inner
            .catalog
            .get(entity)
            .ok_or_else(|| BindError::UnknownEntity {
                entity: entity.to_string(),
            })
    }

    fn handle(&self, key: BindingKey, schema: Arc<EntitySchema>, mode: BindMode) -> BoundHandle {
        BoundHandle {
            key,
            schema,
            mode,
            binder: self.clone(),
        }
    }

    fn status_of(&self, key: &BindingKey) -> BindingStatus {
        self.inner
            .bindings
            .get(key)
            .map_or(BindingStatus::Unbound, |b| b.status)
    }

    fn cached_real(&self, key: &BindingKey) -> Option<Binding> {
        self.inner
            .bindings
            .get(key)
            .filter(|b| b.status == BindingStatus::BoundReal)
            .map(|b| b.value().clone())
    }

    fn bind_lock(&self, key: &BindingKey) -> Arc<Mutex<()>> {
        Arc::clone(self.inner.bind_locks.entry(key.clone()).or_default().value())
    }

    async fn bind(&self, key: &BindingKey, schema: &EntitySchema) -> Result<Binding, BindError> {
        if let Some(binding) = self.cached_real(key) {
            return Ok(binding);
        }
        let registry = &self.inner.registry;
        if !registry.has_domain(&key.domain) {
            return Err(BindError::UnknownDomain {
                domain: key.domain.clone(),
            });
        }

        // Re-checked on every call so a fallback binding upgrades as soon as
        // the domain is up.
        if let Ok(conn) = registry.get_connection(&key.domain) {
            return self.bind_real(key, schema, conn).await;
        }

        if let Err(err) = registry.begin_connect(&key.domain) {
            debug!(binding = %key, error = %err, "background connect not started");
        }

        if let Some(existing) = self.inner.bindings.get(key).map(|b| b.value().clone()) {
            return Ok(existing);
        }

        let lock = self.bind_lock(key);
        let _guard = lock.lock().await;
        if let Some(existing) = self.inner.bindings.get(key).map(|b| b.value().clone()) {
            return Ok(existing);
        }

        let status = registry
            .status(&key.domain)
            .map_or("unknown", |s| s.as_str());
        let fallback = match registry.connect_fallback().await {
            Ok(conn) => conn,
            Err(ConnectError::NoFallback) => {
                return Err(key.unavailable(format!(
                    "domain is {status} and no fallback store is configured"
                )));
            }
            Err(err) => {
                return Err(key.unavailable(format!(
                    "domain is {status} and the fallback store is unavailable: {err}"
                )));
            }
        };

        let store = registry
            .bind_schema(&fallback, schema)
            .await
            .map_err(|err| key.unavailable(format!("binding to fallback store failed: {err:#}")))?;
        let binding = Binding {
            status: BindingStatus::BoundFallback,
            connection_id: fallback.id(),
            store,
        };

        warn!(
            binding = %key,
            connection_id = %binding.connection_id,
            domain_status = status,
            "bound to fallback store"
        );
        self.inner.bindings.insert(key.clone(), binding.clone());
        Ok(binding)
    }

    async fn bind_ready(&self, key: &BindingKey, schema: &EntitySchema) -> Result<Binding, BindError> {
        if let Some(binding) = self.cached_real(key) {
            return Ok(binding);
        }
        let conn = self
            .inner
            .registry
            .connect(&key.domain)
            .await
            .map_err(|err| match err {
                ConnectError::UnknownDomain { domain } => BindError::UnknownDomain { domain },
                other => key.unavailable(other.to_string()),
            })?;
        self.bind_real(key, schema, conn).await
    }

    async fn bind_real(
        &self,
        key: &BindingKey,
        schema: &EntitySchema,
        conn: Arc<dyn StoreConnection>,
    ) -> Result<Binding, BindError> {
        let lock = self.bind_lock(key);
        let _guard = lock.lock().await;
        if let Some(binding) = self.cached_real(key) {
            return Ok(binding);
        }

        let store = self
            .inner
            .registry
            .bind_schema(&conn, schema)
            .await
            .map_err(|err| key.unavailable(format!("binding to domain store failed: {err:#}")))?;
        let binding = Binding {
            status: BindingStatus::BoundReal,
            connection_id: conn.id(),
            store,
        };

        // Under the lock an occupied slot can only hold a fallback binding.
        match self.inner.bindings.entry(key.clone()) {
            Entry::Occupied(mut existing) => {
                info!(
                    binding = %key,
                    from = %existing.get().connection_id,
                    to = %binding.connection_id,
                    "upgraded fallback binding to domain store"
                );
                existing.insert(binding.clone());
            }
            Entry::Vacant(slot) => {
                debug!(binding = %key, connection_id = %binding.connection_id, "bound to domain store");
                slot.insert(binding.clone());
            }
        }
        Ok(binding)
    }
}

/// Stable handle to an entity in a domain.
///
/// Every operation resolves the current authoritative binding first, so the
/// handle may be held across the fallback-to-real upgrade.
#[derive(Clone)]
pub struct BoundHandle {
    key: BindingKey,
    schema: Arc<EntitySchema>,
    mode: BindMode,
    binder: EntityBinder,
}

impl fmt::Debug for BoundHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BoundHandle")
            .field("domain", &self.key.domain)
            .field("entity", &self.key.entity)
            .field("status", &self.status())
            .finish_non_exhaustive()
    }
}

impl BoundHandle {
    #[must_use]
    pub fn domain(&self) -> &str {
        &self.key.domain
    }

    #[must_use]
    pub fn entity(&self) -> &str {
        &self.key.entity
    }

    #[must_use]
    pub fn schema(&self) -> &EntitySchema {
        &self.schema
    }

    /// Cached binding status; does not re-check the domain.
    #[must_use]
    pub fn status(&self) -> BindingStatus {
        self.binder.status_of(&self.key)
    }

    /// Re-runs the binding algorithm and returns the authoritative binding.
    ///
    /// # Errors
    ///
    /// Returns [`BindError::BindingUnavailable`] if no store can be used.
    pub async fn current(&self) -> Result<Binding, BindError> {
        match self.mode {
            BindMode::Lenient => self.binder.bind(&self.key, &self.schema).await,
            BindMode::Strict => self.binder.bind_ready(&self.key, &self.schema).await,
        }
    }

    /// The authoritative store for this pair.
    ///
    /// # Errors
    ///
    /// See [`current`](Self::current).
    pub async fn store(&self) -> Result<Arc<dyn EntityStore>, BindError> {
        Ok(self.current().await?.store)
    }

    /// # Errors
    ///
    /// Binding or backend failure.
    pub async fn get(&self, id: &str) -> Result<Option<EntityRecord>, HandleError> {
        Ok(self.store().await?.get(id).await?)
    }

    /// # Errors
    ///
    /// Binding or backend failure.
    pub async fn list(&self, limit: Option<usize>) -> Result<Vec<EntityRecord>, HandleError> {
        Ok(self.store().await?.list(limit).await?)
    }

    /// Validates `data` against the schema and creates a record.
    ///
    /// # Errors
    ///
    /// [`HandleError::Invalid`] if validation fails; binding or backend failure.
    pub async fn insert(&self, data: Document) -> Result<EntityRecord, HandleError> {
        self.check(self.schema.validate(&data))?;
        Ok(self.store().await?.insert(data).await?)
    }

    /// # Errors
    ///
    /// Binding or backend failure.
    pub async fn upsert(&self, record: EntityRecord) -> Result<(), HandleError> {
        Ok(self.store().await?.upsert(record).await?)
    }

    /// Validates the present fields of `patch` and merges it into the record.
    ///
    /// # Errors
    ///
    /// [`HandleError::Invalid`] if validation fails; binding or backend failure.
    pub async fn update(&self, id: &str, patch: Document) -> Result<Option<EntityRecord>, HandleError> {
        self.check(self.schema.validate_patch(&patch))?;
        Ok(self.store().await?.update(id, patch).await?)
    }

    /// # Errors
    ///
    /// Binding or backend failure.
    pub async fn delete(&self, id: &str) -> Result<bool, HandleError> {
        Ok(self.store().await?.delete(id).await?)
    }

    /// # Errors
    ///
    /// Binding or backend failure.
    pub async fn count(&self) -> Result<usize, HandleError> {
        Ok(self.store().await?.count().await?)
    }

    fn check(&self, result: ValidationResult) -> Result<(), HandleError> {
        match result {
            ValidationResult::Valid => Ok(()),
            ValidationResult::Invalid { errors } => Err(HandleError::Invalid {
                entity: self.key.entity.clone(),
                errors,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use futures_util::future::join_all;
    use serde_json::json;

    use super::*;
    use crate::binding::connections::RegistryConfig;
    use crate::binding::DomainStatus;
    use crate::storage::{ConnectionSpec, StoreDriver};
    use crate::test_support::ScriptedDriver;

    const FLOWERS: &str = "memory://flowers";
    const FALLBACK: &str = "memory://fallback";

    fn binder(driver: &Arc<ScriptedDriver>, fallback: bool) -> EntityBinder {
        let registry = ConnectionRegistry::new(
            Arc::clone(driver) as Arc<dyn StoreDriver>,
            [
                ("flowers".to_string(), ConnectionSpec::new(FLOWERS)),
                ("laptops".to_string(), ConnectionSpec::new("memory://laptops")),
            ],
            fallback.then(|| ConnectionSpec::new(FALLBACK)),
            RegistryConfig {
                connect_timeout: Duration::from_millis(500),
            },
        );
        EntityBinder::new(Arc::new(registry), SchemaCatalog::storefront())
    }

    fn order() -> Document {
        json!({"user_id": "u-1", "items": [{"sku": "rose", "qty": 12}], "status": "pending"})
            .as_object()
            .cloned()
            .unwrap()
    }

    #[tokio::test(start_paused = true)]
    async fn cold_domain_binds_fallback_and_starts_connect() {
        let driver = ScriptedDriver::new();
        driver.delay(FLOWERS, Duration::from_millis(50));
        let binder = binder(&driver, true);

        let handle = binder.resolve("flowers", "order").await.unwrap();

        assert_eq!(handle.status(), BindingStatus::BoundFallback);
        let binding = handle.current().await.unwrap();
        assert_eq!(
            Some(binding.connection_id),
            binder.registry().fallback_connection_id()
        );
        assert_eq!(binder.registry().status("flowers"), Some(DomainStatus::Connecting));
        assert_eq!(driver.attempts(FLOWERS), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn next_resolve_after_connect_upgrades_and_stays_real() {
        let driver = ScriptedDriver::new();
        driver.delay(FLOWERS, Duration::from_millis(50));
        let binder = binder(&driver, true);

        binder.resolve("flowers", "order").await.unwrap();
        let conn = binder.registry().connect("flowers").await.unwrap();

        let upgraded = binder.resolve("flowers", "order").await.unwrap();
        assert_eq!(upgraded.status(), BindingStatus::BoundReal);

        for _ in 0..3 {
            let again = binder.resolve("flowers", "order").await.unwrap();
            let binding = again.current().await.unwrap();
            assert_eq!(binding.status, BindingStatus::BoundReal);
            assert_eq!(binding.connection_id, conn.id());
        }
        assert_eq!(driver.attempts(FLOWERS), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn early_handle_follows_the_upgrade() {
        let driver = ScriptedDriver::new();
        driver.delay(FLOWERS, Duration::from_millis(50));
        let binder = binder(&driver, true);

        let early = binder.resolve("flowers", "order").await.unwrap();
        early.insert(order()).await.unwrap();

        binder.registry().connect("flowers").await.unwrap();
        early.insert(order()).await.unwrap();

        assert_eq!(early.status(), BindingStatus::BoundReal);
        let memory = driver.memory();
        assert_eq!(memory.database("fallback").unwrap().record_count("order"), 1);
        assert_eq!(memory.database("flowers").unwrap().record_count("order"), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_cold_resolves_trigger_one_connect() {
        let driver = ScriptedDriver::new();
        driver.delay(FLOWERS, Duration::from_millis(50));
        driver.delay(FALLBACK, Duration::from_millis(5));
        let binder = binder(&driver, true);

        let handles = join_all((0..32).map(|_| binder.resolve("flowers", "order"))).await;
        assert!(handles.iter().all(Result::is_ok));
        assert_eq!(driver.attempts(FALLBACK), 1);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(driver.attempts(FLOWERS), 1);
        assert!(binder.registry().is_connected("flowers"));
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_ready_resolves_share_one_connection() {
        let driver = ScriptedDriver::new();
        driver.delay(FLOWERS, Duration::from_millis(50));
        let binder = binder(&driver, false);

        let handles = join_all((0..16).map(|_| binder.resolve_ready("flowers", "product"))).await;

        let mut ids = Vec::new();
        for handle in handles {
            let binding = handle.unwrap().current().await.unwrap();
            assert_eq!(binding.status, BindingStatus::BoundReal);
            ids.push(binding.connection_id);
        }
        ids.dedup();
        assert_eq!(ids.len(), 1);
        assert_eq!(driver.attempts(FLOWERS), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_first_resolves_bind_schema_once() {
        let driver = ScriptedDriver::new();
        driver.bind_delay(FLOWERS, Duration::from_millis(10));
        let binder = binder(&driver, true);
        binder.registry().connect("flowers").await.unwrap();

        let handles = join_all((0..16).map(|_| binder.resolve("flowers", "order"))).await;

        assert!(handles.iter().all(Result::is_ok));
        assert_eq!(driver.binds(FLOWERS), 1);
        assert_eq!(binder.status("flowers", "order"), BindingStatus::BoundReal);
    }

    #[tokio::test(start_paused = true)]
    async fn cold_start_burst_binds_fallback_then_real_once_each() {
        let driver = ScriptedDriver::new();
        driver.delay(FLOWERS, Duration::from_millis(50));
        driver.bind_delay(FLOWERS, Duration::from_millis(10));
        driver.bind_delay(FALLBACK, Duration::from_millis(10));
        let binder = binder(&driver, true);

        let mut burst = join_all((0..16).map(|_| binder.resolve("flowers", "order"))).await;
        assert!(burst.iter().all(Result::is_ok));
        assert_eq!(driver.binds(FALLBACK), 1);
        assert_eq!(binder.status("flowers", "order"), BindingStatus::BoundFallback);
        let early = burst.remove(0).unwrap();

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(binder.registry().is_connected("flowers"));

        let counts = join_all((0..16).map(|_| early.count())).await;
        assert!(counts.iter().all(Result::is_ok));
        assert_eq!(driver.binds(FLOWERS), 1);
        assert_eq!(early.status(), BindingStatus::BoundReal);
    }

    #[tokio::test(start_paused = true)]
    async fn no_connection_and_no_fallback_is_binding_unavailable() {
        let driver = ScriptedDriver::new();
        driver.delay(FLOWERS, Duration::from_millis(50));
        let binder = binder(&driver, false);

        let err = binder.resolve("flowers", "user").await.unwrap_err();
        assert!(matches!(err, BindError::BindingUnavailable { ref domain, .. } if domain == "flowers"));
        assert!(err.is_retryable());
        assert_eq!(binder.status("flowers", "user"), BindingStatus::Unbound);

        // The failed resolve still drove the connection up.
        binder.registry().connect("flowers").await.unwrap();
        let handle = binder.resolve("flowers", "user").await.unwrap();
        assert_eq!(handle.status(), BindingStatus::BoundReal);
    }

    #[tokio::test(start_paused = true)]
    async fn unreachable_fallback_is_binding_unavailable() {
        let driver = ScriptedDriver::new();
        driver.delay(FLOWERS, Duration::from_millis(50));
        driver.fail_times(FALLBACK, 1);
        let binder = binder(&driver, true);

        let err = binder.resolve("flowers", "order").await.unwrap_err();
        let BindError::BindingUnavailable { reason, .. } = err else {
            panic!("expected BindingUnavailable");
        };
        assert!(reason.contains("fallback store is unavailable"), "{reason}");
    }

    #[tokio::test]
    async fn unknown_names_are_rejected_before_connecting() {
        let driver = ScriptedDriver::new();
        let binder = binder(&driver, true);

        assert_eq!(
            binder.resolve("flowers", "invoice").await.unwrap_err(),
            BindError::UnknownEntity {
                entity: "invoice".to_string()
            }
        );
        assert_eq!(
            binder.resolve("books", "order").await.unwrap_err(),
            BindError::UnknownDomain {
                domain: "books".to_string()
            }
        );
        assert_eq!(
            binder.resolve_ready("books", "order").await.unwrap_err(),
            BindError::UnknownDomain {
                domain: "books".to_string()
            }
        );
        assert_eq!(driver.attempts(FLOWERS), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn resolve_ready_surfaces_connect_failure() {
        let driver = ScriptedDriver::new();
        driver.fail_times(FLOWERS, 1);
        let binder = binder(&driver, true);

        let err = binder.resolve_ready("flowers", "order").await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(binder.status("flowers", "order"), BindingStatus::Unbound);

        let handle = binder.resolve_ready("flowers", "order").await.unwrap();
        assert_eq!(handle.status(), BindingStatus::BoundReal);
    }

    #[tokio::test]
    async fn real_binding_is_never_rechecked() {
        let driver = ScriptedDriver::new();
        let binder = binder(&driver, true);
        binder.registry().connect("flowers").await.unwrap();
        binder.resolve("flowers", "order").await.unwrap();

        binder.registry().shutdown().await;

        let handle = binder.resolve("flowers", "order").await.unwrap();
        assert_eq!(handle.status(), BindingStatus::BoundReal);
    }

    #[tokio::test]
    async fn insert_validates_against_schema() {
        let driver = ScriptedDriver::new();
        let binder = binder(&driver, true);
        binder.registry().connect("flowers").await.unwrap();
        let handle = binder.resolve("flowers", "product").await.unwrap();

        let bad = json!({"name": "Rose"}).as_object().cloned().unwrap();
        let err = handle.insert(bad).await.unwrap_err();
        assert!(matches!(err, HandleError::Invalid { ref errors, .. } if errors.len() == 1));

        let good = json!({"name": "Rose", "price": 2.5}).as_object().cloned().unwrap();
        let created = handle.insert(good).await.unwrap();
        assert_eq!(handle.get(&created.id).await.unwrap(), Some(created));
        assert_eq!(handle.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn bindings_snapshot_lists_each_pair() {
        let driver = ScriptedDriver::new();
        let binder = binder(&driver, true);
        binder.registry().connect("laptops").await.unwrap();

        binder.resolve("laptops", "user").await.unwrap();
        binder.resolve("flowers", "user").await.unwrap();

        let snapshot = binder.bindings();
        assert_eq!(snapshot.len(), 2);
        assert_eq!(snapshot[0].domain, "flowers");
        assert_eq!(snapshot[0].status, BindingStatus::BoundFallback);
        assert_eq!(snapshot[1].domain, "laptops");
        assert_eq!(snapshot[1].status, BindingStatus::BoundReal);
    }
}
