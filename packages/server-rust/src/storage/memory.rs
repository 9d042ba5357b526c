//! In-memory [`StoreDriver`] backed by [`DashMap`].
//!
//! Specs have the form `memory://<database>`. Connections opened against the
//! same database name share their data, so a process can hold distinct
//! "flowers", "laptops" and fallback stores and tell them apart. Suitable for
//! development, tests, and the fallback store of small deployments.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;
use storefront_core::{now_millis, Document, EntityRecord, EntitySchema};

use super::{ConnectionId, ConnectionSpec, EntityStore, StoreConnection, StoreDriver};

/// Records of one entity within a memory database.
#[derive(Default)]
pub struct MemoryCollection {
    records: DashMap<String, EntityRecord>,
}

impl MemoryCollection {
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// A named database: one collection per bound entity.
pub struct MemoryDatabase {
    name: String,
    collections: DashMap<String, Arc<MemoryCollection>>,
}

impl MemoryDatabase {
    fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            collections: DashMap::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the collection for `entity`, creating it on first use.
    #[must_use]
    pub fn collection(&self, entity: &str) -> Arc<MemoryCollection> {
        self.collections
            .entry(entity.to_string())
            .or_default()
            .clone()
    }

    /// Number of records stored for `entity` (0 if never bound).
    #[must_use]
    pub fn record_count(&self, entity: &str) -> usize {
        self.collections.get(entity).map_or(0, |c| c.len())
    }
}

/// Driver for `memory://` specs.
#[derive(Default)]
pub struct MemoryDriver {
    databases: DashMap<String, Arc<MemoryDatabase>>,
}

impl MemoryDriver {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up a database by name without connecting.
    #[must_use]
    pub fn database(&self, name: &str) -> Option<Arc<MemoryDatabase>> {
        self.databases.get(name).map(|db| db.clone())
    }

    /// Opens a connection synchronously. Shared by [`StoreDriver::connect`]
    /// and wrappers that add their own async behavior.
    ///
    /// # Errors
    ///
    /// Returns an error if the spec is not `memory://<name>` with a non-empty name.
    pub fn open(&self, spec: &ConnectionSpec) -> anyhow::Result<Arc<MemoryConnection>> {
        if spec.scheme() != "memory" {
            anyhow::bail!("memory driver cannot open '{spec}'");
        }
        let name = spec.target().trim_matches('/');
        if name.is_empty() {
            anyhow::bail!("memory spec '{spec}' has no database name");
        }
        let database = self
            .databases
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(MemoryDatabase::new(name)))
            .clone();

        Ok(Arc::new(MemoryConnection {
            id: ConnectionId::next(),
            label: spec.redacted(),
            database,
            closed: Arc::new(AtomicBool::new(false)),
        }))
    }
}

#[async_trait]
impl StoreDriver for MemoryDriver {
    async fn connect(&self, spec: &ConnectionSpec) -> anyhow::Result<Arc<dyn StoreConnection>> {
        let connection: Arc<dyn StoreConnection> = self.open(spec)?;
        Ok(connection)
    }
}

/// Live connection to a [`MemoryDatabase`].
pub struct MemoryConnection {
    id: ConnectionId,
    label: String,
    database: Arc<MemoryDatabase>,
    closed: Arc<AtomicBool>,
}

impl MemoryConnection {
    #[must_use]
    pub fn database(&self) -> &Arc<MemoryDatabase> {
        &self.database
    }
}

#[async_trait]
impl StoreConnection for MemoryConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn label(&self) -> &str {
        &self.label
    }

    async fn bind_schema(&self, schema: &EntitySchema) -> anyhow::Result<Arc<dyn EntityStore>> {
        if self.closed.load(Ordering::Acquire) {
            anyhow::bail!("connection {} is closed", self.id);
        }
        Ok(Arc::new(MemoryEntityStore {
            entity: schema.name.clone(),
            connection_id: self.id,
            collection: self.database.collection(&schema.name),
            closed: Arc::clone(&self.closed),
        }))
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}

/// [`EntityStore`] over one [`MemoryCollection`].
struct MemoryEntityStore {
    entity: String,
    connection_id: ConnectionId,
    collection: Arc<MemoryCollection>,
    closed: Arc<AtomicBool>,
}

impl MemoryEntityStore {
    fn ensure_open(&self) -> anyhow::Result<()> {
        if self.closed.load(Ordering::Acquire) {
            anyhow::bail!("connection {} is closed", self.connection_id);
        }
        Ok(())
    }
}

#[async_trait]
impl EntityStore for MemoryEntityStore {
    fn entity(&self) -> &str {
        &self.entity
    }

    fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    async fn get(&self, id: &str) -> anyhow::Result<Option<EntityRecord>> {
        self.ensure_open()?;
        Ok(self.collection.records.get(id).map(|r| r.clone()))
    }

    async fn list(&self, limit: Option<usize>) -> anyhow::Result<Vec<EntityRecord>> {
        self.ensure_open()?;
        let mut records: Vec<EntityRecord> = self
            .collection
            .records
            .iter()
            .map(|entry| entry.value().clone())
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        if let Some(limit) = limit {
            records.truncate(limit);
        }
        Ok(records)
    }

    async fn insert(&self, data: Document) -> anyhow::Result<EntityRecord> {
        self.ensure_open()?;
        let record = EntityRecord::new(uuid::Uuid::new_v4().to_string(), data, now_millis());
        self.collection
            .records
            .insert(record.id.clone(), record.clone());
        Ok(record)
    }

    async fn upsert(&self, record: EntityRecord) -> anyhow::Result<()> {
        self.ensure_open()?;
        self.collection.records.insert(record.id.clone(), record);
        Ok(())
    }

    async fn update(&self, id: &str, patch: Document) -> anyhow::Result<Option<EntityRecord>> {
        self.ensure_open()?;
        Ok(self.collection.records.get_mut(id).map(|mut record| {
            record.apply_patch(patch, now_millis());
            record.clone()
        }))
    }

    async fn delete(&self, id: &str) -> anyhow::Result<bool> {
        self.ensure_open()?;
        Ok(self.collection.records.remove(id).is_some())
    }

    async fn count(&self) -> anyhow::Result<usize> {
        self.ensure_open()?;
        Ok(self.collection.len())
    }
}
