//! Backing-store driver layer.
//!
//! Defines the three traits the binding core consumes:
//!
//! - [`StoreDriver`]: opens physical connections from a [`ConnectionSpec`]
//!   and binds entity schemas to them
//! - [`StoreConnection`]: one live physical connection
//! - [`EntityStore`]: the per-entity handle that CRUD operations run against
//!
//! Concrete drivers live in [`memory`], [`postgres`] (feature `postgres`) and
//! [`scheme`], which dispatches by URL scheme.

pub mod memory;
#[cfg(feature = "postgres")]
pub mod postgres;
pub mod scheme;
pub mod spec;

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use storefront_core::{Document, EntityRecord, EntitySchema};

pub use memory::MemoryDriver;
#[cfg(feature = "postgres")]
pub use postgres::PostgresDriver;
pub use scheme::SchemeDriver;
pub use spec::ConnectionSpec;

/// Process-unique identifier of one physical connection.
///
/// Lets bindings be audited: two handles bound to the same `ConnectionId`
/// operate on the same store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionId(pub u64);

impl ConnectionId {
    /// Allocates the next id. Ids start at 1.
    #[must_use]
    pub fn next() -> Self {
        static NEXT: AtomicU64 = AtomicU64::new(1);
        Self(NEXT.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "conn-{}", self.0)
    }
}

/// Opens physical connections and binds schemas to them.
///
/// Used as `Arc<dyn StoreDriver>` by the connection registry.
#[async_trait]
pub trait StoreDriver: Send + Sync {
    /// Open a new physical connection. Called at most once per in-flight
    /// attempt by the registry; implementations need not coalesce.
    async fn connect(&self, spec: &ConnectionSpec) -> anyhow::Result<Arc<dyn StoreConnection>>;

    /// Bind an entity schema to a live connection.
    async fn bind_schema(
        &self,
        connection: &Arc<dyn StoreConnection>,
        schema: &EntitySchema,
    ) -> anyhow::Result<Arc<dyn EntityStore>> {
        connection.bind_schema(schema).await
    }
}

/// One live physical connection to a backing store.
#[async_trait]
pub trait StoreConnection: Send + Sync {
    /// Identifier assigned when the connection was opened.
    fn id(&self) -> ConnectionId;

    /// Human-readable, credential-free description (redacted spec).
    fn label(&self) -> &str;

    /// Bind a schema, returning a handle to the entity's collection.
    async fn bind_schema(&self, schema: &EntitySchema) -> anyhow::Result<Arc<dyn EntityStore>>;

    /// Release the connection. Further operations on bound stores may fail.
    async fn close(&self) -> anyhow::Result<()>;
}

/// CRUD access to one entity's collection on one connection.
#[async_trait]
pub trait EntityStore: Send + Sync {
    /// Entity name this store was bound for.
    fn entity(&self) -> &str;

    /// Connection this store operates on.
    fn connection_id(&self) -> ConnectionId;

    /// Load a record by id.
    async fn get(&self, id: &str) -> anyhow::Result<Option<EntityRecord>>;

    /// List records ordered by creation time, oldest first.
    async fn list(&self, limit: Option<usize>) -> anyhow::Result<Vec<EntityRecord>>;

    /// Create a record with a fresh UUID v4 id.
    async fn insert(&self, data: Document) -> anyhow::Result<EntityRecord>;

    /// Insert or replace a record, keeping its id and timestamps.
    async fn upsert(&self, record: EntityRecord) -> anyhow::Result<()>;

    /// Shallow-merge `patch` into an existing record.
    ///
    /// Returns `None` if the record does not exist.
    async fn update(&self, id: &str, patch: Document) -> anyhow::Result<Option<EntityRecord>>;

    /// Delete a record. Returns whether it existed.
    async fn delete(&self, id: &str) -> anyhow::Result<bool>;

    /// Number of records in the collection.
    async fn count(&self) -> anyhow::Result<usize>;
}
