//! `PostgreSQL` [`StoreDriver`] (feature `postgres`).
//!
//! Each physical connection is a `PgPool`. Binding a schema creates the
//! entity's table if needed; records are stored as JSONB documents:
//!
//! ```sql
//! CREATE TABLE IF NOT EXISTS "<entity>" (
//!     id TEXT PRIMARY KEY,
//!     data JSONB NOT NULL,
//!     created_at BIGINT NOT NULL,
//!     updated_at BIGINT NOT NULL
//! )
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::types::Json;
use sqlx::Row;
use storefront_core::catalog::is_valid_entity_name;
use storefront_core::{now_millis, Document, EntityRecord, EntitySchema};

use super::{ConnectionId, ConnectionSpec, EntityStore, StoreConnection, StoreDriver};

/// Pool settings applied to every connection this driver opens.
#[derive(Debug, Clone)]
pub struct PostgresDriver {
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl Default for PostgresDriver {
    fn default() -> Self {
        Self {
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

#[async_trait]
impl StoreDriver for PostgresDriver {
    async fn connect(&self, spec: &ConnectionSpec) -> anyhow::Result<Arc<dyn StoreConnection>> {
        let pool = PgPoolOptions::new()
            .max_connections(self.max_connections)
            .acquire_timeout(self.acquire_timeout)
            .connect(spec.expose())
            .await
            .map_err(|e| anyhow::anyhow!("postgres connect to {spec} failed: {e}"))?;

        Ok(Arc::new(PostgresConnection {
            id: ConnectionId::next(),
            label: spec.redacted(),
            pool,
        }))
    }
}

struct PostgresConnection {
    id: ConnectionId,
    label: String,
    pool: PgPool,
}

#[async_trait]
impl StoreConnection for PostgresConnection {
    fn id(&self) -> ConnectionId {
        self.id
    }

    fn label(&self) -> &str {
        &self.label
    }

    async fn bind_schema(&self, schema: &EntitySchema) -> anyhow::Result<Arc<dyn EntityStore>> {
        // Entity names are interpolated as identifiers.
        if !is_valid_entity_name(&schema.name) {
            anyhow::bail!("entity name '{}' is not a valid table name", schema.name);
        }
        let ddl = format!(
            "CREATE TABLE IF NOT EXISTS \"{}\" (\
                id TEXT PRIMARY KEY, \
                data JSONB NOT NULL, \
                created_at BIGINT NOT NULL, \
                updated_at BIGINT NOT NULL)",
            schema.name
        );
        sqlx::query(&ddl).execute(&self.pool).await?;

        Ok(Arc::new(PostgresEntityStore {
            table: schema.name.clone(),
            connection_id: self.id,
            pool: self.pool.clone(),
        }))
    }

    async fn close(&self) -> anyhow::Result<()> {
        self.pool.close().await;
        Ok(())
    }
}

struct PostgresEntityStore {
    table: String,
    connection_id: ConnectionId,
    pool: PgPool,
}

fn row_to_record(row: &PgRow) -> anyhow::Result<EntityRecord> {
    let Json(data): Json<Document> = row.try_get("data")?;
    Ok(EntityRecord {
        id: row.try_get("id")?,
        data,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl EntityStore for PostgresEntityStore {
    fn entity(&self) -> &str {
        &self.table
    }

    fn connection_id(&self) -> ConnectionId {
        self.connection_id
    }

    async fn get(&self, id: &str) -> anyhow::Result<Option<EntityRecord>> {
        let sql = format!(
            "SELECT id, data, created_at, updated_at FROM \"{}\" WHERE id = $1",
            self.table
        );
        let row = sqlx::query(&sql).bind(id).fetch_optional(&self.pool).await?;
        row.as_ref().map(row_to_record).transpose()
    }

    async fn list(&self, limit: Option<usize>) -> anyhow::Result<Vec<EntityRecord>> {
        let sql = format!(
            "SELECT id, data, created_at, updated_at FROM \"{}\" \
             ORDER BY created_at, id LIMIT $1",
            self.table
        );
        let limit = limit.map_or(i64::MAX, |l| i64::try_from(l).unwrap_or(i64::MAX));
        let rows = sqlx::query(&sql).bind(limit).fetch_all(&self.pool).await?;
        rows.iter().map(row_to_record).collect()
    }

    async fn insert(&self, data: Document) -> anyhow::Result<EntityRecord> {
        let record = EntityRecord::new(uuid::Uuid::new_v4().to_string(), data, now_millis());
        self.upsert(record.clone()).await?;
        Ok(record)
    }

    async fn upsert(&self, record: EntityRecord) -> anyhow::Result<()> {
        let sql = format!(
            "INSERT INTO \"{}\" (id, data, created_at, updated_at) VALUES ($1, $2, $3, $4) \
             ON CONFLICT (id) DO UPDATE SET data = EXCLUDED.data, \
             created_at = EXCLUDED.created_at, updated_at = EXCLUDED.updated_at",
            self.table
        );
        sqlx::query(&sql)
            .bind(&record.id)
            .bind(Json(&record.data))
            .bind(record.created_at)
            .bind(record.updated_at)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn update(&self, id: &str, patch: Document) -> anyhow::Result<Option<EntityRecord>> {
        let mut tx = self.pool.begin().await?;
        let sql = format!(
            "SELECT id, data, created_at, updated_at FROM \"{}\" WHERE id = $1 FOR UPDATE",
            self.table
        );
        let Some(row) = sqlx::query(&sql).bind(id).fetch_optional(&mut *tx).await? else {
            return Ok(None);
        };
        let mut record = row_to_record(&row)?;
        record.apply_patch(patch, now_millis());

        let sql = format!(
            "UPDATE \"{}\" SET data = $2, updated_at = $3 WHERE id = $1",
            self.table
        );
        sqlx::query(&sql)
            .bind(id)
            .bind(Json(&record.data))
            .bind(record.updated_at)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        Ok(Some(record))
    }

    async fn delete(&self, id: &str) -> anyhow::Result<bool> {
        let sql = format!("DELETE FROM \"{}\" WHERE id = $1", self.table);
        let result = sqlx::query(&sql).bind(id).execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn count(&self) -> anyhow::Result<usize> {
        let sql = format!("SELECT COUNT(*) FROM \"{}\"", self.table);
        let count: i64 = sqlx::query_scalar(&sql).fetch_one(&self.pool).await?;
        Ok(usize::try_from(count).unwrap_or(0))
    }
}
