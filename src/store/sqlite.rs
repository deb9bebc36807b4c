//! SQLite-backed store.
//!
//! Conditional writes are a single `UPDATE ... WHERE resource_version = ?`;
//! zero affected rows means the caller's copy is stale (or gone). Change
//! notifications cover writes made through this handle only.

use std::path::Path;

use anyhow::Context;
use async_trait::async_trait;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tokio::sync::broadcast;

use super::{NamespaceEvent, NamespaceStore, RangeAllocationStore, StoreError, WATCH_CHANNEL_CAPACITY};
use crate::types::{Annotations, Namespace, RangeAllocation};

const NAMESPACE: &str = "namespace";
const RANGE_ALLOCATION: &str = "rangeallocation";

/// Both store interfaces over a SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
    events: broadcast::Sender<NamespaceEvent>,
}

fn version_to_db(version: u64) -> Result<i64, StoreError> {
    i64::try_from(version)
        .map_err(|_| StoreError::Backend(format!("resource version {version} out of range")))
}

fn version_from_db(version: i64) -> Result<u64, StoreError> {
    u64::try_from(version)
        .map_err(|_| StoreError::Backend(format!("negative resource version {version}")))
}

fn namespace_from_row(row: &SqliteRow) -> Result<Namespace, StoreError> {
    let annotations: String = row.try_get("annotations")?;
    let annotations: Annotations = serde_json::from_str(&annotations)
        .map_err(|e| StoreError::Backend(format!("corrupt namespace annotations: {e}")))?;
    Ok(Namespace {
        name: row.try_get("name")?,
        annotations,
        resource_version: version_from_db(row.try_get("resource_version")?)?,
    })
}

fn allocation_from_row(row: &SqliteRow) -> Result<RangeAllocation, StoreError> {
    let updated_at: String = row.try_get("updated_at")?;
    let updated_at = chrono::DateTime::parse_from_rfc3339(&updated_at)
        .map_err(|e| StoreError::Backend(format!("corrupt updated_at timestamp: {e}")))?
        .with_timezone(&chrono::Utc);
    Ok(RangeAllocation {
        name: row.try_get("name")?,
        range: row.try_get("range_spec")?,
        data: row.try_get("data")?,
        resource_version: version_from_db(row.try_get("resource_version")?)?,
        updated_at: Some(updated_at),
    })
}

fn annotations_to_db(annotations: &Annotations) -> Result<String, StoreError> {
    serde_json::to_string(annotations)
        .map_err(|e| StoreError::Backend(format!("failed to encode annotations: {e}")))
}

impl SqliteStore {
    /// Open (or create) the database at `path` and apply the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be opened or migration fails.
    pub async fn open(path: &Path) -> anyhow::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).with_context(|| {
                format!("failed to create store directory {}", parent.display())
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal)
            .pragma("trusted_schema", "OFF");

        let pool = SqlitePoolOptions::new()
            .max_connections(2)
            .connect_with(options)
            .await
            .with_context(|| format!("failed to open store at {}", path.display()))?;

        Self::from_pool(pool).await
    }

    /// Wrap an existing pool and apply the schema.
    ///
    /// # Errors
    ///
    /// Returns an error if migration fails.
    pub async fn from_pool(pool: SqlitePool) -> anyhow::Result<Self> {
        let migration_sql = include_str!("../../migrations/001_straylight_schema.sql");
        sqlx::raw_sql(migration_sql)
            .execute(&pool)
            .await
            .context("failed to apply straylight schema migration")?;

        let (events, _) = broadcast::channel(WATCH_CHANNEL_CAPACITY);
        Ok(Self { pool, events })
    }

    fn notify(&self, event: NamespaceEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    /// Classify a conditional write that touched no rows.
    async fn missed_write(
        &self,
        table: &'static str,
        kind: &'static str,
        name: &str,
    ) -> StoreError {
        let query = format!("SELECT 1 FROM {table} WHERE name = ?1");
        match sqlx::query(&query).bind(name).fetch_optional(&self.pool).await {
            Ok(Some(_)) => StoreError::Conflict {
                kind,
                name: name.to_owned(),
            },
            Ok(None) => StoreError::NotFound {
                kind,
                name: name.to_owned(),
            },
            Err(e) => StoreError::from(e),
        }
    }
}

#[async_trait]
impl NamespaceStore for SqliteStore {
    async fn get(&self, name: &str) -> Result<Namespace, StoreError> {
        let row = sqlx::query(
            "SELECT name, annotations, resource_version FROM namespaces WHERE name = ?1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => namespace_from_row(&row),
            None => Err(StoreError::NotFound {
                kind: NAMESPACE,
                name: name.to_owned(),
            }),
        }
    }

    async fn create(&self, namespace: &Namespace) -> Result<Namespace, StoreError> {
        let result = sqlx::query(
            "INSERT INTO namespaces (name, annotations, resource_version) VALUES (?1, ?2, 1)
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(&namespace.name)
        .bind(annotations_to_db(&namespace.annotations)?)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists {
                kind: NAMESPACE,
                name: namespace.name.clone(),
            });
        }
        let mut created = namespace.clone();
        created.resource_version = 1;
        self.notify(NamespaceEvent::Upserted(created.name.clone()));
        Ok(created)
    }

    async fn update(&self, namespace: &Namespace) -> Result<Namespace, StoreError> {
        let expected = version_to_db(namespace.resource_version)?;
        let result = sqlx::query(
            "UPDATE namespaces
             SET annotations = ?1, resource_version = resource_version + 1
             WHERE name = ?2 AND resource_version = ?3",
        )
        .bind(annotations_to_db(&namespace.annotations)?)
        .bind(&namespace.name)
        .bind(expected)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(self.missed_write("namespaces", NAMESPACE, &namespace.name).await);
        }
        let mut updated = namespace.clone();
        updated.resource_version = namespace.resource_version.saturating_add(1);
        self.notify(NamespaceEvent::Upserted(updated.name.clone()));
        Ok(updated)
    }

    async fn delete(&self, name: &str) -> Result<(), StoreError> {
        let result = sqlx::query("DELETE FROM namespaces WHERE name = ?1")
            .bind(name)
            .execute(&self.pool)
            .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound {
                kind: NAMESPACE,
                name: name.to_owned(),
            });
        }
        self.notify(NamespaceEvent::Deleted(name.to_owned()));
        Ok(())
    }

    async fn list(&self) -> Result<Vec<Namespace>, StoreError> {
        let rows = sqlx::query(
            "SELECT name, annotations, resource_version FROM namespaces ORDER BY name",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(namespace_from_row).collect()
    }

    fn watch(&self) -> broadcast::Receiver<NamespaceEvent> {
        self.events.subscribe()
    }
}

#[async_trait]
impl RangeAllocationStore for SqliteStore {
    async fn get(&self, name: &str) -> Result<RangeAllocation, StoreError> {
        let row = sqlx::query(
            "SELECT name, range_spec, data, resource_version, updated_at
             FROM range_allocations WHERE name = ?1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => allocation_from_row(&row),
            None => Err(StoreError::NotFound {
                kind: RANGE_ALLOCATION,
                name: name.to_owned(),
            }),
        }
    }

    async fn create(&self, record: &RangeAllocation) -> Result<RangeAllocation, StoreError> {
        let now = chrono::Utc::now();
        let result = sqlx::query(
            "INSERT INTO range_allocations (name, range_spec, data, resource_version, updated_at)
             VALUES (?1, ?2, ?3, 1, ?4)
             ON CONFLICT(name) DO NOTHING",
        )
        .bind(&record.name)
        .bind(&record.range)
        .bind(&record.data)
        .bind(now.to_rfc3339())
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::AlreadyExists {
                kind: RANGE_ALLOCATION,
                name: record.name.clone(),
            });
        }
        let mut created = record.clone();
        created.resource_version = 1;
        created.updated_at = Some(now);
        Ok(created)
    }

    async fn update(&self, record: &RangeAllocation) -> Result<RangeAllocation, StoreError> {
        let now = chrono::Utc::now();
        let expected = version_to_db(record.resource_version)?;
        let result = sqlx::query(
            "UPDATE range_allocations
             SET range_spec = ?1, data = ?2, updated_at = ?3,
                 resource_version = resource_version + 1
             WHERE name = ?4 AND resource_version = ?5",
        )
        .bind(&record.range)
        .bind(&record.data)
        .bind(now.to_rfc3339())
        .bind(&record.name)
        .bind(expected)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(self
                .missed_write("range_allocations", RANGE_ALLOCATION, &record.name)
                .await);
        }
        let mut updated = record.clone();
        updated.resource_version = record.resource_version.saturating_add(1);
        updated.updated_at = Some(now);
        Ok(updated)
    }
}
