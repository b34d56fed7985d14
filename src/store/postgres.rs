use anyhow::Context;
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::types::Json;
use sqlx::{PgPool, Row};

use super::{KeyedStore, RecordKind, StoreError, VersionedRecord, WriteOp};

/// A Postgres-backed store.
///
/// All records share one `records` table keyed by `(kind, key)`. Batches run
/// inside a transaction; inserts rely on `ON CONFLICT DO NOTHING` and updates
/// on a `WHERE version = $n` guard, with rows-affected checks deciding whether
/// the transaction commits.
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connects a pool from the given URL.
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(8)
            .connect(database_url)
            .await
            .context("Failed to connect to Postgres")?;
        Ok(Self::new(pool))
    }

    /// Creates the records table if it does not exist yet.
    pub async fn ensure_schema(&self) -> anyhow::Result<()> {
        sqlx::query(
            r#"CREATE TABLE IF NOT EXISTS records (
                kind TEXT NOT NULL,
                key TEXT NOT NULL,
                version BIGINT NOT NULL,
                data JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT now(),
                PRIMARY KEY (kind, key)
            )"#,
        )
        .execute(&self.pool)
        .await
        .context("Failed to create records table")?;
        Ok(())
    }
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(anyhow::Error::new(e))
}

#[async_trait]
impl KeyedStore for PgStore {
    async fn get(&self, kind: RecordKind, key: &str) -> Result<Option<VersionedRecord>, StoreError> {
        let row = sqlx::query(r#"SELECT version, data FROM records WHERE kind = $1 AND key = $2"#)
            .bind(kind.as_str())
            .bind(key)
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)?;

        match row {
            Some(row) => {
                let version: i64 = row.try_get("version").map_err(backend)?;
                let data: Json<Value> = row.try_get("data").map_err(backend)?;
                Ok(Some(VersionedRecord {
                    key: key.to_string(),
                    version,
                    data: data.0,
                }))
            }
            None => Ok(None),
        }
    }

    async fn list(
        &self,
        kind: RecordKind,
        key_prefix: &str,
    ) -> Result<Vec<VersionedRecord>, StoreError> {
        // position() instead of LIKE: keys may contain wildcard characters.
        let rows = sqlx::query(
            r#"SELECT key, version, data FROM records
               WHERE kind = $1 AND position($2 in key) = 1
               ORDER BY key"#,
        )
        .bind(kind.as_str())
        .bind(key_prefix)
        .fetch_all(&self.pool)
        .await
        .map_err(backend)?;

        let mut found = Vec::with_capacity(rows.len());
        for row in rows {
            let key: String = row.try_get("key").map_err(backend)?;
            let version: i64 = row.try_get("version").map_err(backend)?;
            let data: Json<Value> = row.try_get("data").map_err(backend)?;
            found.push(VersionedRecord {
                key,
                version,
                data: data.0,
            });
        }
        Ok(found)
    }

    async fn apply(&self, batch: Vec<WriteOp>) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend)?;

        for op in batch {
            match op {
                WriteOp::Insert { kind, key, value } => {
                    let res = sqlx::query(
                        r#"INSERT INTO records (kind, key, version, data) VALUES ($1, $2, 1, $3)
                           ON CONFLICT (kind, key) DO NOTHING"#,
                    )
                    .bind(kind.as_str())
                    .bind(&key)
                    .bind(Json(&value))
                    .execute(tx.as_mut())
                    .await
                    .map_err(backend)?;

                    if res.rows_affected() != 1 {
                        tx.rollback().await.ok();
                        return Err(StoreError::AlreadyExists);
                    }
                }
                WriteOp::Update {
                    kind,
                    key,
                    expected_version,
                    value,
                } => {
                    let res = sqlx::query(
                        r#"UPDATE records SET version = version + 1, data = $4, updated_at = now()
                           WHERE kind = $1 AND key = $2 AND version = $3"#,
                    )
                    .bind(kind.as_str())
                    .bind(&key)
                    .bind(expected_version)
                    .bind(Json(&value))
                    .execute(tx.as_mut())
                    .await
                    .map_err(backend)?;

                    if res.rows_affected() != 1 {
                        tx.rollback().await.ok();
                        return Err(StoreError::VersionConflict);
                    }
                }
                WriteOp::Put { kind, key, value } => {
                    sqlx::query(
                        r#"INSERT INTO records (kind, key, version, data) VALUES ($1, $2, 1, $3)
                           ON CONFLICT (kind, key) DO UPDATE
                           SET version = records.version + 1, data = EXCLUDED.data, updated_at = now()"#,
                    )
                    .bind(kind.as_str())
                    .bind(&key)
                    .bind(Json(&value))
                    .execute(tx.as_mut())
                    .await
                    .map_err(backend)?;
                }
                WriteOp::Delete { kind, key } => {
                    sqlx::query(r#"DELETE FROM records WHERE kind = $1 AND key = $2"#)
                        .bind(kind.as_str())
                        .bind(&key)
                        .execute(tx.as_mut())
                        .await
                        .map_err(backend)?;
                }
            }
        }

        tx.commit().await.map_err(backend)?;
        Ok(())
    }
}
