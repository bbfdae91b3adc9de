//! Postgres backend (db tier).
//!
//! The queryable tier: payloads land in one upsert table so intermediate
//! data can be filtered with SQL by downstream consumers.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use sqlx::postgres::PgPoolOptions;
use sqlx::{PgPool, Row};
use tokio::sync::OnceCell;
use tracing::debug;

use baton_core::{StorageBackend, StorageError};

/// Postgres tier configuration.
#[derive(Debug, Clone)]
pub struct PostgresConfig {
    pub url: String,
    pub table: String,
}

impl PostgresConfig {
    pub fn new(url: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            table: table.into(),
        }
    }
}

/// Queryable storage backed by a Postgres table.
pub struct PostgresBackend {
    config: PostgresConfig,
    pool: OnceCell<PgPool>,
}

impl PostgresBackend {
    pub fn new(config: PostgresConfig) -> Self {
        Self {
            config,
            pool: OnceCell::new(),
        }
    }

    async fn pool(&self) -> Result<&PgPool, StorageError> {
        self.pool
            .get_or_try_init(|| async {
                let pool = PgPoolOptions::new()
                    .max_connections(8)
                    .connect(&self.config.url)
                    .await
                    .map_err(|e| StorageError::Transport(e.to_string()))?;

                let create_table = format!(
                    "CREATE TABLE IF NOT EXISTS {} (
                        key TEXT PRIMARY KEY,
                        data BYTEA NOT NULL,
                        metadata JSONB NOT NULL DEFAULT '{{}}'::jsonb,
                        created_at TIMESTAMPTZ NOT NULL DEFAULT now()
                    )",
                    self.config.table
                );
                sqlx::query(&create_table)
                    .execute(&pool)
                    .await
                    .map_err(|e| StorageError::Transport(e.to_string()))?;

                Ok(pool)
            })
            .await
    }
}

#[async_trait]
impl StorageBackend for PostgresBackend {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        metadata: Option<&Value>,
    ) -> Result<String, StorageError> {
        let pool = self.pool().await?;
        let sql = format!(
            "INSERT INTO {} (key, data, metadata) VALUES ($1, $2, $3)
             ON CONFLICT (key) DO UPDATE SET
                data = EXCLUDED.data,
                metadata = EXCLUDED.metadata,
                created_at = now()",
            self.config.table
        );

        let size = data.len();
        sqlx::query(&sql)
            .bind(key)
            .bind(data.as_ref())
            .bind(metadata.cloned().unwrap_or_else(|| Value::Object(Default::default())))
            .execute(pool)
            .await
            .map_err(|e| StorageError::Transport(e.to_string()))?;

        debug!(key = %key, bytes = size, "stored row in db tier");
        Ok(format!("db://{}/{}", self.config.table, key))
    }

    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        let pool = self.pool().await?;
        let sql = format!("SELECT data FROM {} WHERE key = $1", self.config.table);

        let row = sqlx::query(&sql)
            .bind(key)
            .fetch_optional(pool)
            .await
            .map_err(|e| StorageError::Transport(e.to_string()))?;

        let Some(row) = row else {
            return Err(StorageError::NotFound(format!("key not in db tier: {key}")));
        };
        let data: Vec<u8> = row
            .try_get("data")
            .map_err(|e| StorageError::Serialization(e.to_string()))?;
        Ok(Bytes::from(data))
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let pool = self.pool().await?;
        let sql = format!("DELETE FROM {} WHERE key = $1", self.config.table);

        let result = sqlx::query(&sql)
            .bind(key)
            .execute(pool)
            .await
            .map_err(|e| StorageError::Transport(e.to_string()))?;
        Ok(result.rows_affected() > 0)
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let pool = self.pool().await?;
        let sql = format!("SELECT 1 FROM {} WHERE key = $1", self.config.table);

        let row = sqlx::query(&sql)
            .bind(key)
            .fetch_optional(pool)
            .await
            .map_err(|e| StorageError::Transport(e.to_string()))?;
        Ok(row.is_some())
    }
}
