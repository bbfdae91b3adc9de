//! NATS JetStream KV backend (kv tier).

use std::env;
use std::time::Duration;

use async_nats::jetstream::{self, kv};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use baton_core::{StorageBackend, StorageError, StoreTier};

/// NATS KV tier configuration.
#[derive(Debug, Clone)]
pub struct NatsKvConfig {
    pub url: String,
    pub bucket: String,
    /// NATS rejects values above this size.
    pub max_value_bytes: u64,
    /// Bucket-level max age applied on creation.
    pub ttl_seconds: u64,
}

impl Default for NatsKvConfig {
    fn default() -> Self {
        Self {
            url: "nats://127.0.0.1:4222".to_string(),
            bucket: "baton_result_refs".to_string(),
            max_value_bytes: 1024 * 1024,
            ttl_seconds: 7_200,
        }
    }
}

/// JetStream KV store for distributed caching of values under 1MB.
pub struct NatsKvBackend {
    config: NatsKvConfig,
    store: OnceCell<kv::Store>,
}

impl NatsKvBackend {
    pub fn new(config: NatsKvConfig) -> Self {
        Self {
            config,
            store: OnceCell::new(),
        }
    }

    /// Keys are flattened for NATS KV: separators become dots.
    fn kv_key(key: &str) -> String {
        key.replace(['/', ':'], ".")
    }

    async fn store(&self) -> Result<&kv::Store, StorageError> {
        self.store
            .get_or_try_init(|| async {
                let client = connect(&self.config.url).await?;
                let context = jetstream::new(client);

                match context.get_key_value(&self.config.bucket).await {
                    Ok(store) => {
                        info!(bucket = %self.config.bucket, "connected to existing KV bucket");
                        Ok(store)
                    }
                    Err(_) => {
                        let store = context
                            .create_key_value(kv::Config {
                                bucket: self.config.bucket.clone(),
                                description: "Baton result storage".to_string(),
                                max_value_size: self.config.max_value_bytes as i32,
                                history: 1,
                                max_age: Duration::from_secs(self.config.ttl_seconds),
                                ..Default::default()
                            })
                            .await
                            .map_err(|e| StorageError::Transport(e.to_string()))?;
                        info!(bucket = %self.config.bucket, "created KV bucket");
                        Ok(store)
                    }
                }
            })
            .await
    }
}

/// Connect to NATS, honoring `NATS_USER` / `NATS_PASSWORD` when set.
pub(crate) async fn connect(url: &str) -> Result<async_nats::Client, StorageError> {
    let user = env::var("NATS_USER").unwrap_or_default();
    let password = env::var("NATS_PASSWORD").unwrap_or_default();

    let result = if !user.is_empty() && !password.is_empty() {
        async_nats::ConnectOptions::with_user_and_password(user, password)
            .connect(url)
            .await
    } else {
        async_nats::connect(url).await
    };

    result.map_err(|e| StorageError::Transport(e.to_string()))
}

#[async_trait]
impl StorageBackend for NatsKvBackend {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        _metadata: Option<&Value>,
    ) -> Result<String, StorageError> {
        // Validate locally so an oversized payload never costs a round trip.
        if data.len() as u64 > self.config.max_value_bytes {
            return Err(StorageError::SizeViolation {
                tier: StoreTier::Kv,
                size: data.len() as u64,
                limit: self.config.max_value_bytes,
            });
        }

        let store = self.store().await?;
        let kv_key = Self::kv_key(key);
        let size = data.len();
        store
            .put(&kv_key, data)
            .await
            .map_err(|e| StorageError::Transport(e.to_string()))?;
        debug!(key = %kv_key, bytes = size, "stored in KV");
        Ok(format!("nats-kv://{}/{}", self.config.bucket, kv_key))
    }

    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        let store = self.store().await?;
        let kv_key = Self::kv_key(key);
        let entry = store
            .get(&kv_key)
            .await
            .map_err(|e| StorageError::Transport(e.to_string()))?;
        entry.ok_or_else(|| StorageError::NotFound(format!("key not in KV: {kv_key}")))
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let store = self.store().await?;
        let kv_key = Self::kv_key(key);
        if store
            .get(&kv_key)
            .await
            .map_err(|e| StorageError::Transport(e.to_string()))?
            .is_none()
        {
            return Ok(false);
        }
        store
            .delete(&kv_key)
            .await
            .map_err(|e| StorageError::Transport(e.to_string()))?;
        Ok(true)
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let store = self.store().await?;
        let kv_key = Self::kv_key(key);
        let entry = store
            .get(&kv_key)
            .await
            .map_err(|e| StorageError::Transport(e.to_string()))?;
        Ok(entry.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kv_key_flattening() {
        assert_eq!(
            NatsKvBackend::kv_key("execution_e1_result_out_abc"),
            "execution_e1_result_out_abc",
        );
        assert_eq!(NatsKvBackend::kv_key("a/b:c"), "a.b.c");
    }

    #[test]
    fn test_oversized_put_fails_before_connecting() {
        tokio_test::block_on(async {
            let backend = NatsKvBackend::new(NatsKvConfig {
                max_value_bytes: 8,
                ..Default::default()
            });
            let err = backend
                .put("k", Bytes::from(vec![0u8; 16]), None)
                .await
                .unwrap_err();
            assert!(matches!(err, StorageError::SizeViolation { limit: 8, .. }));
        });
    }
}
