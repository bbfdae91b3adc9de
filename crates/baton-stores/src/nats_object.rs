//! NATS JetStream Object Store backend (object tier).

use async_nats::jetstream::{self, object_store};
use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tokio::io::AsyncReadExt;
use tokio::sync::OnceCell;
use tracing::{debug, info};

use baton_core::{StorageBackend, StorageError, StoreTier};

use crate::nats_kv::connect;

/// NATS Object Store tier configuration.
#[derive(Debug, Clone)]
pub struct NatsObjectConfig {
    pub url: String,
    pub bucket: String,
    pub max_object_bytes: u64,
    /// Total bucket capacity applied on creation.
    pub max_bucket_bytes: u64,
}

impl Default for NatsObjectConfig {
    fn default() -> Self {
        Self {
            url: "nats://127.0.0.1:4222".to_string(),
            bucket: "baton_result_objects".to_string(),
            max_object_bytes: 10 * 1024 * 1024,
            max_bucket_bytes: 1024 * 1024 * 1024,
        }
    }
}

/// JetStream Object Store for payloads up to 10MB.
pub struct NatsObjectBackend {
    config: NatsObjectConfig,
    store: OnceCell<object_store::ObjectStore>,
}

impl NatsObjectBackend {
    pub fn new(config: NatsObjectConfig) -> Self {
        Self {
            config,
            store: OnceCell::new(),
        }
    }

    fn object_name(key: &str) -> String {
        key.replace(['/', ':'], "_")
    }

    async fn store(&self) -> Result<&object_store::ObjectStore, StorageError> {
        self.store
            .get_or_try_init(|| async {
                let client = connect(&self.config.url).await?;
                let context = jetstream::new(client);

                match context.get_object_store(&self.config.bucket).await {
                    Ok(store) => {
                        info!(bucket = %self.config.bucket, "connected to existing object bucket");
                        Ok(store)
                    }
                    Err(_) => {
                        let store = context
                            .create_object_store(object_store::Config {
                                bucket: self.config.bucket.clone(),
                                description: Some("Baton result objects".to_string()),
                                max_bytes: self.config.max_bucket_bytes as i64,
                                ..Default::default()
                            })
                            .await
                            .map_err(|e| StorageError::Transport(e.to_string()))?;
                        info!(bucket = %self.config.bucket, "created object bucket");
                        Ok(store)
                    }
                }
            })
            .await
    }
}

#[async_trait]
impl StorageBackend for NatsObjectBackend {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        _metadata: Option<&Value>,
    ) -> Result<String, StorageError> {
        if data.len() as u64 > self.config.max_object_bytes {
            return Err(StorageError::SizeViolation {
                tier: StoreTier::Object,
                size: data.len() as u64,
                limit: self.config.max_object_bytes,
            });
        }

        let store = self.store().await?;
        let name = Self::object_name(key);
        let size = data.len();
        store
            .put(name.as_str(), &mut data.as_ref())
            .await
            .map_err(|e| StorageError::Transport(e.to_string()))?;
        debug!(object = %name, bytes = size, "stored object");
        Ok(format!("nats-obj://{}/{}", self.config.bucket, name))
    }

    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        let store = self.store().await?;
        let name = Self::object_name(key);
        let mut object = store.get(&name).await.map_err(|e| {
            let message = e.to_string();
            if message.to_lowercase().contains("not found") {
                StorageError::NotFound(format!("object not found: {name}"))
            } else {
                StorageError::Transport(message)
            }
        })?;

        let mut buffer = Vec::new();
        object
            .read_to_end(&mut buffer)
            .await
            .map_err(|e| StorageError::Transport(e.to_string()))?;
        Ok(Bytes::from(buffer))
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let store = self.store().await?;
        let name = Self::object_name(key);
        if store.info(&name).await.is_err() {
            return Ok(false);
        }
        store
            .delete(&name)
            .await
            .map_err(|e| StorageError::Transport(e.to_string()))?;
        Ok(true)
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let store = self.store().await?;
        let name = Self::object_name(key);
        Ok(store.info(&name).await.is_ok())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_name_flattening() {
        assert_eq!(NatsObjectBackend::object_name("a/b:c"), "a_b_c");
    }

    #[test]
    fn test_oversized_put_fails_before_connecting() {
        tokio_test::block_on(async {
            let backend = NatsObjectBackend::new(NatsObjectConfig {
                max_object_bytes: 4,
                ..Default::default()
            });
            let err = backend
                .put("k", Bytes::from(vec![0u8; 8]), None)
                .await
                .unwrap_err();
            assert!(matches!(
                err,
                StorageError::SizeViolation {
                    tier: StoreTier::Object,
                    ..
                }
            ));
        });
    }
}
