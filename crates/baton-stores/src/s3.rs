//! S3-compatible blob backend (blob-a tier).

use async_trait::async_trait;
use aws_sdk_s3::config::{BehaviorVersion, Region};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use bytes::Bytes;
use serde_json::Value;
use tokio::sync::OnceCell;
use tracing::debug;

use baton_core::{StorageBackend, StorageError};

/// S3 blob tier configuration.
///
/// Credentials come from the standard AWS provider chain; `endpoint`
/// supports MinIO/LocalStack style deployments.
#[derive(Debug, Clone)]
pub struct S3Config {
    pub bucket: String,
    pub prefix: String,
    pub region: String,
    pub endpoint: Option<String>,
}

impl Default for S3Config {
    fn default() -> Self {
        Self {
            bucket: "baton-results".to_string(),
            prefix: "results/".to_string(),
            region: "us-east-1".to_string(),
            endpoint: None,
        }
    }
}

/// Cloud blob storage over any S3-compatible service.
pub struct S3Backend {
    config: S3Config,
    client: OnceCell<Client>,
}

impl S3Backend {
    pub fn new(config: S3Config) -> Self {
        Self {
            config,
            client: OnceCell::new(),
        }
    }

    fn object_key(&self, key: &str) -> String {
        let prefix = self.config.prefix.trim_matches('/');
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{prefix}/{key}")
        }
    }

    async fn client(&self) -> Result<&Client, StorageError> {
        self.client
            .get_or_try_init(|| async {
                let sdk_config = aws_config::defaults(BehaviorVersion::latest())
                    .region(Region::new(self.config.region.clone()))
                    .load()
                    .await;

                let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
                if let Some(endpoint) = &self.config.endpoint {
                    builder = builder.endpoint_url(endpoint).force_path_style(true);
                }

                Ok::<_, StorageError>(Client::from_conf(builder.build()))
            })
            .await
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        _metadata: Option<&Value>,
    ) -> Result<String, StorageError> {
        let client = self.client().await?;
        let object_key = self.object_key(key);
        let size = data.len();

        client
            .put_object()
            .bucket(&self.config.bucket)
            .key(&object_key)
            .content_type("application/octet-stream")
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| StorageError::Transport(e.to_string()))?;

        debug!(key = %object_key, bytes = size, "stored blob in s3");
        Ok(format!("s3://{}/{}", self.config.bucket, object_key))
    }

    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        let client = self.client().await?;
        let object_key = self.object_key(key);

        let response = client
            .get_object()
            .bucket(&self.config.bucket)
            .key(&object_key)
            .send()
            .await
            .map_err(|e| {
                let service_error = e.into_service_error();
                if service_error.is_no_such_key() {
                    StorageError::NotFound(format!("s3 object not found: {object_key}"))
                } else {
                    StorageError::Transport(service_error.to_string())
                }
            })?;

        let aggregated = response
            .body
            .collect()
            .await
            .map_err(|e| StorageError::Transport(e.to_string()))?;
        Ok(aggregated.into_bytes())
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let client = self.client().await?;
        let object_key = self.object_key(key);

        if !self.exists(key).await? {
            return Ok(false);
        }

        client
            .delete_object()
            .bucket(&self.config.bucket)
            .key(&object_key)
            .send()
            .await
            .map_err(|e| StorageError::Transport(e.to_string()))?;
        Ok(true)
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let client = self.client().await?;
        let object_key = self.object_key(key);

        match client
            .head_object()
            .bucket(&self.config.bucket)
            .key(&object_key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    Ok(false)
                } else {
                    Err(StorageError::Transport(service_error.to_string()))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_key_applies_prefix() {
        let backend = S3Backend::new(S3Config::default());
        assert_eq!(
            backend.object_key("execution_e1_result_out_abc"),
            "results/execution_e1_result_out_abc",
        );
    }

    #[test]
    fn test_empty_prefix_leaves_key_bare() {
        let backend = S3Backend::new(S3Config {
            prefix: String::new(),
            ..Default::default()
        });
        assert_eq!(backend.object_key("k"), "k");
    }
}
