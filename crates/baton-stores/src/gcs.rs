//! Google Cloud Storage blob backend (blob-b tier).
//!
//! Speaks the GCS JSON API directly over HTTP. Authentication uses a bearer
//! token from `GCS_ACCESS_TOKEN` (as minted by workload identity or
//! `gcloud auth print-access-token`); token refresh is the deployment's
//! concern.

use std::env;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::StatusCode;
use serde_json::Value;
use tracing::debug;

use baton_core::{StorageBackend, StorageError};

const GCS_TOKEN_ENV: &str = "GCS_ACCESS_TOKEN";
const GCS_API_BASE: &str = "https://storage.googleapis.com";

/// GCS blob tier configuration.
#[derive(Debug, Clone)]
pub struct GcsConfig {
    pub bucket: String,
    pub prefix: String,
}

impl Default for GcsConfig {
    fn default() -> Self {
        Self {
            bucket: "baton-results".to_string(),
            prefix: "results/".to_string(),
        }
    }
}

/// Cloud blob storage over the GCS JSON API.
pub struct GcsBackend {
    config: GcsConfig,
    client: reqwest::Client,
}

impl GcsBackend {
    pub fn new(config: GcsConfig) -> Self {
        Self {
            config,
            client: reqwest::Client::new(),
        }
    }

    fn object_name(&self, key: &str) -> String {
        let prefix = self.config.prefix.trim_matches('/');
        if prefix.is_empty() {
            key.to_string()
        } else {
            format!("{prefix}/{key}")
        }
    }

    fn token() -> Result<String, StorageError> {
        env::var(GCS_TOKEN_ENV).map_err(|_| {
            StorageError::Transport(format!("missing {GCS_TOKEN_ENV} for GCS access"))
        })
    }

    fn object_url(&self, name: &str) -> String {
        format!(
            "{GCS_API_BASE}/storage/v1/b/{}/o/{}",
            self.config.bucket,
            percent_encode(name),
        )
    }

    fn upload_url(&self, name: &str) -> String {
        format!(
            "{GCS_API_BASE}/upload/storage/v1/b/{}/o?uploadType=media&name={}",
            self.config.bucket,
            percent_encode(name),
        )
    }
}

/// Percent-encode an object name for use in a URL path or query value.
fn percent_encode(name: &str) -> String {
    let mut out = String::with_capacity(name.len());
    for byte in name.bytes() {
        match byte {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'.' | b'_' | b'~' => {
                out.push(byte as char);
            }
            _ => out.push_str(&format!("%{byte:02X}")),
        }
    }
    out
}

#[async_trait]
impl StorageBackend for GcsBackend {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        _metadata: Option<&Value>,
    ) -> Result<String, StorageError> {
        let name = self.object_name(key);
        let size = data.len();

        let response = self
            .client
            .post(self.upload_url(&name))
            .bearer_auth(Self::token()?)
            .header("content-type", "application/octet-stream")
            .body(data)
            .send()
            .await
            .map_err(|e| StorageError::Transport(e.to_string()))?;

        if !response.status().is_success() {
            return Err(StorageError::Transport(format!(
                "gcs upload failed with status {}",
                response.status(),
            )));
        }

        debug!(object = %name, bytes = size, "stored blob in gcs");
        Ok(format!("gs://{}/{}", self.config.bucket, name))
    }

    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        let name = self.object_name(key);

        let response = self
            .client
            .get(format!("{}?alt=media", self.object_url(&name)))
            .bearer_auth(Self::token()?)
            .send()
            .await
            .map_err(|e| StorageError::Transport(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => {
                Err(StorageError::NotFound(format!("gcs object not found: {name}")))
            }
            status if status.is_success() => response
                .bytes()
                .await
                .map_err(|e| StorageError::Transport(e.to_string())),
            status => Err(StorageError::Transport(format!(
                "gcs download failed with status {status}"
            ))),
        }
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let name = self.object_name(key);

        let response = self
            .client
            .delete(self.object_url(&name))
            .bearer_auth(Self::token()?)
            .send()
            .await
            .map_err(|e| StorageError::Transport(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(StorageError::Transport(format!(
                "gcs delete failed with status {status}"
            ))),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let name = self.object_name(key);

        let response = self
            .client
            .get(self.object_url(&name))
            .bearer_auth(Self::token()?)
            .send()
            .await
            .map_err(|e| StorageError::Transport(e.to_string()))?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(false),
            status if status.is_success() => Ok(true),
            status => Err(StorageError::Transport(format!(
                "gcs head failed with status {status}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_name_applies_prefix() {
        let backend = GcsBackend::new(GcsConfig::default());
        assert_eq!(backend.object_name("abc"), "results/abc");
    }

    #[test]
    fn test_percent_encode_escapes_separators() {
        assert_eq!(percent_encode("results/a b"), "results%2Fa%20b");
        assert_eq!(percent_encode("plain-name_1.bin"), "plain-name_1.bin");
    }
}
