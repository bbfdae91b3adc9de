//! # Baton Config
//!
//! Unified single-file configuration for the Baton storage layer.
//! A single `baton.yaml` configures router thresholds, store behavior,
//! per-tier backends, and the garbage collector.
//!
//! Credentials (NATS auth, AWS chain, GCS token, Postgres URL) come from the
//! deployment environment, never from this crate's API.

use std::fs;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

use baton_core::StoreTier;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Top-level storage configuration schema.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct StorageConfig {
    #[serde(default)]
    pub router: RouterConfig,
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub kv: KvTierConfig,
    #[serde(default)]
    pub object: ObjectTierConfig,
    #[serde(default)]
    pub s3: S3TierConfig,
    #[serde(default)]
    pub gcs: GcsTierConfig,
    #[serde(default)]
    pub db: DbTierConfig,
    #[serde(default)]
    pub gc: GcConfig,
}

/// Router thresholds and cloud-tier preference.
#[derive(Debug, Clone, Deserialize)]
pub struct RouterConfig {
    #[serde(default = "default_memory_max")]
    pub memory_max_bytes: u64,
    #[serde(default = "default_kv_max")]
    pub kv_max_bytes: u64,
    #[serde(default = "default_object_max")]
    pub object_max_bytes: u64,
    /// Tier for payloads above the object threshold.
    #[serde(default = "default_cloud_tier")]
    pub default_cloud_tier: StoreTier,
    /// Route small step-scoped data to kv instead of process memory.
    #[serde(default)]
    pub prefer_kv_for_small: bool,
}

impl Default for RouterConfig {
    fn default() -> Self {
        Self {
            memory_max_bytes: default_memory_max(),
            kv_max_bytes: default_kv_max(),
            object_max_bytes: default_object_max(),
            default_cloud_tier: default_cloud_tier(),
            prefer_kv_for_small: false,
        }
    }
}

/// Reference-store behavior.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_ttl_seconds")]
    pub default_ttl_seconds: u64,
    /// Serialized payloads above this are gzip-compressed automatically.
    #[serde(default = "default_auto_compress")]
    pub auto_compress_bytes: u64,
    #[serde(default = "default_preview_max")]
    pub preview_max_bytes: usize,
    /// Results above this are externalized by the worker handler.
    #[serde(default = "default_inline_max")]
    pub inline_max_bytes: usize,
    /// Downgrade to a fallback tier when a write fails.
    #[serde(default = "default_true")]
    pub tier_fallback: bool,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            default_ttl_seconds: default_ttl_seconds(),
            auto_compress_bytes: default_auto_compress(),
            preview_max_bytes: default_preview_max(),
            inline_max_bytes: default_inline_max(),
            tier_fallback: true,
        }
    }
}

/// NATS JetStream KV tier.
#[derive(Debug, Clone, Deserialize)]
pub struct KvTierConfig {
    #[serde(default = "default_nats_url")]
    pub url: String,
    #[serde(default = "default_kv_bucket")]
    pub bucket: String,
    #[serde(default = "default_kv_max")]
    pub max_value_bytes: u64,
    #[serde(default = "default_kv_ttl")]
    pub ttl_seconds: u64,
}

impl Default for KvTierConfig {
    fn default() -> Self {
        Self {
            url: default_nats_url(),
            bucket: default_kv_bucket(),
            max_value_bytes: default_kv_max(),
            ttl_seconds: default_kv_ttl(),
        }
    }
}

/// NATS JetStream Object Store tier.
#[derive(Debug, Clone, Deserialize)]
pub struct ObjectTierConfig {
    #[serde(default = "default_nats_url")]
    pub url: String,
    #[serde(default = "default_object_bucket")]
    pub bucket: String,
    #[serde(default = "default_object_max")]
    pub max_object_bytes: u64,
    #[serde(default = "default_object_bucket_bytes")]
    pub max_bucket_bytes: u64,
}

impl Default for ObjectTierConfig {
    fn default() -> Self {
        Self {
            url: default_nats_url(),
            bucket: default_object_bucket(),
            max_object_bytes: default_object_max(),
            max_bucket_bytes: default_object_bucket_bytes(),
        }
    }
}

/// S3-compatible blob tier (blob-a).
#[derive(Debug, Clone, Deserialize)]
pub struct S3TierConfig {
    #[serde(default = "default_blob_bucket")]
    pub bucket: String,
    #[serde(default = "default_blob_prefix")]
    pub prefix: String,
    #[serde(default = "default_region")]
    pub region: String,
    /// Custom endpoint for MinIO/LocalStack style deployments.
    #[serde(default)]
    pub endpoint: Option<String>,
}

impl Default for S3TierConfig {
    fn default() -> Self {
        Self {
            bucket: default_blob_bucket(),
            prefix: default_blob_prefix(),
            region: default_region(),
            endpoint: None,
        }
    }
}

/// Google Cloud Storage blob tier (blob-b).
#[derive(Debug, Clone, Deserialize)]
pub struct GcsTierConfig {
    #[serde(default = "default_blob_bucket")]
    pub bucket: String,
    #[serde(default = "default_blob_prefix")]
    pub prefix: String,
}

impl Default for GcsTierConfig {
    fn default() -> Self {
        Self {
            bucket: default_blob_bucket(),
            prefix: default_blob_prefix(),
        }
    }
}

/// Queryable database tier.
#[derive(Debug, Clone, Deserialize)]
pub struct DbTierConfig {
    /// Postgres connection URL; the tier is disabled when unset.
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default = "default_db_table")]
    pub table: String,
}

impl Default for DbTierConfig {
    fn default() -> Self {
        Self {
            url: None,
            table: default_db_table(),
        }
    }
}

/// Garbage collector settings.
#[derive(Debug, Clone, Deserialize)]
pub struct GcConfig {
    #[serde(default = "default_sweep_interval")]
    pub ttl_sweep_interval_seconds: u64,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            ttl_sweep_interval_seconds: default_sweep_interval(),
            batch_size: default_batch_size(),
        }
    }
}

fn default_memory_max() -> u64 {
    10 * 1024
}

fn default_kv_max() -> u64 {
    1024 * 1024
}

fn default_object_max() -> u64 {
    10 * 1024 * 1024
}

fn default_object_bucket_bytes() -> u64 {
    1024 * 1024 * 1024
}

fn default_cloud_tier() -> StoreTier {
    StoreTier::BlobA
}

fn default_true() -> bool {
    true
}

fn default_ttl_seconds() -> u64 {
    3_600
}

fn default_auto_compress() -> u64 {
    10 * 1024
}

fn default_preview_max() -> usize {
    1024
}

fn default_inline_max() -> usize {
    64 * 1024
}

fn default_nats_url() -> String {
    "nats://127.0.0.1:4222".to_string()
}

fn default_kv_bucket() -> String {
    "baton_result_refs".to_string()
}

fn default_kv_ttl() -> u64 {
    7_200
}

fn default_object_bucket() -> String {
    "baton_result_objects".to_string()
}

fn default_blob_bucket() -> String {
    "baton-results".to_string()
}

fn default_blob_prefix() -> String {
    "results/".to_string()
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_db_table() -> String {
    "baton_result_store".to_string()
}

fn default_sweep_interval() -> u64 {
    300
}

fn default_batch_size() -> usize {
    100
}

/// Load storage configuration from a YAML file.
pub fn load_config(path: &Path) -> Result<StorageConfig, ConfigError> {
    let content = fs::read_to_string(path)?;
    let config: StorageConfig = serde_yaml::from_str(&content)?;
    validate_config(&config)?;
    Ok(config)
}

fn validate_config(config: &StorageConfig) -> Result<(), ConfigError> {
    if config.router.memory_max_bytes == 0 {
        return Err(ConfigError::Invalid(
            "router.memory_max_bytes must be > 0".to_string(),
        ));
    }
    if config.router.kv_max_bytes < config.router.memory_max_bytes {
        return Err(ConfigError::Invalid(
            "router.kv_max_bytes must be >= router.memory_max_bytes".to_string(),
        ));
    }
    if config.router.object_max_bytes < config.router.kv_max_bytes {
        return Err(ConfigError::Invalid(
            "router.object_max_bytes must be >= router.kv_max_bytes".to_string(),
        ));
    }
    if !matches!(
        config.router.default_cloud_tier,
        StoreTier::BlobA | StoreTier::BlobB
    ) {
        return Err(ConfigError::Invalid(format!(
            "router.default_cloud_tier must be a blob tier, got {}",
            config.router.default_cloud_tier
        )));
    }

    if config.kv.bucket.trim().is_empty() {
        return Err(ConfigError::Invalid("kv.bucket must not be empty".to_string()));
    }
    if config.object.bucket.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "object.bucket must not be empty".to_string(),
        ));
    }
    if config.s3.bucket.trim().is_empty() {
        return Err(ConfigError::Invalid("s3.bucket must not be empty".to_string()));
    }
    if config.gcs.bucket.trim().is_empty() {
        return Err(ConfigError::Invalid(
            "gcs.bucket must not be empty".to_string(),
        ));
    }
    if config.db.table.trim().is_empty() {
        return Err(ConfigError::Invalid("db.table must not be empty".to_string()));
    }

    if config.gc.ttl_sweep_interval_seconds == 0 {
        return Err(ConfigError::Invalid(
            "gc.ttl_sweep_interval_seconds must be > 0".to_string(),
        ));
    }
    if config.gc.batch_size == 0 {
        return Err(ConfigError::Invalid(
            "gc.batch_size must be > 0".to_string(),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = StorageConfig::default();
        assert!(validate_config(&config).is_ok());
        assert_eq!(config.router.kv_max_bytes, 1024 * 1024);
        assert_eq!(config.store.default_ttl_seconds, 3_600);
        assert_eq!(config.gc.ttl_sweep_interval_seconds, 300);
    }

    #[test]
    fn test_partial_yaml_fills_defaults() {
        let yaml = r#"
router:
  default_cloud_tier: blob-b
kv:
  bucket: custom_refs
"#;
        let config: StorageConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(validate_config(&config).is_ok());
        assert_eq!(config.router.default_cloud_tier, StoreTier::BlobB);
        assert_eq!(config.kv.bucket, "custom_refs");
        assert_eq!(config.object.bucket, "baton_result_objects");
        assert!(config.store.tier_fallback);
    }

    #[test]
    fn test_unordered_thresholds_rejected() {
        let yaml = r#"
router:
  kv_max_bytes: 1024
  memory_max_bytes: 4096
"#;
        let config: StorageConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Invalid(_))
        ));
    }

    #[test]
    fn test_non_blob_cloud_tier_rejected() {
        let yaml = r#"
router:
  default_cloud_tier: kv
"#;
        let config: StorageConfig = serde_yaml::from_str(yaml).unwrap();
        assert!(matches!(
            validate_config(&config),
            Err(ConfigError::Invalid(_))
        ));
    }
}
