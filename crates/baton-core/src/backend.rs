//! Storage backend abstraction.
//!
//! Implementations live in `baton-stores`; callers depend only on this trait.

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;

use crate::error::StorageError;

/// Uniform byte-level interface over heterogeneous storage tiers.
///
/// Keys are the flat form produced by `ResultRef::to_key`. Each
/// implementation owns a lazily-initialized client guarded so concurrent
/// first callers share exactly one connection setup. Tier-specific size
/// limits are enforced on `put` with a `SizeViolation` error rather than
/// truncation; a missing key is `NotFound`, never `Transport`.
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Store bytes under a key and return the backend storage URI.
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        metadata: Option<&Value>,
    ) -> Result<String, StorageError>;

    /// Retrieve bytes by key.
    async fn get(&self, key: &str) -> Result<Bytes, StorageError>;

    /// Delete bytes by key; false when the key did not exist.
    async fn delete(&self, key: &str) -> Result<bool, StorageError>;

    /// Check whether a key exists.
    async fn exists(&self, key: &str) -> Result<bool, StorageError>;
}
