//! In-process memory backend.

use std::collections::{HashMap, VecDeque};
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;
use serde_json::Value;
use tracing::debug;

use baton_core::{StorageBackend, StorageError};

const DEFAULT_MEMORY_BUDGET_BYTES: u64 = 10 * 1024 * 1024;

#[derive(Default)]
struct MemoryInner {
    entries: HashMap<String, Bytes>,
    order: VecDeque<String>,
    current_bytes: u64,
}

/// In-process storage for step-scoped small data.
///
/// Bounded by a total byte budget; the oldest entries are evicted first.
pub struct MemoryBackend {
    inner: RwLock<MemoryInner>,
    max_bytes: u64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::with_max_bytes(DEFAULT_MEMORY_BUDGET_BYTES)
    }

    /// Create a memory backend with a total byte budget.
    pub fn with_max_bytes(max_bytes: u64) -> Self {
        Self {
            inner: RwLock::new(MemoryInner::default()),
            max_bytes: max_bytes.max(1),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    async fn put(
        &self,
        key: &str,
        data: Bytes,
        _metadata: Option<&Value>,
    ) -> Result<String, StorageError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?;

        if let Some(old) = inner.entries.remove(key) {
            inner.current_bytes -= old.len() as u64;
            inner.order.retain(|k| k != key);
        }

        while inner.current_bytes + data.len() as u64 > self.max_bytes {
            let Some(oldest) = inner.order.pop_front() else {
                break;
            };
            if let Some(evicted) = inner.entries.remove(&oldest) {
                inner.current_bytes -= evicted.len() as u64;
                debug!(key = %oldest, bytes = evicted.len(), "memory backend evicted entry");
            }
        }

        inner.current_bytes += data.len() as u64;
        inner.entries.insert(key.to_string(), data);
        inner.order.push_back(key.to_string());
        Ok(format!("memory://{key}"))
    }

    async fn get(&self, key: &str) -> Result<Bytes, StorageError> {
        let inner = self
            .inner
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        inner
            .entries
            .get(key)
            .cloned()
            .ok_or_else(|| StorageError::NotFound(format!("key not in memory: {key}")))
    }

    async fn delete(&self, key: &str) -> Result<bool, StorageError> {
        let mut inner = self
            .inner
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        match inner.entries.remove(key) {
            Some(removed) => {
                inner.current_bytes -= removed.len() as u64;
                inner.order.retain(|k| k != key);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn exists(&self, key: &str) -> Result<bool, StorageError> {
        let inner = self
            .inner
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        Ok(inner.entries.contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_backend_round_trip() {
        tokio_test::block_on(async {
            let backend = MemoryBackend::new();
            let uri = backend
                .put("k1", Bytes::from_static(b"payload"), None)
                .await
                .unwrap();
            assert_eq!(uri, "memory://k1");
            assert_eq!(backend.get("k1").await.unwrap(), Bytes::from_static(b"payload"));
            assert!(backend.exists("k1").await.unwrap());
            assert!(backend.delete("k1").await.unwrap());
            assert!(!backend.delete("k1").await.unwrap());
            assert!(backend.get("k1").await.unwrap_err().is_not_found());
        });
    }

    #[test]
    fn test_memory_backend_evicts_oldest_when_budget_exceeded() {
        tokio_test::block_on(async {
            let backend = MemoryBackend::with_max_bytes(10);
            backend.put("a", Bytes::from_static(b"xxxx"), None).await.unwrap();
            backend.put("b", Bytes::from_static(b"yyyy"), None).await.unwrap();
            backend.put("c", Bytes::from_static(b"zzzz"), None).await.unwrap();

            assert!(!backend.exists("a").await.unwrap());
            assert!(backend.exists("b").await.unwrap());
            assert!(backend.exists("c").await.unwrap());
        });
    }

    #[test]
    fn test_memory_backend_overwrite_reclaims_budget() {
        tokio_test::block_on(async {
            let backend = MemoryBackend::with_max_bytes(8);
            backend.put("a", Bytes::from_static(b"1234"), None).await.unwrap();
            backend.put("a", Bytes::from_static(b"5678"), None).await.unwrap();
            backend.put("b", Bytes::from_static(b"abcd"), None).await.unwrap();

            // Overwrite did not double-count; both entries fit.
            assert!(backend.exists("a").await.unwrap());
            assert!(backend.exists("b").await.unwrap());
        });
    }
}
