//! Storage stack bootstrap.
//!
//! Wires router, backends, store, tracker and GC from a `StorageConfig` so
//! process startup constructs the services once and threads them through
//! call sites explicitly.

use std::sync::Arc;

use baton_config::StorageConfig;
use baton_core::{StorageRouter, StoreTier};

use crate::gc::{GarbageCollector, GcConfig};
use crate::gcs::{GcsBackend, GcsConfig};
use crate::handler::ResultHandler;
use crate::nats_kv::{NatsKvBackend, NatsKvConfig};
use crate::nats_object::{NatsObjectBackend, NatsObjectConfig};
use crate::postgres::{PostgresBackend, PostgresConfig};
use crate::result_store::{ResultStore, StoreOptions};
use crate::s3::{S3Backend, S3Config};
use crate::scope_tracker::ScopeTracker;

/// Fully wired storage services.
pub struct StorageStack {
    pub store: Arc<ResultStore>,
    pub tracker: Arc<ScopeTracker>,
    pub gc: Arc<GarbageCollector>,
    inline_max_bytes: usize,
}

impl StorageStack {
    /// Worker-side handler for one execution, carrying the configured
    /// externalization threshold.
    pub fn result_handler(&self, execution_id: impl Into<String>) -> ResultHandler {
        ResultHandler::new(execution_id, self.store.clone())
            .with_inline_max_bytes(self.inline_max_bytes)
    }
}

/// Build the storage stack from configuration.
///
/// Backends connect lazily on first use. The db tier is registered only
/// when a database URL is configured.
pub fn build_storage(config: &StorageConfig) -> StorageStack {
    let router = StorageRouter::new(
        config.router.default_cloud_tier,
        config.router.prefer_kv_for_small,
    )
    .with_thresholds(
        config.router.memory_max_bytes,
        config.router.kv_max_bytes,
        config.router.object_max_bytes,
    );

    let tracker = Arc::new(ScopeTracker::new());
    let mut store = ResultStore::new(router, tracker.clone())
        .with_options(StoreOptions {
            default_ttl_seconds: config.store.default_ttl_seconds,
            auto_compress_bytes: config.store.auto_compress_bytes,
            preview_max_bytes: config.store.preview_max_bytes,
            tier_fallback: config.store.tier_fallback,
        })
        .with_backend(
            StoreTier::Kv,
            Arc::new(NatsKvBackend::new(NatsKvConfig {
                url: config.kv.url.clone(),
                bucket: config.kv.bucket.clone(),
                max_value_bytes: config.kv.max_value_bytes,
                ttl_seconds: config.kv.ttl_seconds,
            })),
        )
        .with_backend(
            StoreTier::Object,
            Arc::new(NatsObjectBackend::new(NatsObjectConfig {
                url: config.object.url.clone(),
                bucket: config.object.bucket.clone(),
                max_object_bytes: config.object.max_object_bytes,
                max_bucket_bytes: config.object.max_bucket_bytes,
            })),
        )
        .with_backend(
            StoreTier::BlobA,
            Arc::new(S3Backend::new(S3Config {
                bucket: config.s3.bucket.clone(),
                prefix: config.s3.prefix.clone(),
                region: config.s3.region.clone(),
                endpoint: config.s3.endpoint.clone(),
            })),
        )
        .with_backend(
            StoreTier::BlobB,
            Arc::new(GcsBackend::new(GcsConfig {
                bucket: config.gcs.bucket.clone(),
                prefix: config.gcs.prefix.clone(),
            })),
        );

    if let Some(url) = &config.db.url {
        store = store.with_backend(
            StoreTier::Db,
            Arc::new(PostgresBackend::new(PostgresConfig::new(
                url,
                &config.db.table,
            ))),
        );
    }

    let store = Arc::new(store);
    let gc = Arc::new(GarbageCollector::new(
        store.clone(),
        tracker.clone(),
        GcConfig {
            ttl_sweep_interval_seconds: config.gc.ttl_sweep_interval_seconds,
            batch_size: config.gc.batch_size,
        },
    ));

    StorageStack {
        store,
        tracker,
        gc,
        inline_max_bytes: config.store.inline_max_bytes,
    }
}
