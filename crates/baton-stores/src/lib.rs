//! # Baton Stores
//!
//! Storage implementations for the Baton result-reference layer.
//!
//! This crate provides:
//! - Backends for every tier: memory, NATS KV, NATS Object Store,
//!   S3-compatible blob, GCS blob, Postgres
//! - `ResultStore`: put/get/resolve/delete over the backends
//! - `ScopeTracker`: ref lifecycle bookkeeping per scope boundary
//! - `GarbageCollector`: TTL sweep plus scope-boundary cleanup hooks
//! - `ResultHandler`: worker-side inline-vs-externalize switch

mod bootstrap;
mod gc;
mod gcs;
mod handler;
mod memory;
mod nats_kv;
mod nats_object;
mod postgres;
mod result_store;
mod s3;
mod scope_tracker;

pub use bootstrap::{build_storage, StorageStack};
pub use gc::{GarbageCollector, GcConfig, GcStats};
pub use gcs::{GcsBackend, GcsConfig};
pub use handler::{
    is_result_envelope, wrap_result_with_ref, OutputConfig, ResultHandler, INLINE_MAX_BYTES,
};
pub use memory::MemoryBackend;
pub use nats_kv::{NatsKvBackend, NatsKvConfig};
pub use nats_object::{NatsObjectBackend, NatsObjectConfig};
pub use postgres::{PostgresBackend, PostgresConfig};
pub use result_store::{PutRequest, Resolvable, ResultStore, StoreOptions};
pub use s3::{S3Backend, S3Config};
pub use scope_tracker::{ScopeStats, ScopeTracker};

// Re-export core types for convenience
pub use baton_core::{
    Manifest, ManifestPart, MergeStrategy, RefMeta, ResultRef, Scope, StorageBackend,
    StorageError, StorageRouter, StoreTier,
};
