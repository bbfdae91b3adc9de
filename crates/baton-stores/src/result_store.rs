//! Unified result store.
//!
//! The orchestrator over backends: serializes and compresses data, asks the
//! router for a tier, writes through a backend with tier-downgrade fallback,
//! registers refs with the scope tracker, and resolves references (including
//! cross-process direct fetch and manifest aggregation) back into data.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::sync::{Arc, RwLock};

use bytes::Bytes;
use chrono::Utc;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use baton_core::extract::{extract_output_select, value_at_path};
use baton_core::preview::build_preview;
use baton_core::reference::{key_for_uri, validate_uri};
use baton_core::{
    AccessPattern, Compression, Manifest, MergeStrategy, RefMeta, ResultRef, Scope,
    StorageBackend, StorageError, StorageRouter, StoreTier, URI_SCHEME,
};

use crate::memory::MemoryBackend;
use crate::scope_tracker::ScopeTracker;

const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Store behavior knobs.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// TTL applied when a put supplies none (ignored for permanent scope).
    pub default_ttl_seconds: u64,
    /// Serialized payloads above this are gzip-compressed automatically.
    pub auto_compress_bytes: u64,
    pub preview_max_bytes: usize,
    /// Downgrade to a fallback tier when a write fails.
    pub tier_fallback: bool,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            default_ttl_seconds: 3_600,
            auto_compress_bytes: 10 * 1024,
            preview_max_bytes: 1024,
            tier_fallback: true,
        }
    }
}

/// Request to store one step result.
pub struct PutRequest {
    pub execution_id: String,
    pub name: String,
    pub data: Value,
    pub scope: Scope,
    /// Explicit tier; auto-selected by the router when absent.
    pub tier: Option<StoreTier>,
    pub ttl_seconds: Option<u64>,
    pub source_step: Option<String>,
    pub correlation: Option<Value>,
    /// Dotted paths extracted into the ref for cheap template reads.
    pub output_select: Option<Vec<String>>,
    /// Parent execution link for workflow-scope tracking.
    pub parent_execution_id: Option<String>,
    pub compress: bool,
}

impl PutRequest {
    pub fn new(
        execution_id: impl Into<String>,
        name: impl Into<String>,
        data: Value,
    ) -> Self {
        Self {
            execution_id: execution_id.into(),
            name: name.into(),
            data,
            scope: Scope::Execution,
            tier: None,
            ttl_seconds: None,
            source_step: None,
            correlation: None,
            output_select: None,
            parent_execution_id: None,
            compress: false,
        }
    }

    pub fn with_scope(mut self, scope: Scope) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_tier(mut self, tier: StoreTier) -> Self {
        self.tier = Some(tier);
        self
    }

    pub fn with_ttl_seconds(mut self, ttl_seconds: u64) -> Self {
        self.ttl_seconds = Some(ttl_seconds);
        self
    }

    pub fn with_source_step(mut self, source_step: impl Into<String>) -> Self {
        self.source_step = Some(source_step.into());
        self
    }

    pub fn with_correlation(mut self, correlation: Value) -> Self {
        self.correlation = Some(correlation);
        self
    }

    pub fn with_output_select(mut self, paths: Vec<String>) -> Self {
        self.output_select = Some(paths);
        self
    }

    pub fn with_parent_execution(mut self, parent_execution_id: impl Into<String>) -> Self {
        self.parent_execution_id = Some(parent_execution_id.into());
        self
    }

    pub fn with_compression(mut self, compress: bool) -> Self {
        self.compress = compress;
        self
    }
}

/// Anything a template value can resolve from: a closed union, matched
/// exhaustively in `ResultStore::resolve`.
#[derive(Debug, Clone)]
pub enum Resolvable {
    Ref(ResultRef),
    Manifest(Manifest),
    Uri(String),
    Inline(Value),
}

impl Resolvable {
    /// Map a wire value into the union via its `kind` discriminator.
    ///
    /// Objects claiming a known kind must deserialize to it; a bare string
    /// with the ref scheme is a URI; everything else is inline data.
    pub fn classify(value: Value) -> Result<Resolvable, StorageError> {
        if let Value::String(s) = &value {
            if s.starts_with(URI_SCHEME) {
                return Ok(Resolvable::Uri(s.clone()));
            }
            return Ok(Resolvable::Inline(value));
        }

        let kind = value
            .as_object()
            .and_then(|map| map.get("kind"))
            .and_then(Value::as_str)
            .map(str::to_string);

        match kind.as_deref() {
            Some("ref") => {
                let result_ref: ResultRef = serde_json::from_value(value)?;
                result_ref.validate()?;
                Ok(Resolvable::Ref(result_ref))
            }
            Some("manifest") => Ok(Resolvable::Manifest(serde_json::from_value(value)?)),
            _ => Ok(Resolvable::Inline(value)),
        }
    }
}

/// Unified result storage service.
///
/// Operations: `put` -> `ResultRef`, `get`/`resolve` -> data, `delete`,
/// `list_refs`. One instance per process; constructed explicitly and shared
/// via `Arc`.
pub struct ResultStore {
    router: StorageRouter,
    tracker: Arc<ScopeTracker>,
    backends: HashMap<StoreTier, Arc<dyn StorageBackend>>,
    options: StoreOptions,
    /// Local metadata cache: uri -> ref. Within one process a put followed
    /// by a get on the same ref always hits this cache.
    ref_cache: RwLock<HashMap<String, ResultRef>>,
}

impl ResultStore {
    /// Create a store with the in-memory tier preinstalled.
    pub fn new(router: StorageRouter, tracker: Arc<ScopeTracker>) -> Self {
        let mut backends: HashMap<StoreTier, Arc<dyn StorageBackend>> = HashMap::new();
        backends.insert(StoreTier::Memory, Arc::new(MemoryBackend::new()));
        Self {
            router,
            tracker,
            backends,
            options: StoreOptions::default(),
            ref_cache: RwLock::new(HashMap::new()),
        }
    }

    pub fn with_options(mut self, options: StoreOptions) -> Self {
        self.options = options;
        self
    }

    /// Register a backend for a tier slot.
    pub fn with_backend(mut self, tier: StoreTier, backend: Arc<dyn StorageBackend>) -> Self {
        self.backends.insert(tier, backend);
        self
    }

    pub fn tracker(&self) -> &Arc<ScopeTracker> {
        &self.tracker
    }

    /// Store data and return a reference pointer.
    pub async fn put(&self, request: PutRequest) -> Result<ResultRef, StorageError> {
        let serialized = serde_json::to_vec(&request.data)?;
        let original_size = serialized.len() as u64;

        let (payload, compression) =
            if request.compress || original_size > self.options.auto_compress_bytes {
                let compressed = gzip_compress(&serialized)?;
                debug!(
                    original = original_size,
                    compressed = compressed.len(),
                    "compressed payload"
                );
                (compressed, Compression::Gzip)
            } else {
                (serialized, Compression::None)
            };

        let tier = match request.tier {
            Some(tier) => tier,
            None => {
                let access_pattern = if request.scope == Scope::Step {
                    AccessPattern::ReadOnce
                } else {
                    AccessPattern::ReadMulti
                };
                self.router.select_tier(
                    payload.len() as u64,
                    request.scope,
                    access_pattern,
                    None,
                    None,
                )
            }
        };

        let meta = RefMeta {
            bytes: payload.len() as u64,
            sha256: Some(hex_digest(&payload)),
            compression,
            created_at: Utc::now(),
            ..RefMeta::default()
        };

        let ttl_seconds = request.ttl_seconds.or(Some(self.options.default_ttl_seconds));
        let mut result_ref = ResultRef::create(
            &request.execution_id,
            &request.name,
            tier,
            request.scope,
            ttl_seconds,
            meta,
        )?;
        result_ref.preview = Some(build_preview(&request.data, self.options.preview_max_bytes));
        if let Some(paths) = request.output_select.as_deref() {
            result_ref.extracted = Some(Value::Object(extract_output_select(
                &request.data,
                Some(paths),
            )));
        }
        result_ref = result_ref
            .with_correlation(request.correlation)
            .with_source_step(request.source_step.clone());

        let key = result_ref.to_key();
        let stored_tier = self.write_with_fallback(tier, &key, Bytes::from(payload)).await?;
        if stored_tier != tier {
            result_ref.tier = stored_tier;
        }

        self.cache_ref(result_ref.clone())?;
        self.tracker.register_ref(
            &result_ref,
            &request.execution_id,
            request.source_step.as_deref(),
            request.parent_execution_id.as_deref(),
        )?;

        info!(
            name = %request.name,
            uri = %result_ref.uri,
            tier = %result_ref.tier,
            bytes = result_ref.meta.bytes,
            scope = %result_ref.scope,
            "stored result"
        );
        Ok(result_ref)
    }

    /// Retrieve data by reference URI.
    ///
    /// An expired cached ref is deleted as a side effect and surfaces
    /// `NotFound`. Without cached metadata (another worker stored it) the
    /// direct-fetch path probes backends in order.
    pub async fn get(&self, uri: &str) -> Result<Value, StorageError> {
        validate_uri(uri)?;

        let cached = {
            let cache = self
                .ref_cache
                .read()
                .map_err(|e| StorageError::Internal(e.to_string()))?;
            cache.get(uri).cloned()
        };

        let Some(result_ref) = cached else {
            return self.direct_fetch(uri).await;
        };

        if result_ref.is_expired() {
            self.delete(uri).await?;
            return Err(StorageError::NotFound(format!("ref expired: {uri}")));
        }

        let backend = self.backend(result_ref.tier)?;
        let bytes = backend.get(&result_ref.to_key()).await?;
        let value = decode_payload(&bytes, result_ref.meta.compression)?;

        {
            let mut cache = self
                .ref_cache
                .write()
                .map_err(|e| StorageError::Internal(e.to_string()))?;
            if let Some(entry) = cache.get_mut(uri) {
                entry.meta.access_count += 1;
                entry.meta.accessed_at = Some(Utc::now());
            }
        }

        debug!(uri = %uri, "retrieved result");
        Ok(value)
    }

    /// Resolve any reference shape to data.
    pub async fn resolve(&self, target: Resolvable) -> Result<Value, StorageError> {
        match target {
            Resolvable::Ref(result_ref) => self.get(&result_ref.uri).await,
            Resolvable::Uri(uri) => self.get(&uri).await,
            Resolvable::Manifest(manifest) => self.resolve_manifest(&manifest).await,
            Resolvable::Inline(value) => Ok(value),
        }
    }

    /// Classify and resolve a wire value.
    pub async fn resolve_value(&self, value: Value) -> Result<Value, StorageError> {
        self.resolve(Resolvable::classify(value)?).await
    }

    /// Delete a reference and its data; false when the ref was unknown.
    pub async fn delete(&self, uri: &str) -> Result<bool, StorageError> {
        let cached = {
            let cache = self
                .ref_cache
                .read()
                .map_err(|e| StorageError::Internal(e.to_string()))?;
            cache.get(uri).cloned()
        };
        let Some(result_ref) = cached else {
            return Ok(false);
        };

        let backend = self.backend(result_ref.tier)?;
        backend.delete(&result_ref.to_key()).await?;

        let mut cache = self
            .ref_cache
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        cache.remove(uri);
        debug!(uri = %uri, "deleted result");
        Ok(true)
    }

    /// List locally cached refs for an execution; never queries backends.
    pub fn list_refs(
        &self,
        execution_id: &str,
        scope: Option<Scope>,
        source_step: Option<&str>,
    ) -> Result<Vec<ResultRef>, StorageError> {
        let prefix = format!("{URI_SCHEME}execution/{execution_id}/");
        let cache = self
            .ref_cache
            .read()
            .map_err(|e| StorageError::Internal(e.to_string()))?;

        Ok(cache
            .values()
            .filter(|r| r.uri.starts_with(&prefix))
            .filter(|r| scope.map_or(true, |s| r.scope == s))
            .filter(|r| source_step.map_or(true, |step| r.source_step.as_deref() == Some(step)))
            .cloned()
            .collect())
    }

    // === Internal ===

    fn backend(&self, tier: StoreTier) -> Result<&Arc<dyn StorageBackend>, StorageError> {
        self.backends
            .get(&tier)
            .ok_or_else(|| StorageError::Internal(format!("no backend registered for tier {tier}")))
    }

    /// Write through the selected backend, downgrading along the fallback
    /// chain on size/transport failures when fallback is enabled. Only
    /// exhaustion of the chain surfaces an error.
    async fn write_with_fallback(
        &self,
        tier: StoreTier,
        key: &str,
        payload: Bytes,
    ) -> Result<StoreTier, StorageError> {
        let mut current = tier;
        loop {
            let backend = self.backend(current)?;
            match backend.put(key, payload.clone(), None).await {
                Ok(_) => return Ok(current),
                Err(err) => {
                    let eligible = matches!(
                        err,
                        StorageError::Transport(_) | StorageError::SizeViolation { .. }
                    );
                    let next = fallback_tier(current);
                    match next {
                        Some(next) if self.options.tier_fallback && eligible => {
                            warn!(
                                from = %current,
                                to = %next,
                                error = %err,
                                "tier write failed, downgrading"
                            );
                            current = next;
                        }
                        _ => return Err(err),
                    }
                }
            }
        }
    }

    /// Cross-process resolution: probe backends in fixed order without
    /// local metadata, sniffing compression from the payload itself.
    async fn direct_fetch(&self, uri: &str) -> Result<Value, StorageError> {
        let key = key_for_uri(uri);
        let order = [
            StoreTier::Kv,
            StoreTier::Object,
            self.router.default_cloud_tier(),
            StoreTier::Memory,
        ];

        let mut transport_error = None;
        for tier in order {
            let Some(backend) = self.backends.get(&tier) else {
                continue;
            };
            match backend.get(&key).await {
                Ok(bytes) => {
                    debug!(uri = %uri, tier = %tier, "direct fetch hit");
                    return decode_sniffed(&bytes);
                }
                Err(err) if err.is_not_found() => continue,
                Err(err) => {
                    warn!(uri = %uri, tier = %tier, error = %err, "direct fetch probe failed");
                    transport_error = Some(err);
                }
            }
        }

        Err(transport_error
            .unwrap_or_else(|| StorageError::NotFound(format!("ref not found in any backend: {uri}"))))
    }

    /// Aggregate manifest parts per the manifest's strategy.
    async fn resolve_manifest(&self, manifest: &Manifest) -> Result<Value, StorageError> {
        let mut resolved = Vec::with_capacity(manifest.parts.len());
        for part in &manifest.parts {
            // Boxed: parts may themselves be manifests.
            match Box::pin(self.resolve_value(part.part.clone())).await {
                Ok(value) => resolved.push(value),
                Err(err) => {
                    warn!(index = part.index, error = %err, "failed to resolve manifest part");
                }
            }
        }

        match manifest.strategy {
            MergeStrategy::Append => {
                let mut combined = Vec::new();
                for value in resolved {
                    match value {
                        Value::Array(items) => combined.extend(items),
                        other => combined.push(other),
                    }
                }
                Ok(Value::Array(combined))
            }
            MergeStrategy::Replace => Ok(resolved.pop().unwrap_or(Value::Null)),
            MergeStrategy::Merge => {
                let mut accumulator = Value::Object(Map::new());
                for value in resolved {
                    match value {
                        Value::Object(map) => match &mut accumulator {
                            Value::Object(acc) => acc.extend(map),
                            _ => accumulator = Value::Object(map),
                        },
                        other => {
                            warn!("merge strategy got non-object part, replacing accumulator");
                            accumulator = other;
                        }
                    }
                }
                Ok(accumulator)
            }
            MergeStrategy::Concat => {
                let mut combined = Vec::new();
                for value in resolved {
                    if let Some(path) = &manifest.merge_path {
                        if value.is_object() {
                            if let Some(Value::Array(items)) = value_at_path(&value, path) {
                                combined.extend(items.iter().cloned());
                            }
                            continue;
                        }
                    }
                    match value {
                        Value::Array(items) => combined.extend(items),
                        other => combined.push(other),
                    }
                }
                Ok(Value::Array(combined))
            }
        }
    }

    pub(crate) fn cache_ref(&self, result_ref: ResultRef) -> Result<(), StorageError> {
        let mut cache = self
            .ref_cache
            .write()
            .map_err(|e| StorageError::Internal(e.to_string()))?;
        cache.insert(result_ref.uri.clone(), result_ref);
        Ok(())
    }

    /// Snapshot of locally cached refs, for the TTL sweep.
    pub(crate) fn cached_refs(&self) -> Vec<ResultRef> {
        self.ref_cache
            .read()
            .map(|cache| cache.values().cloned().collect())
            .unwrap_or_default()
    }
}

fn fallback_tier(tier: StoreTier) -> Option<StoreTier> {
    match tier {
        StoreTier::Object => Some(StoreTier::Kv),
        StoreTier::Kv => Some(StoreTier::Memory),
        StoreTier::BlobA | StoreTier::BlobB => Some(StoreTier::Object),
        StoreTier::Memory | StoreTier::Db => None,
    }
}

fn hex_digest(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    format!("{:x}", hasher.finalize())
}

fn gzip_compress(data: &[u8]) -> Result<Vec<u8>, StorageError> {
    let mut encoder = GzEncoder::new(Vec::new(), flate2::Compression::default());
    encoder
        .write_all(data)
        .map_err(|e| StorageError::Internal(e.to_string()))?;
    encoder
        .finish()
        .map_err(|e| StorageError::Internal(e.to_string()))
}

fn gzip_decompress(data: &[u8]) -> Result<Vec<u8>, StorageError> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder
        .read_to_end(&mut out)
        .map_err(|e| StorageError::Corruption(format!("gzip decode failed: {e}")))?;
    Ok(out)
}

fn decode_payload(bytes: &[u8], compression: Compression) -> Result<Value, StorageError> {
    let bytes = match compression {
        Compression::Gzip => gzip_decompress(bytes)?,
        Compression::None => bytes.to_vec(),
    };
    serde_json::from_slice(&bytes)
        .map_err(|e| StorageError::Corruption(format!("invalid JSON payload: {e}")))
}

/// Decode without metadata: trust the gzip magic bytes, not caller flags.
fn decode_sniffed(bytes: &[u8]) -> Result<Value, StorageError> {
    if bytes.starts_with(&GZIP_MAGIC) {
        decode_payload(bytes, Compression::Gzip)
    } else {
        decode_payload(bytes, Compression::None)
    }
}
