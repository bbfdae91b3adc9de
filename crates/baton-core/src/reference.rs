//! Result reference model.
//!
//! A `ResultRef` is a lightweight pointer to externally stored step output.
//! The data itself lives in a storage tier; only the pointer travels through
//! the event log and the templating context.
//!
//! URI format: `baton://execution/<execution_id>/result/<name>/<id8>`

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use crate::error::StorageError;

/// URI scheme prefix for result references.
pub const URI_SCHEME: &str = "baton://";

/// Storage tier for result data.
///
/// The two blob tiers are abstract slots; the configured adapters bind them
/// to concrete services (S3-compatible storage and GCS by default).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum StoreTier {
    /// In-process memory (fastest, step-scoped).
    Memory,
    /// Key-value tier (< 1MB, execution-scoped).
    Kv,
    /// Object tier (< 10MB).
    Object,
    /// Primary cloud blob tier.
    BlobA,
    /// Secondary cloud blob tier.
    BlobB,
    /// Queryable database tier.
    Db,
}

impl StoreTier {
    /// Stable label used in URIs, logs and configuration.
    pub fn as_str(&self) -> &'static str {
        match self {
            StoreTier::Memory => "memory",
            StoreTier::Kv => "kv",
            StoreTier::Object => "object",
            StoreTier::BlobA => "blob-a",
            StoreTier::BlobB => "blob-b",
            StoreTier::Db => "db",
        }
    }
}

impl fmt::Display for StoreTier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle scope for result data.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scope {
    /// Cleaned up when the step completes.
    Step,
    /// Cleaned up when the execution completes.
    Execution,
    /// Persists across nested executions, cleaned up when the root completes.
    Workflow,
    /// Never auto-cleaned.
    Permanent,
}

impl Scope {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scope::Step => "step",
            Scope::Execution => "execution",
            Scope::Workflow => "workflow",
            Scope::Permanent => "permanent",
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload compression applied before the backend write.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    #[default]
    None,
    Gzip,
}

/// Metadata carried by a `ResultRef`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefMeta {
    #[serde(default = "default_content_type")]
    pub content_type: String,
    /// Stored size in bytes (after compression, when applied).
    #[serde(default)]
    pub bytes: u64,
    /// Content hash of the stored bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sha256: Option<String>,
    #[serde(default)]
    pub compression: Compression,
    #[serde(default = "default_encoding")]
    pub encoding: String,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accessed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub access_count: u64,
}

fn default_content_type() -> String {
    "application/json".to_string()
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

impl Default for RefMeta {
    fn default() -> Self {
        Self {
            content_type: default_content_type(),
            bytes: 0,
            sha256: None,
            compression: Compression::None,
            encoding: default_encoding(),
            created_at: Utc::now(),
            accessed_at: None,
            access_count: 0,
        }
    }
}

fn default_ref_kind() -> String {
    "ref".to_string()
}

fn is_false(value: &bool) -> bool {
    !*value
}

/// A lightweight pointer to externally stored data.
///
/// A `ResultRef` belongs to exactly one scope for its entire lifetime; the
/// scope is never mutated after creation. `permanent` scope never expires
/// regardless of TTL arguments supplied at creation. Only the
/// access-tracking fields (`accessed_at`, `access_count`) change after
/// construction.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRef {
    /// Wire discriminator, always `"ref"`.
    #[serde(default = "default_ref_kind")]
    pub kind: String,
    /// Canonical address; immutable once created.
    pub uri: String,
    pub tier: StoreTier,
    pub scope: Scope,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub meta: RefMeta,
    /// Byte-budgeted truncated rendering, safe to log without resolving.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub preview: Option<Value>,
    /// Fields pulled out of the value at store time for cheap template reads.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub extracted: Option<Value>,
    /// Loop/pagination/retry bookkeeping tags.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation: Option<Value>,
    /// Step that produced this result.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_step: Option<String>,
    /// Whether this ref is one part of a larger accumulation.
    #[serde(default, skip_serializing_if = "is_false")]
    pub is_accumulated: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub accumulation_index: Option<usize>,
    /// URI of the parent manifest when accumulated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest_uri: Option<String>,
}

impl ResultRef {
    /// Create a new reference for a stored result.
    ///
    /// `expires_at` is omitted for `permanent` scope regardless of
    /// `ttl_seconds`; other scopes expire `ttl_seconds` from now when a
    /// positive TTL is supplied.
    pub fn create(
        execution_id: &str,
        name: &str,
        tier: StoreTier,
        scope: Scope,
        ttl_seconds: Option<u64>,
        meta: RefMeta,
    ) -> Result<Self, StorageError> {
        validate_uri_component(execution_id, "execution_id")?;
        validate_uri_component(name, "name")?;

        let id = short_id();
        let uri = format!("{URI_SCHEME}execution/{execution_id}/result/{name}/{id}");

        let expires_at = match scope {
            Scope::Permanent => None,
            _ => ttl_seconds
                .filter(|ttl| *ttl > 0)
                .map(|ttl| Utc::now() + Duration::seconds(ttl as i64)),
        };

        Ok(Self {
            kind: default_ref_kind(),
            uri,
            tier,
            scope,
            expires_at,
            meta,
            preview: None,
            extracted: None,
            correlation: None,
            source_step: None,
            is_accumulated: false,
            accumulation_index: None,
            manifest_uri: None,
        })
    }

    /// Validate a reference deserialized from the wire.
    pub fn validate(&self) -> Result<(), StorageError> {
        validate_uri(&self.uri)
    }

    /// Attach loop/pagination tags.
    pub fn with_correlation(mut self, correlation: Option<Value>) -> Self {
        self.correlation = correlation;
        self
    }

    /// Attach the producing step name.
    pub fn with_source_step(mut self, source_step: Option<String>) -> Self {
        self.source_step = source_step;
        self
    }

    /// Mark this ref as part of an accumulation.
    pub fn with_accumulation(mut self, index: usize, manifest_uri: impl Into<String>) -> Self {
        self.is_accumulated = true;
        self.accumulation_index = Some(index);
        self.manifest_uri = Some(manifest_uri.into());
        self
    }

    /// Check whether this reference has expired.
    ///
    /// `permanent` scope never expires.
    pub fn is_expired(&self) -> bool {
        if self.scope == Scope::Permanent {
            return false;
        }
        match self.expires_at {
            Some(expires_at) => Utc::now() > expires_at,
            None => false,
        }
    }

    /// Convert the URI into a flat, backend-safe storage key.
    pub fn to_key(&self) -> String {
        key_for_uri(&self.uri)
    }

    /// Reconstruct a ref URI from a flat storage key.
    pub fn uri_from_key(key: &str) -> String {
        format!("{URI_SCHEME}{}", key.replace('_', "/"))
    }

    /// Execution id segment of the URI, when well-formed.
    pub fn execution_id(&self) -> Option<&str> {
        self.uri
            .strip_prefix(URI_SCHEME)?
            .split('/')
            .nth(1)
            .filter(|segment| !segment.is_empty())
    }
}

/// Convert a ref URI into its flat storage key.
pub fn key_for_uri(uri: &str) -> String {
    uri.trim_start_matches(URI_SCHEME).replace('/', "_")
}

/// Validate that a URI carries the expected scheme prefix.
pub fn validate_uri(uri: &str) -> Result<(), StorageError> {
    if !uri.starts_with(URI_SCHEME) {
        return Err(StorageError::InvalidRef(format!(
            "uri must start with {URI_SCHEME}: {uri}"
        )));
    }
    Ok(())
}

/// URI components must survive the flat-key round trip, which collapses `/`
/// to `_` and back.
pub(crate) fn validate_uri_component(value: &str, field: &str) -> Result<(), StorageError> {
    if value.is_empty() {
        return Err(StorageError::InvalidRef(format!("{field} must not be empty")));
    }
    if value.contains(['/', '_']) {
        return Err(StorageError::InvalidRef(format!(
            "{field} must not contain '/' or '_': {value}"
        )));
    }
    Ok(())
}

pub(crate) fn short_id() -> String {
    let id = Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}

/// Parse a TTL string into seconds.
///
/// Accepts duration strings (`"30s"`, `"30m"`, `"1h"`, `"2d"`, `"1w"`,
/// `"1y"`), bare integer seconds, and the no-expiry spellings `"forever"`,
/// `"permanent"` and `"-1"`. Returns `None` for no-expiry and for anything
/// unparseable.
pub fn parse_ttl(ttl: &str) -> Option<u64> {
    let ttl = ttl.trim().to_ascii_lowercase();
    if ttl.is_empty() || matches!(ttl.as_str(), "forever" | "permanent" | "-1") {
        return None;
    }

    const MULTIPLIERS: [(char, u64); 6] = [
        ('s', 1),
        ('m', 60),
        ('h', 3_600),
        ('d', 86_400),
        ('w', 604_800),
        ('y', 31_536_000),
    ];

    for (suffix, multiplier) in MULTIPLIERS {
        if let Some(amount) = ttl.strip_suffix(suffix) {
            return amount.parse::<u64>().ok().map(|n| n * multiplier);
        }
    }

    ttl.parse::<u64>().ok()
}
