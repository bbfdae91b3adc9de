//! Worker-side result handling.
//!
//! Externalizes large step results while keeping small fields available for
//! templating in subsequent steps. Small results pass through inline; large
//! ones are stored and replaced by an envelope carrying the ref, a preview
//! and the extracted fields.

use std::sync::Arc;

use serde_json::{json, Map, Value};
use tracing::debug;

use baton_core::extract::extract_output_select;
use baton_core::{Scope, StorageError, StoreTier, TierSpec};

use crate::result_store::{PutRequest, ResultStore};

/// Threshold above which results are externalized.
pub const INLINE_MAX_BYTES: usize = 64 * 1024;

/// Result configuration from a step definition.
#[derive(Debug, Clone, Default, serde::Deserialize)]
pub struct OutputConfig {
    #[serde(default)]
    pub store: baton_core::OutputStoreSpec,
    #[serde(default)]
    pub output_select: Option<Vec<String>>,
    #[serde(default)]
    pub inline_max_bytes: Option<usize>,
    #[serde(default)]
    pub scope: Option<Scope>,
}

/// Handles result storage and output-select extraction for workers.
pub struct ResultHandler {
    execution_id: String,
    store: Arc<ResultStore>,
    inline_max_bytes: usize,
    default_tier: Option<StoreTier>,
}

impl ResultHandler {
    pub fn new(execution_id: impl Into<String>, store: Arc<ResultStore>) -> Self {
        Self {
            execution_id: execution_id.into(),
            store,
            inline_max_bytes: INLINE_MAX_BYTES,
            default_tier: None,
        }
    }

    /// Override the externalization threshold.
    pub fn with_inline_max_bytes(mut self, inline_max_bytes: usize) -> Self {
        self.inline_max_bytes = inline_max_bytes;
        self
    }

    /// Tier for externalized results when the step config names none.
    pub fn with_default_tier(mut self, tier: StoreTier) -> Self {
        self.default_tier = Some(tier);
        self
    }

    /// Process a step result for the templating context.
    ///
    /// Results within the inline threshold are returned as-is (with
    /// extracted fields and an `_inline` copy when `output_select` is set).
    /// Larger results are stored and replaced by an envelope:
    /// `{ _ref, _preview, _size_bytes, _store, ...extracted }`.
    pub async fn process_result(
        &self,
        step_name: &str,
        result: Value,
        config: Option<&OutputConfig>,
    ) -> Result<Value, StorageError> {
        if result.is_null() {
            return Ok(json!({ "_value": null }));
        }

        let size_bytes = serde_json::to_vec(&result)?.len();
        let threshold = config
            .and_then(|c| c.inline_max_bytes)
            .unwrap_or(self.inline_max_bytes);

        if size_bytes <= threshold {
            debug!(step = %step_name, bytes = size_bytes, "inline result");
            if let Some(paths) = config.and_then(|c| c.output_select.as_deref()) {
                let mut wrapped = extract_output_select(&result, Some(paths));
                wrapped.insert("_inline".to_string(), result);
                return Ok(Value::Object(wrapped));
            }
            return Ok(result);
        }

        let scope = config.and_then(|c| c.scope).unwrap_or(Scope::Execution);
        let tier = config
            .map(|c| c.store.kind)
            .filter(|kind| *kind != TierSpec::Auto)
            .map(tier_for_spec)
            .or(self.default_tier);

        let mut request = PutRequest::new(&self.execution_id, step_name, result)
            .with_scope(scope)
            .with_source_step(step_name);
        if let Some(tier) = tier {
            request = request.with_tier(tier);
        }
        if let Some(paths) = config.and_then(|c| c.output_select.clone()) {
            request = request.with_output_select(paths);
        }

        let result_ref = self.store.put(request).await?;
        debug!(step = %step_name, uri = %result_ref.uri, "externalized result");
        Ok(wrap_result_with_ref(&result_ref)?)
    }

    /// Resolve an envelope or any reference shape back to full data.
    pub async fn resolve_ref(&self, value: Value) -> Result<Value, StorageError> {
        match ref_from_envelope(&value) {
            Some(wire_ref) => self.store.resolve_value(wire_ref.clone()).await,
            None => self.store.resolve_value(value).await,
        }
    }
}

/// Build the templating-context envelope for an externalized result.
///
/// Extracted fields sit at the top level for direct template access; `_ref`
/// supports lazy loading and `_preview` display without resolution.
pub fn wrap_result_with_ref(result_ref: &baton_core::ResultRef) -> Result<Value, StorageError> {
    let mut wrapped = Map::new();
    wrapped.insert("_ref".to_string(), serde_json::to_value(result_ref)?);
    wrapped.insert("_size_bytes".to_string(), Value::from(result_ref.meta.bytes));
    wrapped.insert(
        "_store".to_string(),
        Value::from(result_ref.tier.as_str()),
    );
    if let Some(preview) = &result_ref.preview {
        wrapped.insert("_preview".to_string(), preview.clone());
    }
    if let Some(Value::Object(extracted)) = &result_ref.extracted {
        for (key, value) in extracted {
            wrapped.insert(key.clone(), value.clone());
        }
    }
    Ok(Value::Object(wrapped))
}

/// Check whether a value is an externalized-result envelope.
pub fn is_result_envelope(value: &Value) -> bool {
    ref_from_envelope(value).is_some()
}

fn ref_from_envelope(value: &Value) -> Option<&Value> {
    value
        .as_object()
        .and_then(|map| map.get("_ref"))
        .filter(|r| r.is_object())
}

fn tier_for_spec(spec: TierSpec) -> StoreTier {
    match spec {
        // Auto is filtered out before this point; routing handles it.
        TierSpec::Auto | TierSpec::Kv => StoreTier::Kv,
        TierSpec::Memory => StoreTier::Memory,
        TierSpec::Object => StoreTier::Object,
        TierSpec::BlobA => StoreTier::BlobA,
        TierSpec::BlobB => StoreTier::BlobB,
        TierSpec::Db => StoreTier::Db,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    use baton_core::StorageRouter;

    use crate::memory::MemoryBackend;
    use crate::scope_tracker::ScopeTracker;

    fn handler(inline_max_bytes: usize) -> ResultHandler {
        let tracker = Arc::new(ScopeTracker::new());
        let store = Arc::new(
            ResultStore::new(StorageRouter::default(), tracker)
                .with_backend(StoreTier::Kv, Arc::new(MemoryBackend::new()))
                .with_backend(StoreTier::Object, Arc::new(MemoryBackend::new())),
        );
        ResultHandler::new("exec-1", store).with_inline_max_bytes(inline_max_bytes)
    }

    #[test]
    fn test_small_result_passes_through_inline() {
        tokio_test::block_on(async {
            let handler = handler(1024);
            let result = json!({"status": "ok"});
            let processed = handler
                .process_result("fetch", result.clone(), None)
                .await
                .unwrap();
            assert_eq!(processed, result);
            assert!(!is_result_envelope(&processed));
        });
    }

    #[test]
    fn test_large_result_is_externalized() {
        tokio_test::block_on(async {
            let handler = handler(64);
            let result = json!({"status": "ok", "body": "x".repeat(500)});
            let processed = handler
                .process_result("fetch", result.clone(), None)
                .await
                .unwrap();

            assert!(is_result_envelope(&processed));
            assert_eq!(processed["_ref"]["kind"], "ref");
            assert!(processed.get("_preview").is_some());

            // The envelope resolves back to the original value.
            let resolved = handler.resolve_ref(processed).await.unwrap();
            assert_eq!(resolved, result);
        });
    }

    #[test]
    fn test_extracted_fields_surface_in_envelope() {
        tokio_test::block_on(async {
            let handler = handler(64);
            let config = OutputConfig {
                output_select: Some(vec!["status".to_string()]),
                ..OutputConfig::default()
            };
            let result = json!({"status": "done", "body": "x".repeat(500)});
            let processed = handler
                .process_result("fetch", result, Some(&config))
                .await
                .unwrap();

            assert!(is_result_envelope(&processed));
            assert_eq!(processed["status"], "done");
        });
    }

    #[test]
    fn test_inline_with_output_select_keeps_copy() {
        tokio_test::block_on(async {
            let handler = handler(1024);
            let config = OutputConfig {
                output_select: Some(vec!["status".to_string()]),
                ..OutputConfig::default()
            };
            let result = json!({"status": "ok", "n": 1});
            let processed = handler
                .process_result("fetch", result.clone(), Some(&config))
                .await
                .unwrap();

            assert_eq!(processed["status"], "ok");
            assert_eq!(processed["_inline"], result);
        });
    }

    #[test]
    fn test_null_result_wraps_value() {
        tokio_test::block_on(async {
            let handler = handler(1024);
            let processed = handler.process_result("fetch", Value::Null, None).await.unwrap();
            assert_eq!(processed, json!({"_value": null}));
        });
    }
}
