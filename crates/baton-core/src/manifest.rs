//! Manifest model for accumulated results.
//!
//! Instead of merging large paginated/looped datasets in memory, a manifest
//! references the parts in order; resolution combines them per strategy.
//!
//! URI format: `baton://execution/<execution_id>/manifest/<name>/<id8>`

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::StorageError;
use crate::reference::{short_id, validate_uri_component, URI_SCHEME};

/// How manifest parts combine during resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Concatenate resolved parts into one list.
    #[default]
    Append,
    /// The result is the last part.
    Replace,
    /// Shallow-merge each part object into the accumulator.
    Merge,
    /// Extract the list at `merge_path` from each part and concatenate.
    Concat,
}

/// Single part in a manifest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ManifestPart {
    /// Pointer to the part data: a ref URI string or an inline value.
    #[serde(rename = "ref")]
    pub part: Value,
    /// Part order index; invariant: `parts[i].index == i`.
    pub index: usize,
    #[serde(default)]
    pub byte_size: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub meta: Option<Value>,
}

fn default_manifest_kind() -> String {
    "manifest".to_string()
}

/// Ordered aggregation of parts for paginated/looped results.
///
/// Parts are appended one per iteration; once `mark_complete` is called the
/// manifest is immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Manifest {
    /// Wire discriminator, always `"manifest"`.
    #[serde(default = "default_manifest_kind")]
    pub kind: String,
    pub uri: String,
    pub execution_id: String,
    #[serde(default)]
    pub strategy: MergeStrategy,
    /// Dotted path into each part for `concat` (e.g. `data.items`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub merge_path: Option<String>,
    #[serde(default)]
    pub parts: Vec<ManifestPart>,
    #[serde(default)]
    pub total_parts: usize,
    #[serde(default)]
    pub total_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_step: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Value>,
}

impl Manifest {
    /// Create a new, empty manifest.
    pub fn create(
        execution_id: &str,
        name: &str,
        strategy: MergeStrategy,
        merge_path: Option<String>,
        source_step: Option<String>,
        correlation: Option<Value>,
    ) -> Result<Self, StorageError> {
        validate_uri_component(execution_id, "execution_id")?;
        validate_uri_component(name, "name")?;

        let id = short_id();
        let uri = format!("{URI_SCHEME}execution/{execution_id}/manifest/{name}/{id}");

        Ok(Self {
            kind: default_manifest_kind(),
            uri,
            execution_id: execution_id.to_string(),
            strategy,
            merge_path,
            parts: Vec::new(),
            total_parts: 0,
            total_bytes: 0,
            source_step,
            created_at: Utc::now(),
            completed_at: None,
            correlation,
            metadata: None,
        })
    }

    /// Append a part. Fails once the manifest has been marked complete.
    pub fn add_part(
        &mut self,
        part: Value,
        byte_size: u64,
        meta: Option<Value>,
    ) -> Result<&ManifestPart, StorageError> {
        if self.is_complete() {
            return Err(StorageError::InvalidRef(format!(
                "manifest already completed: {}",
                self.uri
            )));
        }

        let index = self.parts.len();
        self.parts.push(ManifestPart {
            part,
            index,
            byte_size,
            meta,
        });
        self.total_parts = self.parts.len();
        self.total_bytes += byte_size;
        Ok(&self.parts[index])
    }

    /// Mark the manifest complete; it is immutable afterwards.
    pub fn mark_complete(&mut self) {
        self.completed_at = Some(Utc::now());
        self.total_parts = self.parts.len();
    }

    pub fn is_complete(&self) -> bool {
        self.completed_at.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parts_are_indexed_in_append_order() {
        let mut manifest = Manifest::create(
            "exec-1",
            "pages",
            MergeStrategy::Append,
            None,
            Some("fetch".to_string()),
            None,
        )
        .unwrap();

        manifest.add_part(json!("baton://execution/exec-1/result/pages/aaa"), 10, None)
            .unwrap();
        manifest.add_part(json!("baton://execution/exec-1/result/pages/bbb"), 20, None)
            .unwrap();

        for (i, part) in manifest.parts.iter().enumerate() {
            assert_eq!(part.index, i);
        }
        assert_eq!(manifest.total_parts, 2);
        assert_eq!(manifest.total_bytes, 30);
    }

    #[test]
    fn test_completed_manifest_rejects_parts() {
        let mut manifest =
            Manifest::create("exec-1", "pages", MergeStrategy::Append, None, None, None).unwrap();
        manifest.add_part(json!([1, 2]), 2, None).unwrap();
        manifest.mark_complete();

        let err = manifest.add_part(json!([3]), 1, None).unwrap_err();
        assert!(matches!(err, StorageError::InvalidRef(_)));
    }

    #[test]
    fn test_wire_shape_uses_ref_field_name() {
        let mut manifest =
            Manifest::create("exec-1", "pages", MergeStrategy::Concat, Some("data.items".into()), None, None)
                .unwrap();
        manifest.add_part(json!({"data": {"items": [1]}}), 1, None).unwrap();

        let wire = serde_json::to_value(&manifest).unwrap();
        assert_eq!(wire["kind"], "manifest");
        assert_eq!(wire["strategy"], "concat");
        assert!(wire["parts"][0].get("ref").is_some());
    }
}
