//! Byte-budgeted result previews.
//!
//! A preview is a truncated rendering of a stored value, safe to embed in
//! logs and UI payloads without resolving the reference.

use serde_json::{json, Map, Value};

/// Default preview budget in serialized bytes.
pub const PREVIEW_MAX_BYTES: usize = 1024;

const PREVIEW_MAX_ENTRIES: usize = 5;
const PREVIEW_SAMPLE_ITEMS: usize = 3;
const PREVIEW_MAX_STRING: usize = 100;

/// Build a truncated preview of `data` within `max_bytes` serialized bytes.
pub fn build_preview(data: &Value, max_bytes: usize) -> Value {
    let preview = match data {
        Value::Object(map) => {
            let entries: Map<String, Value> = map
                .iter()
                .take(PREVIEW_MAX_ENTRIES)
                .map(|(k, v)| (k.clone(), truncate_value(v)))
                .collect();
            Value::Object(entries)
        }
        Value::Array(items) => {
            let sample: Vec<Value> = items
                .iter()
                .take(PREVIEW_SAMPLE_ITEMS)
                .map(truncate_value)
                .collect();
            json!({ "_items": items.len(), "_sample": sample })
        }
        other => json!({ "_value": truncate_value(other) }),
    };

    if within_budget(&preview, max_bytes) {
        return preview;
    }

    // Over budget even after truncation; degrade to a shape summary.
    match data {
        Value::Object(map) => json!({ "_keys": map.len(), "_truncated": true }),
        Value::Array(items) => json!({ "_items": items.len(), "_truncated": true }),
        _ => json!({ "_truncated": true }),
    }
}

fn within_budget(preview: &Value, max_bytes: usize) -> bool {
    serde_json::to_vec(preview)
        .map(|bytes| bytes.len() <= max_bytes)
        .unwrap_or(false)
}

fn truncate_value(value: &Value) -> Value {
    match value {
        Value::String(s) if s.len() > PREVIEW_MAX_STRING => {
            let cut = floor_char_boundary(s, PREVIEW_MAX_STRING);
            Value::String(format!("{}...", &s[..cut]))
        }
        Value::Array(items) if items.len() > PREVIEW_SAMPLE_ITEMS => {
            Value::String(format!("[{} items]", items.len()))
        }
        Value::Object(map) if map.len() > PREVIEW_SAMPLE_ITEMS => {
            Value::String(format!("{{{} keys}}", map.len()))
        }
        other => other.clone(),
    }
}

fn floor_char_boundary(s: &str, index: usize) -> usize {
    let mut index = index.min(s.len());
    while index > 0 && !s.is_char_boundary(index) {
        index -= 1;
    }
    index
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_object_preview_keeps_first_entries_truncated() {
        let data = json!({
            "status": "ok",
            "body": "x".repeat(500),
            "items": (0..20).collect::<Vec<_>>(),
        });
        let preview = build_preview(&data, PREVIEW_MAX_BYTES);

        assert_eq!(preview["status"], "ok");
        assert_eq!(preview["items"], "[20 items]");
        let body = preview["body"].as_str().unwrap();
        assert!(body.len() <= PREVIEW_MAX_STRING + 3);
        assert!(body.ends_with("..."));
    }

    #[test]
    fn test_array_preview_samples_head() {
        let data = json!([1, 2, 3, 4, 5]);
        let preview = build_preview(&data, PREVIEW_MAX_BYTES);
        assert_eq!(preview["_items"], 5);
        assert_eq!(preview["_sample"], json!([1, 2, 3]));
    }

    #[test]
    fn test_preview_respects_byte_budget() {
        let data = json!({
            "a": "x".repeat(90),
            "b": "y".repeat(90),
            "c": "z".repeat(90),
        });
        let preview = build_preview(&data, 64);
        assert_eq!(preview["_truncated"], true);
        assert!(serde_json::to_vec(&preview).unwrap().len() <= 64);
    }

    #[test]
    fn test_scalar_preview() {
        let preview = build_preview(&json!(42), PREVIEW_MAX_BYTES);
        assert_eq!(preview["_value"], 42);
    }
}
