//! Output-select field extraction.
//!
//! Pulls small fields out of a large result at store time so downstream
//! templates can read cheap scalars without resolving the full value.
//!
//! Default extraction rules:
//! - scalar fields (strings, numbers, booleans)
//! - small arrays (<= 10 items of small values)
//! - common metadata fields (status, id, count, error, ...) always included
//! - nested objects flattened up to depth 2 with a `parent_key` prefix
//!
//! Explicit paths override the defaults: `["status", "data.id",
//! "data.items[0].name"]`.

use serde_json::{Map, Value};

/// Fields to always extract when present.
const DEFAULT_EXTRACT_FIELDS: [&str; 13] = [
    "status", "id", "error", "message", "code", "count", "total", "success", "failed", "name",
    "type", "kind", "state",
];

const SMALL_ARRAY_MAX_ITEMS: usize = 10;
const MAX_EXTRACT_DEPTH: usize = 2;
const DEFAULT_MAX_STRING_LEN: usize = 500;

/// Extract small fields from result data for templating.
///
/// With `select_paths`, only the named dotted paths are extracted, keyed by
/// their last segment. Without, fields are auto-selected by size and the
/// default field list.
pub fn extract_output_select(data: &Value, select_paths: Option<&[String]>) -> Map<String, Value> {
    if data.is_null() {
        return Map::new();
    }

    match select_paths {
        Some(paths) => extract_explicit_paths(data, paths, DEFAULT_MAX_STRING_LEN),
        None => auto_extract(data, DEFAULT_MAX_STRING_LEN, 0),
    }
}

fn extract_explicit_paths(
    data: &Value,
    paths: &[String],
    max_string_len: usize,
) -> Map<String, Value> {
    let mut out = Map::new();
    for path in paths {
        if let Some(value) = value_at_path(data, path) {
            let key = path
                .rsplit('.')
                .next()
                .unwrap_or(path)
                .split('[')
                .next()
                .unwrap_or(path);
            out.insert(key.to_string(), truncate(value, max_string_len));
        }
    }
    out
}

/// Get the value at a dotted path, supporting `key[idx]` array indexing.
pub fn value_at_path<'a>(data: &'a Value, path: &str) -> Option<&'a Value> {
    let path = path.strip_prefix("$.").unwrap_or(path);
    let mut current = data;

    for part in path.split('.') {
        let part = part.trim_end_matches(']');
        if let Some((key, index)) = part.split_once('[') {
            if !key.is_empty() {
                current = current.as_object()?.get(key)?;
            }
            let index: usize = index.parse().ok()?;
            current = current.as_array()?.get(index)?;
        } else if let Some(map) = current.as_object() {
            current = map.get(part)?;
        } else if let Some(items) = current.as_array() {
            let index: usize = part.parse().ok()?;
            current = items.get(index)?;
        } else {
            return None;
        }
    }

    Some(current)
}

fn auto_extract(data: &Value, max_string_len: usize, depth: usize) -> Map<String, Value> {
    let mut out = Map::new();

    let Some(map) = data.as_object() else {
        if is_small(data) {
            out.insert("_value".to_string(), truncate(data, max_string_len));
        } else if let Some(items) = data.as_array() {
            out.insert("_count".to_string(), Value::from(items.len()));
            if items.len() <= SMALL_ARRAY_MAX_ITEMS {
                out.insert("_sample".to_string(), Value::Array(items.iter().take(3).cloned().collect()));
            }
        }
        return out;
    };

    for (key, value) in map {
        if DEFAULT_EXTRACT_FIELDS.contains(&key.as_str()) {
            out.insert(key.clone(), truncate(value, max_string_len));
            continue;
        }

        if is_small(value) {
            out.insert(key.clone(), truncate(value, max_string_len));
        } else if let Some(items) = value.as_array() {
            if items.len() <= SMALL_ARRAY_MAX_ITEMS && items.iter().all(is_small) {
                out.insert(key.clone(), value.clone());
            } else {
                out.insert(format!("{key}_count"), Value::from(items.len()));
            }
        } else if value.is_object() && depth < MAX_EXTRACT_DEPTH {
            for (nested_key, nested_value) in auto_extract(value, max_string_len, depth + 1) {
                if !nested_key.starts_with('_') {
                    out.insert(format!("{key}_{nested_key}"), nested_value);
                }
            }
        }
    }

    out
}

fn is_small(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(_) | Value::Number(_) => true,
        Value::String(s) => s.len() <= 1000,
        _ => false,
    }
}

fn truncate(value: &Value, max_len: usize) -> Value {
    match value {
        Value::String(s) if s.len() > max_len => {
            let mut cut = max_len.min(s.len());
            while cut > 0 && !s.is_char_boundary(cut) {
                cut -= 1;
            }
            Value::String(format!("{}...", &s[..cut]))
        }
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_explicit_paths_key_by_last_segment() {
        let data = json!({
            "status": "ok",
            "data": {"id": 7, "items": [{"name": "first"}, {"name": "second"}]},
        });
        let paths = vec![
            "status".to_string(),
            "data.id".to_string(),
            "data.items[0].name".to_string(),
        ];
        let extracted = extract_output_select(&data, Some(&paths));

        assert_eq!(extracted["status"], "ok");
        assert_eq!(extracted["id"], 7);
        assert_eq!(extracted["name"], "first");
    }

    #[test]
    fn test_missing_path_is_skipped() {
        let data = json!({"a": 1});
        let paths = vec!["a".to_string(), "b.c".to_string()];
        let extracted = extract_output_select(&data, Some(&paths));
        assert_eq!(extracted.len(), 1);
        assert_eq!(extracted["a"], 1);
    }

    #[test]
    fn test_auto_extract_keeps_scalars_and_counts_large_arrays() {
        let data = json!({
            "status": "ok",
            "count": 2,
            "rows": (0..50).collect::<Vec<_>>(),
            "note": "small",
        });
        let extracted = extract_output_select(&data, None);

        assert_eq!(extracted["status"], "ok");
        assert_eq!(extracted["count"], 2);
        assert_eq!(extracted["note"], "small");
        assert_eq!(extracted["rows_count"], 50);
        assert!(extracted.get("rows").is_none());
    }

    #[test]
    fn test_auto_extract_flattens_nested_objects() {
        let data = json!({"result": {"id": 3, "status": "done"}});
        let extracted = extract_output_select(&data, None);
        assert_eq!(extracted["result_id"], 3);
        assert_eq!(extracted["result_status"], "done");
    }

    #[test]
    fn test_value_at_path_with_dollar_prefix() {
        let data = json!({"data": {"items": [10, 20]}});
        assert_eq!(value_at_path(&data, "$.data.items[1]"), Some(&json!(20)));
    }
}
