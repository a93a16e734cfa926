//! Flattening of nested resource tables into dotted key paths.

use std::collections::BTreeMap;

use serde_json::Value;

/// Flattens a nested JSON value into dot-separated key paths.
///
/// Objects and arrays are both recursed into; array elements contribute
/// their index as a path segment, which means numeric-looking segments can
/// collide with object keys that happen to be numeric strings. String
/// leaves are kept verbatim, other scalars are rendered with `to_string`.
pub fn flatten_value(value: &Value) -> BTreeMap<String, String> {
    let mut flat = BTreeMap::new();
    flatten_into(value, "", &mut flat);
    flat
}

fn flatten_into(value: &Value, prefix: &str, flat: &mut BTreeMap<String, String>) {
    match value {
        Value::Object(map) => {
            for (key, child) in map {
                flatten_into(child, &join_segment(prefix, key), flat);
            }
        }
        Value::Array(items) => {
            for (index, child) in items.iter().enumerate() {
                flatten_into(child, &join_segment(prefix, &index.to_string()), flat);
            }
        }
        Value::String(text) => {
            flat.insert(prefix.to_string(), text.clone());
        }
        other => {
            flat.insert(prefix.to_string(), other.to_string());
        }
    }
}

fn join_segment(prefix: &str, segment: &str) -> String {
    if prefix.is_empty() {
        segment.to_string()
    } else {
        format!("{prefix}.{segment}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn flattens_nested_objects() {
        let flat = flatten_value(&json!({
            "login": { "title": "Login", "button": "Submit" }
        }));
        assert_eq!(flat.get("login.title").unwrap(), "Login");
        assert_eq!(flat.get("login.button").unwrap(), "Submit");
    }

    #[test]
    fn flattens_arrays_with_index_segments() {
        let flat = flatten_value(&json!({
            "steps": ["first", "second"]
        }));
        assert_eq!(flat.get("steps.0").unwrap(), "first");
        assert_eq!(flat.get("steps.1").unwrap(), "second");
    }

    #[test]
    fn scalars_are_stringified() {
        let flat = flatten_value(&json!({
            "count": 3,
            "enabled": true,
            "missing": null
        }));
        assert_eq!(flat.get("count").unwrap(), "3");
        assert_eq!(flat.get("enabled").unwrap(), "true");
        assert_eq!(flat.get("missing").unwrap(), "null");
    }

    #[test]
    fn deep_nesting_joins_with_dots() {
        let flat = flatten_value(&json!({
            "a": { "b": { "c": "leaf" } }
        }));
        assert_eq!(flat.get("a.b.c").unwrap(), "leaf");
        assert_eq!(flat.len(), 1);
    }
}
