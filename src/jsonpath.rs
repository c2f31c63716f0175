//! JSONPath extraction over raw documents
//!
//! Singular paths (`$.a.b`, `$.items[0]`) yield the selected node or nothing.
//! Paths that can select several nodes (wildcards, descendants, slices,
//! filters, unions) always yield an array of the matches.

use crate::error::{Error, Result};
use serde_json::Value;
use serde_json_path::JsonPath;

/// Evaluate `path` against `input`
pub fn query(input: &Value, path: &str) -> Result<Option<Value>> {
    let normalized = normalize(path);
    let compiled = JsonPath::parse(&normalized).map_err(|e| Error::JsonPath {
        path: path.to_string(),
        message: e.to_string(),
    })?;

    let nodes = compiled.query(input).all();
    if is_singular(&normalized) {
        Ok(nodes.first().map(|v| (*v).clone()))
    } else {
        Ok(Some(Value::Array(nodes.into_iter().cloned().collect())))
    }
}

/// Evaluate `path` and render the result as a flat string
///
/// Missing nodes and `null` render as the empty string; callers decide
/// whether empty is acceptable.
pub fn query_str(input: &Value, path: &str) -> Result<String> {
    match query(input, path)? {
        Some(value) => Ok(to_display_string(&value)),
        None => Ok(String::new()),
    }
}

/// Evaluate `path` and return the selected list
///
/// With `object_as_list` the selected node is wrapped as a one-element list
/// whatever its type. A `null` result is an empty list.
pub fn query_list(input: &Value, path: &str, object_as_list: bool) -> Result<Vec<Value>> {
    let selected = query(input, path)?.ok_or_else(|| {
        Error::Extraction(format!("no data found at path {}", path))
    })?;

    if object_as_list {
        return Ok(vec![selected]);
    }

    match selected {
        Value::Array(items) => Ok(items),
        Value::Null => Ok(Vec::new()),
        other => Err(Error::Extraction(format!(
            "data at path {} is not a list: {}",
            path,
            type_name(&other)
        ))),
    }
}

/// Render a JSON value the way findings display it:
/// lists as `[a,b]`, objects as `{k:v}`, null as empty
pub fn to_display_string(value: &Value) -> String {
    match value {
        Value::Null => String::new(),
        Value::String(s) => s.clone(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().map(to_display_string).collect();
            format!("[{}]", parts.join(","))
        }
        Value::Object(map) => {
            let parts: Vec<String> = map
                .iter()
                .map(|(k, v)| format!("{}:{}", k, to_display_string(v)))
                .collect();
            format!("{{{}}}", parts.join(","))
        }
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

/// Accept the common `$.[*]` spelling for `$[*]`; descendant `..[` is kept
fn normalize(path: &str) -> String {
    let path = path.trim();
    let mut normalized = String::with_capacity(path.len());
    let mut chars = path.chars().peekable();
    let mut prev = None;
    while let Some(c) = chars.next() {
        if c == '.' && chars.peek() == Some(&'[') && prev != Some('.') {
            prev = Some(c);
            continue;
        }
        normalized.push(c);
        prev = Some(c);
    }
    normalized
}

/// Whether `path` selects at most one node, judged outside quoted names
fn is_singular(path: &str) -> bool {
    let bare = strip_quoted(path);
    !(bare.contains('*')
        || bare.contains("..")
        || bare.contains("[?")
        || bare.contains(':')
        || bare.contains(','))
}

/// `path` with the content of quoted member names removed
fn strip_quoted(path: &str) -> String {
    let mut bare = String::with_capacity(path.len());
    let mut quote = None;
    let mut escaped = false;
    for c in path.chars() {
        match quote {
            Some(q) => {
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                    bare.push(c);
                }
            }
            None => {
                if c == '\'' || c == '"' {
                    quote = Some(c);
                }
                bare.push(c);
            }
        }
    }
    bare
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_query_root() {
        let doc = json!([]);
        assert_eq!(query(&doc, "$").unwrap(), Some(json!([])));
    }

    #[test]
    fn test_invalid_path_is_error() {
        let doc = json!([]);
        assert!(matches!(query(&doc, "invalid"), Err(Error::JsonPath { .. })));
    }

    #[test]
    fn test_query_str_scalars() {
        assert_eq!(query_str(&json!("mock"), "$").unwrap(), "mock");
        assert_eq!(query_str(&json!(1), "$").unwrap(), "1");
        assert_eq!(query_str(&json!(0.1), "$").unwrap(), "0.1");
        assert_eq!(query_str(&json!(true), "$").unwrap(), "true");
        assert_eq!(query_str(&json!(null), "$").unwrap(), "");
    }

    #[test]
    fn test_query_str_lists_and_objects() {
        assert_eq!(
            query_str(&json!(["mock1", "mock2"]), "$.[*]").unwrap(),
            "[mock1,mock2]"
        );
        assert_eq!(
            query_str(&json!(["mock", [1, 2]]), "$[*]").unwrap(),
            "[mock,[1,2]]"
        );
        assert_eq!(
            query_str(&json!({"k1": true, "k2": "v"}), "$").unwrap(),
            "{k1:true,k2:v}"
        );
    }

    #[test]
    fn test_query_str_missing_is_empty() {
        let doc = json!({"key": "value"});
        assert_eq!(query_str(&doc, "$.other").unwrap(), "");
    }

    #[test]
    fn test_query_nested_field() {
        let doc = json!({"metadata": {"name": "web", "uid": "u-1"}});
        assert_eq!(query_str(&doc, "$.metadata.uid").unwrap(), "u-1");
        assert_eq!(
            query(&doc, "$..name").unwrap(),
            Some(json!(["web"]))
        );
    }

    #[test]
    fn test_descendant_bracket_is_not_rewritten() {
        let doc = json!({"a": [1, 2]});
        assert_eq!(normalize("$..[*]"), "$..[*]");
        assert_eq!(normalize("$.[0]"), "$[0]");
        assert!(query(&doc, "$..[*]").is_ok());
    }

    #[test]
    fn test_quoted_names_stay_singular() {
        let doc = json!({"a:b": "x", "c,d": "y", "e*": "z", "f..g": "w"});
        assert_eq!(query(&doc, "$['a:b']").unwrap(), Some(json!("x")));
        assert_eq!(query(&doc, "$[\"c,d\"]").unwrap(), Some(json!("y")));
        assert_eq!(query_str(&doc, "$['e*']").unwrap(), "z");
        assert_eq!(query_str(&doc, "$['f..g']").unwrap(), "w");
        assert_eq!(query(&doc, "$['a:b','c,d']").unwrap(), Some(json!(["x", "y"])));
    }

    #[test]
    fn test_query_list() {
        assert_eq!(query_list(&json!(["mock"]), "$", false).unwrap(), vec![json!("mock")]);
        assert_eq!(query_list(&json!({}), "$", true).unwrap(), vec![json!({})]);
        assert!(query_list(&json!({}), "$", false).is_err());
    }

    #[test]
    fn test_query_list_null_is_empty_missing_is_error() {
        let doc = json!({"Buckets": null});
        assert!(query_list(&doc, "$.Buckets", false).unwrap().is_empty());
        assert!(query_list(&doc, "$.Items", false).is_err());
    }
}
