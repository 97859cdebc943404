//! Recording metadata validation
//!
//! Metadata travels with a recording to the remote service, which only
//! accepts a known schema. Known keys are checked and normalized here before
//! any bytes are transferred; unknown keys are dropped unless they carry the
//! `x-` extension prefix.

use crate::types::Metadata;
use crate::{Error, Result};
use serde_json::{Map, Value};
use tracing::debug;

const TEST_RESULTS: &[&str] = &["passed", "failed", "timedOut", "skipped", "unknown"];

/// Validate and normalize metadata for upload.
pub fn sanitize(metadata: &Metadata) -> Result<Metadata> {
    let mut out = Metadata::new();

    for (key, value) in metadata {
        let normalized = match key.as_str() {
            "title" | "uri" => Value::String(expect_string(key, value)?),
            "source" => validate_source(value)?,
            "test" => validate_test(value)?,
            _ if key.starts_with("x-") => value.clone(),
            _ => {
                debug!("Dropping unsupported metadata key '{}'", key);
                continue;
            }
        };
        out.insert(key.clone(), normalized);
    }

    Ok(out)
}

/// Title to use when a recording's metadata does not provide one.
pub fn default_title(metadata: &Metadata) -> Option<String> {
    if let Some(uri) = metadata.get("uri").and_then(Value::as_str) {
        let host = host_of(uri).unwrap_or(uri);
        return Some(format!("Replay of {}", host));
    }

    let argv = metadata.get("argv").and_then(Value::as_array)?;
    let script = argv.get(1).or_else(|| argv.first())?.as_str()?;
    let name = std::path::Path::new(script)
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or(script);
    Some(format!("Replay of {}", name))
}

fn host_of(uri: &str) -> Option<&str> {
    let (_, rest) = uri.split_once("://")?;
    let authority = rest.split(['/', '?', '#']).next()?;
    let host = authority.rsplit('@').next()?;
    let host = host.split(':').next()?;
    (!host.is_empty()).then_some(host)
}

fn expect_string(key: &str, value: &Value) -> Result<String> {
    value
        .as_str()
        .map(str::to_string)
        .ok_or_else(|| Error::validation(key, "expected a string"))
}

fn expect_object<'a>(key: &str, value: &'a Value) -> Result<&'a Map<String, Value>> {
    value
        .as_object()
        .ok_or_else(|| Error::validation(key, "expected an object"))
}

fn copy_optional_strings(
    prefix: &str,
    from: &Map<String, Value>,
    to: &mut Map<String, Value>,
    keys: &[&str],
) -> Result<()> {
    for key in keys {
        if let Some(value) = from.get(*key).filter(|v| !v.is_null()) {
            let s = expect_string(&format!("{}.{}", prefix, key), value)?;
            to.insert(key.to_string(), Value::String(s));
        }
    }
    Ok(())
}

/// `{id, title?}` objects used for commits and merge requests.
fn validate_ref(key: &str, value: &Value) -> Result<Value> {
    let obj = expect_object(key, value)?;
    let id = obj
        .get("id")
        .ok_or_else(|| Error::validation(key, "missing 'id'"))?;

    let mut out = Map::new();
    out.insert("id".to_string(), Value::String(expect_string(&format!("{}.id", key), id)?));
    copy_optional_strings(key, obj, &mut out, &["title"])?;
    Ok(Value::Object(out))
}

fn validate_source(value: &Value) -> Result<Value> {
    let obj = expect_object("source", value)?;
    let mut out = Map::new();

    copy_optional_strings("source", obj, &mut out, &["branch", "trigger", "provider", "repository"])?;

    if let Some(commit) = obj.get("commit").filter(|v| !v.is_null()) {
        out.insert("commit".to_string(), validate_ref("source.commit", commit)?);
    }
    if let Some(merge) = obj.get("merge").filter(|v| !v.is_null()) {
        out.insert("merge".to_string(), validate_ref("source.merge", merge)?);
    }

    Ok(Value::Object(out))
}

fn validate_test(value: &Value) -> Result<Value> {
    let obj = expect_object("test", value)?;
    let mut out = Map::new();

    let title = obj
        .get("title")
        .ok_or_else(|| Error::validation("test", "missing 'title'"))?;
    out.insert("title".to_string(), Value::String(expect_string("test.title", title)?));

    let result = match obj.get("result").filter(|v| !v.is_null()) {
        Some(result) => {
            let result = expect_string("test.result", result)?;
            if !TEST_RESULTS.contains(&result.as_str()) {
                return Err(Error::validation(
                    "test.result",
                    format!("'{}' is not one of {}", result, TEST_RESULTS.join(", ")),
                ));
            }
            result
        }
        None => "unknown".to_string(),
    };
    out.insert("result".to_string(), Value::String(result));

    copy_optional_strings("test", obj, &mut out, &["file"])?;

    if let Some(path) = obj.get("path").filter(|v| !v.is_null()) {
        let parts = path
            .as_array()
            .ok_or_else(|| Error::validation("test.path", "expected an array of strings"))?;
        let parts = parts
            .iter()
            .map(|p| expect_string("test.path", p).map(Value::String))
            .collect::<Result<Vec<_>>>()?;
        out.insert("path".to_string(), Value::Array(parts));
    }

    if let Some(runner) = obj.get("runner").filter(|v| !v.is_null()) {
        let runner_obj = expect_object("test.runner", runner)?;
        let mut normalized = Map::new();
        copy_optional_strings("test.runner", runner_obj, &mut normalized, &["name", "version"])?;
        out.insert("runner".to_string(), Value::Object(normalized));
    }

    Ok(Value::Object(out))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn meta(value: Value) -> Metadata {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_sanitize_keeps_known_and_extension_keys() {
        let input = meta(json!({
            "title": "checkout flow",
            "x-team": {"name": "web"},
            "random": 1,
            "source": {"branch": "main", "commit": {"id": "abc123"}},
        }));

        let out = sanitize(&input).unwrap();
        assert_eq!(out["title"], "checkout flow");
        assert_eq!(out["x-team"]["name"], "web");
        assert!(!out.contains_key("random"));
        assert_eq!(out["source"]["commit"]["id"], "abc123");
    }

    #[test]
    fn test_test_result_defaults_to_unknown() {
        let out = sanitize(&meta(json!({"test": {"title": "logs in"}}))).unwrap();
        assert_eq!(out["test"]["result"], "unknown");
    }

    #[test]
    fn test_invalid_metadata_is_rejected() {
        let err = sanitize(&meta(json!({"title": 42}))).unwrap_err();
        assert!(matches!(err, Error::Validation { ref key, .. } if key == "title"));

        let err = sanitize(&meta(json!({"test": {"title": "t", "result": "exploded"}}))).unwrap_err();
        assert!(matches!(err, Error::Validation { ref key, .. } if key == "test.result"));

        let err = sanitize(&meta(json!({"source": {"commit": {"title": "no id"}}}))).unwrap_err();
        assert!(matches!(err, Error::Validation { ref key, .. } if key == "source.commit"));
    }

    #[test]
    fn test_default_title() {
        let m = meta(json!({"uri": "https://user@shop.example.com:8443/cart?x=1"}));
        assert_eq!(default_title(&m).as_deref(), Some("Replay of shop.example.com"));

        let m = meta(json!({"argv": ["/usr/bin/node", "/srv/app/server.js"]}));
        assert_eq!(default_title(&m).as_deref(), Some("Replay of server.js"));

        assert_eq!(default_title(&Metadata::new()), None);
    }
}
