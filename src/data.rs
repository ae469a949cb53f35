//! Structured data: YAML loading, dotted lookup, and deep merge.
//!
//! All pod data (podspec, blueprints, front matter) is held as
//! [`serde_json::Value`] once parsed, so the template engine, the untagger,
//! and the path formatter share one representation.
//!
//! # YAML tags
//!
//! Content files may reference other pod files through custom tags:
//!
//! | Tag | Result |
//! |-----|--------|
//! | `!g.yaml /data/x.yaml` | the parsed file |
//! | `!g.yaml /data/x.yaml?a.b` | the value at `a.b` in the parsed file |
//! | `!g.doc /content/pages/a.yaml` | the pod path, recorded as a reference |
//! | `!g.static /static/logo.png` | the pod path, recorded as a reference |
//! | `!g.string menu.title` | `title` from `/content/strings/menu.yaml` |
//!
//! Unknown tags resolve to their untagged value.

use crate::storage::{Storage, StorageError};
use serde_json::{Map, Value};
use serde_yaml_ng::Value as Yaml;
use thiserror::Error;

/// Nesting limit for `!g.yaml` includes; a cycle hits it quickly.
const MAX_INCLUDE_DEPTH: usize = 8;

#[derive(Error, Debug)]
pub enum DataError {
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
    #[error("YAML error in {path}: {source}")]
    Yaml {
        path: String,
        source: serde_yaml_ng::Error,
    },
    #[error("Include depth exceeded while loading {0}")]
    IncludeDepth(String),
}

/// Parsed YAML plus the pod paths it referenced through tags.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct LoadedYaml {
    pub value: Value,
    pub references: Vec<String>,
}

/// Parse YAML text belonging to `pod_path`, resolving `!g.*` tags.
pub fn load_yaml(
    storage: &dyn Storage,
    pod_path: &str,
    source: &str,
) -> Result<LoadedYaml, DataError> {
    let mut loaded = LoadedYaml::default();
    loaded.value = parse(storage, pod_path, source, &mut loaded.references, 0)?;
    Ok(loaded)
}

/// Read and parse a YAML file from storage.
pub fn load_yaml_file(storage: &dyn Storage, pod_path: &str) -> Result<LoadedYaml, DataError> {
    let source = storage.read_to_string(pod_path)?;
    load_yaml(storage, pod_path, &source)
}

/// Parse YAML without tag resolution against storage. Tagged values keep
/// their inner value.
pub fn parse_plain(pod_path: &str, source: &str) -> Result<Value, DataError> {
    if source.trim().is_empty() {
        return Ok(Value::Null);
    }
    let yaml: Yaml = serde_yaml_ng::from_str(source).map_err(|source| DataError::Yaml {
        path: pod_path.to_string(),
        source,
    })?;
    Ok(convert_plain(yaml))
}

fn parse(
    storage: &dyn Storage,
    pod_path: &str,
    source: &str,
    references: &mut Vec<String>,
    depth: usize,
) -> Result<Value, DataError> {
    if depth > MAX_INCLUDE_DEPTH {
        return Err(DataError::IncludeDepth(pod_path.to_string()));
    }
    if source.trim().is_empty() {
        return Ok(Value::Null);
    }
    let yaml: Yaml = serde_yaml_ng::from_str(source).map_err(|source| DataError::Yaml {
        path: pod_path.to_string(),
        source,
    })?;
    convert(storage, yaml, references, depth)
}

fn convert(
    storage: &dyn Storage,
    yaml: Yaml,
    references: &mut Vec<String>,
    depth: usize,
) -> Result<Value, DataError> {
    Ok(match yaml {
        Yaml::Sequence(items) => Value::Array(
            items
                .into_iter()
                .map(|item| convert(storage, item, references, depth))
                .collect::<Result<_, _>>()?,
        ),
        Yaml::Mapping(mapping) => {
            let mut map = Map::new();
            for (key, value) in mapping {
                map.insert(key_string(&key), convert(storage, value, references, depth)?);
            }
            Value::Object(map)
        }
        Yaml::Tagged(tagged) => {
            let tag = tagged.tag.to_string();
            let inner = convert_plain(tagged.value);
            resolve_tag(storage, tag.trim_start_matches('!'), inner, references, depth)?
        }
        scalar => convert_plain(scalar),
    })
}

fn resolve_tag(
    storage: &dyn Storage,
    tag: &str,
    inner: Value,
    references: &mut Vec<String>,
    depth: usize,
) -> Result<Value, DataError> {
    let Some(arg) = inner.as_str().map(str::to_string) else {
        return Ok(inner);
    };
    match tag {
        "g.doc" | "g.static" => {
            references.push(arg.clone());
            Ok(Value::String(arg))
        }
        "g.yaml" => {
            let (path, key) = match arg.split_once('?') {
                Some((path, key)) => (path.to_string(), Some(key.to_string())),
                None => (arg, None),
            };
            references.push(path.clone());
            let source = storage.read_to_string(&path)?;
            let value = parse(storage, &path, &source, references, depth + 1)?;
            Ok(match key {
                Some(key) => lookup(&value, &key).cloned().unwrap_or(Value::Null),
                None => value,
            })
        }
        "g.string" => {
            let Some((file, key)) = arg.split_once('.') else {
                return Ok(Value::Null);
            };
            let path = format!("/content/strings/{file}.yaml");
            references.push(path.clone());
            let source = storage.read_to_string(&path)?;
            let value = parse(storage, &path, &source, references, depth + 1)?;
            Ok(lookup(&value, key).cloned().unwrap_or(Value::Null))
        }
        _ => Ok(Value::String(arg)),
    }
}

fn key_string(key: &Yaml) -> String {
    match key {
        Yaml::String(s) => s.clone(),
        Yaml::Bool(b) => b.to_string(),
        Yaml::Number(n) => n.to_string(),
        Yaml::Null => "null".to_string(),
        other => serde_yaml_ng::to_string(other)
            .map(|s| s.trim().to_string())
            .unwrap_or_default(),
    }
}

fn convert_plain(yaml: Yaml) -> Value {
    match yaml {
        Yaml::Null => Value::Null,
        Yaml::Bool(b) => Value::Bool(b),
        Yaml::Number(n) => {
            if let Some(i) = n.as_i64() {
                Value::from(i)
            } else if let Some(u) = n.as_u64() {
                Value::from(u)
            } else {
                n.as_f64()
                    .and_then(serde_json::Number::from_f64)
                    .map(Value::Number)
                    .unwrap_or(Value::Null)
            }
        }
        Yaml::String(s) => Value::String(s),
        Yaml::Sequence(items) => Value::Array(items.into_iter().map(convert_plain).collect()),
        Yaml::Mapping(mapping) => Value::Object(
            mapping
                .into_iter()
                .map(|(k, v)| (key_string(&k), convert_plain(v)))
                .collect(),
        ),
        Yaml::Tagged(tagged) => convert_plain(tagged.value),
    }
}

// ============================================================================
// Value helpers
// ============================================================================

/// Look up a dotted key path (`a.b.c`) in nested objects. Numeric segments
/// index into arrays.
pub fn lookup<'a>(value: &'a Value, key_path: &str) -> Option<&'a Value> {
    let mut current = value;
    for segment in key_path.split('.').filter(|s| !s.is_empty()) {
        current = match current {
            Value::Object(map) => map.get(segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Recursively merge `overlay` on top of `base`.
///
/// - Objects are merged key-by-key (overlay keys override base keys).
/// - Scalars and arrays in overlay replace base values entirely.
/// - Keys in base that are not in overlay are preserved.
pub fn deep_merge(base: Value, overlay: Value) -> Value {
    match (base, overlay) {
        (Value::Object(mut base_map), Value::Object(overlay_map)) => {
            for (key, overlay_val) in overlay_map {
                let merged = match base_map.remove(&key) {
                    Some(base_val) => deep_merge(base_val, overlay_val),
                    None => overlay_val,
                };
                base_map.insert(key, merged);
            }
            Value::Object(base_map)
        }
        (_, overlay) => overlay,
    }
}

/// Convert a scalar value to its display string; objects and arrays yield
/// `None`.
pub fn scalar_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::LocalStorage;
    use serde_json::json;
    use tempfile::TempDir;

    #[test]
    fn parse_plain_mapping() {
        let value = parse_plain("/a.yaml", "title: Hello\ncount: 3\ntags: [a, b]\n").unwrap();
        assert_eq!(value, json!({"title": "Hello", "count": 3, "tags": ["a", "b"]}));
    }

    #[test]
    fn empty_source_is_null() {
        assert_eq!(parse_plain("/a.yaml", "  \n").unwrap(), Value::Null);
    }

    #[test]
    fn bad_yaml_names_the_file() {
        let err = parse_plain("/content/bad.yaml", "a: [unclosed").unwrap_err();
        assert!(err.to_string().contains("/content/bad.yaml"));
    }

    #[test]
    fn doc_tag_records_reference() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        let loaded = load_yaml(&storage, "/a.yaml", "link: !g.doc /content/pages/b.yaml\n").unwrap();
        assert_eq!(loaded.value["link"], "/content/pages/b.yaml");
        assert_eq!(loaded.references, vec!["/content/pages/b.yaml"]);
    }

    #[test]
    fn yaml_tag_includes_file_and_key() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        storage.write("/data/nav.yaml", b"items:\n  home: Home\n").unwrap();

        let loaded = load_yaml(
            &storage,
            "/a.yaml",
            "nav: !g.yaml /data/nav.yaml\nhome: !g.yaml /data/nav.yaml?items.home\n",
        )
        .unwrap();
        assert_eq!(loaded.value["nav"], json!({"items": {"home": "Home"}}));
        assert_eq!(loaded.value["home"], "Home");
    }

    #[test]
    fn self_include_hits_depth_limit() {
        let tmp = TempDir::new().unwrap();
        let storage = LocalStorage::new(tmp.path());
        storage.write("/loop.yaml", b"again: !g.yaml /loop.yaml\n").unwrap();
        let err = load_yaml_file(&storage, "/loop.yaml").unwrap_err();
        assert!(matches!(err, DataError::IncludeDepth(_)));
    }

    #[test]
    fn lookup_dotted_paths() {
        let value = json!({"a": {"b": [10, {"c": "deep"}]}});
        assert_eq!(lookup(&value, "a.b.1.c"), Some(&json!("deep")));
        assert_eq!(lookup(&value, "a.missing"), None);
    }

    #[test]
    fn deep_merge_objects_and_replaces_leaves() {
        let base = json!({"a": {"x": 1, "y": 2}, "list": [1, 2], "keep": true});
        let overlay = json!({"a": {"y": 3}, "list": [9]});
        assert_eq!(
            deep_merge(base, overlay),
            json!({"a": {"x": 1, "y": 3}, "list": [9], "keep": true})
        );
    }
}
