//! Manifest loading: YAML streams and inline flags into validated definitions.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use kstate_core::ObjectDefinition;
use serde::Deserialize;
use serde_json::Value as Json;

/// Payload bounds, overridable through `KSTATE_MAX_YAML_BYTES` / `KSTATE_MAX_YAML_NODES`.
#[derive(Debug, Clone, Copy)]
struct Limits {
    bytes: usize,
    nodes: usize,
}

impl Limits {
    fn from_env() -> Self {
        let env = |key: &str, default: usize| std::env::var(key).ok().and_then(|s| s.parse().ok()).unwrap_or(default);
        Self { bytes: env("KSTATE_MAX_YAML_BYTES", 1 << 20), nodes: env("KSTATE_MAX_YAML_NODES", 100_000) }
    }
}

/// Convert one YAML document to JSON, spending one unit of `budget` per node.
/// Tags are dropped; scalar mapping keys become strings.
fn yaml_to_json(value: serde_yaml::Value, budget: &mut usize) -> Result<Json> {
    use serde_yaml::Value as Yaml;

    if *budget == 0 {
        return Err(anyhow!("document too complex"));
    }
    *budget -= 1;
    Ok(match value {
        Yaml::Null => Json::Null,
        Yaml::Bool(b) => Json::Bool(b),
        Yaml::Number(n) => {
            if let Some(i) = n.as_i64() {
                Json::from(i)
            } else if let Some(u) = n.as_u64() {
                Json::from(u)
            } else {
                n.as_f64()
                    .and_then(serde_json::Number::from_f64)
                    .map(Json::Number)
                    .ok_or_else(|| anyhow!("number {} has no JSON form", n))?
            }
        }
        Yaml::String(s) => Json::String(s),
        Yaml::Sequence(items) => {
            Json::Array(items.into_iter().map(|v| yaml_to_json(v, budget)).collect::<Result<_>>()?)
        }
        Yaml::Mapping(map) => {
            let mut out = serde_json::Map::with_capacity(map.len());
            for (k, v) in map {
                let key = match k {
                    Yaml::String(s) => s,
                    Yaml::Bool(b) => b.to_string(),
                    Yaml::Number(n) => n.to_string(),
                    Yaml::Null => "null".to_string(),
                    other => return Err(anyhow!("unsupported mapping key {:?}", other)),
                };
                out.insert(key, yaml_to_json(v, budget)?);
            }
            Json::Object(out)
        }
        Yaml::Tagged(tagged) => {
            *budget += 1;
            yaml_to_json(tagged.value, budget)?
        }
    })
}

/// Parse a (multi-document) YAML stream. Empty documents are skipped; `ns_override`
/// replaces `metadata.namespace` on every definition.
pub fn load_definitions(yaml: &str, ns_override: Option<&str>) -> Result<Vec<ObjectDefinition>> {
    let limits = Limits::from_env();
    if yaml.len() > limits.bytes {
        return Err(anyhow!("YAML payload too large (>{} bytes)", limits.bytes));
    }
    let mut out = Vec::new();
    for (idx, doc) in serde_yaml::Deserializer::from_str(yaml).enumerate() {
        let val = serde_yaml::Value::deserialize(doc).with_context(|| format!("parsing YAML document #{}", idx))?;
        if val.is_null() {
            continue;
        }
        let mut budget = limits.nodes;
        let json = yaml_to_json(val, &mut budget)
            .with_context(|| format!("YAML document #{} (limit {} nodes)", idx, limits.nodes))?;
        let def = ObjectDefinition::from_value(json).with_context(|| format!("YAML document #{}", idx))?;
        out.push(match ns_override {
            Some(ns) => def.with_namespace(ns),
            None => def,
        });
    }
    Ok(out)
}

pub fn load_definitions_from_path(path: &Path, ns_override: Option<&str>) -> Result<Vec<ObjectDefinition>> {
    let yaml = std::fs::read_to_string(path)
        .with_context(|| format!("error accessing {}; does the file exist?", path.display()))?;
    load_definitions(&yaml, ns_override).with_context(|| format!("loading definitions from {}", path.display()))
}

/// Inline definition built from flags; `api_version` defaults to `v1`.
pub fn definition_from_parts(api_version: Option<&str>, kind: &str, name: &str, namespace: Option<&str>) -> Result<ObjectDefinition> {
    let mut meta = serde_json::Map::new();
    meta.insert("name".into(), Json::String(name.to_string()));
    if let Some(ns) = namespace {
        meta.insert("namespace".into(), Json::String(ns.to_string()));
    }
    let json = serde_json::json!({
        "apiVersion": api_version.unwrap_or("v1"),
        "kind": kind,
        "metadata": meta,
    });
    Ok(ObjectDefinition::from_value(json)?)
}
