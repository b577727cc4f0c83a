//! kstate core types: resource identity, desired definitions, outcomes and field changes.

#![forbid(unsafe_code)]

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};
use smallvec::SmallVec;

mod client;
mod error;

pub use client::{Fetched, ListSelectors, ResourceHandle, ResourceResolver};
pub use error::{BatchError, ClientError, DefinitionError, ObjectFailure, Operation, ReconcileError};

pub mod prelude {
    pub use super::{
        ActionOutcome, BatchOutcome, BatchPolicy, DesiredState, FieldChange, FieldPath, Method, ObjectDefinition,
        PathSegment, ReconcileRequest, ResourceIdentity, ResourceShape,
    };
    pub use super::{ClientError, Fetched, ListSelectors, ReconcileError, ResourceHandle, ResourceResolver};
}

/// Kind suffix marking a collection type (`ConfigMapList`).
pub const LIST_SUFFIX: &str = "List";

/// Top-level keys that steer an invocation but never belong in the payload.
pub const OPERATIONAL_KEYS: [&str; 2] = ["state", "force"];

/// Whether a kind names single objects or a collection of them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum ResourceShape {
    Single,
    List,
}

/// apiVersion + kind of a definition, normalized once.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct ResourceIdentity {
    api_version: String,
    kind: String,
    shape: ResourceShape,
}

impl ResourceIdentity {
    pub fn new(api_version: &str, kind: &str) -> Result<Self, DefinitionError> {
        let api_version = api_version.trim();
        let kind = kind.trim();
        if api_version.is_empty() {
            return Err(DefinitionError::MissingField("apiVersion"));
        }
        if kind.is_empty() {
            return Err(DefinitionError::MissingField("kind"));
        }
        let shape = match kind.strip_suffix(LIST_SUFFIX) {
            Some(item) if !item.is_empty() => ResourceShape::List,
            _ => ResourceShape::Single,
        };
        Ok(Self { api_version: api_version.to_string(), kind: kind.to_string(), shape })
    }

    pub fn api_version(&self) -> &str { &self.api_version }
    pub fn kind(&self) -> &str { &self.kind }
    pub fn shape(&self) -> ResourceShape { self.shape }
    pub fn is_list(&self) -> bool { self.shape == ResourceShape::List }

    /// Kind to resolve against the cluster: `ConfigMapList` resolves as `ConfigMap`.
    pub fn item_kind(&self) -> &str {
        match self.shape {
            ResourceShape::List => &self.kind[..self.kind.len() - LIST_SUFFIX.len()],
            ResourceShape::Single => &self.kind,
        }
    }

    /// API group; empty for the core group (`v1`).
    pub fn group(&self) -> &str {
        self.api_version.split_once('/').map(|(g, _)| g).unwrap_or("")
    }

    pub fn version(&self) -> &str {
        self.api_version.split_once('/').map(|(_, v)| v).unwrap_or(&self.api_version)
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.api_version, self.kind)
    }
}

/// A desired object as supplied by the caller.
///
/// The body is kept as an untyped JSON tree so diffing stays generic over every kind.
/// Construction validates `apiVersion`, `kind` and (for non-list kinds) `metadata.name`,
/// and strips [`OPERATIONAL_KEYS`]; the body is not touched afterwards.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ObjectDefinition {
    #[serde(skip)]
    identity: ResourceIdentity,
    #[serde(skip)]
    name: String,
    #[serde(skip)]
    namespace: Option<String>,
    #[serde(flatten)]
    body: Map<String, Json>,
}

impl ObjectDefinition {
    pub fn from_value(body: Json) -> Result<Self, DefinitionError> {
        let Json::Object(mut body) = body else {
            return Err(DefinitionError::NotAMapping);
        };
        for key in OPERATIONAL_KEYS {
            body.remove(key);
        }
        let api_version = body.get("apiVersion").and_then(Json::as_str).unwrap_or_default();
        let kind = body.get("kind").and_then(Json::as_str).unwrap_or_default();
        let identity = ResourceIdentity::new(api_version, kind)?;

        let meta = body.get("metadata");
        let name = meta
            .and_then(|m| m.get("name"))
            .and_then(Json::as_str)
            .map(str::trim)
            .unwrap_or_default()
            .to_string();
        if name.is_empty() && !identity.is_list() {
            return Err(DefinitionError::MissingField("metadata.name"));
        }
        let namespace = meta
            .and_then(|m| m.get("namespace"))
            .and_then(Json::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string);

        // the payload carries the same name and namespace the lookups use
        if let Some(meta) = body.get_mut("metadata").and_then(Json::as_object_mut) {
            if meta.contains_key("name") && !name.is_empty() {
                meta.insert("name".into(), Json::String(name.clone()));
            }
            if let Some(ns) = &namespace {
                meta.insert("namespace".into(), Json::String(ns.clone()));
            }
        }

        Ok(Self { identity, name, namespace, body })
    }

    /// Force `metadata.namespace`, e.g. from a command line override.
    pub fn with_namespace(mut self, namespace: &str) -> Self {
        let meta = self.body.entry("metadata").or_insert_with(|| Json::Object(Map::new()));
        if let Some(meta) = meta.as_object_mut() {
            meta.insert("namespace".into(), Json::String(namespace.to_string()));
        }
        self.namespace = Some(namespace.to_string());
        self
    }

    pub fn identity(&self) -> &ResourceIdentity { &self.identity }

    /// `metadata.name`; empty only for list kinds.
    pub fn name(&self) -> &str { &self.name }

    pub fn namespace(&self) -> Option<&str> { self.namespace.as_deref() }

    pub fn body(&self) -> &Map<String, Json> { &self.body }

    pub fn to_value(&self) -> Json { Json::Object(self.body.clone()) }

    pub fn into_value(self) -> Json { Json::Object(self.body) }
}

impl TryFrom<Json> for ObjectDefinition {
    type Error = DefinitionError;

    fn try_from(value: Json) -> Result<Self, Self::Error> {
        Self::from_value(value)
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum DesiredState {
    #[default]
    Present,
    Absent,
}

/// What the caller wants done with each definition.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReconcileRequest {
    pub state: DesiredState,
    /// Replace existing objects wholesale instead of merge-patching them.
    pub force: bool,
    /// Report what would happen without issuing mutations.
    pub dry_run: bool,
}

/// What a batch does after a fatal per-object error.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum BatchPolicy {
    #[default]
    Abort,
    Continue,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Method {
    None,
    Get,
    Create,
    Replace,
    Patch,
    Delete,
}

impl fmt::Display for Method {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Method::None => "none",
            Method::Get => "get",
            Method::Create => "create",
            Method::Replace => "replace",
            Method::Patch => "patch",
            Method::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// One step into a JSON tree: a mapping key or a sequence position.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathSegment {
    Key(String),
    Index(usize),
}

impl From<&str> for PathSegment {
    fn from(v: &str) -> Self { PathSegment::Key(v.to_string()) }
}

impl From<usize> for PathSegment {
    fn from(v: usize) -> Self { PathSegment::Index(v) }
}

pub type FieldPath = SmallVec<[PathSegment; 6]>;

/// A single leaf divergence between the live object and the desired one.
///
/// `old: None` means the live object has nothing at `path`; `new: None` means the
/// desired value has nothing there either (a shorter sequence, or a key only the live
/// value carries inside a sequence element).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FieldChange {
    pub path: FieldPath,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<Json>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub new: Option<Json>,
}

impl FieldChange {
    /// Dotted rendering, e.g. `spec.containers[0].image`.
    pub fn path_string(&self) -> String {
        let mut out = String::new();
        for seg in &self.path {
            match seg {
                PathSegment::Key(k) => {
                    if !out.is_empty() { out.push('.'); }
                    out.push_str(k);
                }
                PathSegment::Index(i) => {
                    out.push('[');
                    out.push_str(&i.to_string());
                    out.push(']');
                }
            }
        }
        out
    }
}

/// Result of reconciling one definition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ActionOutcome {
    pub changed: bool,
    pub method: Method,
    pub result: Json,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff: Option<Vec<FieldChange>>,
}

impl ActionOutcome {
    pub fn unchanged(method: Method, result: Json) -> Self {
        Self { changed: false, method, result, diff: None }
    }

    pub fn changed(method: Method, result: Json) -> Self {
        Self { changed: true, method, result, diff: None }
    }

    pub fn with_diff(mut self, diff: Vec<FieldChange>) -> Self {
        self.diff = Some(diff);
        self
    }
}

/// Body reported for no-op or suppressed mutations.
pub fn empty_body() -> Json { Json::Object(Map::new()) }

/// Aggregate over a batch. A lone successful outcome is reported bare.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum BatchOutcome {
    Single(ActionOutcome),
    Many { changed: bool, result: BatchResults },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchResults {
    pub results: Vec<ActionOutcome>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<ObjectFailure>,
}

impl BatchOutcome {
    pub fn from_parts(mut results: Vec<ActionOutcome>, failures: Vec<ObjectFailure>) -> Self {
        if results.len() == 1 && failures.is_empty() {
            if let Some(only) = results.pop() {
                return BatchOutcome::Single(only);
            }
        }
        let changed = results.iter().any(|o| o.changed);
        BatchOutcome::Many { changed, result: BatchResults { results, failures } }
    }

    pub fn changed(&self) -> bool {
        match self {
            BatchOutcome::Single(o) => o.changed,
            BatchOutcome::Many { changed, .. } => *changed,
        }
    }

    pub fn outcomes(&self) -> &[ActionOutcome] {
        match self {
            BatchOutcome::Single(o) => std::slice::from_ref(o),
            BatchOutcome::Many { result, .. } => &result.results,
        }
    }

    pub fn failures(&self) -> &[ObjectFailure] {
        match self {
            BatchOutcome::Single(_) => &[],
            BatchOutcome::Many { result, .. } => &result.failures,
        }
    }
}
