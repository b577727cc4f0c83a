//! In-memory cluster standing in for the kube client in tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};

use kstate_core::{ClientError, Fetched, ListSelectors, ObjectDefinition, ResourceHandle, ResourceIdentity, ResourceResolver};
use serde_json::{json, Value as Json};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Call {
    Get,
    List,
    Create,
    Replace,
    Update,
    Delete,
}

impl Call {
    pub fn is_mutation(self) -> bool {
        matches!(self, Call::Create | Call::Replace | Call::Update | Call::Delete)
    }
}

type Key = (String, String, String); // kind, namespace, name

#[derive(Default)]
struct State {
    objects: BTreeMap<Key, Json>,
    calls: Vec<Call>,
    unknown_kinds: HashSet<String>,
    failures: HashMap<Call, u16>,
    next_rv: u64,
}

impl State {
    fn stamp(&mut self, mut obj: Json) -> Json {
        self.next_rv += 1;
        if let Some(meta) = obj.get_mut("metadata").and_then(Json::as_object_mut) {
            meta.entry("uid").or_insert_with(|| json!(format!("uid-{}", self.next_rv)));
            meta.insert("resourceVersion".into(), json!(self.next_rv.to_string()));
        }
        obj
    }
}

#[derive(Clone, Default)]
pub struct FakeCluster {
    state: Arc<Mutex<State>>,
}

impl FakeCluster {
    pub fn new() -> Self { Self::default() }

    /// Seed a live object; server-owned metadata is added like the API would.
    pub fn with_object(self, obj: Json) -> Self {
        {
            let mut st = self.state.lock().unwrap();
            let key = key_of(&obj);
            let stamped = st.stamp(obj);
            st.objects.insert(key, stamped);
        }
        self
    }

    pub fn with_unknown_kind(self, kind: &str) -> Self {
        self.state.lock().unwrap().unknown_kinds.insert(kind.to_string());
        self
    }

    /// Make every `call` answer with HTTP `code`.
    pub fn failing(self, call: Call, code: u16) -> Self {
        self.state.lock().unwrap().failures.insert(call, code);
        self
    }

    pub fn calls(&self) -> Vec<Call> { self.state.lock().unwrap().calls.clone() }

    pub fn mutations(&self) -> usize { self.calls().into_iter().filter(|c| c.is_mutation()).count() }

    pub fn object(&self, kind: &str, namespace: Option<&str>, name: &str) -> Option<Json> {
        let key = (kind.to_string(), namespace.unwrap_or_default().to_string(), name.to_string());
        self.state.lock().unwrap().objects.get(&key).cloned()
    }

    /// Mutate a live object behind the reconciler's back.
    pub fn edit(&self, kind: &str, namespace: Option<&str>, name: &str, f: impl FnOnce(&mut Json)) {
        let key = (kind.to_string(), namespace.unwrap_or_default().to_string(), name.to_string());
        if let Some(obj) = self.state.lock().unwrap().objects.get_mut(&key) {
            f(obj);
        }
    }
}

pub struct FakeHandle {
    kind: String,
    state: Arc<Mutex<State>>,
}

impl FakeHandle {
    fn record(&self, call: Call) -> Result<(), ClientError> {
        let mut st = self.state.lock().unwrap();
        st.calls.push(call);
        match st.failures.get(&call) {
            Some(code) => Err(ClientError::Api { code: *code, reason: "Injected".into(), message: format!("{{\"code\":{}}}", code) }),
            None => Ok(()),
        }
    }

    fn key(&self, name: &str, namespace: Option<&str>) -> Key {
        (self.kind.clone(), namespace.unwrap_or_default().to_string(), name.to_string())
    }
}

#[async_trait::async_trait]
impl ResourceHandle for FakeHandle {
    async fn get(&self, name: &str, namespace: Option<&str>) -> Result<Fetched, ClientError> {
        self.record(Call::Get)?;
        let st = self.state.lock().unwrap();
        Ok(match st.objects.get(&self.key(name, namespace)) {
            Some(obj) => Fetched::Found(obj.clone()),
            None => Fetched::Absent,
        })
    }

    async fn list(&self, namespace: Option<&str>, selectors: &ListSelectors) -> Result<Json, ClientError> {
        self.record(Call::List)?;
        let st = self.state.lock().unwrap();
        let items: Vec<Json> = st
            .objects
            .iter()
            .filter(|((kind, ns, _), _)| *kind == self.kind && namespace.map_or(true, |want| want == ns.as_str()))
            .filter(|(_, obj)| matches_labels(obj, selectors.labels.as_deref()))
            .map(|(_, obj)| obj.clone())
            .collect();
        Ok(json!({ "apiVersion": "v1", "kind": format!("{}List", self.kind), "items": items }))
    }

    async fn create(&self, definition: &Json, namespace: Option<&str>) -> Result<Json, ClientError> {
        self.record(Call::Create)?;
        let mut st = self.state.lock().unwrap();
        let key = self.key(name_of(definition), namespace);
        if st.objects.contains_key(&key) {
            return Err(ClientError::Api { code: 409, reason: "AlreadyExists".into(), message: "already exists".into() });
        }
        let stored = st.stamp(definition.clone());
        st.objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn replace(&self, definition: &Json, name: &str, namespace: Option<&str>) -> Result<Json, ClientError> {
        self.record(Call::Replace)?;
        let mut st = self.state.lock().unwrap();
        let key = self.key(name, namespace);
        if !st.objects.contains_key(&key) {
            return Err(not_found());
        }
        let stored = st.stamp(definition.clone());
        st.objects.insert(key, stored.clone());
        Ok(stored)
    }

    async fn update(&self, definition: &Json, name: &str, namespace: Option<&str>) -> Result<Json, ClientError> {
        self.record(Call::Update)?;
        let mut st = self.state.lock().unwrap();
        let key = self.key(name, namespace);
        let live = st.objects.get(&key).cloned().ok_or_else(not_found)?;
        let merged = st.stamp(merge_patch(live, definition.clone()));
        st.objects.insert(key, merged.clone());
        Ok(merged)
    }

    async fn delete(&self, name: &str, namespace: Option<&str>) -> Result<Json, ClientError> {
        self.record(Call::Delete)?;
        let mut st = self.state.lock().unwrap();
        st.objects.remove(&self.key(name, namespace)).ok_or_else(not_found)
    }
}

#[async_trait::async_trait]
impl ResourceResolver for FakeCluster {
    type Handle = FakeHandle;

    async fn resolve(&self, identity: &ResourceIdentity) -> Result<FakeHandle, ClientError> {
        if self.state.lock().unwrap().unknown_kinds.contains(identity.item_kind()) {
            return Err(not_found());
        }
        Ok(FakeHandle { kind: identity.item_kind().to_string(), state: Arc::clone(&self.state) })
    }
}

/// JSON merge patch (RFC 7386): mappings merge, `null` removes, everything else replaces.
pub fn merge_patch(base: Json, patch: Json) -> Json {
    match (base, patch) {
        (Json::Object(mut base_map), Json::Object(patch_map)) => {
            for (key, pv) in patch_map {
                if pv.is_null() {
                    base_map.remove(&key);
                    continue;
                }
                let bv = base_map.remove(&key).unwrap_or(Json::Null);
                base_map.insert(key, merge_patch(bv, pv));
            }
            Json::Object(base_map)
        }
        (_, patch) => patch,
    }
}

pub fn definition(v: Json) -> ObjectDefinition {
    ObjectDefinition::from_value(v).expect("valid definition")
}

/// `ConfigMap cm1` in namespace `ns` with the given data.
pub fn config_map(data: Json) -> Json {
    json!({
        "apiVersion": "v1",
        "kind": "ConfigMap",
        "metadata": { "name": "cm1", "namespace": "ns" },
        "data": data,
    })
}

fn not_found() -> ClientError {
    ClientError::Api { code: 404, reason: "NotFound".into(), message: "not found".into() }
}

fn key_of(obj: &Json) -> Key {
    let kind = obj.get("kind").and_then(Json::as_str).unwrap_or_default().to_string();
    let ns = obj.pointer("/metadata/namespace").and_then(Json::as_str).unwrap_or_default().to_string();
    (kind, ns, name_of(obj).to_string())
}

fn name_of(obj: &Json) -> &str {
    obj.pointer("/metadata/name").and_then(Json::as_str).unwrap_or_default()
}

fn matches_labels(obj: &Json, selector: Option<&str>) -> bool {
    let Some(selector) = selector else { return true };
    selector.split(',').all(|term| match term.split_once('=') {
        Some((k, v)) => obj.pointer(&format!("/metadata/labels/{}", k)).and_then(Json::as_str) == Some(v),
        None => true,
    })
}
