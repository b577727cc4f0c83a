use kstate_core::{
    ClientError, Fetched, ListSelectors, ObjectDefinition, Operation, ReconcileError, ResourceHandle, ResourceIdentity,
    ResourceResolver,
};
use serde_json::Value as Json;
use tracing::debug;

/// Read-only query: one object by name, or a filtered listing.
#[derive(Debug, Clone, PartialEq)]
pub struct LookupQuery {
    pub identity: ResourceIdentity,
    pub name: Option<String>,
    /// `None` lists across all namespaces.
    pub namespace: Option<String>,
    /// Ignored when `name` is set.
    pub selectors: ListSelectors,
}

impl LookupQuery {
    pub fn new(identity: ResourceIdentity) -> Self {
        Self { identity, name: None, namespace: None, selectors: ListSelectors::default() }
    }

    /// Take kind, apiVersion, name and namespace from a definition.
    pub fn from_definition(definition: &ObjectDefinition) -> Self {
        let name = Some(definition.name()).filter(|n| !n.is_empty()).map(str::to_string);
        Self {
            identity: definition.identity().clone(),
            name,
            namespace: definition.namespace().map(str::to_string),
            selectors: ListSelectors::default(),
        }
    }

    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn namespace(mut self, namespace: impl Into<String>) -> Self {
        self.namespace = Some(namespace.into());
        self
    }

    pub fn labels(mut self, selector: impl Into<String>) -> Self {
        self.selectors.labels = Some(selector.into());
        self
    }

    pub fn fields(mut self, selector: impl Into<String>) -> Self {
        self.selectors.fields = Some(selector.into());
        self
    }
}

/// Fetch matching objects. Not-found yields an empty vector rather than an error.
pub async fn lookup<R>(resolver: &R, query: &LookupQuery) -> Result<Vec<Json>, ReconcileError>
where
    R: ResourceResolver + ?Sized,
{
    let identity = &query.identity;
    let handle = resolver
        .resolve(identity)
        .await
        .map_err(|e| ReconcileError::resolution(identity, e))?;
    let ns = query.namespace.as_deref();

    match query.name.as_deref() {
        Some(name) if !identity.is_list() => {
            let fetched = handle.get(name, ns).await.map_err(api_err(Operation::Get, query, name))?;
            debug!(kind = %identity.kind(), name = %name, ns = ?ns, found = matches!(fetched, Fetched::Found(_)), "lookup by name");
            Ok(fetched.into_option().into_iter().collect())
        }
        _ => match handle.list(ns, &query.selectors).await {
            Ok(body) => {
                let items = list_items(body);
                debug!(kind = %identity.kind(), ns = ?ns, count = items.len(), "lookup list");
                Ok(items)
            }
            Err(e) if e.is_not_found() => Ok(Vec::new()),
            Err(e) => Err(api_err(Operation::List, query, "")(e)),
        },
    }
}

fn api_err<'a>(op: Operation, query: &'a LookupQuery, name: &str) -> impl FnOnce(ClientError) -> ReconcileError + 'a {
    let name = name.to_string();
    move |source| ReconcileError::Api {
        op,
        kind: query.identity.kind().to_string(),
        name,
        namespace: query.namespace.clone(),
        source,
    }
}

fn list_items(body: Json) -> Vec<Json> {
    match body {
        Json::Object(mut map) => match map.remove("items") {
            Some(Json::Array(items)) => items,
            _ => Vec::new(),
        },
        _ => Vec::new(),
    }
}
