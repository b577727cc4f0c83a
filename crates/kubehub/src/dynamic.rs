use kstate_core::{ClientError, Fetched, ListSelectors, ResourceHandle, ResourceIdentity, ResourceResolver};
use kube::{
    api::{Api, DeleteParams, ListParams, Patch, PatchParams, PostParams},
    core::{ApiResource, DynamicObject},
    discovery::{Discovery, Scope},
    Client,
};
use metrics::counter;
use serde_json::Value as Json;
use tokio::sync::OnceCell;
use tracing::debug;

/// Map a kube failure onto the collaborator error. API statuses keep their code.
pub fn client_error(err: kube::Error) -> ClientError {
    match err {
        kube::Error::Api(ae) => ClientError::Api { code: ae.code, reason: ae.reason, message: ae.message },
        other => ClientError::Transport(other.to_string()),
    }
}

fn strip_managed_fields(v: &mut Json) {
    if let Some(meta) = v.get_mut("metadata").and_then(Json::as_object_mut) {
        meta.remove("managedFields");
    }
}

fn to_json(obj: &DynamicObject) -> Result<Json, ClientError> {
    let mut raw = serde_json::to_value(obj)?;
    strip_managed_fields(&mut raw);
    Ok(raw)
}

fn to_object(definition: &Json) -> Result<DynamicObject, ClientError> {
    Ok(serde_json::from_value(definition.clone())?)
}

/// Resolves kinds through API discovery, run once on first use.
pub struct KubeResolver {
    client: Client,
    discovery: OnceCell<Discovery>,
}

impl KubeResolver {
    pub fn new(client: Client) -> Self {
        Self { client, discovery: OnceCell::new() }
    }

    async fn discovery(&self) -> Result<&Discovery, ClientError> {
        self.discovery
            .get_or_try_init(|| async {
                counter!("discovery_runs", 1u64);
                let d = Discovery::new(self.client.clone()).run().await.map_err(client_error)?;
                debug!(groups = d.groups().count(), "discovery complete");
                Ok::<_, ClientError>(d)
            })
            .await
    }

    fn find_api_resource(discovery: &Discovery, identity: &ResourceIdentity) -> Option<(ApiResource, bool)> {
        let (group, version, kind) = (identity.group(), identity.version(), identity.item_kind());
        for g in discovery.groups().filter(|g| g.name() == group) {
            for (ar, caps) in g.versioned_resources(version) {
                if ar.kind == kind {
                    return Some((ar, matches!(caps.scope, Scope::Namespaced)));
                }
            }
        }
        None
    }
}

#[async_trait::async_trait]
impl ResourceResolver for KubeResolver {
    type Handle = KubeHandle;

    async fn resolve(&self, identity: &ResourceIdentity) -> Result<KubeHandle, ClientError> {
        let discovery = self.discovery().await?;
        let (ar, namespaced) = Self::find_api_resource(discovery, identity).ok_or_else(|| ClientError::Api {
            code: 404,
            reason: "NotFound".into(),
            message: format!("the server does not serve {}/{}", identity.api_version(), identity.item_kind()),
        })?;
        debug!(kind = %ar.kind, plural = %ar.plural, namespaced, "resolved");
        Ok(KubeHandle { client: self.client.clone(), ar, namespaced })
    }
}

/// Dynamic access to one resource type.
pub struct KubeHandle {
    client: Client,
    ar: ApiResource,
    namespaced: bool,
}

impl KubeHandle {
    pub fn api_resource(&self) -> &ApiResource { &self.ar }

    pub fn namespaced(&self) -> bool { self.namespaced }

    /// Single-object endpoint; namespaced kinds fall back to the client's default namespace.
    fn api(&self, namespace: Option<&str>) -> Api<DynamicObject> {
        match (self.namespaced, namespace) {
            (true, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &self.ar),
            (true, None) => Api::default_namespaced_with(self.client.clone(), &self.ar),
            (false, _) => Api::all_with(self.client.clone(), &self.ar),
        }
    }

    /// Collection endpoint; no namespace spans all namespaces.
    fn list_api(&self, namespace: Option<&str>) -> Api<DynamicObject> {
        match (self.namespaced, namespace) {
            (true, Some(ns)) => Api::namespaced_with(self.client.clone(), ns, &self.ar),
            _ => Api::all_with(self.client.clone(), &self.ar),
        }
    }
}

#[async_trait::async_trait]
impl ResourceHandle for KubeHandle {
    async fn get(&self, name: &str, namespace: Option<&str>) -> Result<Fetched, ClientError> {
        match self.api(namespace).get_opt(name).await.map_err(client_error)? {
            Some(obj) => Ok(Fetched::Found(to_json(&obj)?)),
            None => Ok(Fetched::Absent),
        }
    }

    async fn list(&self, namespace: Option<&str>, selectors: &ListSelectors) -> Result<Json, ClientError> {
        let mut lp = ListParams::default();
        if let Some(labels) = selectors.labels.as_deref() {
            lp = lp.labels(labels);
        }
        if let Some(fields) = selectors.fields.as_deref() {
            lp = lp.fields(fields);
        }
        let list = self.list_api(namespace).list(&lp).await.map_err(client_error)?;
        let items = list.items.iter().map(to_json).collect::<Result<Vec<_>, _>>()?;
        Ok(serde_json::json!({
            "apiVersion": self.ar.api_version,
            "kind": format!("{}List", self.ar.kind),
            "metadata": list.metadata,
            "items": items,
        }))
    }

    async fn create(&self, definition: &Json, namespace: Option<&str>) -> Result<Json, ClientError> {
        let obj = to_object(definition)?;
        let created = self.api(namespace).create(&PostParams::default(), &obj).await.map_err(client_error)?;
        to_json(&created)
    }

    async fn replace(&self, definition: &Json, name: &str, namespace: Option<&str>) -> Result<Json, ClientError> {
        let obj = to_object(definition)?;
        let replaced = self.api(namespace).replace(name, &PostParams::default(), &obj).await.map_err(client_error)?;
        to_json(&replaced)
    }

    async fn update(&self, definition: &Json, name: &str, namespace: Option<&str>) -> Result<Json, ClientError> {
        let patched = self
            .api(namespace)
            .patch(name, &PatchParams::default(), &Patch::Merge(definition))
            .await
            .map_err(client_error)?;
        to_json(&patched)
    }

    async fn delete(&self, name: &str, namespace: Option<&str>) -> Result<Json, ClientError> {
        let res = self.api(namespace).delete(name, &DeleteParams::default()).await.map_err(client_error)?;
        res.either(|obj| to_json(&obj), |status| serde_json::to_value(status).map_err(ClientError::from))
    }
}
