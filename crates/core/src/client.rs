//! Seams to the cluster client. kstate never talks HTTP itself.

use serde_json::Value as Json;

use crate::{ClientError, ResourceIdentity};

/// Outcome of reading one object: not-found is a value, not an error.
#[derive(Debug, Clone, PartialEq)]
pub enum Fetched {
    Found(Json),
    Absent,
}

impl Fetched {
    pub fn into_option(self) -> Option<Json> {
        match self {
            Fetched::Found(v) => Some(v),
            Fetched::Absent => None,
        }
    }
}

/// Server-side filters for list calls.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListSelectors {
    pub labels: Option<String>,
    pub fields: Option<String>,
}

/// Operations on one resource type. `namespace: None` means cluster scope,
/// or the client's default namespace for namespaced kinds.
#[async_trait::async_trait]
pub trait ResourceHandle: Send + Sync {
    async fn get(&self, name: &str, namespace: Option<&str>) -> Result<Fetched, ClientError>;

    /// Collection body (`{"items": [...]}`); `namespace: None` spans all namespaces.
    async fn list(&self, namespace: Option<&str>, selectors: &ListSelectors) -> Result<Json, ClientError>;

    async fn create(&self, definition: &Json, namespace: Option<&str>) -> Result<Json, ClientError>;

    async fn replace(&self, definition: &Json, name: &str, namespace: Option<&str>) -> Result<Json, ClientError>;

    /// Merge-patch `definition` onto the live object.
    async fn update(&self, definition: &Json, name: &str, namespace: Option<&str>) -> Result<Json, ClientError>;

    async fn delete(&self, name: &str, namespace: Option<&str>) -> Result<Json, ClientError>;
}

/// Turns a kind/apiVersion into a usable handle.
#[async_trait::async_trait]
pub trait ResourceResolver: Send + Sync {
    type Handle: ResourceHandle;

    async fn resolve(&self, identity: &ResourceIdentity) -> Result<Self::Handle, ClientError>;
}
