//! kstate kubehub: cluster connection, discovery and the dynamic object collaborator

#![forbid(unsafe_code)]

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use kube::{
    config::{KubeConfigOptions, Kubeconfig},
    Client, Config,
};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;
use tracing::{debug, info};

mod dynamic;

pub use dynamic::{client_error, KubeHandle, KubeResolver};

pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

/// How to reach the cluster. Everything unset means "infer like kubectl".
#[derive(Debug, Clone)]
pub struct ClusterOptions {
    pub kubeconfig: Option<PathBuf>,
    pub context: Option<String>,
    pub read_timeout: Duration,
}

impl Default for ClusterOptions {
    fn default() -> Self {
        Self { kubeconfig: None, context: None, read_timeout: DEFAULT_READ_TIMEOUT }
    }
}

/// Build a client from an explicit kubeconfig/context, or infer one (env, in-cluster, ~/.kube/config).
pub async fn connect(opts: &ClusterOptions) -> Result<Client> {
    let kc_opts = KubeConfigOptions { context: opts.context.clone(), ..Default::default() };
    let mut config = match (&opts.kubeconfig, &opts.context) {
        (Some(path), _) => {
            let kubeconfig = Kubeconfig::read_from(path)
                .with_context(|| format!("reading kubeconfig {}", path.display()))?;
            Config::from_custom_kubeconfig(kubeconfig, &kc_opts)
                .await
                .with_context(|| format!("loading kubeconfig {}", path.display()))?
        }
        (None, Some(ctx)) => Config::from_kubeconfig(&kc_opts)
            .await
            .with_context(|| format!("loading kubeconfig context {}", ctx))?,
        (None, None) => Config::infer().await.context("inferring kube config")?,
    };
    config.read_timeout = Some(opts.read_timeout);
    debug!(cluster = %config.cluster_url, ns = %config.default_namespace, "kube config loaded");
    let client = Client::try_from(config).context("building kube client")?;
    info!(context = ?opts.context, "connected");
    Ok(client)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ClusterInfoKind {
    Version,
    ApiGroups,
}

/// Server facts: the version document or the served API groups.
pub async fn cluster_info(client: &Client, kind: ClusterInfoKind) -> Result<Json> {
    match kind {
        ClusterInfoKind::Version => {
            let info = client.apiserver_version().await.context("fetching server version")?;
            Ok(serde_json::to_value(info)?)
        }
        ClusterInfoKind::ApiGroups => {
            let groups = client.list_api_groups().await.context("listing API groups")?;
            Ok(serde_json::to_value(groups)?)
        }
    }
}
