use std::io::Read;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use kstate_apply::{lookup, manifest, reconcile_batch, LookupQuery};
use kstate_core::{
    ActionOutcome, BatchOutcome, BatchPolicy, DesiredState, FieldChange, ObjectDefinition, ObjectFailure,
    ReconcileRequest, ResourceIdentity,
};
use kstate_kubehub::{cluster_info, connect, ClusterInfoKind, ClusterOptions, KubeResolver};
use tracing::{error, info, warn};

#[derive(Parser, Debug)]
#[command(name = "kstatectl", version, about = "Declarative object state for Kubernetes")]
struct Cli {
    /// Output format
    #[arg(short = 'o', long = "output", value_enum, global = true, default_value_t = Output::Human)]
    output: Output,

    /// Namespace override for every definition (default: per definition, then current context)
    #[arg(long = "ns", global = true)]
    namespace: Option<String>,

    /// Path to a kubeconfig file
    #[arg(long, global = true, env = "K8S_AUTH_KUBECONFIG")]
    kubeconfig: Option<PathBuf>,

    /// Kubeconfig context to use
    #[arg(long, global = true, env = "K8S_AUTH_CONTEXT")]
    context: Option<String>,

    /// API read timeout in seconds
    #[arg(long = "timeout", global = true, default_value_t = 30)]
    timeout_secs: u64,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum Output { Human, Json }

/// Where definitions come from: a manifest, or inline flags.
#[derive(Args, Debug, Clone)]
struct Source {
    /// Manifest file (multi-document YAML); "-" reads stdin
    #[arg(short = 'f', long = "filename")]
    file: Option<PathBuf>,
    /// Inline definition kind
    #[arg(long)]
    kind: Option<String>,
    /// Inline definition apiVersion (default v1)
    #[arg(long = "api-version")]
    api_version: Option<String>,
    /// Inline definition name
    #[arg(long)]
    name: Option<String>,
}

impl Source {
    fn definitions(&self, ns: Option<&str>) -> Result<Vec<ObjectDefinition>> {
        match (&self.file, self.kind.as_deref(), self.name.as_deref()) {
            (Some(path), _, _) if path.as_os_str() == "-" => {
                let mut yaml = String::new();
                std::io::stdin().read_to_string(&mut yaml).context("reading manifest from stdin")?;
                manifest::load_definitions(&yaml, ns)
            }
            (Some(path), _, _) => manifest::load_definitions_from_path(path, ns),
            (None, Some(kind), Some(name)) => {
                Ok(vec![manifest::definition_from_parts(self.api_version.as_deref(), kind, name, ns)?])
            }
            _ => bail!("either -f FILE or --kind and --name are required"),
        }
    }
}

#[derive(Copy, Clone, Debug, Eq, PartialEq, ValueEnum)]
enum InfoKind { Version, ApiGroups }

impl From<InfoKind> for ClusterInfoKind {
    fn from(k: InfoKind) -> Self {
        match k {
            InfoKind::Version => ClusterInfoKind::Version,
            InfoKind::ApiGroups => ClusterInfoKind::ApiGroups,
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Make the cluster match the definitions (create, patch or replace)
    Apply {
        #[command(flatten)]
        source: Source,
        /// Replace existing objects instead of patching them
        #[arg(long, action = ArgAction::SetTrue)]
        force: bool,
        /// Report what would change without mutating anything
        #[arg(long, action = ArgAction::SetTrue)]
        check: bool,
        /// Record failures and carry on with the remaining definitions
        #[arg(long = "keep-going", action = ArgAction::SetTrue)]
        keep_going: bool,
    },
    /// Make sure the defined objects do not exist
    Delete {
        #[command(flatten)]
        source: Source,
        #[arg(long, action = ArgAction::SetTrue)]
        check: bool,
        #[arg(long = "keep-going", action = ArgAction::SetTrue)]
        keep_going: bool,
    },
    /// Show field differences between a manifest and the live objects
    Diff {
        /// Manifest file (multi-document YAML); "-" reads stdin
        #[arg(short = 'f', long = "filename")]
        file: PathBuf,
    },
    /// Read objects by name, selector or manifest
    Get {
        /// Kind to read, e.g. ConfigMap or DeploymentList
        #[arg(long)]
        kind: Option<String>,
        #[arg(long = "api-version", default_value = "v1")]
        api_version: String,
        #[arg(long)]
        name: Option<String>,
        /// Label selector, e.g. app=galaxy
        #[arg(short = 'l', long = "selector")]
        label_selector: Option<String>,
        #[arg(long = "field-selector")]
        field_selector: Option<String>,
        /// Take kind, apiVersion, name and namespace from a manifest
        #[arg(short = 'f', long = "filename")]
        file: Option<PathBuf>,
    },
    /// Server facts
    ClusterInfo {
        #[arg(value_enum)]
        what: InfoKind,
    },
}

fn init_tracing() {
    let env = std::env::var("KSTATE_LOG").unwrap_or_else(|_| "info".to_string());
    let filter = tracing_subscriber::EnvFilter::from_str(&env).unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .init();
}

fn init_metrics() {
    if let Ok(addr) = std::env::var("KSTATE_METRICS_ADDR") {
        if let Ok(sock) = addr.parse::<std::net::SocketAddr>() {
            let builder = metrics_exporter_prometheus::PrometheusBuilder::new();
            match builder.with_http_listener(sock).install() {
                Ok(_) => tracing::info!(addr = %addr, "Prometheus metrics exporter listening"),
                Err(e) => tracing::warn!(error = %e, "failed to install metrics exporter"),
            }
        } else {
            tracing::warn!(addr = %addr, "invalid KSTATE_METRICS_ADDR; expected host:port");
        }
    }
}

fn change_line(c: &FieldChange) -> String {
    let show = |v: &serde_json::Value| serde_json::to_string(v).unwrap_or_default();
    match (&c.old, &c.new) {
        (None, Some(new)) => format!("+ {}: {}", c.path_string(), show(new)),
        (Some(old), None) => format!("- {}: {}", c.path_string(), show(old)),
        (Some(old), Some(new)) => format!("~ {}: {} -> {}", c.path_string(), show(old), show(new)),
        (None, None) => format!("~ {}", c.path_string()),
    }
}

fn object_label(def: &ObjectDefinition) -> String {
    let name = if def.name().is_empty() { "*" } else { def.name() };
    match def.namespace() {
        Some(ns) => format!("{}/{}/{}", def.identity().kind(), ns, name),
        None => format!("{}/{}", def.identity().kind(), name),
    }
}

fn print_outcomes<'a>(defs: impl Iterator<Item = &'a ObjectDefinition>, outcomes: &[ActionOutcome], dry_run: bool) {
    let suffix = if dry_run { " (dry run)" } else { "" };
    for (def, out) in defs.zip(outcomes) {
        let state = if out.changed { "changed" } else { "unchanged" };
        println!("{:<8} {:<40} {}{}", out.method.to_string(), object_label(def), state, suffix);
        for change in out.diff.iter().flatten() {
            println!("    {}", change_line(change));
        }
    }
}

fn print_failures(failures: &[ObjectFailure]) {
    for f in failures {
        let ns = f.namespace.as_deref().map(|ns| format!("{}/", ns)).unwrap_or_default();
        eprintln!("failed   {}/{}{} #{}: {}", f.kind, ns, f.name, f.index, f.msg);
    }
}

/// Run a batch and print it. Errors (abort, or recorded failures) become a non-zero exit.
async fn run_batch(
    resolver: &KubeResolver,
    defs: &[ObjectDefinition],
    request: ReconcileRequest,
    policy: BatchPolicy,
    output: Output,
) -> Result<()> {
    info!(count = defs.len(), state = ?request.state, force = request.force, dry_run = request.dry_run, ?policy, "reconcile");
    match reconcile_batch(resolver, defs, request, policy).await {
        Ok(outcome) => {
            match output {
                Output::Human => {
                    let failed: Vec<usize> = outcome.failures().iter().map(|f| f.index).collect();
                    let ok = defs.iter().enumerate().filter(|(i, _)| !failed.contains(i)).map(|(_, d)| d);
                    print_outcomes(ok, outcome.outcomes(), request.dry_run);
                    print_failures(outcome.failures());
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&outcome)?),
            }
            summarize(&outcome)
        }
        Err(err) => {
            error!(index = err.index, kind = %err.kind, name = %err.name, "batch aborted");
            match output {
                Output::Human => print_outcomes(defs.iter(), &err.completed, request.dry_run),
                Output::Json => println!("{}", serde_json::to_string_pretty(&err.completed)?),
            }
            Err(err.into())
        }
    }
}

fn summarize(outcome: &BatchOutcome) -> Result<()> {
    match outcome.failures().len() {
        0 => Ok(()),
        n => {
            warn!(failed = n, "some definitions failed");
            Err(anyhow!("{} definition(s) failed", n))
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    init_metrics();
    let cli = Cli::parse();
    let ns = cli.namespace.as_deref();
    let opts = ClusterOptions {
        kubeconfig: cli.kubeconfig.clone(),
        context: cli.context.clone(),
        read_timeout: Duration::from_secs(cli.timeout_secs),
    };

    match cli.command {
        Commands::Apply { source, force, check, keep_going } => {
            let defs = source.definitions(ns)?;
            let resolver = KubeResolver::new(connect(&opts).await?);
            let request = ReconcileRequest { state: DesiredState::Present, force, dry_run: check };
            let policy = if keep_going { BatchPolicy::Continue } else { BatchPolicy::Abort };
            run_batch(&resolver, &defs, request, policy, cli.output).await?;
        }
        Commands::Delete { source, check, keep_going } => {
            let defs = source.definitions(ns)?;
            let resolver = KubeResolver::new(connect(&opts).await?);
            let request = ReconcileRequest { state: DesiredState::Absent, force: false, dry_run: check };
            let policy = if keep_going { BatchPolicy::Continue } else { BatchPolicy::Abort };
            run_batch(&resolver, &defs, request, policy, cli.output).await?;
        }
        Commands::Diff { file } => {
            let source = Source { file: Some(file), kind: None, api_version: None, name: None };
            let defs = source.definitions(ns)?;
            let resolver = KubeResolver::new(connect(&opts).await?);
            let request = ReconcileRequest { dry_run: true, ..Default::default() };
            run_batch(&resolver, &defs, request, BatchPolicy::Continue, cli.output).await?;
        }
        Commands::Get { kind, api_version, name, label_selector, field_selector, file } => {
            let queries = match (file, kind) {
                (Some(path), _) => {
                    let source = Source { file: Some(path), kind: None, api_version: None, name: None };
                    source.definitions(ns)?.iter().map(LookupQuery::from_definition).collect::<Vec<_>>()
                }
                (None, Some(kind)) => {
                    let mut q = LookupQuery::new(ResourceIdentity::new(&api_version, &kind)?);
                    if let Some(n) = name {
                        q = q.name(n);
                    }
                    if let Some(n) = ns {
                        q = q.namespace(n);
                    }
                    vec![q]
                }
                (None, None) => bail!("either --kind or -f FILE is required"),
            };
            let resolver = KubeResolver::new(connect(&opts).await?);
            let mut items = Vec::new();
            for mut q in queries {
                if let Some(sel) = label_selector.as_deref() {
                    q = q.labels(sel);
                }
                if let Some(sel) = field_selector.as_deref() {
                    q = q.fields(sel);
                }
                items.extend(lookup(&resolver, &q).await?);
            }
            match cli.output {
                Output::Human => {
                    println!("{:<20} {:<40} {}", "NAMESPACE", "NAME", "KIND");
                    for item in &items {
                        let s = |p: &str| item.pointer(p).and_then(|v| v.as_str()).unwrap_or("-").to_string();
                        println!("{:<20} {:<40} {}", s("/metadata/namespace"), s("/metadata/name"), s("/kind"));
                    }
                }
                Output::Json => println!("{}", serde_json::to_string_pretty(&items)?),
            }
        }
        Commands::ClusterInfo { what } => {
            let client = connect(&opts).await?;
            let info = cluster_info(&client, what.into()).await?;
            match cli.output {
                Output::Human => println!("{}", render_flat(&info)),
                Output::Json => println!("{}", serde_json::to_string_pretty(&info)?),
            }
        }
    }
    Ok(())
}

/// Flat `key: value` rendering of the top level of a JSON document.
fn render_flat(v: &serde_json::Value) -> String {
    match v.as_object() {
        Some(map) => map
            .iter()
            .map(|(k, v)| match v {
                serde_json::Value::String(s) => format!("{}: {}", k, s),
                other => format!("{}: {}", k, other),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        None => v.to_string(),
    }
}
