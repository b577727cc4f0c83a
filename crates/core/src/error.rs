use std::fmt;

use serde::Serialize;
use thiserror::Error;

use crate::{ActionOutcome, ResourceIdentity};

#[derive(Debug, Error)]
pub enum DefinitionError {
    #[error("definition is not a mapping")]
    NotAMapping,
    #[error("definition missing {0}")]
    MissingField(&'static str),
}

/// Failure reported by the cluster client collaborator.
#[derive(Debug, Error)]
pub enum ClientError {
    /// The API answered with a non-success status; `message` is the raw status body.
    #[error("api status {code} {reason}: {message}")]
    Api { code: u16, reason: String, message: String },
    /// No answer at all (connect failure, timeout, TLS, ...).
    #[error("transport: {0}")]
    Transport(String),
    #[error("decoding object body")]
    Decode(#[from] serde_json::Error),
}

impl ClientError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Api { code, .. } => Some(*code),
            _ => None,
        }
    }

    pub fn is_not_found(&self) -> bool { self.status() == Some(404) }
}

/// Operation that was being attempted when an object failed.
#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Operation {
    Get,
    List,
    Create,
    Replace,
    Patch,
    Delete,
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Operation::Get => "retrieve",
            Operation::List => "list",
            Operation::Create => "create",
            Operation::Replace => "replace",
            Operation::Patch => "patch",
            Operation::Delete => "delete",
        };
        f.write_str(s)
    }
}

/// Fatal error for a single definition. The rest of the batch is caller policy.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Definition(#[from] DefinitionError),

    #[error("failed to find resource {api_version}.{kind}")]
    Resolution {
        api_version: String,
        kind: String,
        #[source]
        source: ClientError,
    },

    #[error("failed to {op} {kind} {}", object_ref(.namespace.as_deref(), .name))]
    Api {
        op: Operation,
        kind: String,
        name: String,
        namespace: Option<String>,
        #[source]
        source: ClientError,
    },
}

impl ReconcileError {
    pub fn resolution(identity: &ResourceIdentity, source: ClientError) -> Self {
        ReconcileError::Resolution {
            api_version: identity.api_version().to_string(),
            kind: identity.kind().to_string(),
            source,
        }
    }

    /// HTTP status behind the failure, when the API produced one.
    pub fn status(&self) -> Option<u16> {
        match self {
            ReconcileError::Definition(_) => None,
            ReconcileError::Resolution { source, .. } | ReconcileError::Api { source, .. } => source.status(),
        }
    }
}

fn object_ref(namespace: Option<&str>, name: &str) -> String {
    match namespace {
        Some(ns) => format!("{}/{}", ns, name),
        None => name.to_string(),
    }
}

/// A definition that failed while the batch kept going.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ObjectFailure {
    pub index: usize,
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    pub msg: String,
}

impl ObjectFailure {
    pub fn new(index: usize, identity: &ResourceIdentity, name: &str, namespace: Option<&str>, err: &ReconcileError) -> Self {
        Self {
            index,
            api_version: identity.api_version().to_string(),
            kind: identity.kind().to_string(),
            name: name.to_string(),
            namespace: namespace.map(str::to_string),
            status: err.status(),
            msg: error_chain(err),
        }
    }
}

/// Batch stopped on its first fatal error (`BatchPolicy::Abort`).
#[derive(Debug, Error)]
#[error("reconcile aborted at definition #{index} ({kind} {name})")]
pub struct BatchError {
    pub index: usize,
    pub kind: String,
    pub name: String,
    /// Outcomes of the definitions processed before the failure.
    pub completed: Vec<ActionOutcome>,
    #[source]
    pub source: ReconcileError,
}

fn error_chain(err: &(dyn std::error::Error + 'static)) -> String {
    let mut msg = err.to_string();
    let mut cur = err.source();
    while let Some(e) = cur {
        msg.push_str(": ");
        msg.push_str(&e.to_string());
        cur = e.source();
    }
    msg
}
