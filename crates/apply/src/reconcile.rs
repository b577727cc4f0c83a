use std::time::Instant;

use kstate_core::{
    empty_body, ActionOutcome, BatchError, BatchOutcome, BatchPolicy, ClientError, DesiredState, Fetched, ListSelectors,
    Method, ObjectDefinition, ObjectFailure, Operation, ReconcileError, ReconcileRequest, ResourceHandle,
    ResourceResolver,
};
use metrics::{counter, histogram};
use tracing::{debug, error, info, warn};

use crate::diff::diff;

/// Bring one object to the requested state through an already resolved handle.
///
/// Not-found on the initial read means "absent"; every other client failure is fatal for
/// this object. With `request.dry_run` no mutating call is made but the outcome reports
/// the method and `changed` flag a real run would, with an empty result body.
pub async fn reconcile<H>(handle: &H, definition: &ObjectDefinition, request: ReconcileRequest) -> Result<ActionOutcome, ReconcileError>
where
    H: ResourceHandle + ?Sized,
{
    let t0 = Instant::now();
    counter!("reconcile_attempts", 1u64);
    let res = decide_and_act(handle, definition, request).await;
    match &res {
        Ok(outcome) => {
            histogram!("reconcile_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
            if outcome.changed {
                counter!("reconcile_changed", 1u64, "method" => outcome.method.to_string());
            }
        }
        Err(_) => {
            counter!("reconcile_err", 1u64);
        }
    }
    res
}

async fn decide_and_act<H>(handle: &H, definition: &ObjectDefinition, request: ReconcileRequest) -> Result<ActionOutcome, ReconcileError>
where
    H: ResourceHandle + ?Sized,
{
    let identity = definition.identity();
    let name = definition.name();
    let ns = definition.namespace();

    if identity.is_list() {
        let body = handle
            .list(ns, &ListSelectors::default())
            .await
            .map_err(api_err(Operation::List, definition))?;
        debug!(kind = %identity.kind(), ns = ?ns, "list kind; read only");
        return Ok(ActionOutcome::unchanged(Method::Get, body));
    }

    let existing = handle.get(name, ns).await.map_err(api_err(Operation::Get, definition))?;
    let payload = definition.to_value();

    match (request.state, existing) {
        (DesiredState::Absent, Fetched::Absent) => {
            debug!(kind = %identity.kind(), name = %name, ns = ?ns, "already absent");
            Ok(ActionOutcome::unchanged(Method::Delete, empty_body()))
        }
        (DesiredState::Absent, Fetched::Found(_)) => {
            let result = if request.dry_run {
                empty_body()
            } else {
                handle.delete(name, ns).await.map_err(api_err(Operation::Delete, definition))?
            };
            info!(kind = %identity.kind(), name = %name, ns = ?ns, dry_run = request.dry_run, "deleted");
            Ok(ActionOutcome::changed(Method::Delete, result))
        }
        (DesiredState::Present, Fetched::Absent) => {
            let result = if request.dry_run {
                empty_body()
            } else {
                handle.create(&payload, ns).await.map_err(api_err(Operation::Create, definition))?
            };
            info!(kind = %identity.kind(), name = %name, ns = ?ns, dry_run = request.dry_run, "created");
            Ok(ActionOutcome::changed(Method::Create, result))
        }
        (DesiredState::Present, Fetched::Found(_)) if request.force => {
            let result = if request.dry_run {
                empty_body()
            } else {
                handle.replace(&payload, name, ns).await.map_err(api_err(Operation::Replace, definition))?
            };
            info!(kind = %identity.kind(), name = %name, ns = ?ns, dry_run = request.dry_run, "replaced");
            Ok(ActionOutcome::changed(Method::Replace, result))
        }
        (DesiredState::Present, Fetched::Found(live)) => {
            let report = diff(&live, &payload);
            if report.matches {
                debug!(kind = %identity.kind(), name = %name, ns = ?ns, "live object satisfies definition");
                return Ok(ActionOutcome::unchanged(Method::None, live));
            }
            let result = if request.dry_run {
                empty_body()
            } else {
                handle.update(&payload, name, ns).await.map_err(api_err(Operation::Patch, definition))?
            };
            info!(
                kind = %identity.kind(),
                name = %name,
                ns = ?ns,
                fields = report.changes.len(),
                dry_run = request.dry_run,
                "patched"
            );
            Ok(ActionOutcome::changed(Method::Patch, result).with_diff(report.changes))
        }
    }
}

fn api_err(op: Operation, definition: &ObjectDefinition) -> impl FnOnce(ClientError) -> ReconcileError + '_ {
    move |source| ReconcileError::Api {
        op,
        kind: definition.identity().kind().to_string(),
        name: definition.name().to_string(),
        namespace: definition.namespace().map(str::to_string),
        source,
    }
}

/// Resolve the definition's kind, then [`reconcile`] it.
pub async fn reconcile_one<R>(resolver: &R, definition: &ObjectDefinition, request: ReconcileRequest) -> Result<ActionOutcome, ReconcileError>
where
    R: ResourceResolver + ?Sized,
{
    let identity = definition.identity();
    let handle = resolver
        .resolve(identity)
        .await
        .map_err(|e| ReconcileError::resolution(identity, e))?;
    reconcile(&handle, definition, request).await
}

/// Reconcile `definitions` one after another, in the order given.
///
/// Under [`BatchPolicy::Abort`] the first fatal error ends the batch and is returned with
/// the outcomes gathered so far; under [`BatchPolicy::Continue`] it is recorded as an
/// [`ObjectFailure`] and the next definition is processed.
pub async fn reconcile_batch<R>(
    resolver: &R,
    definitions: &[ObjectDefinition],
    request: ReconcileRequest,
    policy: BatchPolicy,
) -> Result<BatchOutcome, BatchError>
where
    R: ResourceResolver + ?Sized,
{
    let mut results = Vec::with_capacity(definitions.len());
    let mut failures = Vec::new();
    for (index, definition) in definitions.iter().enumerate() {
        match reconcile_one(resolver, definition, request).await {
            Ok(outcome) => results.push(outcome),
            Err(source) => match policy {
                BatchPolicy::Abort => {
                    error!(index, kind = %definition.identity().kind(), name = %definition.name(), error = %source, "reconcile failed; aborting batch");
                    return Err(BatchError {
                        index,
                        kind: definition.identity().kind().to_string(),
                        name: definition.name().to_string(),
                        completed: results,
                        source,
                    });
                }
                BatchPolicy::Continue => {
                    warn!(index, kind = %definition.identity().kind(), name = %definition.name(), error = %source, "reconcile failed; continuing");
                    failures.push(ObjectFailure::new(
                        index,
                        definition.identity(),
                        definition.name(),
                        definition.namespace(),
                        &source,
                    ));
                }
            },
        }
    }
    let outcome = BatchOutcome::from_parts(results, failures);
    info!(total = definitions.len(), changed = outcome.changed(), failed = outcome.failures().len(), "batch done");
    Ok(outcome)
}
