mod support;

use kstate_apply::reconcile_batch;
use kstate_core::{BatchOutcome, BatchPolicy, DesiredState, Method, ReconcileError, ReconcileRequest};
use serde_json::json;
use support::{config_map, definition, Call, FakeCluster};

fn named(name: &str, data: serde_json::Value) -> kstate_core::ObjectDefinition {
    let mut v = config_map(data);
    v["metadata"]["name"] = json!(name);
    definition(v)
}

#[tokio::test]
async fn single_definition_is_reported_bare() {
    let cluster = FakeCluster::new();
    let out = reconcile_batch(&cluster, &[named("a", json!({}))], ReconcileRequest::default(), BatchPolicy::Abort)
        .await
        .unwrap();
    assert!(matches!(out, BatchOutcome::Single(ref o) if o.method == Method::Create));

    let wire = serde_json::to_value(&out).unwrap();
    assert_eq!(wire["method"], "create");
    assert_eq!(wire["changed"], true);
}

#[tokio::test]
async fn results_follow_input_order_and_changed_is_any() {
    let cluster = FakeCluster::new().with_object(named("b", json!({ "k": "v" })).into_value());
    let defs = [named("a", json!({})), named("b", json!({ "k": "v" })), named("c", json!({}))];

    let out = reconcile_batch(&cluster, &defs, ReconcileRequest::default(), BatchPolicy::Abort).await.unwrap();
    let methods: Vec<Method> = out.outcomes().iter().map(|o| o.method).collect();
    assert_eq!(methods, vec![Method::Create, Method::None, Method::Create]);
    assert!(out.changed());
    assert_eq!(cluster.calls(), vec![Call::Get, Call::Create, Call::Get, Call::Get, Call::Create]);

    let wire = serde_json::to_value(&out).unwrap();
    assert_eq!(wire["changed"], true);
    assert_eq!(wire["result"]["results"].as_array().unwrap().len(), 3);
    assert!(wire["result"].get("failures").is_none());
}

#[tokio::test]
async fn unchanged_batch_reports_false() {
    let cluster = FakeCluster::new();
    let defs = [named("a", json!({})), named("b", json!({}))];
    let req = ReconcileRequest { state: DesiredState::Absent, ..Default::default() };
    let out = reconcile_batch(&cluster, &defs, req, BatchPolicy::Abort).await.unwrap();
    assert!(!out.changed());
    assert_eq!(out.outcomes().len(), 2);
}

#[tokio::test]
async fn abort_stops_at_first_failure_and_keeps_completed() {
    let cluster = FakeCluster::new()
        .with_object(named("a", json!({ "k": "old" })).into_value())
        .with_unknown_kind("Widget");
    let widget = definition(json!({ "apiVersion": "example.com/v1", "kind": "Widget", "metadata": { "name": "w" } }));
    let defs = [named("a", json!({ "k": "new" })), widget, named("c", json!({}))];

    let err = reconcile_batch(&cluster, &defs, ReconcileRequest::default(), BatchPolicy::Abort).await.unwrap_err();
    assert_eq!(err.index, 1);
    assert_eq!(err.kind, "Widget");
    assert_eq!(err.completed.len(), 1);
    assert_eq!(err.completed[0].method, Method::Patch);
    assert!(matches!(err.source, ReconcileError::Resolution { .. }));
    // "c" never reached the cluster
    assert!(cluster.object("ConfigMap", Some("ns"), "c").is_none());
}

#[tokio::test]
async fn continue_records_failures_and_processes_the_rest() {
    let cluster = FakeCluster::new().with_unknown_kind("Widget");
    let widget = definition(json!({ "apiVersion": "example.com/v1", "kind": "Widget", "metadata": { "name": "w", "namespace": "ns" } }));
    let defs = [named("a", json!({})), widget, named("c", json!({}))];

    let out = reconcile_batch(&cluster, &defs, ReconcileRequest::default(), BatchPolicy::Continue).await.unwrap();
    assert_eq!(out.outcomes().len(), 2);
    assert!(out.changed());
    let failures = out.failures();
    assert_eq!(failures.len(), 1);
    assert_eq!(failures[0].index, 1);
    assert_eq!(failures[0].kind, "Widget");
    assert_eq!(failures[0].namespace.as_deref(), Some("ns"));
    assert_eq!(failures[0].status, Some(404));
    assert!(failures[0].msg.contains("failed to find resource"), "msg={}", failures[0].msg);
    assert!(cluster.object("ConfigMap", Some("ns"), "c").is_some());

    let wire = serde_json::to_value(&out).unwrap();
    assert_eq!(wire["result"]["failures"][0]["name"], "w");
}

#[tokio::test]
async fn lone_failure_under_continue_is_not_bare() {
    let cluster = FakeCluster::new().failing(Call::Get, 500);
    let out = reconcile_batch(&cluster, &[named("a", json!({}))], ReconcileRequest::default(), BatchPolicy::Continue)
        .await
        .unwrap();
    assert!(matches!(out, BatchOutcome::Many { changed: false, .. }));
    assert_eq!(out.failures()[0].status, Some(500));
}

#[tokio::test]
async fn dry_run_batch_never_mutates() {
    let cluster = FakeCluster::new().with_object(named("b", json!({ "k": "old" })).into_value());
    let defs = [named("a", json!({})), named("b", json!({ "k": "new" }))];
    let req = ReconcileRequest { dry_run: true, ..Default::default() };
    let out = reconcile_batch(&cluster, &defs, req, BatchPolicy::Abort).await.unwrap();
    assert!(out.changed());
    assert_eq!(cluster.mutations(), 0);
}
