//! End-to-end scenarios against a real Postgres database, mirroring the
//! concrete literal-input/output walkthroughs used to validate this engine
//! during design.

use std::sync::Arc;
use std::time::Duration;

use ripple_core::{Catalog, ComputeArgs, Gate, Graph, Node, NodeType, StepNode};
use ripple_engine::{surface::Wait, EngineConfig, GetOptions, GetOutcome, RippleEngine};

fn compute_fn<F, Fut>(f: F) -> Arc<dyn ripple_core::ComputeFn>
where
    F: Fn(ComputeArgs) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = ripple_core::ComputeOutcome> + Send + 'static,
{
    Arc::new(f)
}

fn step(name: &str, kind: NodeType, gated_by: Gate, f_compute: Arc<dyn ripple_core::ComputeFn>, mutates: Option<&str>) -> Node {
    Node::Step(StepNode {
        name: name.to_string(),
        kind,
        gated_by,
        f_compute,
        f_on_save: None,
        mutates: mutates.map(String::from),
        update_revision_on_change: false,
        max_retries: 3,
        abandon_after_seconds: 300,
        heartbeat_interval_seconds: 30,
        heartbeat_timeout_seconds: 90,
    })
}

fn engine(pool: sqlx::PgPool) -> RippleEngine {
    RippleEngine::from_pool(pool, Arc::new(Catalog::new()), Arc::new(EngineConfig::default()))
}

/// Scenario 1 (linear greeting): `input(:name)` -> `compute(:greet, …)`.
#[sqlx::test(migrations = "../ripple-store/migrations")]
async fn linear_greeting(pool: sqlx::PgPool) {
    let engine = engine(pool);

    let nodes = vec![
        Node::Input { name: "name".into() },
        step(
            "greet",
            NodeType::Compute,
            Gate::all_provided(["name"]),
            compute_fn(|args: ComputeArgs| async move {
                let name = args.values.get("name").and_then(|v| v.as_str()).unwrap_or_default();
                Ok(serde_json::json!(format!("Hello, {name}")))
            }),
            None,
        ),
    ];
    let graph = Arc::new(engine.register_graph(Graph::build("greeting", 1, nodes, None).unwrap()));

    let execution = engine.start_execution(&graph).await.unwrap();
    engine.set(execution.id, "name", serde_json::json!("Mario")).await.unwrap();

    let outcome = engine
        .get(execution.id, "greet", GetOptions { wait: Wait::Any, timeout: Duration::from_secs(5) })
        .await
        .unwrap();

    match outcome {
        GetOutcome::Value { value, .. } => assert_eq!(value, serde_json::json!("Hello, Mario")),
        other => panic!("expected a value, got {other:?}"),
    }
}

/// Scenario 2 (conditional branch): `alert` is gated on `sum > 40`.
#[sqlx::test(migrations = "../ripple-store/migrations")]
async fn conditional_branch_waits_for_threshold(pool: sqlx::PgPool) {
    let engine = engine(pool);

    let nodes = vec![
        Node::Input { name: "x".into() },
        Node::Input { name: "y".into() },
        step(
            "sum",
            NodeType::Compute,
            Gate::all_provided(["x", "y"]),
            compute_fn(|args: ComputeArgs| async move {
                let x = args.values.get("x").and_then(|v| v.as_i64()).unwrap_or(0);
                let y = args.values.get("y").and_then(|v| v.as_i64()).unwrap_or(0);
                Ok(serde_json::json!(x + y))
            }),
            None,
        ),
        step(
            "alert",
            NodeType::Compute,
            Gate::Leaf {
                node: "sum".into(),
                predicate: ripple_core::Predicate::new("sum-over-40", |snap| {
                    snap.node_value.as_i64().map(|v| v > 40).unwrap_or(false)
                }),
            },
            compute_fn(|_args: ComputeArgs| async move { Ok(serde_json::json!("🚨")) }),
            None,
        ),
    ];
    let graph = Arc::new(engine.register_graph(Graph::build("branch", 1, nodes, None).unwrap()));

    let execution = engine.start_execution(&graph).await.unwrap();
    engine.set(execution.id, "x", serde_json::json!(12)).await.unwrap();
    engine.set(execution.id, "y", serde_json::json!(2)).await.unwrap();

    let sum = engine
        .get(execution.id, "sum", GetOptions { wait: Wait::Any, timeout: Duration::from_secs(5) })
        .await
        .unwrap();
    assert!(matches!(sum, GetOutcome::Value { value, .. } if value == serde_json::json!(14)));

    let alert = engine.get(execution.id, "alert", GetOptions::default()).await.unwrap();
    assert!(matches!(alert, GetOutcome::NotSet));

    engine.set(execution.id, "y", serde_json::json!(37)).await.unwrap();

    let alert = engine
        .get(execution.id, "alert", GetOptions { wait: Wait::Any, timeout: Duration::from_secs(5) })
        .await
        .unwrap();
    assert!(matches!(alert, GetOutcome::Value { value, .. } if value == serde_json::json!("🚨")));
}

/// Scenario 3 (mutate-and-revision-cycle): `mutate(:paw, mutates: :switch)`
/// writes `"off"` to `:switch` and a marker to its own value.
#[sqlx::test(migrations = "../ripple-store/migrations")]
async fn mutate_writes_target_and_own_marker(pool: sqlx::PgPool) {
    let engine = engine(pool);

    let nodes = vec![
        Node::Input { name: "switch".into() },
        step(
            "paw",
            NodeType::Mutate,
            Gate::all_provided(["switch"]),
            compute_fn(|_args: ComputeArgs| async move { Ok(serde_json::json!("off")) }),
            Some("switch"),
        ),
    ];
    let graph = Arc::new(engine.register_graph(Graph::build("mutate-cycle", 1, nodes, None).unwrap()));

    let execution = engine.start_execution(&graph).await.unwrap();
    engine.set(execution.id, "switch", serde_json::json!("on")).await.unwrap();

    let paw = engine
        .get(execution.id, "paw", GetOptions { wait: Wait::Any, timeout: Duration::from_secs(5) })
        .await
        .unwrap();
    assert!(matches!(paw, GetOutcome::Value { value, .. } if value == serde_json::json!("updated switch")));

    let switch = engine.get(execution.id, "switch", GetOptions::default()).await.unwrap();
    assert!(matches!(switch, GetOutcome::Value { value, .. } if value == serde_json::json!("off")));
}

/// Scenario 6 (reactive unset): unsetting `:name` invalidates `:greet`.
#[sqlx::test(migrations = "../ripple-store/migrations")]
async fn unset_invalidates_downstream(pool: sqlx::PgPool) {
    let engine = engine(pool);

    let nodes = vec![
        Node::Input { name: "name".into() },
        step(
            "greet",
            NodeType::Compute,
            Gate::all_provided(["name"]),
            compute_fn(|args: ComputeArgs| async move {
                let name = args.values.get("name").and_then(|v| v.as_str()).unwrap_or_default();
                Ok(serde_json::json!(format!("Hello, {name}")))
            }),
            None,
        ),
    ];
    let graph = Arc::new(engine.register_graph(Graph::build("unset-greeting", 1, nodes, None).unwrap()));

    let execution = engine.start_execution(&graph).await.unwrap();
    engine.set(execution.id, "name", serde_json::json!("Mario")).await.unwrap();
    engine
        .get(execution.id, "greet", GetOptions { wait: Wait::Any, timeout: Duration::from_secs(5) })
        .await
        .unwrap();

    engine.unset(execution.id, &["name".to_string()]).await.unwrap();

    let loaded = engine.values_all(execution.id).await.unwrap();
    assert!(!loaded.value("name").unwrap().is_set());

    let greet = engine.get(execution.id, "greet", GetOptions::default()).await.unwrap();
    assert!(matches!(greet, GetOutcome::NotSet));
}
