//! Exercises the claim/heartbeat/completion protocol against a real
//! Postgres database (spec.md §4.3).

use std::sync::Arc;

use ripple_core::{ComputeArgs, Gate, Graph, Node, NodeType, StepNode};
use ripple_store::{ClaimOutcome, ComputationRepository, ExecutionRepository, SuccessEffect};

fn ok_fn() -> Arc<dyn ripple_core::ComputeFn> {
    Arc::new(|_args: ComputeArgs| async move { Ok(serde_json::json!("ok")) })
}

fn sum_graph() -> Graph {
    let nodes = vec![
        Node::Input { name: "x".into() },
        Node::Input { name: "y".into() },
        Node::Step(StepNode {
            name: "sum".into(),
            kind: NodeType::Compute,
            gated_by: Gate::all_provided(["x", "y"]),
            f_compute: ok_fn(),
            f_on_save: None,
            mutates: None,
            update_revision_on_change: false,
            max_retries: 3,
            abandon_after_seconds: 300,
            heartbeat_interval_seconds: 30,
            heartbeat_timeout_seconds: 90,
        }),
    ];
    Graph::build("sum-graph", 1, nodes, None).unwrap()
}

#[sqlx::test]
async fn claim_succeeds_once_then_conflicts_for_a_second_caller(pool: sqlx::PgPool) {
    let graph = sum_graph();
    let loaded = ExecutionRepository::create(&pool, &graph, 1_700_000_000).await.unwrap();
    let sum_computation = loaded.latest_computation("sum").unwrap();

    let first = ComputationRepository::claim_computation(
        &pool,
        sum_computation.id,
        &["x".to_string(), "y".to_string()],
        90,
        300,
        1_700_000_001,
    )
    .await
    .unwrap();
    assert!(matches!(first, ClaimOutcome::Claimed(_)));

    let second = ComputationRepository::claim_computation(
        &pool,
        sum_computation.id,
        &["x".to_string(), "y".to_string()],
        90,
        300,
        1_700_000_002,
    )
    .await
    .unwrap();
    assert!(matches!(second, ClaimOutcome::Conflict));
}

#[sqlx::test]
async fn heartbeat_fails_once_computation_left_computing_state(pool: sqlx::PgPool) {
    let graph = sum_graph();
    let loaded = ExecutionRepository::create(&pool, &graph, 1_700_000_000).await.unwrap();
    let sum_computation = loaded.latest_computation("sum").unwrap();

    let ClaimOutcome::Claimed(claimed) = ComputationRepository::claim_computation(
        &pool,
        sum_computation.id,
        &["x".to_string(), "y".to_string()],
        90,
        300,
        1_700_000_001,
    )
    .await
    .unwrap() else {
        panic!("expected claim to succeed");
    };

    assert!(ComputationRepository::heartbeat(&pool, claimed.id, 90, 1_700_000_010).await.unwrap());

    ComputationRepository::complete_success(
        &pool,
        claimed.id,
        serde_json::json!(3),
        SuccessEffect::ComputeValue { update_revision_on_change: false },
        1_700_000_020,
    )
    .await
    .unwrap();

    assert!(!ComputationRepository::heartbeat(&pool, claimed.id, 90, 1_700_000_030).await.unwrap());
}

#[sqlx::test]
async fn complete_success_suppresses_revision_bump_on_unchanged_value(pool: sqlx::PgPool) {
    let graph = sum_graph();
    let loaded = ExecutionRepository::create(&pool, &graph, 1_700_000_000).await.unwrap();
    let sum_computation = loaded.latest_computation("sum").unwrap();

    let ClaimOutcome::Claimed(claimed) = ComputationRepository::claim_computation(
        &pool,
        sum_computation.id,
        &["x".to_string(), "y".to_string()],
        90,
        300,
        1_700_000_001,
    )
    .await
    .unwrap() else {
        panic!("expected claim to succeed");
    };

    let before = ExecutionRepository::load(&pool, loaded.execution.id).await.unwrap().unwrap();

    ComputationRepository::complete_success(
        &pool,
        claimed.id,
        serde_json::Value::Null,
        SuccessEffect::ComputeValue { update_revision_on_change: false },
        1_700_000_010,
    )
    .await
    .unwrap();

    let after_first = ExecutionRepository::load(&pool, loaded.execution.id).await.unwrap().unwrap();
    assert_eq!(after_first.execution.revision, before.execution.revision + 1, "first write of a node always changes it from unset");

    let materialized = ComputationRepository::materialize_not_set(&pool, loaded.execution.id, "sum", "compute", None)
        .await
        .unwrap();
    let ClaimOutcome::Claimed(reclaimed) = ComputationRepository::claim_computation(
        &pool,
        materialized.id,
        &["x".to_string(), "y".to_string()],
        90,
        300,
        1_700_000_020,
    )
    .await
    .unwrap() else {
        panic!("expected reclaim to succeed");
    };

    ComputationRepository::complete_success(
        &pool,
        reclaimed.id,
        serde_json::Value::Null,
        SuccessEffect::ComputeValue { update_revision_on_change: false },
        1_700_000_030,
    )
    .await
    .unwrap();

    let after_second = ExecutionRepository::load(&pool, loaded.execution.id).await.unwrap().unwrap();
    assert_eq!(
        after_second.execution.revision, after_first.execution.revision,
        "re-completing with the same value must not bump the revision again"
    );
}

#[sqlx::test]
async fn reclaim_abandoned_batch_flips_expired_rows(pool: sqlx::PgPool) {
    let graph = sum_graph();
    let loaded = ExecutionRepository::create(&pool, &graph, 1_700_000_000).await.unwrap();
    let sum_computation = loaded.latest_computation("sum").unwrap();

    let ClaimOutcome::Claimed(claimed) = ComputationRepository::claim_computation(
        &pool,
        sum_computation.id,
        &["x".to_string(), "y".to_string()],
        5,
        10,
        1_700_000_000,
    )
    .await
    .unwrap() else {
        panic!("expected claim to succeed");
    };

    let reclaimed = ComputationRepository::reclaim_abandoned_batch(&pool, 1_700_000_100, 10).await.unwrap();
    assert!(reclaimed.iter().any(|c| c.id == claimed.id));
    assert_eq!(reclaimed.iter().find(|c| c.id == claimed.id).unwrap().state, "abandoned");
}
