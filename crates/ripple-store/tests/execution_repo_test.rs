//! Exercises `ExecutionRepository` against a real Postgres database.
//! Requires `DATABASE_URL` pointing at a server the `sqlx::test` harness
//! can provision throwaway databases on, mirroring the teacher's
//! repository test layout (one file per repository, one pool per test).

use std::sync::Arc;

use ripple_core::{ComputeArgs, Gate, Graph, Node, NodeType, StepNode};
use ripple_store::{ExecutionRepository, FilterOp};

fn ok_fn() -> Arc<dyn ripple_core::ComputeFn> {
    Arc::new(|_args: ComputeArgs| async move { Ok(serde_json::json!("ok")) })
}

fn greeting_graph() -> Graph {
    let nodes = vec![
        Node::Input { name: "name".into() },
        Node::Step(StepNode {
            name: "greet".into(),
            kind: NodeType::Compute,
            gated_by: Gate::all_provided(["name"]),
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
    Graph::build("greeting", 1, nodes, None).unwrap()
}

#[sqlx::test]
async fn create_materializes_a_value_and_computation_row_per_node(pool: sqlx::PgPool) {
    let graph = greeting_graph();
    let loaded = ExecutionRepository::create(&pool, &graph, 1_700_000_000).await.unwrap();

    assert!(loaded.value("name").is_some());
    assert!(loaded.value("greet").is_some());
    assert!(loaded.value("execution_id").unwrap().is_set());
    assert!(loaded.latest_computation("greet").is_some());
    assert_eq!(loaded.execution.revision, 0);
}

#[sqlx::test]
async fn set_input_bumps_revision_once_per_call(pool: sqlx::PgPool) {
    let graph = greeting_graph();
    let created = ExecutionRepository::create(&pool, &graph, 1_700_000_000).await.unwrap();

    let updated = ExecutionRepository::set_input(
        &pool,
        created.execution.id,
        "name",
        serde_json::json!("Mario"),
        None,
        1_700_000_001,
    )
    .await
    .unwrap();

    assert_eq!(updated.revision, created.execution.revision + 1);

    let loaded = ExecutionRepository::load(&pool, created.execution.id).await.unwrap().unwrap();
    let name_value = loaded.value("name").unwrap();
    assert_eq!(name_value.node_value, Some(serde_json::json!("Mario")));
    assert!(name_value.is_set());
}

#[sqlx::test]
async fn unset_clears_value_and_bumps_revision(pool: sqlx::PgPool) {
    let graph = greeting_graph();
    let created = ExecutionRepository::create(&pool, &graph, 1_700_000_000).await.unwrap();
    ExecutionRepository::set_input(&pool, created.execution.id, "name", serde_json::json!("Mario"), None, 1_700_000_001)
        .await
        .unwrap();

    let updated = ExecutionRepository::unset(&pool, created.execution.id, &["name".to_string()], 1_700_000_002)
        .await
        .unwrap();

    let loaded = ExecutionRepository::load(&pool, created.execution.id).await.unwrap().unwrap();
    let name_value = loaded.value("name").unwrap();
    assert!(!name_value.is_set());
    assert_eq!(name_value.node_value, None);
    assert_eq!(updated.revision, 2);
}

#[sqlx::test]
async fn archive_hides_execution_from_default_listing(pool: sqlx::PgPool) {
    let graph = greeting_graph();
    let created = ExecutionRepository::create(&pool, &graph, 1_700_000_000).await.unwrap();
    ExecutionRepository::archive(&pool, created.execution.id).await.unwrap();

    let opts = ripple_store::ListOptions { graph_name: Some("greeting".into()), ..Default::default() };
    let listed = ExecutionRepository::list(&pool, &opts).await.unwrap();
    assert!(listed.iter().all(|e| e.id != created.execution.id));

    let opts_with_archived = ripple_store::ListOptions {
        graph_name: Some("greeting".into()),
        include_archived: true,
        ..Default::default()
    };
    let listed_with_archived = ExecutionRepository::list(&pool, &opts_with_archived).await.unwrap();
    assert!(listed_with_archived.iter().any(|e| e.id == created.execution.id));
}

#[sqlx::test]
async fn list_filters_by_node_value(pool: sqlx::PgPool) {
    let graph = greeting_graph();
    let created = ExecutionRepository::create(&pool, &graph, 1_700_000_000).await.unwrap();
    ExecutionRepository::set_input(&pool, created.execution.id, "name", serde_json::json!("Mario"), None, 1_700_000_001)
        .await
        .unwrap();

    let opts = ripple_store::ListOptions {
        graph_name: Some("greeting".into()),
        filters: vec![ripple_store::ExecutionFilter {
            node: "name".into(),
            op: FilterOp::Eq,
            value: Some(serde_json::json!("Mario")),
        }],
        ..Default::default()
    };
    let listed = ExecutionRepository::list(&pool, &opts).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, created.execution.id);
}
