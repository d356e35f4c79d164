//! Sweep throttle bookkeeping (spec.md §4.8).

use ripple_store::SweepRunRepository;

#[sqlx::test]
async fn should_run_is_true_with_no_prior_runs(pool: sqlx::PgPool) {
    assert!(SweepRunRepository::should_run(&pool, "abandoned", 90).await.unwrap());
}

#[sqlx::test]
async fn should_run_is_false_immediately_after_a_completed_run(pool: sqlx::PgPool) {
    let run = SweepRunRepository::start_run(&pool, "abandoned").await.unwrap();
    SweepRunRepository::complete_run(&pool, run.id, 3).await.unwrap();

    assert!(!SweepRunRepository::should_run(&pool, "abandoned", 90).await.unwrap());
}

#[sqlx::test]
async fn should_run_ignores_other_sweep_types(pool: sqlx::PgPool) {
    let run = SweepRunRepository::start_run(&pool, "abandoned").await.unwrap();
    SweepRunRepository::complete_run(&pool, run.id, 0).await.unwrap();

    assert!(SweepRunRepository::should_run(&pool, "stalled_executions", 90).await.unwrap());
}
