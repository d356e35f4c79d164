//! Reactive invalidation (spec.md §4.9).
//!
//! There is no invalidation cascade on the write path: a `success`
//! computation becomes implicitly stale the moment any upstream it was
//! computed with advances past the revision captured in `computed_with`.
//! This module is the one place that operationalizes "implicitly stale" —
//! [`crate::advance::Scheduler`]'s candidate pass calls it so the staleness
//! rule lives in exactly one spot and stays testable on its own.

use ripple_core::{ComputationState, Graph};
use ripple_store::{Computation, ComputationRepository, LoadedExecution, StorePool};

/// Every non-input node whose latest `success` computation is stale
/// against the current value table, per spec.md §3 invariant 3: any
/// upstream's current `ex_revision` exceeding what `computed_with`
/// recorded at claim time.
pub fn stale_nodes<'a>(graph: &'a Graph, loaded: &LoadedExecution) -> Vec<&'a str> {
    graph
        .step_nodes()
        .filter_map(|step| {
            let latest = loaded.latest_computation(&step.name)?;
            let is_success = matches!(latest.state().ok()?, ComputationState::Success);
            (is_success && is_stale(loaded, latest)).then_some(step.name.as_str())
        })
        .collect()
}

fn is_stale(loaded: &LoadedExecution, computation: &Computation) -> bool {
    computation.computed_with_map().iter().any(|(upstream, seen_revision)| {
        loaded.value(upstream).map(|v| v.ex_revision > *seen_revision).unwrap_or(false)
    })
}

/// Materializes a fresh `not_set` computation row for every stale node so
/// the next `advance` pass picks it up as a candidate. Returns the names
/// invalidated, for logging / tests.
pub async fn invalidate_stale(
    pool: &StorePool,
    graph: &Graph,
    loaded: &LoadedExecution,
) -> Result<Vec<String>, ripple_store::StoreError> {
    let mut invalidated = Vec::new();
    for node_name in stale_nodes(graph, loaded) {
        let Some(step) = graph.node(node_name).and_then(|n| n.as_step()) else {
            continue;
        };
        ComputationRepository::materialize_not_set(pool, loaded.execution.id, node_name, step.kind.as_str(), None)
            .await?;
        invalidated.push(node_name.to_string());
    }
    Ok(invalidated)
}
