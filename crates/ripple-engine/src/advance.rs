//! Scheduler core: `advance(execution)` (spec.md §4.5).

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, instrument, warn, Instrument};
use uuid::Uuid;

use ripple_core::{evaluate, Catalog, ComputationState, Graph, ValueSnapshot};
use ripple_store::{ClaimOutcome, ComputationRepository, ExecutionRepository, LoadedExecution, StorePool};

use crate::config::EngineConfig;
use crate::error::{EngineError, Result};
use crate::worker::Worker;

/// Owns the catalog, pool and config a running engine needs to advance
/// executions and spawn workers. Cheap to clone; every field is an `Arc`.
#[derive(Clone)]
pub struct Scheduler {
    pool: StorePool,
    catalog: Arc<Catalog>,
    config: Arc<EngineConfig>,
    claim_permits: Arc<tokio::sync::Semaphore>,
}

impl Scheduler {
    pub fn new(pool: StorePool, catalog: Arc<Catalog>, config: Arc<EngineConfig>) -> Arc<Self> {
        let claim_permits = Arc::new(tokio::sync::Semaphore::new(config.max_concurrent_claims));
        Arc::new(Self { pool, catalog, config, claim_permits })
    }

    pub fn pool(&self) -> &StorePool {
        &self.pool
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    /// Runs claim passes until a full pass claims nothing new. Returns the
    /// total number of computations claimed across all passes.
    #[instrument(skip(self), fields(execution_id = %execution_id))]
    pub fn advance<'a>(
        self: &'a Arc<Self>,
        execution_id: Uuid,
    ) -> std::pin::Pin<Box<dyn std::future::Future<Output = Result<usize>> + Send + 'a>> {
        // Boxed so the recursive cycle through `Worker::run` (which calls
        // back into `advance`) has a concrete, always-`Send` type for the
        // auto-trait solver to anchor on; without it the mutually
        // recursive futures can't be proven `Send`.
        let span = tracing::Span::current();
        Box::pin(
            async move {
                let mut total_claimed = 0usize;
                loop {
                    let claimed_this_pass = self.advance_one_pass(execution_id).await?;
                    if claimed_this_pass == 0 {
                        break;
                    }
                    total_claimed += claimed_this_pass;
                }
                Ok(total_claimed)
            }
            .instrument(span),
        )
    }

    async fn advance_one_pass(self: &Arc<Self>, execution_id: Uuid) -> Result<usize> {
        let Some(loaded) = ExecutionRepository::load(&self.pool, execution_id).await? else {
            return Err(EngineError::ExecutionNotFound(execution_id));
        };
        if loaded.execution.is_archived() {
            return Ok(0);
        }

        let Some(graph) = self
            .catalog
            .fetch(&loaded.execution.graph_name, loaded.execution.graph_version as u32)
        else {
            warn!(
                graph_name = %loaded.execution.graph_name,
                graph_version = loaded.execution.graph_version,
                "graph not registered, skipping advance"
            );
            return Ok(0);
        };

        let candidates = self.find_candidates(&graph, &loaded).await?;
        if candidates.is_empty() {
            return Ok(0);
        }

        // `find_candidates` may have just materialized brand-new `not_set`
        // computation rows for reactively-invalidated nodes (via
        // `invalidation::invalidate_stale`); `loaded` was fetched before
        // that write and would still show those nodes' stale `success`
        // rows. Reload so the claim loop below locks the row it actually
        // means to claim instead of losing every race against itself.
        let loaded = ExecutionRepository::load(&self.pool, execution_id)
            .await?
            .ok_or(EngineError::ExecutionNotFound(execution_id))?;

        let snapshots = build_snapshots(&loaded, now_epoch());
        let mut claimed = 0usize;

        for node_name in candidates {
            let Some(step) = graph.node(&node_name).and_then(|n| n.as_step().cloned()) else {
                continue;
            };

            let readiness = evaluate(&step.gated_by, &snapshots)?;
            if !readiness.ready {
                debug!(node = %node_name, waiting_on = ?readiness.conditions_not_met, "not ready");
                continue;
            }

            let Some(computation) = loaded.latest_computation(&node_name) else {
                continue;
            };

            let _permit = self.claim_permits.clone().acquire_owned().await.ok();

            let upstream_nodes: Vec<String> =
                step.gated_by.referenced_nodes().into_iter().map(String::from).collect();
            let outcome = ComputationRepository::claim_computation(
                &self.pool,
                computation.id,
                &upstream_nodes,
                step.heartbeat_timeout_seconds,
                step.abandon_after_seconds,
                now_epoch(),
            )
            .await?;

            match outcome {
                ClaimOutcome::Claimed(claimed_row) => {
                    claimed += 1;
                    let worker = Worker::new(self.clone(), graph.clone(), execution_id, Arc::new(step));
                    tokio::spawn(async move {
                        worker.run(claimed_row).await;
                    });
                }
                ClaimOutcome::Conflict => {
                    debug!(node = %node_name, "lost claim race");
                }
            }
        }

        Ok(claimed)
    }

    /// Effective-state pass (spec.md §4.5 step 2): which non-input nodes
    /// are eligible to be evaluated against their gate this round.
    async fn find_candidates(&self, graph: &Graph, loaded: &LoadedExecution) -> Result<Vec<String>> {
        let mut candidates = Vec::new();
        for step in graph.step_nodes() {
            let Some(latest) = loaded.latest_computation(&step.name) else {
                continue;
            };
            match latest.state()? {
                ComputationState::NotSet | ComputationState::Abandoned => {
                    candidates.push(step.name.clone());
                }
                ComputationState::Success => {}
                ComputationState::Computing => {}
                ComputationState::Failed | ComputationState::Cancelled => {}
            }
        }
        let invalidated = crate::invalidation::invalidate_stale(&self.pool, graph, loaded).await?;
        candidates.extend(invalidated);
        Ok(candidates)
    }
}

static NULL_VALUE: serde_json::Value = serde_json::Value::Null;

fn build_snapshots(loaded: &LoadedExecution, now: i64) -> HashMap<String, ValueSnapshot<'_>> {
    let mut map = HashMap::new();
    for value in &loaded.values {
        let node_type = value.node_type().unwrap_or(ripple_core::NodeType::Compute);
        map.insert(
            value.node_name.clone(),
            ValueSnapshot {
                node_name: &value.node_name,
                node_type,
                node_value: value.node_value.as_ref().unwrap_or(&NULL_VALUE),
                set_time: value.set_time,
                now,
            },
        );
    }
    map
}

pub fn now_epoch() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
