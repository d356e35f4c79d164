//! Public surface glue (spec.md §4.10, §6): `set`/`get`/`unset`/`load`/
//! `list`/`archive` sitting atop the catalog, persistence layer and
//! scheduler.

use std::sync::Arc;
use std::time::Duration;

use tracing::instrument;
use uuid::Uuid;

use ripple_core::{Catalog, ComputationState, Graph};
use ripple_store::{
    Execution, ExecutionFilter, ExecutionRepository, ListOptions, LoadedExecution, StoreConnection,
};

use crate::advance::{now_epoch, Scheduler};
use crate::config::EngineConfig;
use crate::error::{EngineError, Result};

/// The engine's single entry point: owns the catalog, pool and scheduler,
/// and exposes the operations a caller drives an execution with.
#[derive(Clone)]
pub struct RippleEngine {
    scheduler: Arc<Scheduler>,
}

impl RippleEngine {
    pub fn new(connection: StoreConnection, catalog: Arc<Catalog>, config: Arc<EngineConfig>) -> Self {
        Self { scheduler: Scheduler::new(connection.pool().clone(), catalog, config) }
    }

    /// Builds the engine directly from a pool, bypassing [`StoreConnection`]
    /// — useful in tests that already hold a pool provisioned by a test
    /// harness.
    pub fn from_pool(pool: ripple_store::StorePool, catalog: Arc<Catalog>, config: Arc<EngineConfig>) -> Self {
        Self { scheduler: Scheduler::new(pool, catalog, config) }
    }

    pub fn scheduler(&self) -> &Arc<Scheduler> {
        &self.scheduler
    }

    pub fn register_graph(&self, graph: Graph) -> Arc<Graph> {
        self.scheduler.catalog().register(graph)
    }

    #[instrument(skip(self, graph))]
    pub async fn start_execution(&self, graph: &Graph) -> Result<Execution> {
        let loaded = ExecutionRepository::create(self.scheduler.pool(), graph, now_epoch()).await?;
        self.scheduler.advance(loaded.execution.id).await?;
        Ok(loaded.execution)
    }

    pub async fn load(&self, execution_id: Uuid) -> Result<Option<LoadedExecution>> {
        ExecutionRepository::load(self.scheduler.pool(), execution_id).await.map_err(Into::into)
    }

    #[instrument(skip(self, value))]
    pub async fn set(&self, execution_id: Uuid, node: &str, value: serde_json::Value) -> Result<Execution> {
        self.set_with_metadata(execution_id, node, value, None).await
    }

    pub async fn set_with_metadata(
        &self,
        execution_id: Uuid,
        node: &str,
        value: serde_json::Value,
        metadata: Option<serde_json::Value>,
    ) -> Result<Execution> {
        let execution = ExecutionRepository::set_input(
            self.scheduler.pool(),
            execution_id,
            node,
            value,
            metadata,
            now_epoch(),
        )
        .await?;
        self.scheduler.advance(execution_id).await?;
        Ok(execution)
    }

    pub async fn set_many(&self, execution_id: Uuid, entries: Vec<(String, serde_json::Value)>) -> Result<Execution> {
        let execution = ExecutionRepository::set_inputs(self.scheduler.pool(), execution_id, &entries, None, now_epoch()).await?;
        self.scheduler.advance(execution_id).await?;
        Ok(execution)
    }

    pub async fn unset(&self, execution_id: Uuid, nodes: &[String]) -> Result<Execution> {
        let execution = ExecutionRepository::unset(self.scheduler.pool(), execution_id, nodes, now_epoch()).await?;
        self.scheduler.advance(execution_id).await?;
        Ok(execution)
    }

    /// `get(execution, node, opts?)` (spec.md §6). With `opts.wait`, polls
    /// the value row — the one engine operation that blocks the caller —
    /// until the requested condition is observed or `opts.timeout` elapses.
    pub async fn get(&self, execution_id: Uuid, node: &str, opts: GetOptions) -> Result<GetOutcome> {
        let started = tokio::time::Instant::now();
        let baseline_revision = match opts.wait {
            Wait::Newer => self.current_revision(execution_id, node).await?,
            _ => 0,
        };

        loop {
            let loaded = ExecutionRepository::load(self.scheduler.pool(), execution_id)
                .await?
                .ok_or(EngineError::ExecutionNotFound(execution_id))?;
            let Some(value) = loaded.value(node) else {
                return Err(EngineError::UnknownNodes(vec![node.to_string()]));
            };

            // Reactive invalidation (`invalidation::invalidate_stale`) only
            // ever materializes a fresh `not_set` computation row — it
            // never touches the value row. So a node mid-recompute (or
            // waiting to be claimed) can have `value.is_set() == true`
            // while carrying a stale, no-longer-current `node_value`. Input
            // nodes have no computation row at all and are exempt: their
            // value row is the only source of truth for them.
            let computation_state = loaded.latest_computation(node).map(|c| c.state()).transpose()?;
            let effectively_set = match computation_state {
                None | Some(ComputationState::Success) => value.is_set(),
                // Failed, NotSet, Computing, Abandoned, Cancelled: none of
                // these leave `value.node_value` current.
                Some(_) => false,
            };

            let satisfied = match opts.wait {
                Wait::None => true,
                Wait::Any => effectively_set,
                Wait::Newer => value.ex_revision > baseline_revision,
                Wait::AtRevision(target) => value.ex_revision >= target,
            };

            if satisfied {
                if matches!(computation_state, Some(ComputationState::Failed)) {
                    return Ok(GetOutcome::ComputationFailed);
                }
                if !effectively_set {
                    return Ok(GetOutcome::NotSet);
                }
                return Ok(GetOutcome::Value {
                    value: value.node_value.clone().unwrap_or(serde_json::Value::Null),
                    metadata: value.metadata.clone(),
                    revision: value.ex_revision,
                });
            }

            if matches!(opts.wait, Wait::None) || started.elapsed() >= opts.timeout {
                return if matches!(opts.wait, Wait::None) {
                    Ok(GetOutcome::NotSet)
                } else {
                    Err(EngineError::WaitTimeout { node: node.to_string(), timeout_ms: opts.timeout.as_millis() as u64 })
                };
            }

            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    async fn current_revision(&self, execution_id: Uuid, node: &str) -> Result<i64> {
        let loaded = ExecutionRepository::load(self.scheduler.pool(), execution_id)
            .await?
            .ok_or(EngineError::ExecutionNotFound(execution_id))?;
        Ok(loaded.value(node).map(|v| v.ex_revision).unwrap_or(0))
    }

    pub async fn values_all(&self, execution_id: Uuid) -> Result<LoadedExecution> {
        ExecutionRepository::load(self.scheduler.pool(), execution_id)
            .await?
            .ok_or(EngineError::ExecutionNotFound(execution_id))
    }

    pub async fn history(&self, execution_id: Uuid, node: &str) -> Result<Vec<ripple_store::Computation>> {
        ripple_store::ComputationRepository::history(self.scheduler.pool(), execution_id, node)
            .await
            .map_err(Into::into)
    }

    pub async fn list_executions(&self, opts: &ListOptions) -> Result<Vec<Execution>> {
        ExecutionRepository::list(self.scheduler.pool(), opts).await.map_err(Into::into)
    }

    pub async fn count_executions(&self, opts: &ListOptions) -> Result<i64> {
        ExecutionRepository::count(self.scheduler.pool(), opts).await.map_err(Into::into)
    }

    pub async fn archive(&self, execution_id: Uuid) -> Result<Execution> {
        ExecutionRepository::archive(self.scheduler.pool(), execution_id).await.map_err(Into::into)
    }

    pub async fn unarchive(&self, execution_id: Uuid) -> Result<Execution> {
        let execution = ExecutionRepository::unarchive(self.scheduler.pool(), execution_id).await?;
        self.scheduler.advance(execution_id).await?;
        Ok(execution)
    }
}

/// How `get` should wait for a value, mirroring spec.md's `wait: :any |
/// :newer | {wait_for_revision: n}`.
#[derive(Debug, Clone, Copy, Default)]
pub enum Wait {
    #[default]
    None,
    Any,
    Newer,
    AtRevision(i64),
}

#[derive(Debug, Clone, Copy)]
pub struct GetOptions {
    pub wait: Wait,
    pub timeout: Duration,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self { wait: Wait::None, timeout: Duration::from_secs(30) }
    }
}

#[derive(Debug, Clone)]
pub enum GetOutcome {
    Value { value: serde_json::Value, metadata: Option<serde_json::Value>, revision: i64 },
    NotSet,
    ComputationFailed,
}

/// Builds an [`ExecutionFilter`] list for `list_executions`/
/// `count_executions` filters `{node, op, value}` (spec.md §6).
pub fn filter(node: impl Into<String>, op: ripple_store::FilterOp, value: Option<serde_json::Value>) -> ExecutionFilter {
    ExecutionFilter { node: node.into(), op, value }
}
