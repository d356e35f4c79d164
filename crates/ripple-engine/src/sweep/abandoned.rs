use std::collections::HashSet;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use ripple_store::{ComputationRepository, ExecutionRepository};

use super::Sweep;
use crate::advance::{now_epoch, Scheduler};
use crate::error::Result;
use crate::retry::RetryPolicy;

/// `state=computing AND (deadline < now OR heartbeat_deadline < now)`,
/// claimed `FOR UPDATE SKIP LOCKED`: crashed or hung workers get their row
/// back so a retry (or permanent failure) can take its place.
pub struct AbandonedSweep {
    batch_size: i64,
}

impl AbandonedSweep {
    pub fn new(batch_size: i64) -> Self {
        Self { batch_size }
    }
}

impl Default for AbandonedSweep {
    fn default() -> Self {
        Self::new(200)
    }
}

#[async_trait]
impl Sweep for AbandonedSweep {
    fn sweep_type(&self) -> &'static str {
        "abandoned"
    }

    async fn run_once(&self, scheduler: &Arc<Scheduler>) -> Result<usize> {
        let now = now_epoch();
        let reclaimed = ComputationRepository::reclaim_abandoned_batch(scheduler.pool(), now, self.batch_size).await?;

        let mut touched_executions = HashSet::new();
        for computation in &reclaimed {
            touched_executions.insert(computation.execution_id);

            let max_retries = match ExecutionRepository::load(scheduler.pool(), computation.execution_id).await {
                Ok(Some(loaded)) => scheduler
                    .catalog()
                    .fetch(&loaded.execution.graph_name, loaded.execution.graph_version as u32)
                    .and_then(|g| g.node(&computation.node_name).and_then(|n| n.as_step().map(|s| s.max_retries)))
                    .unwrap_or(0),
                _ => 0,
            };

            if let Err(err) = RetryPolicy::new(max_retries)
                .maybe_retry(scheduler.pool(), computation.execution_id, &computation.node_name, &computation.computation_type)
                .await
            {
                warn!(error = %err, node = %computation.node_name, "retry policy failed for abandoned computation");
            }
        }

        for execution_id in &touched_executions {
            if let Err(err) = scheduler.advance(*execution_id).await {
                warn!(error = %err, execution_id = %execution_id, "advance after abandoned reclaim failed");
            }
        }

        Ok(touched_executions.len())
    }
}
