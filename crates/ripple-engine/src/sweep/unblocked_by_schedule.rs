use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use ripple_store::ExecutionRepository;

use super::Sweep;
use crate::advance::{now_epoch, Scheduler};
use crate::error::Result;

/// Executions holding a `success` schedule computation whose pulse
/// (`node_value`) has elapsed. The recency filter is on `node_value`, not
/// `set_time` — a `set_time` filter collapses the detection window to
/// roughly zero once the tick period is several times the sweep period.
pub struct UnblockedByScheduleSweep {
    sweep_period_secs: i64,
    batch_size: i64,
}

impl UnblockedByScheduleSweep {
    pub fn new(sweep_period_secs: i64, batch_size: i64) -> Self {
        Self { sweep_period_secs, batch_size }
    }
}

#[async_trait]
impl Sweep for UnblockedByScheduleSweep {
    fn sweep_type(&self) -> &'static str {
        "unblocked_by_schedule"
    }

    async fn run_once(&self, scheduler: &Arc<Scheduler>) -> Result<usize> {
        let now = now_epoch();
        let cutoff = now - (5 * self.sweep_period_secs).max(60);
        let execution_ids = ExecutionRepository::executions_with_due_schedule(scheduler.pool(), cutoff, now, self.batch_size).await?;

        let mut processed = 0;
        for execution_id in execution_ids {
            match scheduler.advance(execution_id).await {
                Ok(_) => processed += 1,
                Err(err) => warn!(error = %err, execution_id = %execution_id, "advance failed in unblocked_by_schedule sweep"),
            }
        }
        Ok(processed)
    }
}
