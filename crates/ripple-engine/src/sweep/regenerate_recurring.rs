use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use ripple_store::ComputationRepository;

use super::Sweep;
use crate::advance::Scheduler;
use crate::error::Result;

/// `tick_recurring` nodes whose last pulse succeeded but no `not_set`
/// successor row has been materialized yet — regenerates the next tick.
pub struct RegenerateScheduleRecurringSweep {
    batch_size: i64,
}

impl RegenerateScheduleRecurringSweep {
    pub fn new(batch_size: i64) -> Self {
        Self { batch_size }
    }
}

impl Default for RegenerateScheduleRecurringSweep {
    fn default() -> Self {
        Self::new(500)
    }
}

#[async_trait]
impl Sweep for RegenerateScheduleRecurringSweep {
    fn sweep_type(&self) -> &'static str {
        "regenerate_schedule_recurring"
    }

    async fn run_once(&self, scheduler: &Arc<Scheduler>) -> Result<usize> {
        let due = ComputationRepository::due_recurring_without_successor(scheduler.pool(), self.batch_size).await?;

        let mut processed = 0;
        for computation in due {
            ComputationRepository::materialize_not_set(
                scheduler.pool(),
                computation.execution_id,
                &computation.node_name,
                &computation.computation_type,
                None,
            )
            .await?;
            match scheduler.advance(computation.execution_id).await {
                Ok(_) => processed += 1,
                Err(err) => warn!(error = %err, execution_id = %computation.execution_id, "advance failed regenerating recurring schedule"),
            }
        }
        Ok(processed)
    }
}
