use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use ripple_store::ComputationRepository;

use super::Sweep;
use crate::advance::Scheduler;
use crate::error::Result;

/// Executions holding a `not_set` schedule-type computation whose gate may
/// now be satisfied — e.g. a `tick_once` whose upstream `provided?` gate
/// just became true.
pub struct ScheduleNodesSweep {
    batch_size: i64,
}

impl ScheduleNodesSweep {
    pub fn new(batch_size: i64) -> Self {
        Self { batch_size }
    }
}

impl Default for ScheduleNodesSweep {
    fn default() -> Self {
        Self::new(500)
    }
}

#[async_trait]
impl Sweep for ScheduleNodesSweep {
    fn sweep_type(&self) -> &'static str {
        "schedule_nodes"
    }

    async fn run_once(&self, scheduler: &Arc<Scheduler>) -> Result<usize> {
        let execution_ids = ComputationRepository::executions_with_not_set_schedule(scheduler.pool(), self.batch_size).await?;
        let mut processed = 0;
        for execution_id in execution_ids {
            match scheduler.advance(execution_id).await {
                Ok(_) => processed += 1,
                Err(err) => warn!(error = %err, execution_id = %execution_id, "advance failed in schedule_nodes sweep"),
            }
        }
        Ok(processed)
    }
}
