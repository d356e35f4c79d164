use std::sync::Arc;

use async_trait::async_trait;
use tracing::warn;

use ripple_store::ComputationRepository;

use super::Sweep;
use crate::advance::Scheduler;
use crate::error::Result;

/// Executions whose `updated_at` is older than 10 minutes but within a
/// sliding window — old enough to suspect a missed signal or a bug, recent
/// enough that it isn't just an intentionally idle execution.
pub struct StalledExecutionsSweep {
    older_than_secs: i64,
    window_secs: i64,
    batch_size: i64,
}

impl StalledExecutionsSweep {
    pub fn new(older_than_secs: i64, window_secs: i64, batch_size: i64) -> Self {
        Self { older_than_secs, window_secs, batch_size }
    }
}

impl Default for StalledExecutionsSweep {
    fn default() -> Self {
        Self::new(600, 86_400, 500)
    }
}

#[async_trait]
impl Sweep for StalledExecutionsSweep {
    fn sweep_type(&self) -> &'static str {
        "stalled_executions"
    }

    async fn run_once(&self, scheduler: &Arc<Scheduler>) -> Result<usize> {
        let execution_ids = ComputationRepository::stalled_execution_ids(
            scheduler.pool(),
            self.older_than_secs,
            self.window_secs,
            self.batch_size,
        )
        .await?;

        let mut processed = 0;
        for execution_id in execution_ids {
            match scheduler.advance(execution_id).await {
                Ok(_) => processed += 1,
                Err(err) => warn!(error = %err, execution_id = %execution_id, "advance failed in stalled_executions sweep"),
            }
        }
        Ok(processed)
    }
}
