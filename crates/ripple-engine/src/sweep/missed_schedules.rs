use std::sync::Arc;

use chrono::Timelike;
use tracing::{info, warn};

use async_trait::async_trait;
use ripple_store::ExecutionRepository;

use super::Sweep;
use crate::advance::{now_epoch, Scheduler};
use crate::error::Result;

/// Catches pulses that are due within a configurable lookback window (spec
/// default 7 days) but have made no downstream progress — a safety net for
/// the other two schedule sweeps, not a replacement for them. Runs at most
/// once a day, gated on a preferred UTC hour so it doesn't fire on every
/// sweep tick once its (long) min-interval has elapsed.
pub struct MissedSchedulesCatchallSweep {
    lookback_days: i64,
    preferred_utc_hour: u32,
    batch_size: i64,
}

impl MissedSchedulesCatchallSweep {
    pub fn new(lookback_days: i64, preferred_utc_hour: u32, batch_size: i64) -> Self {
        Self { lookback_days, preferred_utc_hour, batch_size }
    }
}

#[async_trait]
impl Sweep for MissedSchedulesCatchallSweep {
    fn sweep_type(&self) -> &'static str {
        "missed_schedules_catchall"
    }

    async fn run_once(&self, scheduler: &Arc<Scheduler>) -> Result<usize> {
        let current_hour = chrono::Utc::now().hour();
        if current_hour != self.preferred_utc_hour {
            info!(current_hour, preferred = self.preferred_utc_hour, "not the preferred hour, skipping");
            return Ok(0);
        }

        let now = now_epoch();
        let cutoff = now - self.lookback_days * 86_400;
        let execution_ids = ExecutionRepository::executions_with_due_schedule(scheduler.pool(), cutoff, now, self.batch_size).await?;

        let mut processed = 0;
        for execution_id in execution_ids {
            match scheduler.advance(execution_id).await {
                Ok(_) => processed += 1,
                Err(err) => warn!(error = %err, execution_id = %execution_id, "advance failed in missed_schedules_catchall sweep"),
            }
        }
        Ok(processed)
    }
}
