//! Background sweepers (spec.md §4.8): six periodic passes that drive
//! time-based nodes, detect crashed workers, and recover stalled
//! executions. Each sweep records a [`ripple_store::SweepRun`] row and is
//! throttled against the latest completed run of its own type so
//! concurrent runs across replicas don't pile up.

mod abandoned;
mod missed_schedules;
mod regenerate_recurring;
mod schedule_nodes;
mod stalled_executions;
mod unblocked_by_schedule;

pub use abandoned::AbandonedSweep;
pub use missed_schedules::MissedSchedulesCatchallSweep;
pub use regenerate_recurring::RegenerateScheduleRecurringSweep;
pub use schedule_nodes::ScheduleNodesSweep;
pub use stalled_executions::StalledExecutionsSweep;
pub use unblocked_by_schedule::UnblockedByScheduleSweep;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::{error, info, instrument};

use ripple_store::{StorePool, SweepRunRepository};

use crate::advance::Scheduler;
use crate::config::SweepConfig;
use crate::error::Result;

/// One periodic background pass. Implementors find candidate executions
/// and hand each to `scheduler.advance`; the runner owns throttling,
/// jitter, and the `SweepRun` audit trail.
#[async_trait]
pub trait Sweep: Send + Sync {
    fn sweep_type(&self) -> &'static str;

    /// Finds candidates and advances them, returning how many executions
    /// were touched this run.
    async fn run_once(&self, scheduler: &Arc<Scheduler>) -> Result<usize>;
}

/// Drives one [`Sweep`] on its own periodic loop. `start` returns a handle
/// tests can `stop()` for deterministic sweep control (spec.md §6).
pub struct SweepRunner {
    handle: Option<tokio::task::JoinHandle<()>>,
}

impl SweepRunner {
    pub fn start(sweep: Arc<dyn Sweep>, scheduler: Arc<Scheduler>, config: SweepConfig) -> Self {
        let handle = tokio::spawn(run_loop(sweep, scheduler, config));
        Self { handle: Some(handle) }
    }

    pub fn stop(mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

impl Drop for SweepRunner {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            handle.abort();
        }
    }
}

#[instrument(skip(sweep, scheduler, config), fields(sweep_type = sweep.sweep_type()))]
async fn run_loop(sweep: Arc<dyn Sweep>, scheduler: Arc<Scheduler>, config: SweepConfig) {
    if !config.enabled {
        info!("sweep disabled, loop not started");
        return;
    }

    let startup_jitter = rand::thread_rng().gen_range(5..=25);
    tokio::time::sleep(Duration::from_secs(startup_jitter)).await;

    loop {
        let pool = scheduler.pool();
        match SweepRunRepository::should_run(pool, sweep.sweep_type(), config.min_interval_secs).await {
            Ok(true) => {
                if let Err(err) = run_guarded(sweep.as_ref(), &scheduler, pool).await {
                    error!(error = %err, "sweep pass failed");
                }
            }
            Ok(false) => {
                info!("skipping sweep pass, minimum interval not elapsed");
            }
            Err(err) => {
                error!(error = %err, "failed to check sweep throttle");
            }
        }
        tokio::time::sleep(Duration::from_secs(config.period_secs)).await;
    }
}

async fn run_guarded(sweep: &dyn Sweep, scheduler: &Arc<Scheduler>, pool: &StorePool) -> Result<()> {
    let run = SweepRunRepository::start_run(pool, sweep.sweep_type()).await?;
    let processed = sweep.run_once(scheduler).await;
    let count = match &processed {
        Ok(n) => *n,
        Err(err) => {
            error!(error = %err, "sweep run_once failed, recording zero processed");
            0
        }
    };
    SweepRunRepository::complete_run(pool, run.id, count as i64).await?;
    processed.map(|_| ())
}
