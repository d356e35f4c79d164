//! Worker + heartbeat: the two linked tasks spawned per claimed
//! computation (spec.md §4.6).

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use tracing::{error, info, instrument, warn};

use ripple_core::{ComputeArgs, Graph, StepNode};
use ripple_store::{Computation, ComputationRepository, ExecutionRepository, SuccessEffect};

use crate::advance::{now_epoch, Scheduler};
use crate::retry::RetryPolicy;

pub struct Worker {
    scheduler: Arc<Scheduler>,
    graph: Arc<Graph>,
    execution_id: uuid::Uuid,
    step: Arc<StepNode>,
}

impl Worker {
    pub fn new(scheduler: Arc<Scheduler>, graph: Arc<Graph>, execution_id: uuid::Uuid, step: Arc<StepNode>) -> Self {
        Self { scheduler, graph, execution_id, step }
    }

    /// Runs the claimed computation to completion, persists the outcome,
    /// applies the retry policy on failure, and chain-advances the
    /// execution so downstream nodes unblocked by this result run next.
    #[instrument(skip(self, computation), fields(execution_id = %self.execution_id, node = %self.step.name))]
    pub async fn run(&self, computation: Computation) {
        let (cancel_tx, cancel_rx) = tokio::sync::watch::channel(false);
        let heartbeat_handle = self.spawn_heartbeat(computation.id, cancel_tx.clone());

        let outcome = self.execute(&computation, cancel_rx).await;

        // Heartbeat task exits on its own once the row leaves `computing`,
        // but drop the sender so it notices immediately rather than on its
        // next poll tick.
        drop(cancel_tx);
        heartbeat_handle.abort();

        match outcome {
            Ok(value) => {
                if let Err(err) = self.complete_success(&computation, value).await {
                    error!(error = %err, "failed to persist successful computation");
                }
            }
            Err(WorkerOutcome::Failed(reason)) => {
                if let Err(err) = self.complete_failed(&computation, &reason).await {
                    error!(error = %err, "failed to persist failed computation");
                }
            }
            Err(WorkerOutcome::Abandoned) => {
                info!("computation was abandoned by its heartbeat companion");
            }
        }

        if let Err(err) = self.scheduler.advance(self.execution_id).await {
            warn!(error = %err, "chained advance after worker completion failed");
        }
    }

    async fn execute(
        &self,
        computation: &Computation,
        mut cancel_rx: tokio::sync::watch::Receiver<bool>,
    ) -> Result<serde_json::Value, WorkerOutcome> {
        let args = self.build_args(computation).await.map_err(WorkerOutcome::Failed)?;

        let compute_future = self.step.f_compute.call(args);
        tokio::pin!(compute_future);

        tokio::select! {
            result = &mut compute_future => {
                result.map_err(WorkerOutcome::Failed)
            }
            _ = cancel_rx.changed() => {
                if *cancel_rx.borrow() {
                    Err(WorkerOutcome::Abandoned)
                } else {
                    // Sender dropped without signalling abandonment; fall
                    // back to waiting for the compute future directly.
                    compute_future.await.map_err(WorkerOutcome::Failed)
                }
            }
        }
    }

    async fn build_args(&self, computation: &Computation) -> Result<ComputeArgs, String> {
        let loaded = ExecutionRepository::load(self.scheduler.pool(), self.execution_id)
            .await
            .map_err(|e| e.to_string())?
            .ok_or_else(|| "execution vanished before worker ran".to_string())?;

        let mut values = HashMap::new();
        let mut metadata = HashMap::new();
        for upstream in self.step.gated_by.referenced_nodes() {
            if let Some(value) = loaded.value(upstream) {
                values.insert(upstream.to_string(), value.node_value.clone().unwrap_or(serde_json::Value::Null));
                if let Some(meta) = &value.metadata {
                    metadata.insert(upstream.to_string(), meta.clone());
                }
            }
        }
        let _ = computation;
        Ok(ComputeArgs { values, metadata })
    }

    fn spawn_heartbeat(&self, computation_id: uuid::Uuid, cancel_tx: tokio::sync::watch::Sender<bool>) -> tokio::task::JoinHandle<()> {
        let pool = self.scheduler.pool().clone();
        let interval_secs = self.step.heartbeat_interval_seconds.max(1);
        let timeout_secs = self.step.heartbeat_timeout_seconds;
        let deadline = now_epoch() + self.step.abandon_after_seconds;

        tokio::spawn(async move {
            loop {
                let jitter_frac: f64 = rand::thread_rng().gen_range(-0.2..=0.2);
                let sleep_secs = (interval_secs as f64 * (1.0 + jitter_frac)).max(1.0);
                tokio::time::sleep(Duration::from_secs_f64(sleep_secs)).await;

                let now = now_epoch();
                // Enforce the hard deadline in-process too: a compute
                // future that never returns would otherwise only be
                // caught by the out-of-process Abandoned sweep, up to a
                // full sweep period later.
                if now >= deadline {
                    let _ = cancel_tx.send(true);
                    break;
                }

                match ComputationRepository::heartbeat(&pool, computation_id, timeout_secs, now).await {
                    Ok(true) => continue,
                    Ok(false) => {
                        // Row no longer ours: already terminal, past its
                        // hard deadline, or abandoned out from under us by
                        // the Abandoned sweep.
                        let _ = cancel_tx.send(true);
                        break;
                    }
                    Err(err) => {
                        warn!(error = %err, "heartbeat update failed");
                        break;
                    }
                }
            }
        })
    }

    async fn complete_success(&self, computation: &Computation, value: serde_json::Value) -> Result<(), ripple_store::StoreError> {
        let now = now_epoch();
        let effect = match (&self.step.mutates, self.step.kind) {
            (Some(target), _) => SuccessEffect::Mutate {
                target_node: target.clone(),
                target_update_revision_on_change: self.step.update_revision_on_change,
                own_update_revision_on_change: self.step.update_revision_on_change,
            },
            (None, ripple_core::NodeType::TickRecurring) | (None, ripple_core::NodeType::TickOnce) => {
                SuccessEffect::ScheduleValue { update_revision_on_change: self.step.update_revision_on_change }
            }
            (None, ripple_core::NodeType::Archive) => SuccessEffect::Archive,
            (None, _) => SuccessEffect::ComputeValue { update_revision_on_change: self.step.update_revision_on_change },
        };

        ComputationRepository::complete_success(self.scheduler.pool(), computation.id, value.clone(), effect, now).await?;

        if let Some(on_save) = &self.step.f_on_save {
            if let Err(err) = on_save.call(&self.step.name, &value).await {
                warn!(error = %err, "f_on_save failed (best-effort, not affecting persisted state)");
            }
        }
        if let Some(on_save) = &self.graph.on_save {
            if let Err(err) = on_save.call(&self.step.name, &value).await {
                warn!(error = %err, "graph-wide f_on_save failed (best-effort)");
            }
        }

        Ok(())
    }

    async fn complete_failed(&self, computation: &Computation, reason: &str) -> Result<(), ripple_store::StoreError> {
        let now = now_epoch();
        ComputationRepository::complete_failed(self.scheduler.pool(), computation.id, reason, now).await?;
        RetryPolicy::new(self.step.max_retries)
            .maybe_retry(self.scheduler.pool(), self.execution_id, &self.step.name, self.step.kind.as_str())
            .await?;
        Ok(())
    }
}

enum WorkerOutcome {
    Failed(String),
    Abandoned,
}
