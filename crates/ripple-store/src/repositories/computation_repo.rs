//! Computation claim/heartbeat/completion protocol (spec.md §4.3, §4.6).

use std::collections::HashMap;

use sqlx::Postgres;
use uuid::Uuid;

use ripple_core::{values_equal, ComputationState};

use crate::connection::StorePool;
use crate::error::{DbResult, StoreError};
use crate::models::Computation;

pub struct ComputationRepository;

/// Result of an attempted `claim_computation`: either this caller now owns
/// the row, or another worker (or a state change) got there first.
#[derive(Debug)]
pub enum ClaimOutcome {
    Claimed(Computation),
    Conflict,
}

/// Parameterizes what a `complete_success` write actually does to the
/// underlying value row(s), per the node kind the computation belongs to.
#[derive(Debug, Clone)]
pub enum SuccessEffect {
    /// `compute`/`tick_once` nodes: write the returned value to their own
    /// value row.
    ComputeValue { update_revision_on_change: bool },
    /// `tick_recurring`: same as `ComputeValue`, plus the schedule row's
    /// `set_time` always advances so the next pulse-elapsed check works.
    ScheduleValue { update_revision_on_change: bool },
    /// `mutate`: writes the *target* node's value, and separately marks
    /// this node's own value to `"updated <target>"` (spec.md scenario 3).
    Mutate {
        target_node: String,
        target_update_revision_on_change: bool,
        own_update_revision_on_change: bool,
    },
    /// `archive`: no value row changes; the execution itself is archived.
    Archive,
}

impl ComputationRepository {
    /// `materialize_not_set`: inserts a fresh `not_set` computation row for
    /// a node, used when a schedule sweep regenerates the next tick.
    pub async fn materialize_not_set(
        pool: &StorePool,
        execution_id: Uuid,
        node_name: &str,
        computation_type: &str,
        scheduled_time: Option<i64>,
    ) -> DbResult<Computation> {
        sqlx::query_as::<_, Computation>(
            "INSERT INTO computations (execution_id, node_name, computation_type, state, scheduled_time) VALUES ($1, $2, $3, 'not_set', $4) RETURNING *",
        )
        .bind(execution_id)
        .bind(node_name)
        .bind(computation_type)
        .bind(scheduled_time)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }

    /// `claim_computation`: the single-flight "claim and run" protocol
    /// (spec.md §4.3). Locks the target row with `FOR UPDATE SKIP LOCKED`
    /// so a second worker racing for the same row falls straight through
    /// to `Conflict` instead of blocking.
    pub async fn claim_computation(
        pool: &StorePool,
        computation_id: Uuid,
        upstream_nodes: &[String],
        heartbeat_timeout_secs: i64,
        abandon_after_secs: i64,
        now: i64,
    ) -> DbResult<ClaimOutcome> {
        let mut tx = pool.begin().await?;

        let Some(row) = sqlx::query_as::<_, Computation>(
            "SELECT * FROM computations WHERE id = $1 AND state = 'not_set' FOR UPDATE SKIP LOCKED",
        )
        .bind(computation_id)
        .fetch_optional(&mut *tx)
        .await?
        else {
            tx.rollback().await.ok();
            return Ok(ClaimOutcome::Conflict);
        };

        let execution_revision: Option<i64> = sqlx::query_scalar(
            "SELECT revision FROM executions WHERE id = $1 FOR UPDATE",
        )
        .bind(row.execution_id)
        .fetch_optional(&mut *tx)
        .await?;
        let Some(execution_revision) = execution_revision else {
            tx.rollback().await.ok();
            return Err(StoreError::not_found(format!("execution {}", row.execution_id)));
        };

        let computed_with = snapshot_upstreams(&mut tx, row.execution_id, upstream_nodes).await?;

        let deadline = now + abandon_after_secs;
        let heartbeat_deadline = now + heartbeat_timeout_secs;

        let claimed = sqlx::query_as::<_, Computation>(
            "UPDATE computations SET state = 'computing', ex_revision_at_start = $1, start_time = $2, \
             deadline = $3, last_heartbeat_at = $4, heartbeat_deadline = $5, computed_with = $6, updated_at = now() \
             WHERE id = $7 RETURNING *",
        )
        .bind(execution_revision)
        .bind(now)
        .bind(deadline)
        .bind(now)
        .bind(heartbeat_deadline)
        .bind(serde_json::to_value(&computed_with).unwrap_or_default())
        .bind(computation_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(ClaimOutcome::Claimed(claimed))
    }

    /// `heartbeat`: extends `heartbeat_deadline`; returns `false` once the
    /// row has stopped being ours (state changed, the prior heartbeat
    /// already lapsed by more than the grace window, or the hard
    /// `deadline` from `claim_computation` has passed — the heartbeat
    /// itself enforces `abandon_after_seconds` rather than relying solely
    /// on the out-of-process Abandoned sweep to notice).
    pub async fn heartbeat(pool: &StorePool, computation_id: Uuid, timeout_secs: i64, now: i64) -> DbResult<bool> {
        const GRACE_SECS: i64 = 10;
        let result = sqlx::query(
            "UPDATE computations SET last_heartbeat_at = $1, heartbeat_deadline = $2, updated_at = now() \
             WHERE id = $3 AND state = 'computing' AND heartbeat_deadline > $4 AND deadline > $5",
        )
        .bind(now)
        .bind(now + timeout_secs)
        .bind(computation_id)
        .bind(now - GRACE_SECS)
        .bind(now)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// `complete_success`: applies `effect` and marks the row `success`.
    /// No-op suppression (spec.md §4.3 invariant 5) happens here, inside
    /// the same transaction that would otherwise bump the revision, so the
    /// comparison can never race against a concurrent write.
    pub async fn complete_success(
        pool: &StorePool,
        computation_id: Uuid,
        new_value: serde_json::Value,
        effect: SuccessEffect,
        now: i64,
    ) -> DbResult<Computation> {
        let mut tx = pool.begin().await?;

        let row = sqlx::query_as::<_, Computation>("SELECT * FROM computations WHERE id = $1 FOR UPDATE")
            .bind(computation_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::not_found(format!("computation {computation_id}")))?;

        let execution_revision: i64 = sqlx::query_scalar("SELECT revision FROM executions WHERE id = $1 FOR UPDATE")
            .bind(row.execution_id)
            .fetch_one(&mut *tx)
            .await?;

        let mut next_revision = execution_revision;

        match &effect {
            SuccessEffect::ComputeValue { update_revision_on_change }
            | SuccessEffect::ScheduleValue { update_revision_on_change } => {
                let bumped = write_value(
                    &mut tx,
                    row.execution_id,
                    &row.node_name,
                    &new_value,
                    *update_revision_on_change,
                    execution_revision,
                    next_revision,
                    now,
                )
                .await?;
                if bumped {
                    next_revision += 1;
                }
            }
            SuccessEffect::Mutate {
                target_node,
                target_update_revision_on_change,
                own_update_revision_on_change,
            } => {
                let bumped = write_value(
                    &mut tx,
                    row.execution_id,
                    target_node,
                    &new_value,
                    *target_update_revision_on_change,
                    execution_revision,
                    next_revision,
                    now,
                )
                .await?;
                if bumped {
                    next_revision += 1;
                }
                let marker = serde_json::json!(format!("updated {target_node}"));
                let own_bumped = write_value(
                    &mut tx,
                    row.execution_id,
                    &row.node_name,
                    &marker,
                    *own_update_revision_on_change,
                    execution_revision,
                    next_revision,
                    now,
                )
                .await?;
                if own_bumped {
                    next_revision += 1;
                }
            }
            SuccessEffect::Archive => {
                sqlx::query("UPDATE executions SET archived_at = now() WHERE id = $1")
                    .bind(row.execution_id)
                    .execute(&mut *tx)
                    .await?;
            }
        }

        if next_revision != execution_revision {
            sqlx::query("UPDATE executions SET revision = $1, updated_at = now() WHERE id = $2")
                .bind(next_revision)
                .bind(row.execution_id)
                .execute(&mut *tx)
                .await?;
        }

        let completed = sqlx::query_as::<_, Computation>(
            "UPDATE computations SET state = 'success', completion_time = $1, \
             ex_revision_at_completion = $2, updated_at = now() WHERE id = $3 RETURNING *",
        )
        .bind(now)
        .bind(next_revision)
        .bind(computation_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(completed)
    }

    pub async fn complete_failed(
        pool: &StorePool,
        computation_id: Uuid,
        error_details: &str,
        now: i64,
    ) -> DbResult<Computation> {
        sqlx::query_as::<_, Computation>(
            "UPDATE computations SET state = 'failed', completion_time = $1, error_details = $2, updated_at = now() \
             WHERE id = $3 RETURNING *",
        )
        .bind(now)
        .bind(error_details)
        .bind(computation_id)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn cancel(pool: &StorePool, computation_id: Uuid, now: i64) -> DbResult<Computation> {
        sqlx::query_as::<_, Computation>(
            "UPDATE computations SET state = 'cancelled', completion_time = $1, updated_at = now() WHERE id = $2 RETURNING *",
        )
        .bind(now)
        .bind(computation_id)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }

    /// `reclaim_abandoned_batch`: the Abandoned sweep's query — every
    /// `computing` row whose hard deadline or heartbeat deadline has
    /// lapsed, flipped to `abandoned` in one locked pass.
    pub async fn reclaim_abandoned_batch(pool: &StorePool, now: i64, limit: i64) -> DbResult<Vec<Computation>> {
        let mut tx = pool.begin().await?;

        let candidates = sqlx::query_as::<_, Computation>(
            "SELECT * FROM computations WHERE state = 'computing' AND (deadline < $1 OR heartbeat_deadline < $1) \
             ORDER BY updated_at ASC LIMIT $2 FOR UPDATE SKIP LOCKED",
        )
        .bind(now)
        .bind(limit)
        .fetch_all(&mut *tx)
        .await?;

        let mut reclaimed = Vec::with_capacity(candidates.len());
        for candidate in candidates {
            let row = sqlx::query_as::<_, Computation>(
                "UPDATE computations SET state = 'abandoned', completion_time = $1, updated_at = now() WHERE id = $2 RETURNING *",
            )
            .bind(now)
            .bind(candidate.id)
            .fetch_one(&mut *tx)
            .await?;
            reclaimed.push(row);
        }

        tx.commit().await?;
        Ok(reclaimed)
    }

    /// ScheduleNodes sweep (spec.md §4.8): distinct executions holding a
    /// `not_set` schedule-type computation, whose gate may now be met.
    pub async fn executions_with_not_set_schedule(pool: &StorePool, limit: i64) -> DbResult<Vec<Uuid>> {
        let ids: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT DISTINCT execution_id FROM computations \
             WHERE state = 'not_set' AND computation_type IN ('tick_once', 'tick_recurring') \
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(pool)
        .await?;
        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    /// RegenerateScheduleRecurring sweep (spec.md §4.8): `tick_recurring`
    /// nodes whose latest row is a `success` pulse with no `not_set`
    /// successor materialized yet.
    pub async fn due_recurring_without_successor(pool: &StorePool, limit: i64) -> DbResult<Vec<Computation>> {
        sqlx::query_as::<_, Computation>(
            "SELECT c.* FROM computations c \
             WHERE c.computation_type = 'tick_recurring' AND c.state = 'success' \
             AND NOT EXISTS ( \
                 SELECT 1 FROM computations c2 \
                 WHERE c2.execution_id = c.execution_id AND c2.node_name = c.node_name \
                 AND c2.inserted_at > c.inserted_at \
             ) \
             ORDER BY c.completion_time ASC NULLS LAST LIMIT $1",
        )
        .bind(limit)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    /// StalledExecutions sweep (spec.md §4.8): executions whose last write
    /// is older than `older_than_secs` but within `window_secs`, a range
    /// that excludes executions abandoned so long ago they're presumed
    /// intentionally idle rather than stuck.
    pub async fn stalled_execution_ids(
        pool: &StorePool,
        older_than_secs: i64,
        window_secs: i64,
        limit: i64,
    ) -> DbResult<Vec<Uuid>> {
        let ids: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT id FROM executions \
             WHERE archived_at IS NULL \
             AND updated_at < now() - make_interval(secs => $1) \
             AND updated_at > now() - make_interval(secs => $2) \
             LIMIT $3",
        )
        .bind(older_than_secs as f64)
        .bind(window_secs as f64)
        .bind(limit)
        .fetch_all(pool)
        .await?;
        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    /// Number of `abandoned`/`failed` attempts already recorded for a node
    /// within this execution, used by the retry policy (spec.md §4.7).
    /// Attempts "since the last success" (spec.md §4.7): a node that failed
    /// twice, succeeded, then failed again via reactive invalidation has
    /// used one attempt of its retry budget, not three.
    pub async fn retry_attempt_count(pool: &StorePool, execution_id: Uuid, node_name: &str) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM computations \
             WHERE execution_id = $1 AND node_name = $2 AND state IN ('abandoned', 'failed') \
             AND inserted_at > ( \
                 SELECT COALESCE(MAX(inserted_at), '-infinity') FROM computations \
                 WHERE execution_id = $1 AND node_name = $2 AND state = 'success' \
             )",
        )
        .bind(execution_id)
        .bind(node_name)
        .fetch_one(pool)
        .await?;
        Ok(count)
    }

    pub async fn latest_for_node(pool: &StorePool, execution_id: Uuid, node_name: &str) -> DbResult<Option<Computation>> {
        sqlx::query_as::<_, Computation>(
            "SELECT * FROM computations WHERE execution_id = $1 AND node_name = $2 \
             ORDER BY inserted_at DESC LIMIT 1",
        )
        .bind(execution_id)
        .bind(node_name)
        .fetch_optional(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn history(pool: &StorePool, execution_id: Uuid, node_name: &str) -> DbResult<Vec<Computation>> {
        sqlx::query_as::<_, Computation>(
            "SELECT * FROM computations WHERE execution_id = $1 AND node_name = $2 ORDER BY inserted_at ASC",
        )
        .bind(execution_id)
        .bind(node_name)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    /// Rows still `not_set`/`computing` whose `computed_with` snapshot is
    /// stale against the current value table — candidates the invalidation
    /// pass (spec.md §4.9) resets back to `not_set`.
    pub async fn computing_rows_for_execution(pool: &StorePool, execution_id: Uuid) -> DbResult<Vec<Computation>> {
        sqlx::query_as::<_, Computation>(
            "SELECT * FROM computations WHERE execution_id = $1 AND state IN ('not_set', 'computing')",
        )
        .bind(execution_id)
        .fetch_all(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn reset_to_not_set(pool: &StorePool, computation_id: Uuid) -> DbResult<Computation> {
        sqlx::query_as::<_, Computation>(
            "UPDATE computations SET state = 'not_set', ex_revision_at_start = NULL, start_time = NULL, \
             deadline = NULL, last_heartbeat_at = NULL, heartbeat_deadline = NULL, computed_with = '{}'::jsonb, \
             updated_at = now() WHERE id = $1 RETURNING *",
        )
        .bind(computation_id)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }
}

async fn snapshot_upstreams(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    execution_id: Uuid,
    upstream_nodes: &[String],
) -> DbResult<HashMap<String, i64>> {
    if upstream_nodes.is_empty() {
        return Ok(HashMap::new());
    }
    let rows: Vec<(String, i64)> = sqlx::query_as(
        "SELECT node_name, ex_revision FROM values WHERE execution_id = $1 AND node_name = ANY($2)",
    )
    .bind(execution_id)
    .bind(upstream_nodes)
    .fetch_all(&mut **tx)
    .await?;
    Ok(rows.into_iter().collect())
}

/// Writes `new_value` to `node_name`'s value row, only advancing its
/// `ex_revision` (and reporting a bump) when `force` is set or the value
/// genuinely changed — spec.md's idempotent-set suppression.
#[allow(clippy::too_many_arguments)]
async fn write_value(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    execution_id: Uuid,
    node_name: &str,
    new_value: &serde_json::Value,
    force: bool,
    current_execution_revision: i64,
    next_execution_revision: i64,
    now: i64,
) -> DbResult<bool> {
    let existing: Option<(Option<serde_json::Value>,)> =
        sqlx::query_as("SELECT node_value FROM values WHERE execution_id = $1 AND node_name = $2")
            .bind(execution_id)
            .bind(node_name)
            .fetch_optional(&mut **tx)
            .await?;

    let changed = match &existing {
        Some((Some(old),)) => !values_equal(old, new_value),
        Some((None,)) => true,
        None => true,
    };

    let should_bump = force || changed;
    let revision = if should_bump { next_execution_revision + 1 } else { current_execution_revision.max(next_execution_revision) };

    sqlx::query(
        "UPDATE values SET node_value = $1, set_time = $2, ex_revision = $3, updated_at = now() \
         WHERE execution_id = $4 AND node_name = $5",
    )
    .bind(new_value)
    .bind(now)
    .bind(revision)
    .bind(execution_id)
    .bind(node_name)
    .execute(&mut **tx)
    .await?;

    Ok(should_bump)
}

/// Helper for the engine: decides the canonical terminal state a
/// `complete_*` caller should transition into when classifying a raw
/// outcome, per spec.md's canonical set.
pub fn terminal_state_for(success: bool) -> ComputationState {
    if success {
        ComputationState::Success
    } else {
        ComputationState::Failed
    }
}
