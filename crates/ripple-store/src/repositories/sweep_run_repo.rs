//! Sweep throttling audit trail (spec.md §4.8): every sweep records a
//! `SweepRun` row so the engine can enforce a minimum gap between runs of
//! the same sweep type even across process restarts.

use crate::connection::StorePool;
use crate::error::DbResult;
use crate::models::SweepRun;

pub struct SweepRunRepository;

impl SweepRunRepository {
    pub async fn start_run(pool: &StorePool, sweep_type: &str) -> DbResult<SweepRun> {
        sqlx::query_as::<_, SweepRun>(
            "INSERT INTO sweep_runs (sweep_type, started_at) VALUES ($1, now()) RETURNING *",
        )
        .bind(sweep_type)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn complete_run(pool: &StorePool, id: uuid::Uuid, executions_processed: i64) -> DbResult<SweepRun> {
        sqlx::query_as::<_, SweepRun>(
            "UPDATE sweep_runs SET completed_at = now(), executions_processed = $1, updated_at = now() \
             WHERE id = $2 RETURNING *",
        )
        .bind(executions_processed)
        .bind(id)
        .fetch_one(pool)
        .await
        .map_err(Into::into)
    }

    pub async fn latest_completed(pool: &StorePool, sweep_type: &str) -> DbResult<Option<SweepRun>> {
        sqlx::query_as::<_, SweepRun>(
            "SELECT * FROM sweep_runs WHERE sweep_type = $1 AND completed_at IS NOT NULL \
             ORDER BY completed_at DESC LIMIT 1",
        )
        .bind(sweep_type)
        .fetch_optional(pool)
        .await
        .map_err(Into::into)
    }

    /// True once `min_interval_secs` has elapsed since the last *completed*
    /// run of this sweep type finished. A sweep with no prior run is
    /// always due.
    pub async fn should_run(pool: &StorePool, sweep_type: &str, min_interval_secs: i64) -> DbResult<bool> {
        let Some(last) = Self::latest_completed(pool, sweep_type).await? else {
            return Ok(true);
        };
        let Some(completed_at) = last.completed_at else {
            return Ok(true);
        };
        let elapsed = chrono::Utc::now().signed_duration_since(completed_at).num_seconds();
        Ok(elapsed >= min_interval_secs)
    }

    /// True if a run of this sweep type is currently in flight (no
    /// `completed_at` yet), used to skip overlapping runs after a crash
    /// left a stale in-flight row — the engine treats any in-flight row
    /// older than its own sweep period as abandoned and proceeds anyway.
    pub async fn has_stale_in_flight(pool: &StorePool, sweep_type: &str, stale_after_secs: i64) -> DbResult<bool> {
        let row: Option<(chrono::DateTime<chrono::Utc>,)> = sqlx::query_as(
            "SELECT started_at FROM sweep_runs WHERE sweep_type = $1 AND completed_at IS NULL \
             ORDER BY started_at DESC LIMIT 1",
        )
        .bind(sweep_type)
        .fetch_optional(pool)
        .await?;

        Ok(match row {
            Some((started_at,)) => {
                chrono::Utc::now().signed_duration_since(started_at).num_seconds() < stale_after_secs
            }
            None => false,
        })
    }
}
