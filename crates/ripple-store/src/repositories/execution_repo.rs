//! Execution + Value persistence (spec.md §4.3).

use sqlx::{Postgres, QueryBuilder};
use std::collections::HashMap;
use uuid::Uuid;

use ripple_core::Graph;

use crate::connection::StorePool;
use crate::error::{DbResult, StoreError};
use crate::models::{Computation, Execution, Value};

/// Synthetic value nodes materialized for every execution, alongside the
/// graph's own nodes (spec.md §3).
pub const SYNTHETIC_NODES: [&str; 2] = ["execution_id", "last_updated_at"];

/// An execution with its values (newest `ex_revision` first) and
/// computations (newest `ex_revision_at_completion` first) eagerly loaded —
/// the shape `load(execution_id)` returns.
#[derive(Debug, Clone)]
pub struct LoadedExecution {
    pub execution: Execution,
    pub values: Vec<Value>,
    pub computations: Vec<Computation>,
}

impl LoadedExecution {
    pub fn value(&self, node_name: &str) -> Option<&Value> {
        self.values.iter().find(|v| v.node_name == node_name)
    }

    /// Latest computation row per node (the first one encountered once
    /// `computations` is sorted newest-first, which it always is here).
    pub fn latest_computation(&self, node_name: &str) -> Option<&Computation> {
        self.computations.iter().find(|c| c.node_name == node_name)
    }
}

pub struct ExecutionRepository;

impl ExecutionRepository {
    /// `start_execution`: materializes a value row for every graph node
    /// (plus the two synthetic nodes) and a `not_set` computation row for
    /// every non-input node.
    pub async fn create(pool: &StorePool, graph: &Graph, now: i64) -> DbResult<LoadedExecution> {
        let mut tx = pool.begin().await?;

        let execution = sqlx::query_as::<_, Execution>(
            "INSERT INTO executions (graph_name, graph_version, graph_hash) VALUES ($1, $2, $3) RETURNING *",
        )
        .bind(&graph.name)
        .bind(graph.version as i32)
        .bind(&graph.hash)
        .fetch_one(&mut *tx)
        .await?;

        for node in &graph.nodes {
            sqlx::query(
                "INSERT INTO values (execution_id, node_name, node_type, ex_revision) VALUES ($1, $2, $3, 0)",
            )
            .bind(execution.id)
            .bind(node.name())
            .bind(node.node_type().as_str())
            .execute(&mut *tx)
            .await?;

            if let Some(step) = node.as_step() {
                sqlx::query(
                    "INSERT INTO computations (execution_id, node_name, computation_type, state) VALUES ($1, $2, $3, 'not_set')",
                )
                .bind(execution.id)
                .bind(&step.name)
                .bind(step.kind.as_str())
                .execute(&mut *tx)
                .await?;
            }
        }

        sqlx::query(
            "INSERT INTO values (execution_id, node_name, node_type, node_value, set_time, ex_revision) VALUES ($1, 'execution_id', 'compute', $2, $3, 0)",
        )
        .bind(execution.id)
        .bind(serde_json::json!(execution.id.to_string()))
        .bind(now)
        .execute(&mut *tx)
        .await?;

        sqlx::query(
            "INSERT INTO values (execution_id, node_name, node_type, ex_revision) VALUES ($1, 'last_updated_at', 'compute', 0)",
        )
        .bind(execution.id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        Self::load(pool, execution.id).await?.ok_or_else(|| StoreError::Other("execution vanished after creation".into()))
    }

    pub async fn load(pool: &StorePool, execution_id: Uuid) -> DbResult<Option<LoadedExecution>> {
        let Some(execution) = sqlx::query_as::<_, Execution>("SELECT * FROM executions WHERE id = $1")
            .bind(execution_id)
            .fetch_optional(pool)
            .await?
        else {
            return Ok(None);
        };

        let values = sqlx::query_as::<_, Value>(
            "SELECT * FROM values WHERE execution_id = $1 ORDER BY ex_revision DESC, node_name ASC",
        )
        .bind(execution_id)
        .fetch_all(pool)
        .await?;

        let computations = sqlx::query_as::<_, Computation>(
            "SELECT * FROM computations WHERE execution_id = $1 ORDER BY ex_revision_at_completion DESC NULLS LAST, inserted_at DESC",
        )
        .bind(execution_id)
        .fetch_all(pool)
        .await?;

        Ok(Some(LoadedExecution { execution, values, computations }))
    }

    /// `set_input`/`set_inputs`: one transaction locking the execution row,
    /// bumping its revision once, and writing every listed value.
    pub async fn set_inputs(
        pool: &StorePool,
        execution_id: Uuid,
        entries: &[(String, serde_json::Value)],
        metadata: Option<serde_json::Value>,
        now: i64,
    ) -> DbResult<Execution> {
        if entries.is_empty() {
            return Self::load_execution_row(pool, execution_id).await;
        }

        let mut tx = pool.begin().await?;

        let execution = sqlx::query_as::<_, Execution>("SELECT * FROM executions WHERE id = $1 FOR UPDATE")
            .bind(execution_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::not_found(format!("execution {execution_id}")))?;

        let new_revision = execution.revision + 1;

        for (node_name, value) in entries {
            let result = sqlx::query(
                "UPDATE values SET node_value = $1, set_time = $2, ex_revision = $3, metadata = COALESCE($4, metadata), updated_at = now() WHERE execution_id = $5 AND node_name = $6",
            )
            .bind(value)
            .bind(now)
            .bind(new_revision)
            .bind(&metadata)
            .bind(execution_id)
            .bind(node_name)
            .execute(&mut *tx)
            .await?;

            if result.rows_affected() == 0 {
                return Err(StoreError::not_found(format!("node {node_name} on execution {execution_id}")));
            }
        }

        touch_last_updated_at(&mut tx, execution_id, now, new_revision).await?;

        let updated = sqlx::query_as::<_, Execution>(
            "UPDATE executions SET revision = $1, updated_at = now() WHERE id = $2 RETURNING *",
        )
        .bind(new_revision)
        .bind(execution_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(updated)
    }

    pub async fn set_input(
        pool: &StorePool,
        execution_id: Uuid,
        node_name: &str,
        value: serde_json::Value,
        metadata: Option<serde_json::Value>,
        now: i64,
    ) -> DbResult<Execution> {
        Self::set_inputs(pool, execution_id, &[(node_name.to_string(), value)], metadata, now).await
    }

    /// `unset`: atomically nulls the listed values and bumps the revision
    /// once, regardless of how many nodes are unset.
    pub async fn unset(pool: &StorePool, execution_id: Uuid, node_names: &[String], now: i64) -> DbResult<Execution> {
        if node_names.is_empty() {
            return Self::load_execution_row(pool, execution_id).await;
        }

        let mut tx = pool.begin().await?;

        let execution = sqlx::query_as::<_, Execution>("SELECT * FROM executions WHERE id = $1 FOR UPDATE")
            .bind(execution_id)
            .fetch_optional(&mut *tx)
            .await?
            .ok_or_else(|| StoreError::not_found(format!("execution {execution_id}")))?;

        let new_revision = execution.revision + 1;

        for node_name in node_names {
            sqlx::query(
                "UPDATE values SET node_value = NULL, set_time = NULL, ex_revision = $1, updated_at = now() WHERE execution_id = $2 AND node_name = $3",
            )
            .bind(new_revision)
            .bind(execution_id)
            .bind(node_name)
            .execute(&mut *tx)
            .await?;
        }

        touch_last_updated_at(&mut tx, execution_id, now, new_revision).await?;

        let updated = sqlx::query_as::<_, Execution>(
            "UPDATE executions SET revision = $1, updated_at = now() WHERE id = $2 RETURNING *",
        )
        .bind(new_revision)
        .bind(execution_id)
        .fetch_one(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(updated)
    }

    /// UnblockedBySchedule / MissedSchedulesCatchall sweeps (spec.md §4.8):
    /// distinct executions with a schedule node whose pulse time
    /// (`node_value`, not `set_time` — the documented recency-filter
    /// wrinkle) falls in `[cutoff, now]`.
    pub async fn executions_with_due_schedule(pool: &StorePool, cutoff: i64, now: i64, limit: i64) -> DbResult<Vec<Uuid>> {
        let ids: Vec<(Uuid,)> = sqlx::query_as(
            "SELECT DISTINCT execution_id FROM values \
             WHERE node_type IN ('tick_once', 'tick_recurring') \
             AND node_value IS NOT NULL \
             AND (node_value #>> '{}')::bigint >= $1 \
             AND (node_value #>> '{}')::bigint <= $2 \
             LIMIT $3",
        )
        .bind(cutoff)
        .bind(now)
        .bind(limit)
        .fetch_all(pool)
        .await?;
        Ok(ids.into_iter().map(|(id,)| id).collect())
    }

    pub async fn archive(pool: &StorePool, execution_id: Uuid) -> DbResult<Execution> {
        sqlx::query_as::<_, Execution>(
            "UPDATE executions SET archived_at = now(), updated_at = now() WHERE id = $1 RETURNING *",
        )
        .bind(execution_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| StoreError::not_found(format!("execution {execution_id}")))
    }

    pub async fn unarchive(pool: &StorePool, execution_id: Uuid) -> DbResult<Execution> {
        sqlx::query_as::<_, Execution>(
            "UPDATE executions SET archived_at = NULL, updated_at = now() WHERE id = $1 RETURNING *",
        )
        .bind(execution_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| StoreError::not_found(format!("execution {execution_id}")))
    }

    pub async fn list(pool: &StorePool, opts: &ListOptions) -> DbResult<Vec<Execution>> {
        let mut qb = base_query(opts);
        qb.push(" ORDER BY e.");
        qb.push(opts.sort_field.as_deref().unwrap_or("updated_at"));
        qb.push(match opts.sort_direction {
            SortDirection::Asc => " ASC",
            SortDirection::Desc => " DESC",
        });
        qb.push(" LIMIT ");
        qb.push_bind(opts.limit.unwrap_or(50) as i64);
        qb.push(" OFFSET ");
        qb.push_bind(opts.offset.unwrap_or(0) as i64);

        let rows = qb.build_query_as::<Execution>().fetch_all(pool).await?;
        Ok(rows)
    }

    pub async fn count(pool: &StorePool, opts: &ListOptions) -> DbResult<i64> {
        let mut qb = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM executions e WHERE 1=1");
        push_filters(&mut qb, opts);
        let (count,): (i64,) = qb.build_query_as().fetch_one(pool).await?;
        Ok(count)
    }

    async fn load_execution_row(pool: &StorePool, execution_id: Uuid) -> DbResult<Execution> {
        sqlx::query_as::<_, Execution>("SELECT * FROM executions WHERE id = $1")
            .bind(execution_id)
            .fetch_optional(pool)
            .await?
            .ok_or_else(|| StoreError::not_found(format!("execution {execution_id}")))
    }
}

async fn touch_last_updated_at(
    tx: &mut sqlx::Transaction<'_, Postgres>,
    execution_id: Uuid,
    now: i64,
    revision: i64,
) -> DbResult<()> {
    sqlx::query(
        "UPDATE values SET node_value = $1, set_time = $2, ex_revision = $3, updated_at = now() WHERE execution_id = $4 AND node_name = 'last_updated_at'",
    )
    .bind(serde_json::json!(now))
    .bind(now)
    .bind(revision)
    .bind(execution_id)
    .execute(&mut **tx)
    .await?;
    Ok(())
}

/// Comparison operators spec.md §6 lists for `list_executions`/`count_executions`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterOp {
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    Contains,
    IContains,
    ListContains,
    IsSet,
    IsNotSet,
}

#[derive(Debug, Clone)]
pub struct ExecutionFilter {
    pub node: String,
    pub op: FilterOp,
    pub value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SortDirection {
    Asc,
    Desc,
}

impl Default for SortDirection {
    fn default() -> Self {
        SortDirection::Desc
    }
}

#[derive(Debug, Clone, Default)]
pub struct ListOptions {
    pub graph_name: Option<String>,
    pub include_archived: bool,
    pub filters: Vec<ExecutionFilter>,
    pub sort_field: Option<String>,
    pub sort_direction: SortDirection,
    pub limit: Option<u32>,
    pub offset: Option<u32>,
}

fn base_query(opts: &ListOptions) -> QueryBuilder<'_, Postgres> {
    let mut qb = QueryBuilder::<Postgres>::new("SELECT e.* FROM executions e WHERE 1=1");
    push_filters(&mut qb, opts);
    qb
}

fn push_filters(qb: &mut QueryBuilder<'_, Postgres>, opts: &ListOptions) {
    if let Some(name) = &opts.graph_name {
        qb.push(" AND e.graph_name = ");
        qb.push_bind(name.clone());
    }
    if !opts.include_archived {
        qb.push(" AND e.archived_at IS NULL");
    }
    for filter in &opts.filters {
        qb.push(" AND EXISTS (SELECT 1 FROM values v WHERE v.execution_id = e.id AND v.node_name = ");
        qb.push_bind(filter.node.clone());
        match filter.op {
            FilterOp::IsSet => {
                qb.push(" AND v.set_time IS NOT NULL");
            }
            FilterOp::IsNotSet => {
                qb.push(" AND v.set_time IS NULL");
            }
            FilterOp::Eq => {
                qb.push(" AND v.node_value = ");
                qb.push_bind(filter.value.clone());
            }
            FilterOp::Ne => {
                qb.push(" AND v.node_value IS DISTINCT FROM ");
                qb.push_bind(filter.value.clone());
            }
            FilterOp::Lt | FilterOp::Le | FilterOp::Gt | FilterOp::Ge => {
                let cmp = match filter.op {
                    FilterOp::Lt => "<",
                    FilterOp::Le => "<=",
                    FilterOp::Gt => ">",
                    FilterOp::Ge => ">=",
                    _ => unreachable!(),
                };
                qb.push(format!(" AND (v.node_value #>> '{{}}')::double precision {cmp} "));
                qb.push_bind(filter.value.as_ref().and_then(|v| v.as_f64()).unwrap_or(0.0));
            }
            FilterOp::Contains => {
                qb.push(" AND (v.node_value #>> '{}') LIKE ");
                qb.push_bind(like_pattern(&filter.value));
            }
            FilterOp::IContains => {
                qb.push(" AND (v.node_value #>> '{}') ILIKE ");
                qb.push_bind(like_pattern(&filter.value));
            }
            FilterOp::ListContains => {
                qb.push(" AND v.node_value @> jsonb_build_array(");
                qb.push_bind(filter.value.clone());
                qb.push(")");
            }
        }
        qb.push(")");
    }
}

fn like_pattern(value: &Option<serde_json::Value>) -> String {
    let raw = value
        .as_ref()
        .and_then(|v| v.as_str().map(String::from))
        .unwrap_or_default();
    format!("%{}%", raw.replace('%', "\\%").replace('_', "\\_"))
}

/// Decoded upstream snapshot for the readiness evaluator: every value node
/// of an execution, keyed by name.
pub fn upstream_snapshots(values: &[Value]) -> HashMap<String, Value> {
    values.iter().map(|v| (v.node_name.clone(), v.clone())).collect()
}
