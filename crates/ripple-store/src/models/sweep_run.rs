//! Sweep-run audit row (spec.md §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct SweepRun {
    pub id: Uuid,
    pub sweep_type: String,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub executions_processed: i64,
    pub inserted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SweepRun {
    pub fn is_in_flight(&self) -> bool {
        self.completed_at.is_none()
    }
}
