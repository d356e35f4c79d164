//! Execution row (spec.md §3).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Execution {
    pub id: Uuid,
    pub graph_name: String,
    pub graph_version: i32,
    pub graph_hash: String,
    pub archived_at: Option<DateTime<Utc>>,
    pub revision: i64,
    pub inserted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Execution {
    pub fn is_archived(&self) -> bool {
        self.archived_at.is_some()
    }
}
