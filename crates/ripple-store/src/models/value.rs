//! Value row (spec.md §3): one row per `(execution_id, node_name)`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::error::{DbResult, StoreError};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Value {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub node_name: String,
    pub node_type: String,
    pub node_value: Option<serde_json::Value>,
    pub metadata: Option<serde_json::Value>,
    pub set_time: Option<i64>,
    pub ex_revision: i64,
    pub inserted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Value {
    /// Invariant from spec.md §3: `set_time != null` iff the value is
    /// considered "set", independent of whether `node_value` is null.
    pub fn is_set(&self) -> bool {
        self.set_time.is_some()
    }

    pub fn node_type(&self) -> DbResult<ripple_core::NodeType> {
        parse_node_type(&self.node_type)
    }
}

pub fn parse_node_type(s: &str) -> DbResult<ripple_core::NodeType> {
    use ripple_core::NodeType::*;
    Ok(match s {
        "input" => Input,
        "compute" => Compute,
        "mutate" => Mutate,
        "tick_once" => TickOnce,
        "tick_recurring" => TickRecurring,
        "archive" => Archive,
        other => return Err(StoreError::Other(format!("unknown node_type in storage: {other}"))),
    })
}
