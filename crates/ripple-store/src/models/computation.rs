//! Computation row (spec.md §3): one row per attempt at computing a
//! non-input node.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use std::collections::HashMap;
use uuid::Uuid;

use crate::error::{DbResult, StoreError};

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Computation {
    pub id: Uuid,
    pub execution_id: Uuid,
    pub node_name: String,
    pub computation_type: String,
    pub state: String,
    pub ex_revision_at_start: Option<i64>,
    pub ex_revision_at_completion: Option<i64>,
    pub scheduled_time: Option<i64>,
    pub start_time: Option<i64>,
    pub completion_time: Option<i64>,
    pub deadline: Option<i64>,
    pub last_heartbeat_at: Option<i64>,
    pub heartbeat_deadline: Option<i64>,
    pub error_details: Option<String>,
    pub computed_with: serde_json::Value,
    pub inserted_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Computation {
    pub fn state(&self) -> DbResult<ripple_core::ComputationState> {
        parse_state(&self.state)
    }

    /// `computed_with` decoded into `{upstream_node: ex_revision}`, the
    /// snapshot the claim transaction captured (spec.md §3 invariant 2).
    pub fn computed_with_map(&self) -> HashMap<String, i64> {
        self.computed_with
            .as_object()
            .map(|obj| {
                obj.iter()
                    .filter_map(|(k, v)| v.as_i64().map(|n| (k.clone(), n)))
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn is_terminal(&self) -> DbResult<bool> {
        Ok(self.state()?.is_terminal())
    }
}

pub fn parse_state(s: &str) -> DbResult<ripple_core::ComputationState> {
    use ripple_core::ComputationState::*;
    Ok(match s {
        "not_set" => NotSet,
        "computing" => Computing,
        "success" => Success,
        "failed" => Failed,
        "abandoned" => Abandoned,
        "cancelled" => Cancelled,
        other => return Err(StoreError::Other(format!("unknown computation state in storage: {other}"))),
    })
}
