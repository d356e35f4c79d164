//! Node and computation type tags shared by the graph model and the store.

use serde::{Deserialize, Serialize};

/// The kind of a value-bearing node.
///
/// Every graph node is exactly one of these. `Input` nodes are set by
/// callers; every other variant is produced by a computation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Input,
    Compute,
    Mutate,
    TickOnce,
    TickRecurring,
    Archive,
}

impl NodeType {
    /// Schedule-type nodes gate `provided?` on `node_value <= now`, not just
    /// `set_time.is_some()`.
    pub fn is_schedule(self) -> bool {
        matches!(self, NodeType::TickOnce | NodeType::TickRecurring)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            NodeType::Input => "input",
            NodeType::Compute => "compute",
            NodeType::Mutate => "mutate",
            NodeType::TickOnce => "tick_once",
            NodeType::TickRecurring => "tick_recurring",
            NodeType::Archive => "archive",
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The kind of a computation row. Identical to [`NodeType`] minus `Input` —
/// inputs are never computed, so no computation row ever carries that tag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputationType {
    Compute,
    Mutate,
    TickOnce,
    TickRecurring,
    Archive,
}

impl ComputationType {
    pub fn as_str(self) -> &'static str {
        match self {
            ComputationType::Compute => "compute",
            ComputationType::Mutate => "mutate",
            ComputationType::TickOnce => "tick_once",
            ComputationType::TickRecurring => "tick_recurring",
            ComputationType::Archive => "archive",
        }
    }

    pub fn as_node_type(self) -> NodeType {
        match self {
            ComputationType::Compute => NodeType::Compute,
            ComputationType::Mutate => NodeType::Mutate,
            ComputationType::TickOnce => NodeType::TickOnce,
            ComputationType::TickRecurring => NodeType::TickRecurring,
            ComputationType::Archive => NodeType::Archive,
        }
    }
}

impl std::fmt::Display for ComputationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<NodeType> for ComputationType {
    type Error = ();

    fn try_from(value: NodeType) -> Result<Self, Self::Error> {
        match value {
            NodeType::Input => Err(()),
            NodeType::Compute => Ok(ComputationType::Compute),
            NodeType::Mutate => Ok(ComputationType::Mutate),
            NodeType::TickOnce => Ok(ComputationType::TickOnce),
            NodeType::TickRecurring => Ok(ComputationType::TickRecurring),
            NodeType::Archive => Ok(ComputationType::Archive),
        }
    }
}

/// Canonical terminal/transitional state set for a computation row.
///
/// The source material (see DESIGN.md) carries two subtly different
/// definitions of this set across its history, including a since-retired
/// `set` state. This is the one canonical set, applied everywhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComputationState {
    NotSet,
    Computing,
    Success,
    Failed,
    Abandoned,
    Cancelled,
}

impl ComputationState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ComputationState::Success
                | ComputationState::Failed
                | ComputationState::Abandoned
                | ComputationState::Cancelled
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ComputationState::NotSet => "not_set",
            ComputationState::Computing => "computing",
            ComputationState::Success => "success",
            ComputationState::Failed => "failed",
            ComputationState::Abandoned => "abandoned",
            ComputationState::Cancelled => "cancelled",
        }
    }
}

impl std::fmt::Display for ComputationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Deep-structural equality for the schemaless JSON payload stored in
/// `node_value`, after normalization. `serde_json::Value`'s own `PartialEq`
/// already compares objects key-by-key regardless of insertion order
/// (the default build has no `preserve_order` feature), so normalization
/// here is the identity — this function exists as the single named seam
/// callers use for the §4.5 "no-op suppression" check.
pub fn values_equal(a: &serde_json::Value, b: &serde_json::Value) -> bool {
    a == b
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn schedule_nodes_are_tagged() {
        assert!(NodeType::TickOnce.is_schedule());
        assert!(NodeType::TickRecurring.is_schedule());
        assert!(!NodeType::Compute.is_schedule());
        assert!(!NodeType::Input.is_schedule());
    }

    #[test]
    fn computation_type_round_trips_to_node_type() {
        for ct in [
            ComputationType::Compute,
            ComputationType::Mutate,
            ComputationType::TickOnce,
            ComputationType::TickRecurring,
            ComputationType::Archive,
        ] {
            let nt = ct.as_node_type();
            assert_eq!(ComputationType::try_from(nt).unwrap(), ct);
        }
        assert!(ComputationType::try_from(NodeType::Input).is_err());
    }

    #[test]
    fn values_equal_ignores_object_key_order() {
        let a: serde_json::Value = serde_json::json!({"x": 1, "y": 2});
        let b: serde_json::Value = serde_json::json!({"y": 2, "x": 1});
        assert!(values_equal(&a, &b));
    }

    #[test]
    fn terminal_states() {
        assert!(ComputationState::Success.is_terminal());
        assert!(ComputationState::Abandoned.is_terminal());
        assert!(ComputationState::Cancelled.is_terminal());
        assert!(!ComputationState::NotSet.is_terminal());
        assert!(!ComputationState::Computing.is_terminal());
    }
}
