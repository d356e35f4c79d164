//! Error types for graph construction, validation, and catalog lookups.

use thiserror::Error;

/// Errors raised while building, validating, or looking up graphs.
///
/// Validation failures are fatal at graph-construction time: no execution
/// is ever started against a graph that failed to validate.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("duplicate node name: {0}")]
    DuplicateNode(String),

    #[error("node {from} references unknown upstream node {to}")]
    UnknownReference { from: String, to: String },

    #[error("mutate node {node} targets unknown or self node {target}")]
    InvalidMutationTarget { node: String, target: String },

    #[error(
        "mutate node {node} has update_revision_on_change but also gates on its own target {target}, which would cycle"
    )]
    MutationCycle { node: String, target: String },

    #[error("circular dependency: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error(
        "node {node}: heartbeat_interval_seconds ({interval}s) must be >= 30s and <= heartbeat_timeout_seconds/2 ({timeout}s timeout)"
    )]
    InvalidHeartbeatConfig {
        node: String,
        interval: i64,
        timeout: i64,
    },

    #[error("readiness evaluation referenced unknown value node: {0}")]
    MissingValueNode(String),

    #[error("list() requested a version without a name")]
    VersionWithoutName,

    #[error("graph {name} v{version} is not registered")]
    GraphNotRegistered { name: String, version: u32 },

    #[error("{} validation errors: {}", .0.len(), .0.iter().map(|e| e.to_string()).collect::<Vec<_>>().join("; "))]
    Multiple(Vec<CoreError>),
}

pub type Result<T> = std::result::Result<T, CoreError>;
