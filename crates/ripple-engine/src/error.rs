//! Engine-level error taxonomy (spec.md §7).

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("graph {name} v{version} is not registered")]
    GraphNotRegistered { name: String, version: u32 },

    #[error("execution {0} not found")]
    ExecutionNotFound(uuid::Uuid),

    #[error("node {0:?} is not a member of this graph")]
    UnknownNodes(Vec<String>),

    #[error("node {node} is an input node and has no compute function")]
    NotComputable { node: String },

    #[error("computation failed: {0}")]
    ComputationFailed(String),

    #[error("value for node {0} was never set")]
    NotSet(String),

    #[error("wait for node {node} timed out after {timeout_ms}ms")]
    WaitTimeout { node: String, timeout_ms: u64 },

    #[error(transparent)]
    Core(#[from] ripple_core::CoreError),

    #[error(transparent)]
    Store(#[from] ripple_store::StoreError),
}

pub type Result<T> = std::result::Result<T, EngineError>;
