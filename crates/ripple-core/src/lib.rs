//! Graph model, validator, catalog, and readiness evaluator for the
//! ripple reactive computation-graph engine.
//!
//! This crate owns the parts of the system that never touch a database
//! connection: declaring a [`graph::Graph`], validating it, registering it
//! process-wide in a [`catalog::Catalog`], and evaluating a [`gate::Gate`]
//! against a snapshot of upstream values. Persistence lives in
//! `ripple-store`; scheduling and workers live in `ripple-engine`.

pub mod catalog;
pub mod error;
pub mod gate;
pub mod graph;
pub mod validate;
pub mod value;

pub use catalog::Catalog;
pub use error::{CoreError, Result};
pub use gate::{evaluate, Gate, Predicate, Readiness, ValueSnapshot};
pub use graph::{ComputeArgs, ComputeFn, ComputeOutcome, Graph, Node, OnSaveFn, StepNode};
pub use value::{values_equal, ComputationState, ComputationType, NodeType};
