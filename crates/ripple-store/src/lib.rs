//! Persistence layer for the ripple reactive computation-graph engine
//! (spec.md §3, §4.3).
//!
//! Everything here speaks Postgres through `sqlx`: the schema in
//! `migrations/`, row types in [`models`], and the transactional
//! operations the scheduler and workers call in [`repositories`].

pub mod connection;
pub mod error;
pub mod models;
pub mod repositories;

pub use connection::{StoreConnection, StorePool};
pub use error::{DbResult, StoreError};
pub use models::{Computation, Execution, SweepRun, Value};
pub use repositories::{
    ClaimOutcome, ComputationRepository, ExecutionFilter, ExecutionRepository, FilterOp,
    ListOptions, LoadedExecution, SortDirection, SuccessEffect, SweepRunRepository,
};
