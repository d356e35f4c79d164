//! Row types for each persisted entity (spec.md §3).
//!
//! Epoch-second fields (`set_time`, `deadline`, `scheduled_time`, …) are
//! stored as `BIGINT` rather than `TIMESTAMPTZ`: they participate in
//! straightforward numeric comparisons against `now()` snapshots threaded
//! through from the caller, which keeps the scheduler's time handling
//! deterministic and easy to unit test without a real clock.

pub mod computation;
pub mod execution;
pub mod sweep_run;
pub mod value;

pub use computation::Computation;
pub use execution::Execution;
pub use sweep_run::SweepRun;
pub use value::Value;
