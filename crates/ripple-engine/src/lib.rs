//! Scheduler, workers, sweepers and the public surface for the ripple
//! reactive computation-graph engine (spec.md §4.5-§4.10).
//!
//! `ripple-core` declares what a graph is; `ripple-store` persists it.
//! This crate is the part that actually runs: `advance` finds and claims
//! ready work, `worker` runs it under a heartbeat, `retry` decides what
//! happens after a failure, `sweep` keeps time-based nodes and crashed
//! workers moving even with no caller watching, and `surface` is what an
//! embedding application calls.

pub mod advance;
pub mod config;
pub mod error;
pub mod invalidation;
pub mod retry;
pub mod surface;
pub mod sweep;
pub mod worker;

pub use advance::Scheduler;
pub use config::EngineConfig;
pub use error::{EngineError, Result};
pub use surface::{filter, GetOptions, GetOutcome, RippleEngine, Wait};
