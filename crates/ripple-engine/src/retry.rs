//! Retry & abandonment policy (spec.md §4.7).

use uuid::Uuid;

use ripple_store::{ComputationRepository, StorePool, StoreError};

/// Counts prior `failed`/`abandoned` attempts for a node and decides
/// whether to materialize a fresh `not_set` row so the next `advance` picks
/// it up, or to leave the node permanently failed.
pub struct RetryPolicy {
    max_retries: u32,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Returns `true` if a retry was scheduled, `false` if retries are
    /// exhausted and the node is left `failed` until an upstream change
    /// invalidates it or an operator intervenes.
    pub async fn maybe_retry(
        &self,
        pool: &StorePool,
        execution_id: Uuid,
        node_name: &str,
        computation_type: &str,
    ) -> Result<bool, StoreError> {
        let attempts = ComputationRepository::retry_attempt_count(pool, execution_id, node_name).await?;
        if attempts < self.max_retries as i64 {
            ComputationRepository::materialize_not_set(pool, execution_id, node_name, computation_type, None).await?;
            Ok(true)
        } else {
            Ok(false)
        }
    }
}

/// Manual retry helper exposed to operators (spec.md §7: "the operator
/// calls an explicit retry helper"). Unlike [`RetryPolicy::maybe_retry`]
/// this ignores `max_retries` — it is an explicit override, not an
/// automatic decision.
pub async fn force_retry(pool: &StorePool, execution_id: Uuid, node_name: &str, computation_type: &str) -> Result<(), StoreError> {
    ComputationRepository::materialize_not_set(pool, execution_id, node_name, computation_type, None).await?;
    Ok(())
}
