//! Database connection management: pooling, migrations, health checks.

use sqlx::postgres::{PgPool, PgPoolOptions};
use std::sync::Arc;

use crate::error::{DbResult, StoreError};

/// Type alias for the store's connection pool.
pub type StorePool = PgPool;

/// A cloneable handle to a Postgres connection pool.
#[derive(Clone)]
pub struct StoreConnection {
    pool: Arc<StorePool>,
}

impl StoreConnection {
    /// Connect with the default pool size (5), matching the teacher's
    /// `DatabaseConnection::new` convention.
    pub async fn new(database_url: &str) -> DbResult<Self> {
        Self::with_max_connections(database_url, 5).await
    }

    pub async fn with_max_connections(database_url: &str, max_connections: u32) -> DbResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect(database_url)
            .await
            .map_err(StoreError::from)?;
        Ok(Self { pool: Arc::new(pool) })
    }

    pub fn pool(&self) -> &StorePool {
        &self.pool
    }

    pub async fn run_migrations(&self) -> DbResult<()> {
        sqlx::migrate!("./migrations")
            .run(self.pool.as_ref())
            .await
            .map_err(|e| StoreError::Migration(e.to_string()))
    }

    pub async fn health_check(&self) -> DbResult<()> {
        sqlx::query("SELECT 1").fetch_one(self.pool.as_ref()).await?;
        Ok(())
    }

    pub async fn close(self) {
        self.pool.close().await;
    }
}
