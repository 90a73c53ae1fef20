//! Registry and payload storage for Vigil.
//!
//! PostgreSQL adapters for production and an in-memory store with the same
//! semantics for tests and single-process deployments.

pub mod memory;
pub mod repositories;

pub use memory::{MemoryPayloadStore, MemoryRegistry};
pub use repositories::*;

use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::time::Duration;
use vigil_core::Result;

/// Database connection pool.
#[derive(Clone)]
pub struct Database {
    pool: PgPool,
}

impl Database {
    /// Connect to the database.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(20)
            .acquire_timeout(Duration::from_secs(5))
            .connect(database_url)
            .await
            .map_err(|e| vigil_core::Error::Database(e.to_string()))?;

        Ok(Self { pool })
    }

    /// Get the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| vigil_core::Error::Database(e.to_string()))?;
        Ok(())
    }

    pub fn registry(&self) -> PgCacheRegistry {
        PgCacheRegistry::new(self.pool.clone())
    }

    pub fn payloads(&self) -> PgPayloadStore {
        PgPayloadStore::new(self.pool.clone())
    }
}
