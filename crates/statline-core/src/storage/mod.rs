//! Database access layer implementing the repository pattern for event
//! persistence.
//!
//! The repository layer translates between domain models and the database
//! schema. All database operations go through these repositories; direct
//! SQL outside this module is forbidden to keep the upsert contract in
//! one place.

use std::sync::Arc;

use sqlx::PgPool;

pub mod events;

use crate::error::Result;

/// Container for repository instances providing unified database access.
#[derive(Clone)]
pub struct Storage {
    /// Repository for event record operations.
    pub events: Arc<events::Repository>,
}

impl Storage {
    /// Creates a new storage instance with the given connection pool.
    pub fn new(pool: PgPool) -> Self {
        let pool = Arc::new(pool);

        Self { events: Arc::new(events::Repository::new(pool)) }
    }

    /// Performs a health check on the database connection.
    ///
    /// # Errors
    ///
    /// Returns `CoreError::Storage` if the connection is unhealthy or the
    /// query times out.
    pub async fn health_check(&self) -> Result<()> {
        let _: (i32,) = sqlx::query_as("SELECT 1").fetch_one(&*self.events.pool()).await?;

        Ok(())
    }
}
