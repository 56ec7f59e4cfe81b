//! Durable event store abstraction.
//!
//! The pipeline writes through [`EventStore`]; production uses the
//! Postgres-backed repository, tests use [`mock::InMemoryEventStore`].
//! Upsert atomicity is the store's responsibility; under concurrent
//! writers the last write wins.

use std::sync::Arc;

use async_trait::async_trait;
use statline_core::{EventFilter, EventRecord, Storage};

use crate::error::Result;

/// Upsert-by-filter and bulk-insert over stored event records.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Upserts `record` against the at-most-one record matching `filter`.
    ///
    /// On a match every field is overwritten except the store's identity
    /// column; on no match a new record is inserted.
    ///
    /// A trace-correlated filter only matches records stored under the
    /// unknown-workflow sentinel; a workflow-correlated record sharing
    /// the same trace id keeps its own identity and is never overwritten
    /// by a sentinel write.
    async fn find_one_and_upsert(&self, filter: &EventFilter, record: &EventRecord) -> Result<()>;

    /// Inserts all records and returns how many were written.
    ///
    /// No dedup, no compensation on partial failure.
    async fn insert_many(&self, records: &[EventRecord]) -> Result<usize>;
}

/// [`EventStore`] over the Postgres repository.
pub struct PostgresEventStore {
    storage: Arc<Storage>,
}

impl PostgresEventStore {
    /// Wraps the shared storage container.
    pub fn new(storage: Arc<Storage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl EventStore for PostgresEventStore {
    async fn find_one_and_upsert(&self, filter: &EventFilter, record: &EventRecord) -> Result<()> {
        self.storage.events.upsert(filter, record).await?;
        Ok(())
    }

    async fn insert_many(&self, records: &[EventRecord]) -> Result<usize> {
        Ok(self.storage.events.insert_many(records).await?)
    }
}

pub mod mock {
    //! In-memory event store for tests.

    use std::sync::Arc;

    use async_trait::async_trait;
    use statline_core::{EventFilter, EventRecord};
    use tokio::sync::RwLock;
    use uuid::Uuid;

    use super::EventStore;
    use crate::error::{ConsumeError, Result};

    /// Vec-backed store reproducing the upsert contract.
    ///
    /// Each stored record keeps the identity it was inserted under; an
    /// upsert match replaces the record but never the identity.
    #[derive(Debug, Default)]
    pub struct InMemoryEventStore {
        records: Arc<RwLock<Vec<(Uuid, EventRecord)>>>,
        storage_error: Arc<RwLock<Option<String>>>,
    }

    impl InMemoryEventStore {
        /// Creates an empty store.
        pub fn new() -> Self {
            Self::default()
        }

        /// Snapshot of all stored (identity, record) pairs.
        pub async fn records(&self) -> Vec<(Uuid, EventRecord)> {
            self.records.read().await.clone()
        }

        /// Number of stored records.
        pub async fn len(&self) -> usize {
            self.records.read().await.len()
        }

        /// Whether the store is empty.
        pub async fn is_empty(&self) -> bool {
            self.records.read().await.is_empty()
        }

        /// Records matching an equality filter.
        pub async fn find(&self, filter: &EventFilter) -> Vec<(Uuid, EventRecord)> {
            self.records
                .read()
                .await
                .iter()
                .filter(|(_, record)| record.matches(filter))
                .cloned()
                .collect()
        }

        /// Injects an error for the next store call.
        pub async fn inject_storage_error(&self, error: impl Into<String>) {
            *self.storage_error.write().await = Some(error.into());
        }

        async fn take_injected_error(&self) -> Result<()> {
            if let Some(error) = self.storage_error.write().await.take() {
                return Err(ConsumeError::storage(error));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl EventStore for InMemoryEventStore {
        async fn find_one_and_upsert(
            &self,
            filter: &EventFilter,
            record: &EventRecord,
        ) -> Result<()> {
            self.take_injected_error().await?;
            let mut records = self.records.write().await;
            if let Some((_, existing)) =
                records.iter_mut().find(|(_, candidate)| candidate.matches(filter))
            {
                *existing = record.clone();
            } else {
                records.push((Uuid::new_v4(), record.clone()));
            }
            Ok(())
        }

        async fn insert_many(&self, new_records: &[EventRecord]) -> Result<usize> {
            self.take_injected_error().await?;
            let mut records = self.records.write().await;
            for record in new_records {
                records.push((Uuid::new_v4(), record.clone()));
            }
            Ok(new_records.len())
        }
    }
}
