//! Repository for event record database operations.
//!
//! Events live in a single table: dedicated columns for the fields the
//! dedup filter matches on, and a JSONB column holding the full document
//! so arbitrary extra fields survive round trips. The upsert contract is
//! implemented here: a matching record has every column overwritten
//! except `id`, the store identity.

use std::sync::Arc;

use sqlx::{types::Json, PgPool, Postgres, Transaction};

use crate::{
    error::Result,
    models::{CorrelationKey, EventFilter, EventRecord, RecordId, UNKNOWN_WORKFLOW_ID},
};

/// Repository for event record database operations.
pub struct Repository {
    pool: Arc<PgPool>,
}

impl Repository {
    /// Creates a new repository instance.
    pub fn new(pool: Arc<PgPool>) -> Self {
        Self { pool }
    }

    /// Returns a reference to the database pool.
    pub fn pool(&self) -> Arc<PgPool> {
        self.pool.clone()
    }

    /// Upserts a record against the dedup filter.
    ///
    /// Finds at most one record matching the filter; if found, overwrites
    /// all columns except the identity column, otherwise inserts a new
    /// record. Atomicity of the find-and-replace is the database's: two
    /// near-simultaneous upserts with the same filter resolve as
    /// last-write-wins.
    ///
    /// # Errors
    ///
    /// Returns error if the transaction or either statement fails.
    pub async fn upsert(&self, filter: &EventFilter, record: &EventRecord) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let updated = self.update_matching(&mut tx, filter, record).await?;
        if updated == 0 {
            self.insert_one(&mut tx, record).await?;
        }

        tx.commit().await?;

        Ok(())
    }

    /// Inserts a batch of records, returning the number inserted.
    ///
    /// Plain inserts, no dedup: this path serves fresh batches where
    /// duplicates are acceptable. The batch runs in one transaction, so a
    /// failure inserts nothing here; partial-insert guarantees beyond that
    /// are the database's.
    ///
    /// # Errors
    ///
    /// Returns error if the transaction or any insert fails.
    pub async fn insert_many(&self, records: &[EventRecord]) -> Result<usize> {
        let mut tx = self.pool.begin().await?;

        for record in records {
            self.insert_one(&mut tx, record).await?;
        }

        tx.commit().await?;

        Ok(records.len())
    }

    /// Overwrites the record matching the filter, leaving `id` untouched.
    async fn update_matching(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        filter: &EventFilter,
        record: &EventRecord,
    ) -> Result<u64> {
        let query = match filter.key {
            CorrelationKey::Workflow(_) => {
                r#"
                UPDATE events
                SET workflow_instance_id = $4,
                    trace_id = $5,
                    event_type = $6,
                    event_status = $7,
                    event_date = $8,
                    expiring_date = $9,
                    payload = $10
                WHERE workflow_instance_id = $1 AND event_type = $2 AND event_status = $3
                "#
            },
            // Trace correlation only ever applies to records stored under
            // the unknown sentinel.
            CorrelationKey::Trace(_) => {
                r#"
                UPDATE events
                SET workflow_instance_id = $4,
                    trace_id = $5,
                    event_type = $6,
                    event_status = $7,
                    event_date = $8,
                    expiring_date = $9,
                    payload = $10
                WHERE trace_id = $1 AND event_type = $2 AND event_status = $3
                  AND workflow_instance_id = $11
                "#
            },
        };

        let mut update = sqlx::query(query)
            .bind(filter.key.value())
            .bind(&filter.event_type)
            .bind(&filter.event_status)
            .bind(&record.workflow_instance_id)
            .bind(&record.trace_id)
            .bind(&record.event_type)
            .bind(&record.event_status)
            .bind(record.event_date)
            .bind(record.expiring_date)
            .bind(Json(record));
        if matches!(filter.key, CorrelationKey::Trace(_)) {
            update = update.bind(UNKNOWN_WORKFLOW_ID);
        }
        let result = update.execute(&mut **tx).await?;

        Ok(result.rows_affected())
    }

    /// Inserts a new record with a fresh identity.
    async fn insert_one(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        record: &EventRecord,
    ) -> Result<RecordId> {
        let id: RecordId = sqlx::query_scalar(
            r#"
            INSERT INTO events (
                id, workflow_instance_id, trace_id, event_type, event_status,
                event_date, expiring_date, payload
            ) VALUES (
                $1, $2, $3, $4, $5, $6, $7, $8
            )
            RETURNING id
            "#,
        )
        .bind(RecordId::new())
        .bind(&record.workflow_instance_id)
        .bind(&record.trace_id)
        .bind(&record.event_type)
        .bind(&record.event_status)
        .bind(record.event_date)
        .bind(record.expiring_date)
        .bind(Json(record))
        .fetch_one(&mut **tx)
        .await?;

        Ok(id)
    }
}
