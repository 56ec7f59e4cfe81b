//! Bulk success-marker persistence.
//!
//! Converts a batch of workflow instance ids into success records sharing
//! one timestamp and expiration, then plain-inserts them. No dedup here;
//! duplicate ids produce duplicate rows by design of the store contract.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::{stream, StreamExt};
use statline_core::{Clock, EventRecord};
use tracing::debug;

use crate::{error::Result, store::EventStore};

/// Upper bound on in-flight record constructions per batch.
const BUILD_CONCURRENCY: usize = 16;

/// Inserts one success record per workflow instance id.
pub struct BulkEventInserter {
    store: Arc<dyn EventStore>,
    clock: Arc<dyn Clock>,
    expiration: Duration,
}

impl BulkEventInserter {
    /// Creates an inserter whose [`save_success_events_now`] records
    /// expire `expiration_days` after insertion.
    ///
    /// [`save_success_events_now`]: Self::save_success_events_now
    pub fn new(store: Arc<dyn EventStore>, clock: Arc<dyn Clock>, expiration_days: i64) -> Self {
        Self { store, clock, expiration: Duration::days(expiration_days) }
    }

    /// Builds and inserts a success record for every id, returning how
    /// many records were written.
    ///
    /// All records in the batch carry the caller-supplied event date and
    /// expiring date, so a batch for work that completed earlier keeps its
    /// original timestamps. A storage failure propagates with no
    /// compensation for records already inserted.
    pub async fn save_success_events<I>(
        &self,
        workflow_instance_ids: I,
        event_date: DateTime<Utc>,
        expiring_date: DateTime<Utc>,
    ) -> Result<usize>
    where
        I: IntoIterator<Item = String>,
    {
        let records: Vec<EventRecord> = stream::iter(workflow_instance_ids)
            .map(|id| async move { EventRecord::success(id, event_date, expiring_date) })
            .buffered(BUILD_CONCURRENCY)
            .collect()
            .await;

        if records.is_empty() {
            return Ok(0);
        }

        let inserted = self.store.insert_many(&records).await?;
        debug!(inserted, "success events inserted");
        Ok(inserted)
    }

    /// Inserts a batch stamped with the current time and the configured
    /// TTL.
    pub async fn save_success_events_now<I>(&self, workflow_instance_ids: I) -> Result<usize>
    where
        I: IntoIterator<Item = String>,
    {
        let event_date = self.clock.now();
        self.save_success_events(workflow_instance_ids, event_date, event_date + self.expiration)
            .await
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use statline_core::{TestClock, STATUS_SUCCESS};

    use super::*;
    use crate::{error::ConsumeError, store::mock::InMemoryEventStore};

    fn inserter(store: Arc<InMemoryEventStore>, clock: Arc<TestClock>) -> BulkEventInserter {
        BulkEventInserter::new(store, clock, 30)
    }

    #[tokio::test]
    async fn inserts_one_record_per_id_with_given_timestamps() {
        let store = Arc::new(InMemoryEventStore::new());
        let clock = Arc::new(TestClock::at(Utc.with_ymd_and_hms(2024, 2, 10, 9, 0, 0).unwrap()));
        let inserter = inserter(store.clone(), clock);

        // The batch completed well before "now"; its timestamps must
        // survive untouched.
        let event_date = Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap();
        let expiring_date = Utc.with_ymd_and_hms(2024, 3, 1, 9, 0, 0).unwrap();

        let ids = vec!["wf-1".to_string(), "wf-2".to_string(), "wf-3".to_string()];
        let inserted = inserter.save_success_events(ids, event_date, expiring_date).await.unwrap();
        assert_eq!(inserted, 3);

        let records = store.records().await;
        assert_eq!(records.len(), 3);
        for (_, record) in &records {
            assert_eq!(record.event_status, STATUS_SUCCESS);
            assert_eq!(record.event_date, event_date);
            assert_eq!(record.expiring_date, expiring_date);
        }
    }

    #[tokio::test]
    async fn now_variant_stamps_clock_time_and_configured_ttl() {
        let store = Arc::new(InMemoryEventStore::new());
        let now = Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap();
        let clock = Arc::new(TestClock::at(now));
        let inserter = inserter(store.clone(), clock);

        let inserted =
            inserter.save_success_events_now(vec!["wf-1".to_string()]).await.unwrap();
        assert_eq!(inserted, 1);

        let records = store.records().await;
        assert_eq!(records[0].1.event_date, now);
        assert_eq!(records[0].1.expiring_date, now + Duration::days(30));
    }

    #[tokio::test]
    async fn empty_batch_inserts_nothing() {
        let store = Arc::new(InMemoryEventStore::new());
        let clock = Arc::new(TestClock::at(Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap()));
        let inserter = inserter(store.clone(), clock);

        let inserted = inserter.save_success_events_now(Vec::new()).await.unwrap();
        assert_eq!(inserted, 0);
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn storage_failure_propagates_without_compensation() {
        let store = Arc::new(InMemoryEventStore::new());
        store.inject_storage_error("connection reset").await;
        let clock = Arc::new(TestClock::at(Utc.with_ymd_and_hms(2024, 2, 1, 9, 0, 0).unwrap()));
        let inserter = inserter(store.clone(), clock);

        let err = inserter
            .save_success_events_now(vec!["wf-1".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, ConsumeError::Storage { .. }));
    }
}
