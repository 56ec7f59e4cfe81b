//! Single-event persistence with idempotent upsert.
//!
//! Normalizes one inbound payload into an [`EventRecord`] and upserts it
//! against its dedup filter. Replaying the same logical event replaces the
//! stored record instead of growing the collection.

use std::sync::Arc;

use chrono::Duration;
use serde_json::Value;
use statline_core::{parse_event_date, Clock, EventRecord};
use tracing::debug;

use crate::{
    error::{ConsumeError, Result},
    store::EventStore,
};

/// Writes normalized event records through the store's upsert.
pub struct EventWriter {
    store: Arc<dyn EventStore>,
    clock: Arc<dyn Clock>,
    expiration: Duration,
}

impl EventWriter {
    /// Creates a writer whose records expire `expiration_days` after
    /// ingestion.
    pub fn new(store: Arc<dyn EventStore>, clock: Arc<dyn Clock>, expiration_days: i64) -> Self {
        Self { store, clock, expiration: Duration::days(expiration_days) }
    }

    /// Persists one inbound payload under the given workflow instance id.
    ///
    /// The payload is parsed as a JSON document; its textual `eventDate`
    /// is replaced with a true timestamp, the workflow id is attached, and
    /// `expiring_date` is stamped as now plus the configured TTL. The
    /// resulting record is upserted against its dedup filter, so a replay
    /// of the same (key, type, status) overwrites the previous write.
    ///
    /// # Errors
    ///
    /// `MalformedPayload` when the payload is not a JSON object, lacks the
    /// typed fields, or carries an unparsable `eventDate`. `Storage` when
    /// the upsert fails.
    pub async fn save_event(&self, payload: &[u8], workflow_instance_id: &str) -> Result<()> {
        let record = self.normalize(payload, workflow_instance_id)?;
        let filter = record.dedup_filter();

        self.store.find_one_and_upsert(&filter, &record).await?;

        debug!(
            workflow_instance_id = %record.workflow_instance_id,
            event_type = %record.event_type,
            event_status = %record.event_status,
            "event upserted"
        );
        Ok(())
    }

    fn normalize(&self, payload: &[u8], workflow_instance_id: &str) -> Result<EventRecord> {
        let mut document: serde_json::Map<String, Value> = serde_json::from_slice(payload)
            .map_err(|e| ConsumeError::malformed(format!("payload is not a JSON object: {e}")))?;

        let raw_date = document
            .get("eventDate")
            .and_then(Value::as_str)
            .ok_or_else(|| ConsumeError::malformed("missing textual eventDate field"))?;
        let event_date = parse_event_date(raw_date).map_err(ConsumeError::from)?;

        document.insert("eventDate".to_string(), serde_json::to_value(event_date)?);
        document.insert(
            "workflow_instance_id".to_string(),
            Value::String(workflow_instance_id.to_string()),
        );
        let expiring_date = self.clock.now() + self.expiration;
        document.insert("expiring_date".to_string(), serde_json::to_value(expiring_date)?);

        let record: EventRecord = serde_json::from_value(Value::Object(document))
            .map_err(|e| ConsumeError::malformed(format!("incomplete event document: {e}")))?;
        Ok(record)
    }
}

/// Bridges the bus to the writer: persists every inbound message.
///
/// The message key carries the workflow instance id; an unkeyed message
/// falls back to the unknown sentinel so it still deduplicates by trace
/// id downstream.
pub struct PersistingHandler {
    writer: Arc<EventWriter>,
}

impl PersistingHandler {
    /// Creates a handler persisting through `writer`.
    pub fn new(writer: Arc<EventWriter>) -> Self {
        Self { writer }
    }
}

#[async_trait::async_trait]
impl crate::bus::MessageHandler for PersistingHandler {
    async fn handle(&self, message: &crate::bus::InboundMessage) -> Result<()> {
        let workflow_instance_id =
            message.key.as_deref().unwrap_or(statline_core::UNKNOWN_WORKFLOW_ID);
        self.writer.save_event(&message.payload, workflow_instance_id).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use statline_core::{TestClock, UNKNOWN_WORKFLOW_ID};

    use super::*;
    use crate::store::mock::InMemoryEventStore;

    fn writer(store: Arc<InMemoryEventStore>, clock: Arc<TestClock>) -> EventWriter {
        EventWriter::new(store, clock, 30)
    }

    fn payload(event_type: &str, event_status: &str, date: &str) -> Vec<u8> {
        serde_json::json!({
            "traceId": "trace-1",
            "eventType": event_type,
            "eventStatus": event_status,
            "eventDate": date,
            "documentRef": "doc-9"
        })
        .to_string()
        .into_bytes()
    }

    #[tokio::test]
    async fn save_event_normalizes_and_stamps_expiration() {
        let store = Arc::new(InMemoryEventStore::new());
        let now = Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap();
        let clock = Arc::new(TestClock::at(now));
        let writer = writer(store.clone(), clock);

        writer
            .save_event(&payload("INGEST", "OK", "2024-01-01T10:00:00.000+0100"), "wf-1")
            .await
            .unwrap();

        let records = store.records().await;
        assert_eq!(records.len(), 1);
        let record = &records[0].1;
        assert_eq!(record.workflow_instance_id, "wf-1");
        assert_eq!(record.event_date, Utc.with_ymd_and_hms(2024, 1, 1, 9, 0, 0).unwrap());
        assert_eq!(record.expiring_date, now + Duration::days(30));
        assert_eq!(record.extra["documentRef"], "doc-9");
    }

    #[tokio::test]
    async fn replay_overwrites_instead_of_duplicating() {
        let store = Arc::new(InMemoryEventStore::new());
        let clock = Arc::new(TestClock::at(Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap()));
        let writer = writer(store.clone(), clock);

        writer
            .save_event(&payload("INGEST", "OK", "2024-01-01T10:00:00.000+0000"), "wf-1")
            .await
            .unwrap();
        writer
            .save_event(&payload("INGEST", "OK", "2024-01-02T10:00:00.000+0000"), "wf-1")
            .await
            .unwrap();

        let records = store.records().await;
        assert_eq!(records.len(), 1);
        assert_eq!(
            records[0].1.event_date,
            Utc.with_ymd_and_hms(2024, 1, 2, 10, 0, 0).unwrap()
        );
    }

    #[tokio::test]
    async fn unknown_workflow_deduplicates_by_trace() {
        let store = Arc::new(InMemoryEventStore::new());
        let clock = Arc::new(TestClock::at(Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap()));
        let writer = writer(store.clone(), clock);

        writer
            .save_event(
                &payload("INGEST", "OK", "2024-01-01T10:00:00.000+0000"),
                UNKNOWN_WORKFLOW_ID,
            )
            .await
            .unwrap();
        writer
            .save_event(
                &payload("INGEST", "OK", "2024-01-03T10:00:00.000+0000"),
                UNKNOWN_WORKFLOW_ID,
            )
            .await
            .unwrap();

        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn malformed_date_writes_nothing() {
        let store = Arc::new(InMemoryEventStore::new());
        let clock = Arc::new(TestClock::at(Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap()));
        let writer = writer(store.clone(), clock);

        let err = writer
            .save_event(&payload("INGEST", "OK", "2024-01-01"), "wf-1")
            .await
            .unwrap_err();
        assert!(matches!(err, ConsumeError::MalformedPayload { .. }));
        assert!(store.is_empty().await);
    }

    #[tokio::test]
    async fn non_object_payload_is_malformed() {
        let store = Arc::new(InMemoryEventStore::new());
        let clock = Arc::new(TestClock::at(Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap()));
        let writer = writer(store.clone(), clock);

        let err = writer.save_event(b"[1, 2, 3]", "wf-1").await.unwrap_err();
        assert!(matches!(err, ConsumeError::MalformedPayload { .. }));
    }

    #[tokio::test]
    async fn handler_uses_message_key_as_workflow_id() {
        use bytes::Bytes;

        use crate::bus::{InboundMessage, MessageHandler};

        let store = Arc::new(InMemoryEventStore::new());
        let clock = Arc::new(TestClock::at(Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap()));
        let handler = PersistingHandler::new(Arc::new(writer(store.clone(), clock)));

        let keyed = InboundMessage::keyed(
            "status",
            "wf-7",
            Bytes::from(payload("INGEST", "OK", "2024-01-01T10:00:00.000+0000")),
        );
        handler.handle(&keyed).await.unwrap();
        assert_eq!(store.records().await[0].1.workflow_instance_id, "wf-7");

        let unkeyed = InboundMessage::unkeyed(
            "status",
            Bytes::from(payload("INGEST", "KO", "2024-01-01T10:00:00.000+0000")),
        );
        handler.handle(&unkeyed).await.unwrap();
        let records = store.records().await;
        assert_eq!(records[1].1.workflow_instance_id, UNKNOWN_WORKFLOW_ID);
    }

    #[tokio::test]
    async fn storage_failure_propagates() {
        let store = Arc::new(InMemoryEventStore::new());
        store.inject_storage_error("pool exhausted").await;
        let clock = Arc::new(TestClock::at(Utc.with_ymd_and_hms(2024, 1, 10, 0, 0, 0).unwrap()));
        let writer = writer(store.clone(), clock);

        let err = writer
            .save_event(&payload("INGEST", "OK", "2024-01-01T10:00:00.000+0000"), "wf-1")
            .await
            .unwrap_err();
        assert!(matches!(err, ConsumeError::Storage { .. }));
    }
}
