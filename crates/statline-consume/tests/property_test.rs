//! Property-based tests for the dedup identity and upsert contract.
//!
//! Validates over generated write sequences that the store never holds
//! more than one record per (correlation key, event type, event status)
//! and that the surviving record is always the last one written for its
//! identity.

use std::{
    collections::{HashMap, HashSet},
    sync::Arc,
};

use chrono::{TimeZone, Utc};
use proptest::prelude::*;
use statline_consume::store::{mock::InMemoryEventStore, EventStore};
use statline_core::{EventRecord, UNKNOWN_WORKFLOW_ID};

#[derive(Debug, Clone)]
struct Write {
    workflow_instance_id: String,
    trace_id: String,
    event_type: String,
    event_status: String,
    seq: u32,
}

impl Write {
    fn record(&self) -> EventRecord {
        let mut extra = serde_json::Map::new();
        extra.insert("seq".to_string(), serde_json::Value::from(self.seq));
        EventRecord {
            workflow_instance_id: self.workflow_instance_id.clone(),
            trace_id: Some(self.trace_id.clone()),
            event_type: self.event_type.clone(),
            event_status: self.event_status.clone(),
            event_date: Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap(),
            expiring_date: Utc.with_ymd_and_hms(2024, 2, 1, 0, 0, 0).unwrap(),
            extra,
        }
    }
}

/// Small value pools force identity collisions within a sequence.
fn write_strategy() -> impl Strategy<Value = Write> {
    (
        prop_oneof![
            3 => (0u8..3).prop_map(|i| format!("wf-{i}")),
            1 => Just(UNKNOWN_WORKFLOW_ID.to_string()),
        ],
        (0u8..3).prop_map(|i| format!("trace-{i}")),
        prop_oneof![Just("INGEST".to_string()), Just("PUBLICATION".to_string())],
        prop_oneof![Just("OK".to_string()), Just("KO".to_string())],
        any::<u32>(),
    )
        .prop_map(|(workflow_instance_id, trace_id, event_type, event_status, seq)| Write {
            workflow_instance_id,
            trace_id,
            event_type,
            event_status,
            seq,
        })
}

proptest! {
    /// At most one stored record exists per dedup identity, and it carries
    /// the data of the last write for that identity.
    #[test]
    fn upsert_keeps_one_record_per_identity(
        writes in prop::collection::vec(write_strategy(), 1..60),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let store = Arc::new(InMemoryEventStore::new());
            let mut last_seq: HashMap<_, u32> = HashMap::new();

            for write in &writes {
                let record = write.record();
                let filter = record.dedup_filter();
                store.find_one_and_upsert(&filter, &record).await.unwrap();
                last_seq.insert(filter, write.seq);
            }

            let records = store.records().await;
            prop_assert_eq!(records.len(), last_seq.len());

            for (_, record) in &records {
                let filter = record.dedup_filter();
                let expected = last_seq.get(&filter).copied();
                let actual = record.extra["seq"].as_u64().map(|s| s as u32);
                prop_assert_eq!(actual, expected);
            }
            Ok(())
        })?;
    }

    /// Upserting never changes a record's store identity.
    #[test]
    fn upsert_preserves_store_identity(
        writes in prop::collection::vec(write_strategy(), 1..40),
    ) {
        let rt = tokio::runtime::Runtime::new().unwrap();
        rt.block_on(async {
            let store = Arc::new(InMemoryEventStore::new());
            let mut seen_ids = HashSet::new();

            for write in &writes {
                let record = write.record();
                let filter = record.dedup_filter();
                store.find_one_and_upsert(&filter, &record).await.unwrap();

                let matched = store.find(&filter).await;
                prop_assert_eq!(matched.len(), 1);
                seen_ids.insert(matched[0].0);
            }

            // Identities accumulate only when a new dedup identity appears.
            let records = store.records().await;
            prop_assert_eq!(seen_ids.len(), records.len());
            Ok(())
        })?;
    }
}
