//! Core domain models and strongly-typed identifiers.
//!
//! Defines the event record as an open-schema document with typed dedup
//! fields, the correlation key with its trace-id fallback, and the dedup
//! filter consumed by the storage layer. Inbound payloads may carry
//! arbitrary extra fields; those round-trip opaquely through `extra`.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::CoreError;

type PgDb = sqlx::Postgres;
type PgValueRef<'r> = sqlx::postgres::PgValueRef<'r>;
type PgTypeInfo = sqlx::postgres::PgTypeInfo;
type PgArgumentBuffer = sqlx::postgres::PgArgumentBuffer;
type EncodeResult =
    Result<sqlx::encode::IsNull, Box<dyn std::error::Error + Send + Sync + 'static>>;
type BoxDynError = sqlx::error::BoxDynError;

/// Sentinel used when an inbound message cannot be correlated to a
/// workflow instance. Records carrying it are deduplicated by trace id.
pub const UNKNOWN_WORKFLOW_ID: &str = "UNKNOWN_WORKFLOW_ID";

/// Fixed textual pattern for the inbound `eventDate` field
/// (`2024-01-01T10:00:00.000+0000`).
pub const EVENT_DATE_PATTERN: &str = "%Y-%m-%dT%H:%M:%S%.3f%z";

/// Status marker for records produced by the bulk success path.
pub const STATUS_SUCCESS: &str = "SUCCESS";

/// Event type assigned to records produced by the bulk success path.
pub const TYPE_PUBLICATION: &str = "PUBLICATION";

/// Parses an `eventDate` value using the fixed textual pattern.
///
/// The offset is carried in the value itself; the result is normalized to
/// UTC for storage as a true timestamp.
///
/// # Errors
///
/// Returns `CoreError::MalformedPayload` if the value does not match the
/// pattern.
pub fn parse_event_date(raw: &str) -> Result<DateTime<Utc>, CoreError> {
    DateTime::parse_from_str(raw, EVENT_DATE_PATTERN)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| CoreError::MalformedPayload(format!("unparsable eventDate {raw:?}: {e}")))
}

/// Strongly-typed identifier of a stored event record.
///
/// This is the store's internal identity column. It is assigned on insert
/// and never overwritten by an upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RecordId(pub Uuid);

impl RecordId {
    /// Creates a new random record ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RecordId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<Uuid> for RecordId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl sqlx::Type<PgDb> for RecordId {
    fn type_info() -> PgTypeInfo {
        <Uuid as sqlx::Type<PgDb>>::type_info()
    }
}

impl<'r> sqlx::Decode<'r, PgDb> for RecordId {
    fn decode(value: PgValueRef<'r>) -> Result<Self, BoxDynError> {
        let uuid = <Uuid as sqlx::Decode<PgDb>>::decode(value)?;
        Ok(Self(uuid))
    }
}

impl sqlx::Encode<'_, PgDb> for RecordId {
    fn encode_by_ref(&self, buf: &mut PgArgumentBuffer) -> EncodeResult {
        <Uuid as sqlx::Encode<PgDb>>::encode_by_ref(&self.0, buf)
    }
}

/// Correlation key for deduplication.
///
/// Messages normally correlate by workflow instance id. When the id is the
/// [`UNKNOWN_WORKFLOW_ID`] sentinel the trace id substitutes, so records
/// that cannot be tied to a workflow still deduplicate.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CorrelationKey {
    /// Correlate by workflow instance id.
    Workflow(String),
    /// Correlate by trace id (workflow id was the unknown sentinel).
    Trace(String),
}

impl CorrelationKey {
    /// Selects the key for a given workflow id and trace id.
    pub fn select(workflow_instance_id: &str, trace_id: &str) -> Self {
        if workflow_instance_id == UNKNOWN_WORKFLOW_ID {
            Self::Trace(trace_id.to_string())
        } else {
            Self::Workflow(workflow_instance_id.to_string())
        }
    }

    /// Returns the key value regardless of which field it came from.
    pub fn value(&self) -> &str {
        match self {
            Self::Workflow(v) | Self::Trace(v) => v,
        }
    }
}

impl fmt::Display for CorrelationKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Workflow(v) => write!(f, "workflow:{v}"),
            Self::Trace(v) => write!(f, "trace:{v}"),
        }
    }
}

/// Equality filter identifying at most one stored record.
///
/// The (correlation key, event type, event status) triple is the dedup
/// identity: an upsert with a matching filter overwrites the existing
/// record's fields, except the store identity column.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventFilter {
    /// Workflow-or-trace correlation key.
    pub key: CorrelationKey,
    /// Event type component of the dedup identity.
    pub event_type: String,
    /// Event status component of the dedup identity.
    pub event_status: String,
}

/// One occurrence of a workflow transitioning through a status.
///
/// The typed fields are the ones the store filters on; everything else the
/// inbound payload carried is preserved opaquely in `extra`. Field names
/// follow the wire format of the inbound documents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    /// Workflow instance id attached during normalization; may be the
    /// [`UNKNOWN_WORKFLOW_ID`] sentinel.
    #[serde(rename = "workflow_instance_id")]
    pub workflow_instance_id: String,

    /// Trace id from the inbound document, used as the fallback
    /// correlation key.
    #[serde(rename = "traceId", default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,

    /// Event type; part of the dedup identity.
    #[serde(rename = "eventType")]
    pub event_type: String,

    /// Event status; part of the dedup identity.
    #[serde(rename = "eventStatus")]
    pub event_status: String,

    /// Event timestamp, parsed from the fixed textual pattern and stored
    /// as a true timestamp.
    #[serde(rename = "eventDate")]
    pub event_date: DateTime<Utc>,

    /// TTL hint: an external purge process may remove the record after
    /// this instant. Never enforced here.
    #[serde(rename = "expiring_date")]
    pub expiring_date: DateTime<Utc>,

    /// Additional inbound fields carried through opaquely.
    #[serde(flatten)]
    pub extra: serde_json::Map<String, serde_json::Value>,
}

impl EventRecord {
    /// Builds a success-marker record for the bulk insert path.
    ///
    /// Used when a batch of workflow ids completed in one operation and
    /// share a timestamp and expiration.
    pub fn success(
        workflow_instance_id: impl Into<String>,
        event_date: DateTime<Utc>,
        expiring_date: DateTime<Utc>,
    ) -> Self {
        Self {
            workflow_instance_id: workflow_instance_id.into(),
            trace_id: None,
            event_type: TYPE_PUBLICATION.to_string(),
            event_status: STATUS_SUCCESS.to_string(),
            event_date,
            expiring_date,
            extra: serde_json::Map::new(),
        }
    }

    /// Computes the dedup filter for this record.
    ///
    /// Falls back to the trace id when the workflow id is the unknown
    /// sentinel; a missing trace id becomes an empty key, which still
    /// deduplicates consistently.
    pub fn dedup_filter(&self) -> EventFilter {
        EventFilter {
            key: CorrelationKey::select(
                &self.workflow_instance_id,
                self.trace_id.as_deref().unwrap_or_default(),
            ),
            event_type: self.event_type.clone(),
            event_status: self.event_status.clone(),
        }
    }

    /// Returns true if this record matches the given dedup filter.
    ///
    /// A trace filter only matches records stored under the unknown
    /// sentinel; records correlated by workflow id keep their own
    /// identity even when they carry the same trace id.
    pub fn matches(&self, filter: &EventFilter) -> bool {
        if self.event_type != filter.event_type || self.event_status != filter.event_status {
            return false;
        }
        match &filter.key {
            CorrelationKey::Workflow(id) => self.workflow_instance_id == *id,
            CorrelationKey::Trace(id) => {
                self.workflow_instance_id == UNKNOWN_WORKFLOW_ID
                    && self.trace_id.as_deref().unwrap_or_default() == *id
            },
        }
    }
}
