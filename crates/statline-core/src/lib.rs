//! Core domain models, error taxonomy, and storage layer.
//!
//! Provides strongly-typed event records, the dedup filter model, the
//! clock abstraction, and the PostgreSQL repository layer. The consume
//! crate depends on these foundational types for type safety and
//! consistency.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod error;
pub mod models;
pub mod storage;
pub mod time;

pub use error::{CoreError, Result};
pub use models::{
    parse_event_date, CorrelationKey, EventFilter, EventRecord, RecordId, EVENT_DATE_PATTERN,
    STATUS_SUCCESS, UNKNOWN_WORKFLOW_ID,
};
pub use storage::Storage;
pub use time::{Clock, RealClock, TestClock};
