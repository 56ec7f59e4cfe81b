//! Message consumption pipeline with retry and dead-letter routing.
//!
//! This crate implements the per-message decision logic of the ingestion
//! service: inbound status events are dispatched to a handler, failures
//! are classified against a configured non-retryable set, and terminal
//! failures are republished unchanged to a dead-letter destination.
//! Successfully processed events are persisted through an idempotent
//! upsert or a bulk insert.
//!
//! # Architecture
//!
//! Consumer workers pull messages from an abstract [`bus::MessageStream`]
//! and run each through a [`router::MessageRouter`]:
//!
//! 1. **Dispatch** - the message goes to the business handler
//! 2. **Classify** - on failure, the error kind is checked against the
//!    configured non-retryable set
//! 3. **Dispose** - retryable failures are redelivered after a fixed
//!    interval without an attempt limit; non-retryable failures are
//!    published to the stream's dead-letter destination
//! 4. **Persist** - successful events reach the store via
//!    [`upsert::EventWriter`] (idempotent upsert) or
//!    [`bulk::BulkEventInserter`] (plain batch insert)
//!
//! The router's state machine is per-message; the non-retryable set is
//! built once at startup and read lock-free afterwards.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod bulk;
pub mod bus;
pub mod classify;
pub mod config;
pub mod engine;
pub mod error;
pub mod pool;
pub mod router;
pub mod store;
pub mod upsert;
mod worker;

pub use bulk::BulkEventInserter;
pub use classify::{ErrorKindRegistry, NonRetryableSet};
pub use config::ConsumerConfig;
pub use engine::ConsumerEngine;
pub use error::{ConsumeError, ErrorKind, Result};
pub use router::{Disposition, FixedBackoff, MessageRouter};
pub use upsert::{EventWriter, PersistingHandler};
pub use worker::EngineStats;

/// Default number of concurrent workers per stream.
pub const DEFAULT_WORKER_COUNT: usize = 3;

/// Default fixed redelivery interval for retryable failures.
pub const DEFAULT_RETRY_INTERVAL_MS: u64 = 5_000;
