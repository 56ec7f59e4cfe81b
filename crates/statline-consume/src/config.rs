//! Runtime configuration for the consumer engine.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{DEFAULT_RETRY_INTERVAL_MS, DEFAULT_WORKER_COUNT};

/// Configuration for one consumer engine instance.
///
/// The binary builds one of these per consumed stream from its own
/// layered configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsumerConfig {
    /// Number of concurrent workers pulling from the stream.
    pub worker_count: usize,

    /// How long an idle worker waits before polling again.
    pub poll_interval: Duration,

    /// Fixed redelivery interval for retryable failures. Attempts are
    /// unlimited.
    pub retry_interval: Duration,

    /// Maximum time to wait for workers to finish during shutdown.
    pub shutdown_timeout: Duration,

    /// Dead-letter destination for terminal failures. `None` makes
    /// terminal failures surface to the worker instead.
    pub dead_letter_topic: Option<String>,

    /// Configured names of non-retryable error types. Unresolvable names
    /// are logged and skipped at startup.
    pub non_retryable_errors: Vec<String>,
}

impl Default for ConsumerConfig {
    fn default() -> Self {
        Self {
            worker_count: DEFAULT_WORKER_COUNT,
            poll_interval: Duration::from_secs(1),
            retry_interval: Duration::from_millis(DEFAULT_RETRY_INTERVAL_MS),
            shutdown_timeout: Duration::from_secs(30),
            dead_letter_topic: None,
            non_retryable_errors: Vec::new(),
        }
    }
}

impl ConsumerConfig {
    /// Config routing terminal failures to `topic`.
    pub fn with_dead_letter_topic(topic: impl Into<String>) -> Self {
        Self { dead_letter_topic: Some(topic.into()), ..Self::default() }
    }
}
