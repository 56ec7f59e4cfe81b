//! Failure routing.
//!
//! Every dispatched message ends in exactly one disposition: succeeded,
//! scheduled for retry, or dead-lettered. Terminal failures are determined
//! by the configured non-retryable set; everything else retries on a fixed
//! interval with no attempt cap.

use std::{sync::Arc, time::Duration};

use tracing::{debug, error, warn};

use crate::{
    bus::{DeadLetterPublisher, InboundMessage, MessageHandler},
    classify::NonRetryableSet,
    error::{ConsumeError, Result},
    DEFAULT_RETRY_INTERVAL_MS,
};

/// Fixed-interval retry policy with unlimited attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedBackoff {
    interval: Duration,
}

impl FixedBackoff {
    /// Creates a policy with the given redelivery interval.
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }

    /// Delay before the next redelivery. Constant across attempts.
    pub fn interval(&self) -> Duration {
        self.interval
    }
}

impl Default for FixedBackoff {
    fn default() -> Self {
        Self::new(Duration::from_millis(DEFAULT_RETRY_INTERVAL_MS))
    }
}

/// Outcome of dispatching one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Handler completed; the message can be acknowledged.
    Succeeded,
    /// Transient failure; the message should be redelivered after `delay`.
    RetryScheduled {
        /// Delay before redelivery.
        delay: Duration,
    },
    /// Terminal failure; the original message was published to
    /// `destination` and can be acknowledged.
    DeadLettered {
        /// Dead-letter destination the message was published to.
        destination: String,
    },
}

/// Dead-letter destination paired with its publisher.
#[derive(Clone)]
pub struct DeadLetterRoute {
    destination: String,
    publisher: Arc<dyn DeadLetterPublisher>,
}

impl DeadLetterRoute {
    /// Creates a route publishing to `destination`.
    pub fn new(destination: impl Into<String>, publisher: Arc<dyn DeadLetterPublisher>) -> Self {
        Self { destination: destination.into(), publisher }
    }

    /// Destination channel name.
    pub fn destination(&self) -> &str {
        &self.destination
    }
}

/// Routes handler failures to retry or dead-letter.
///
/// One router serves any topic; per-topic behavior is entirely in its
/// configuration (non-retryable set, backoff, optional dead-letter route).
/// A router without a route propagates terminal failures to the caller
/// instead of dead-lettering them.
#[derive(Clone)]
pub struct MessageRouter {
    non_retryable: Arc<NonRetryableSet>,
    backoff: FixedBackoff,
    dead_letter: Option<DeadLetterRoute>,
}

impl MessageRouter {
    /// Creates a router with a dead-letter route.
    pub fn new(
        non_retryable: Arc<NonRetryableSet>,
        backoff: FixedBackoff,
        dead_letter: DeadLetterRoute,
    ) -> Self {
        Self { non_retryable, backoff, dead_letter: Some(dead_letter) }
    }

    /// Creates a router with no dead-letter route.
    ///
    /// Terminal failures surface as errors from [`dispatch`](Self::dispatch).
    pub fn without_dead_letter(non_retryable: Arc<NonRetryableSet>, backoff: FixedBackoff) -> Self {
        Self { non_retryable, backoff, dead_letter: None }
    }

    /// Retry interval of the configured backoff policy.
    pub fn backoff_interval(&self) -> Duration {
        self.backoff.interval()
    }

    /// Dispatches one message to the handler and routes the outcome.
    ///
    /// The original message is published to the dead-letter destination
    /// byte-for-byte unchanged, exactly once per terminal failure. A
    /// failed dead-letter publish is returned as an error so the caller
    /// retries the whole dispatch; the handler ran, but nothing was
    /// acknowledged.
    pub async fn dispatch(
        &self,
        message: &InboundMessage,
        handler: &dyn MessageHandler,
    ) -> Result<Disposition> {
        let err = match handler.handle(message).await {
            Ok(()) => return Ok(Disposition::Succeeded),
            Err(err) => err,
        };

        let kind = err.kind();
        if !self.non_retryable.contains(kind) {
            warn!(
                topic = %message.topic,
                error_kind = %kind,
                error = %err,
                delay_ms = self.backoff.interval().as_millis() as u64,
                "transient failure, scheduling redelivery"
            );
            return Ok(Disposition::RetryScheduled { delay: self.backoff.interval() });
        }

        let Some(route) = &self.dead_letter else {
            error!(
                topic = %message.topic,
                error_kind = %kind,
                error = %err,
                "terminal failure with no dead-letter route"
            );
            return Err(err);
        };

        route.publisher.publish(&route.destination, message).await.map_err(|publish_err| {
            error!(
                topic = %message.topic,
                destination = %route.destination,
                error = %publish_err,
                "dead-letter publish failed"
            );
            match publish_err {
                err @ ConsumeError::DeadLetterPublish { .. } => err,
                other => ConsumeError::dead_letter(&route.destination, other.to_string()),
            }
        })?;

        debug!(
            topic = %message.topic,
            destination = %route.destination,
            error_kind = %kind,
            "terminal failure dead-lettered"
        );
        Ok(Disposition::DeadLettered { destination: route.destination.clone() })
    }
}
