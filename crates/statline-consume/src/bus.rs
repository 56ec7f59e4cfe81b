//! Message bus abstractions.
//!
//! The pipeline never talks to a concrete broker: it consumes an abstract
//! inbound stream and produces abstract dead-letter publishes. Transport
//! adapters (and tests) provide the implementations; the in-memory ones in
//! [`memory`] double as the in-process seam a transport feeds.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;

use crate::error::Result;

/// One message received from the bus.
///
/// The payload is opaque to the pipeline; the key carries the producer's
/// correlation id when one was set.
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Record key, when the producer set one (the workflow instance id).
    pub key: Option<String>,
    /// Opaque payload bytes.
    pub payload: Bytes,
    /// Topic the message arrived on.
    pub topic: String,
}

impl InboundMessage {
    /// Creates a message with a key.
    pub fn keyed(topic: impl Into<String>, key: impl Into<String>, payload: Bytes) -> Self {
        Self { key: Some(key.into()), payload, topic: topic.into() }
    }

    /// Creates a message without a key.
    pub fn unkeyed(topic: impl Into<String>, payload: Bytes) -> Self {
        Self { key: None, payload, topic: topic.into() }
    }
}

/// Business handler the router dispatches each message to.
#[async_trait]
pub trait MessageHandler: Send + Sync {
    /// Processes one message.
    ///
    /// Failures must be tagged with an [`crate::ErrorKind`] so the router
    /// can classify them; untagged errors classify as `Other`.
    async fn handle(&self, message: &InboundMessage) -> Result<()>;
}

/// Inbound message stream (subscribe/receive/ack/nack).
///
/// Redelivery state lives in the bus, not in this process: a `nack`
/// requests redelivery after a delay, and an unacked message is
/// redelivered from the bus's own offset state after a restart.
#[async_trait]
pub trait MessageStream: Send + Sync + 'static {
    /// Receives the next message, or `None` when the stream is currently
    /// empty.
    async fn receive(&self) -> Result<Option<InboundMessage>>;

    /// Acknowledges a message as consumed.
    async fn ack(&self, message: &InboundMessage) -> Result<()>;

    /// Requests redelivery of a message after the given delay.
    async fn nack(&self, message: &InboundMessage, redeliver_after: Duration) -> Result<()>;
}

/// Publisher for the dead-letter destination.
#[async_trait]
pub trait DeadLetterPublisher: Send + Sync {
    /// Publishes the original message unchanged to a destination channel.
    ///
    /// The partition/shard is always left unspecified; the transport
    /// chooses.
    async fn publish(&self, destination: &str, message: &InboundMessage) -> Result<()>;
}

pub mod channel {
    //! Bounded in-process transport seam.
    //!
    //! Production side of the bus abstraction. A transport adapter feeds
    //! inbound records through the stream's sender and drains dead-letter
    //! publishes from the publisher's receiver. Receiving consumes a
    //! message; nothing is retained afterwards, so a long-running process
    //! holds at most the channel capacity.

    use std::time::Duration;

    use async_trait::async_trait;
    use tokio::sync::{mpsc, Mutex};
    use tracing::warn;

    use super::{DeadLetterPublisher, InboundMessage, MessageStream};
    use crate::error::{ConsumeError, Result};

    /// Message stream over a bounded in-process channel.
    ///
    /// Offset state belongs to the transport behind the sender, so `ack`
    /// is a no-op here. `nack` requeues through the sender after the
    /// requested delay.
    pub struct ChannelStream {
        sender: mpsc::Sender<InboundMessage>,
        receiver: Mutex<mpsc::Receiver<InboundMessage>>,
    }

    impl ChannelStream {
        /// Creates a stream holding at most `capacity` undelivered
        /// messages.
        pub fn with_capacity(capacity: usize) -> Self {
            let (sender, receiver) = mpsc::channel(capacity);
            Self { sender, receiver: Mutex::new(receiver) }
        }

        /// Sender the transport adapter feeds inbound records through.
        pub fn sender(&self) -> mpsc::Sender<InboundMessage> {
            self.sender.clone()
        }
    }

    #[async_trait]
    impl MessageStream for ChannelStream {
        async fn receive(&self) -> Result<Option<InboundMessage>> {
            match self.receiver.lock().await.try_recv() {
                Ok(message) => Ok(Some(message)),
                Err(_) => Ok(None),
            }
        }

        async fn ack(&self, _message: &InboundMessage) -> Result<()> {
            Ok(())
        }

        async fn nack(&self, message: &InboundMessage, redeliver_after: Duration) -> Result<()> {
            let sender = self.sender.clone();
            let message = message.clone();
            tokio::spawn(async move {
                tokio::time::sleep(redeliver_after).await;
                if sender.send(message).await.is_err() {
                    warn!("redelivery dropped, stream closed");
                }
            });
            Ok(())
        }
    }

    /// Dead-letter publisher forwarding into an outbound channel.
    ///
    /// Each published message has its topic rewritten to the destination;
    /// the receiver side writes it to the broker with the partition left
    /// unspecified.
    pub struct ChannelPublisher {
        sender: mpsc::Sender<InboundMessage>,
    }

    impl ChannelPublisher {
        /// Creates a publisher and the receiver the transport drains.
        pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<InboundMessage>) {
            let (sender, receiver) = mpsc::channel(capacity);
            (Self { sender }, receiver)
        }
    }

    #[async_trait]
    impl DeadLetterPublisher for ChannelPublisher {
        async fn publish(&self, destination: &str, message: &InboundMessage) -> Result<()> {
            let mut outbound = message.clone();
            outbound.topic = destination.to_string();
            self.sender
                .send(outbound)
                .await
                .map_err(|_| ConsumeError::dead_letter(destination, "outbound channel closed"))
        }
    }
}

pub mod memory {
    //! In-memory bus implementations.
    //!
    //! Deterministic, dependency-free stream and publisher used by tests
    //! and as the in-process attachment point for a transport adapter.
    //! Nacked messages requeue immediately; the requested delay is
    //! recorded so tests can assert on the backoff the router chose.

    use std::{collections::VecDeque, sync::Arc, time::Duration};

    use async_trait::async_trait;
    use tokio::sync::RwLock;

    use super::{DeadLetterPublisher, InboundMessage, MessageStream};
    use crate::error::{ConsumeError, Result};

    /// In-memory message stream backed by a queue.
    #[derive(Debug, Default)]
    pub struct InMemoryStream {
        queue: Arc<RwLock<VecDeque<InboundMessage>>>,
        acked: Arc<RwLock<Vec<InboundMessage>>>,
        redeliveries: Arc<RwLock<Vec<(InboundMessage, Duration)>>>,
    }

    impl InMemoryStream {
        /// Creates an empty stream.
        pub fn new() -> Self {
            Self::default()
        }

        /// Enqueues a message for delivery.
        pub async fn push(&self, message: InboundMessage) {
            self.queue.write().await.push_back(message);
        }

        /// Messages acknowledged so far.
        pub async fn acked(&self) -> Vec<InboundMessage> {
            self.acked.read().await.clone()
        }

        /// Redelivery requests recorded so far, with the requested delay.
        pub async fn redeliveries(&self) -> Vec<(InboundMessage, Duration)> {
            self.redeliveries.read().await.clone()
        }

        /// Number of messages still queued.
        pub async fn pending(&self) -> usize {
            self.queue.read().await.len()
        }
    }

    #[async_trait]
    impl MessageStream for InMemoryStream {
        async fn receive(&self) -> Result<Option<InboundMessage>> {
            Ok(self.queue.write().await.pop_front())
        }

        async fn ack(&self, message: &InboundMessage) -> Result<()> {
            self.acked.write().await.push(message.clone());
            Ok(())
        }

        async fn nack(&self, message: &InboundMessage, redeliver_after: Duration) -> Result<()> {
            self.redeliveries.write().await.push((message.clone(), redeliver_after));
            self.queue.write().await.push_back(message.clone());
            Ok(())
        }
    }

    /// Dead-letter publisher that records every publish.
    ///
    /// Supports injecting a failure for the next publish to exercise the
    /// router's publish-failure path.
    #[derive(Debug, Default)]
    pub struct RecordingPublisher {
        published: Arc<RwLock<Vec<(String, InboundMessage)>>>,
        publish_error: Arc<RwLock<Option<String>>>,
    }

    impl RecordingPublisher {
        /// Creates a publisher with no recorded publishes.
        pub fn new() -> Self {
            Self::default()
        }

        /// Everything published so far, as (destination, message) pairs.
        pub async fn published(&self) -> Vec<(String, InboundMessage)> {
            self.published.read().await.clone()
        }

        /// Injects an error for the next publish.
        pub async fn inject_publish_error(&self, error: impl Into<String>) {
            *self.publish_error.write().await = Some(error.into());
        }
    }

    #[async_trait]
    impl DeadLetterPublisher for RecordingPublisher {
        async fn publish(&self, destination: &str, message: &InboundMessage) -> Result<()> {
            if let Some(error) = self.publish_error.write().await.take() {
                return Err(ConsumeError::dead_letter(destination, error));
            }
            self.published.write().await.push((destination.to_string(), message.clone()));
            Ok(())
        }
    }
}
