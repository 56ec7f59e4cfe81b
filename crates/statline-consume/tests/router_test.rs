//! Routing scenarios for classified failures.
//!
//! Exercises the dispositions end to end with counting handlers: a listed
//! error type dead-letters in exactly one publish with zero redeliveries,
//! while an unlisted one is redelivered after the fixed interval.

use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

use async_trait::async_trait;
use bytes::Bytes;
use statline_consume::{
    bus::{memory::RecordingPublisher, InboundMessage, MessageHandler},
    router::DeadLetterRoute,
    ConsumeError, Disposition, ErrorKind, ErrorKindRegistry, FixedBackoff, MessageRouter,
    NonRetryableSet, Result,
};

struct CountingFailer {
    kind: ErrorKind,
    calls: AtomicUsize,
}

impl CountingFailer {
    fn new(kind: ErrorKind) -> Self {
        Self { kind, calls: AtomicUsize::new(0) }
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageHandler for CountingFailer {
    async fn handle(&self, _message: &InboundMessage) -> Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(ConsumeError::handler(self.kind, "upstream unavailable"))
    }
}

fn legacy_registry() -> ErrorKindRegistry {
    // Deployment config still carries the fully-qualified class names of
    // the previous implementation.
    let mut registry = ErrorKindRegistry::with_defaults();
    registry.register("com.x.TimeoutError", ErrorKind::Timeout);
    registry.register("com.x.IOError", ErrorKind::Io);
    registry
}

fn message() -> InboundMessage {
    InboundMessage::keyed("status", "wf-1", Bytes::from_static(b"{\"v\":1}"))
}

#[tokio::test]
async fn listed_error_dead_letters_in_one_publish_with_zero_retries() {
    let registry = legacy_registry();
    let set = NonRetryableSet::from_names(&registry, ["com.x.TimeoutError"]);
    let publisher = Arc::new(RecordingPublisher::new());
    let router = MessageRouter::new(
        Arc::new(set),
        FixedBackoff::default(),
        DeadLetterRoute::new("status.dlt", publisher.clone()),
    );

    let handler = CountingFailer::new(ErrorKind::Timeout);
    let original = message();
    let disposition = router.dispatch(&original, &handler).await.unwrap();

    assert_eq!(disposition, Disposition::DeadLettered { destination: "status.dlt".into() });
    assert_eq!(handler.calls(), 1);

    let published = publisher.published().await;
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].0, "status.dlt");
    // The original message goes out unchanged.
    assert_eq!(published[0].1, original);
}

#[tokio::test]
async fn unlisted_error_is_redelivered_after_fixed_interval() {
    let registry = legacy_registry();
    let set = NonRetryableSet::from_names(&registry, ["com.x.TimeoutError"]);
    let publisher = Arc::new(RecordingPublisher::new());
    let router = MessageRouter::new(
        Arc::new(set),
        FixedBackoff::default(),
        DeadLetterRoute::new("status.dlt", publisher.clone()),
    );

    let handler = CountingFailer::new(ErrorKind::Io);
    let disposition = router.dispatch(&message(), &handler).await.unwrap();

    assert_eq!(
        disposition,
        Disposition::RetryScheduled { delay: Duration::from_millis(5_000) }
    );
    assert!(publisher.published().await.is_empty());
}

#[tokio::test]
async fn interval_stays_fixed_across_attempts() {
    let registry = legacy_registry();
    let set = NonRetryableSet::from_names(&registry, ["com.x.TimeoutError"]);
    let router = MessageRouter::without_dead_letter(
        Arc::new(set),
        FixedBackoff::new(Duration::from_secs(5)),
    );

    let handler = CountingFailer::new(ErrorKind::Io);
    for _ in 0..10 {
        let disposition = router.dispatch(&message(), &handler).await.unwrap();
        assert_eq!(disposition, Disposition::RetryScheduled { delay: Duration::from_secs(5) });
    }
    assert_eq!(handler.calls(), 10);
}

#[tokio::test]
async fn unresolvable_configured_name_leaves_failures_retryable() {
    let registry = ErrorKindRegistry::with_defaults();
    let set = NonRetryableSet::from_names(
        &registry,
        ["com.x.VanishedError", "com.x.TimeoutError"],
    );
    assert!(set.is_empty());

    let publisher = Arc::new(RecordingPublisher::new());
    let router = MessageRouter::new(
        Arc::new(set),
        FixedBackoff::default(),
        DeadLetterRoute::new("status.dlt", publisher.clone()),
    );

    let handler = CountingFailer::new(ErrorKind::Timeout);
    let disposition = router.dispatch(&message(), &handler).await.unwrap();
    assert!(matches!(disposition, Disposition::RetryScheduled { .. }));
    assert!(publisher.published().await.is_empty());
}
