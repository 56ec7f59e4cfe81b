//! Consumer engine coordinating workers over one message stream.

use std::sync::Arc;

use statline_core::Clock;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    bus::{DeadLetterPublisher, MessageHandler, MessageStream},
    classify::{ErrorKindRegistry, NonRetryableSet},
    config::ConsumerConfig,
    error::Result,
    pool::WorkerPool,
    router::{DeadLetterRoute, FixedBackoff, MessageRouter},
    worker::{ConsumeWorker, EngineStats},
};

/// Main engine wiring stream, handler, and failure routing together.
///
/// One engine consumes one stream; a service consuming several streams
/// runs one engine per stream, each with its own configuration.
pub struct ConsumerEngine {
    stream: Arc<dyn MessageStream>,
    handler: Arc<dyn MessageHandler>,
    router: MessageRouter,
    config: ConsumerConfig,
    stats: Arc<RwLock<EngineStats>>,
    cancellation_token: CancellationToken,
    worker_pool: Option<WorkerPool>,
    clock: Arc<dyn Clock>,
}

impl ConsumerEngine {
    /// Creates an engine from its configuration.
    ///
    /// The non-retryable set is built once here, from the configured
    /// error-type names against the default registry; unresolvable names
    /// are logged and skipped. When the config names a dead-letter topic
    /// a publisher must be supplied.
    pub fn new(
        stream: Arc<dyn MessageStream>,
        handler: Arc<dyn MessageHandler>,
        dead_letter_publisher: Option<Arc<dyn DeadLetterPublisher>>,
        config: ConsumerConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let registry = ErrorKindRegistry::with_defaults();
        let non_retryable = Arc::new(NonRetryableSet::from_names(
            &registry,
            config.non_retryable_errors.iter().map(String::as_str),
        ));
        let backoff = FixedBackoff::new(config.retry_interval);

        let router = match (&config.dead_letter_topic, dead_letter_publisher) {
            (Some(topic), Some(publisher)) => MessageRouter::new(
                non_retryable,
                backoff,
                DeadLetterRoute::new(topic.clone(), publisher),
            ),
            _ => MessageRouter::without_dead_letter(non_retryable, backoff),
        };

        Self {
            stream,
            handler,
            router,
            config,
            stats: Arc::new(RwLock::new(EngineStats::default())),
            cancellation_token: CancellationToken::new(),
            worker_pool: None,
            clock,
        }
    }

    /// Starts the configured worker pool.
    ///
    /// Returns immediately after spawning workers; use
    /// [`shutdown`](Self::shutdown) to stop gracefully.
    ///
    /// # Errors
    ///
    /// Returns error if the worker pool fails to spawn.
    pub async fn start(&mut self) -> Result<()> {
        info!(
            worker_count = self.config.worker_count,
            dead_letter_topic = self.config.dead_letter_topic.as_deref().unwrap_or("<none>"),
            "starting consumer engine"
        );

        let mut worker_pool = WorkerPool::new(
            self.stream.clone(),
            self.handler.clone(),
            self.router.clone(),
            self.config.clone(),
            self.stats.clone(),
            self.cancellation_token.clone(),
            self.clock.clone(),
        );

        worker_pool.spawn_workers().await?;
        self.worker_pool = Some(worker_pool);

        info!("consumer engine started");
        Ok(())
    }

    /// Gracefully shuts the engine down.
    ///
    /// # Errors
    ///
    /// Returns error if workers do not finish within the configured
    /// shutdown timeout.
    pub async fn shutdown(mut self) -> Result<()> {
        info!("shutting down consumer engine");

        if let Some(worker_pool) = self.worker_pool.take() {
            worker_pool.shutdown_graceful(self.config.shutdown_timeout).await?;
        } else {
            info!("consumer engine was not started, shutdown completed immediately");
        }
        Ok(())
    }

    /// Returns current engine statistics.
    pub async fn stats(&self) -> EngineStats {
        self.stats.read().await.clone()
    }

    /// Consumes everything currently queued, synchronously.
    ///
    /// Designed for tests and controlled draining: one temporary worker
    /// pulls until the stream reports empty, then returns how many
    /// messages it dispatched. A message requeued by a nack during the
    /// drain is pulled again, so a handler that never stops failing makes
    /// this loop; callers own termination.
    ///
    /// # Errors
    ///
    /// Returns error if receiving from the stream fails.
    pub async fn drain_available(&self) -> Result<u64> {
        let worker = ConsumeWorker::new(
            0,
            self.stream.clone(),
            self.handler.clone(),
            self.router.clone(),
            self.config.clone(),
            self.stats.clone(),
            self.cancellation_token.clone(),
            self.clock.clone(),
        );

        let mut dispatched = 0u64;
        while let Some(message) = self.stream.receive().await? {
            worker.consume_one(message).await;
            dispatched += 1;
        }

        Ok(dispatched)
    }
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use bytes::Bytes;
    use statline_core::RealClock;

    use super::*;
    use crate::{
        bus::{memory::InMemoryStream, InboundMessage},
        error::{ConsumeError, ErrorKind},
    };

    struct NoopHandler;

    #[async_trait]
    impl MessageHandler for NoopHandler {
        async fn handle(&self, _message: &InboundMessage) -> Result<()> {
            Ok(())
        }
    }

    struct FailOnce {
        failed: tokio::sync::Mutex<bool>,
    }

    #[async_trait]
    impl MessageHandler for FailOnce {
        async fn handle(&self, _message: &InboundMessage) -> Result<()> {
            let mut failed = self.failed.lock().await;
            if *failed {
                return Ok(());
            }
            *failed = true;
            Err(ConsumeError::handler(ErrorKind::Io, "first attempt fails"))
        }
    }

    #[tokio::test]
    async fn drain_consumes_all_queued_messages() {
        let stream = Arc::new(InMemoryStream::new());
        for i in 0..5 {
            stream
                .push(InboundMessage::keyed("status", format!("wf-{i}"), Bytes::from_static(b"{}")))
                .await;
        }

        let engine = ConsumerEngine::new(
            stream.clone(),
            Arc::new(NoopHandler),
            None,
            ConsumerConfig::default(),
            Arc::new(RealClock),
        );

        let dispatched = engine.drain_available().await.unwrap();
        assert_eq!(dispatched, 5);
        assert_eq!(engine.stats().await.succeeded, 5);
        assert_eq!(stream.acked().await.len(), 5);
    }

    #[tokio::test]
    async fn engine_starts_and_shuts_down() {
        let stream = Arc::new(InMemoryStream::new());
        let config = ConsumerConfig {
            worker_count: 2,
            poll_interval: std::time::Duration::from_millis(10),
            ..ConsumerConfig::default()
        };
        let mut engine = ConsumerEngine::new(
            stream,
            Arc::new(NoopHandler),
            None,
            config,
            Arc::new(RealClock),
        );

        engine.start().await.expect("engine should start");
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        engine.shutdown().await.expect("engine should shut down");
    }

    #[tokio::test]
    async fn retried_message_succeeds_on_redelivery() {
        let stream = Arc::new(InMemoryStream::new());
        stream.push(InboundMessage::keyed("status", "wf-1", Bytes::from_static(b"{}"))).await;

        let handler = Arc::new(FailOnce { failed: tokio::sync::Mutex::new(false) });
        let engine = ConsumerEngine::new(
            stream.clone(),
            handler,
            None,
            ConsumerConfig::default(),
            Arc::new(RealClock),
        );

        // The in-memory stream requeues the nacked message immediately, so
        // one drain covers both attempts.
        let dispatched = engine.drain_available().await.unwrap();
        assert_eq!(dispatched, 2);

        let stats = engine.stats().await;
        assert_eq!(stats.retries_scheduled, 1);
        assert_eq!(stats.succeeded, 1);
        assert_eq!(stream.acked().await.len(), 1);
    }
}
