//! Consumer worker loop.

use std::sync::Arc;

use statline_core::Clock;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::{
    bus::{InboundMessage, MessageHandler, MessageStream},
    config::ConsumerConfig,
    error::{ConsumeError, Result},
    router::{Disposition, MessageRouter},
};

/// Statistics for consumer engine monitoring.
#[derive(Debug, Clone, Default)]
pub struct EngineStats {
    /// Number of active consumer workers.
    pub active_workers: usize,
    /// Total messages dispatched since startup.
    pub messages_processed: u64,
    /// Messages that completed and were acknowledged.
    pub succeeded: u64,
    /// Messages scheduled for redelivery after a transient failure.
    pub retries_scheduled: u64,
    /// Messages routed to the dead-letter destination.
    pub dead_lettered: u64,
    /// Dispatches that failed outside the router's dispositions.
    pub failed: u64,
}

/// Individual worker pulling messages from the stream and routing them.
pub(crate) struct ConsumeWorker {
    id: usize,
    stream: Arc<dyn MessageStream>,
    handler: Arc<dyn MessageHandler>,
    router: MessageRouter,
    config: ConsumerConfig,
    stats: Arc<RwLock<EngineStats>>,
    cancellation_token: CancellationToken,
    clock: Arc<dyn Clock>,
}

impl ConsumeWorker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: usize,
        stream: Arc<dyn MessageStream>,
        handler: Arc<dyn MessageHandler>,
        router: MessageRouter,
        config: ConsumerConfig,
        stats: Arc<RwLock<EngineStats>>,
        cancellation_token: CancellationToken,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { id, stream, handler, router, config, stats, cancellation_token, clock }
    }

    /// Main worker loop. Pulls and routes messages until cancelled.
    ///
    /// # Errors
    ///
    /// Never returns error today; dispatch failures are counted and the
    /// loop continues.
    pub async fn run(&self) -> Result<()> {
        info!(worker_id = self.id, "consumer worker starting");

        loop {
            if self.cancellation_token.is_cancelled() {
                info!(worker_id = self.id, "consumer worker received shutdown signal");
                break;
            }

            match self.stream.receive().await {
                Ok(Some(message)) => {
                    self.consume_one(message).await;
                },
                Ok(None) => {
                    tokio::select! {
                        () = self.clock.sleep(self.config.poll_interval) => {
                            // Stream idle, wait before polling again
                        }
                        () = self.cancellation_token.cancelled() => break,
                    }
                },
                Err(error) => {
                    error!(
                        worker_id = self.id,
                        error = %error,
                        "receiving from stream failed"
                    );
                    tokio::select! {
                        () = self.clock.sleep(self.config.retry_interval) => {
                            // Wait before retrying to avoid tight error loops
                        }
                        () = self.cancellation_token.cancelled() => break,
                    }
                },
            }
        }

        info!(worker_id = self.id, "consumer worker stopped");
        Ok(())
    }

    /// Dispatches one message and applies its disposition to the stream.
    pub async fn consume_one(&self, message: InboundMessage) {
        let outcome = self.router.dispatch(&message, self.handler.as_ref()).await;

        {
            let mut stats = self.stats.write().await;
            stats.messages_processed += 1;
        }

        match outcome {
            Ok(Disposition::Succeeded) => {
                if let Err(error) = self.stream.ack(&message).await {
                    error!(worker_id = self.id, error = %error, "ack failed");
                }
                self.stats.write().await.succeeded += 1;
            },
            Ok(Disposition::RetryScheduled { delay }) => {
                if let Err(error) = self.stream.nack(&message, delay).await {
                    error!(worker_id = self.id, error = %error, "nack failed");
                }
                self.stats.write().await.retries_scheduled += 1;
            },
            Ok(Disposition::DeadLettered { destination }) => {
                debug!(
                    worker_id = self.id,
                    destination = %destination,
                    "message dead-lettered"
                );
                if let Err(error) = self.stream.ack(&message).await {
                    error!(worker_id = self.id, error = %error, "ack failed");
                }
                self.stats.write().await.dead_lettered += 1;
            },
            // A failed dead-letter publish leaves the message unconsumed:
            // redeliver and run the whole dispatch again.
            Err(error @ ConsumeError::DeadLetterPublish { .. }) => {
                error!(
                    worker_id = self.id,
                    error = %error,
                    "dead-letter publish failed, redelivering"
                );
                let delay = self.router.backoff_interval();
                if let Err(nack_error) = self.stream.nack(&message, delay).await {
                    error!(worker_id = self.id, error = %nack_error, "nack failed");
                }
                self.stats.write().await.failed += 1;
            },
            // No dead-letter route: log the terminal failure and move on.
            Err(error) => {
                error!(
                    worker_id = self.id,
                    error_kind = %error.kind(),
                    error = %error,
                    "terminal failure dropped without dead-letter route"
                );
                if let Err(ack_error) = self.stream.ack(&message).await {
                    error!(worker_id = self.id, error = %ack_error, "ack failed");
                }
                self.stats.write().await.failed += 1;
            },
        }
    }
}
