//! Worker pool management with structured concurrency.
//!
//! Lifecycle management and graceful shutdown for supervised consumer
//! worker tasks.

use std::{sync::Arc, time::Duration};

use statline_core::Clock;
use tokio::{sync::RwLock, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    bus::{MessageHandler, MessageStream},
    config::ConsumerConfig,
    error::{ConsumeError, Result},
    router::MessageRouter,
    worker::{ConsumeWorker, EngineStats},
};

/// Pool of supervised consumer workers over one message stream.
///
/// Workers run until cancellation is requested through the shared token;
/// `shutdown_graceful` waits for in-flight dispatches to finish within a
/// bounded timeout.
pub struct WorkerPool {
    stream: Arc<dyn MessageStream>,
    handler: Arc<dyn MessageHandler>,
    router: MessageRouter,
    config: ConsumerConfig,
    stats: Arc<RwLock<EngineStats>>,
    cancellation_token: CancellationToken,
    worker_handles: Vec<JoinHandle<Result<()>>>,
    clock: Arc<dyn Clock>,
}

impl WorkerPool {
    /// Creates a pool. Workers are not spawned until
    /// [`spawn_workers`](Self::spawn_workers).
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        stream: Arc<dyn MessageStream>,
        handler: Arc<dyn MessageHandler>,
        router: MessageRouter,
        config: ConsumerConfig,
        stats: Arc<RwLock<EngineStats>>,
        cancellation_token: CancellationToken,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            stream,
            handler,
            router,
            config,
            stats,
            cancellation_token,
            worker_handles: Vec::new(),
            clock,
        }
    }

    /// Spawns all configured workers and returns immediately.
    ///
    /// # Errors
    ///
    /// Currently never returns error but signature allows for future
    /// validation.
    pub async fn spawn_workers(&mut self) -> Result<()> {
        info!(worker_count = self.config.worker_count, "spawning consumer workers");

        {
            let mut stats = self.stats.write().await;
            stats.active_workers = self.config.worker_count;
        }

        for worker_id in 0..self.config.worker_count {
            let worker = ConsumeWorker::new(
                worker_id,
                self.stream.clone(),
                self.handler.clone(),
                self.router.clone(),
                self.config.clone(),
                self.stats.clone(),
                self.cancellation_token.clone(),
                self.clock.clone(),
            );

            let handle = tokio::spawn(async move {
                let result = worker.run().await;

                if let Err(ref error) = result {
                    error!(worker_id, error = %error, "consumer worker terminated with error");
                }

                result
            });

            self.worker_handles.push(handle);
        }

        Ok(())
    }

    /// Signals cancellation and waits for all workers to finish.
    ///
    /// # Errors
    ///
    /// Returns `ShutdownTimeout` if workers do not finish within `timeout`.
    pub async fn shutdown_graceful(mut self, timeout: Duration) -> Result<()> {
        info!(
            worker_count = self.worker_handles.len(),
            timeout_seconds = timeout.as_secs(),
            "initiating graceful worker shutdown"
        );

        self.cancellation_token.cancel();

        let shutdown_future = async {
            let mut results = Vec::new();

            for (worker_id, handle) in
                std::mem::take(&mut self.worker_handles).into_iter().enumerate()
            {
                match handle.await {
                    Ok(worker_result) => {
                        if let Err(error) = worker_result {
                            warn!(
                                worker_id,
                                error = %error,
                                "worker completed with error during shutdown"
                            );
                        }
                        results.push(Ok(()));
                    },
                    Err(join_error) => {
                        error!(
                            worker_id,
                            error = %join_error,
                            "worker task panicked during shutdown"
                        );
                        results.push(Err(ConsumeError::WorkerPanic {
                            worker_id,
                            message: format!("{join_error}"),
                        }));
                    },
                }
            }

            {
                let mut stats = self.stats.write().await;
                stats.active_workers = 0;
            }

            results
        };

        match tokio::time::timeout(timeout, shutdown_future).await {
            Ok(results) => {
                let error_count = results.iter().filter(|r| r.is_err()).count();
                if error_count > 0 {
                    warn!(
                        error_count,
                        total_workers = results.len(),
                        "some workers completed with errors during shutdown"
                    );
                }
                info!("worker pool shutdown completed");
                Ok(())
            },
            Err(_timeout) => {
                error!(
                    timeout_seconds = timeout.as_secs(),
                    "worker shutdown timed out, some workers may still be running"
                );
                Err(ConsumeError::ShutdownTimeout { timeout })
            },
        }
    }

    /// Returns true if any worker task has not finished.
    pub fn has_active_workers(&self) -> bool {
        self.worker_handles.iter().any(|h| !h.is_finished())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        if !self.worker_handles.is_empty() {
            let active_count = self.worker_handles.iter().filter(|h| !h.is_finished()).count();

            if active_count > 0 && !self.cancellation_token.is_cancelled() {
                error!(
                    active_workers = active_count,
                    "WorkerPool dropped with active workers, forcing cancellation"
                );
                self.cancellation_token.cancel();
            }
        }
    }
}
