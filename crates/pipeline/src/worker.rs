use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::dispatcher::TransformDispatcher;
use crate::queue::Delivery;

/// Long-running queue consumer.
///
/// Polls the dispatcher's queue, processes each batch to completion and
/// backs off after an empty poll or a poll error. A shutdown signal
/// interrupts polling and backoff but never a batch in progress.
pub struct QueueWorker {
    dispatcher: Arc<TransformDispatcher>,
    idle_backoff: Duration,
    shutdown_rx: mpsc::Receiver<()>,
}

impl QueueWorker {
    pub fn new(
        dispatcher: Arc<TransformDispatcher>,
        idle_backoff: Duration,
        shutdown_rx: mpsc::Receiver<()>,
    ) -> Self {
        Self {
            dispatcher,
            idle_backoff,
            shutdown_rx,
        }
    }

    /// Run until a shutdown signal arrives or the sender is dropped.
    pub async fn run(&mut self) {
        info!("queue worker starting");

        loop {
            let polled = tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("queue worker received shutdown signal");
                    break;
                }
                polled = self.dispatcher.queue().poll() => polled,
            };

            match polled {
                Ok(batch) if !batch.is_empty() => {
                    let deliveries: Vec<Delivery> = batch.collect();
                    let report = self.dispatcher.process_batch(&deliveries).await;
                    debug!(
                        received = deliveries.len(),
                        delivered = report.delivered(),
                        dropped = report.dropped(),
                        retried = report.retried(),
                        "batch processed"
                    );
                    continue;
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "error polling queue"),
            }

            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("queue worker received shutdown signal");
                    break;
                }
                () = tokio::time::sleep(self.idle_backoff) => {}
            }
        }

        info!("queue worker stopped");
    }
}
