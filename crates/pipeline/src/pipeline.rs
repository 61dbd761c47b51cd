use std::sync::Arc;
use std::time::Duration;

use sluice_expr::{Engine, EngineConfig};
use sluice_store::{ConfigStore, CredentialStore, MessageQueue, ObjectStore};
use tokio::sync::mpsc;

use crate::auth::AuthGate;
use crate::dispatcher::{DispatchSettings, TransformDispatcher};
use crate::metrics::PipelineMetrics;
use crate::provisioning::Provisioner;
use crate::queue::{PollSettings, QueueAdapter};
use crate::router::PayloadRouter;
use crate::worker::QueueWorker;

/// The external systems a pipeline talks to.
#[derive(Clone)]
pub struct Collaborators {
    pub credentials: Arc<dyn CredentialStore>,
    pub configs: Arc<dyn ConfigStore>,
    pub objects: Arc<dyn ObjectStore>,
    pub queue: Arc<dyn MessageQueue>,
}

impl std::fmt::Debug for Collaborators {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Collaborators")
            .field("object_scheme", &self.objects.scheme())
            .field("max_message_bytes", &self.queue.max_message_bytes())
            .finish_non_exhaustive()
    }
}

/// Tunables shared by every pipeline stage.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Bucket receiving payloads too large to enqueue inline.
    pub overflow_bucket: String,
    /// Bound on each individual collaborator call.
    pub call_timeout: Duration,
    /// Bound on processing one queued message.
    pub processing_deadline: Duration,
    /// Re-check API keys when a message is dequeued.
    pub verify_credentials: bool,
    /// Worker pause after an empty or failed poll.
    pub idle_backoff: Duration,
    /// Compiled expressions kept by the dispatcher.
    pub cache_capacity: u64,
    pub poll: PollSettings,
    pub engine: EngineConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        let dispatch = DispatchSettings::default();
        Self {
            overflow_bucket: "sluice-overflow".to_owned(),
            call_timeout: dispatch.call_timeout,
            processing_deadline: dispatch.processing_deadline,
            verify_credentials: dispatch.verify_credentials,
            idle_backoff: Duration::from_secs(1),
            cache_capacity: dispatch.cache_capacity,
            poll: dispatch.poll,
            engine: EngineConfig::default(),
        }
    }
}

/// A fully wired pipeline: router, dispatcher and provisioner sharing one
/// set of collaborators and metrics.
#[derive(Debug)]
pub struct Pipeline {
    router: PayloadRouter,
    dispatcher: Arc<TransformDispatcher>,
    provisioner: Provisioner,
    metrics: Arc<PipelineMetrics>,
    idle_backoff: Duration,
}

impl Pipeline {
    pub fn new(collaborators: &Collaborators, config: PipelineConfig) -> Self {
        let metrics = Arc::new(PipelineMetrics::default());
        let engine = Engine::new(config.engine);

        let router = PayloadRouter::new(
            AuthGate::new(Arc::clone(&collaborators.credentials), config.call_timeout),
            QueueAdapter::new(
                Arc::clone(&collaborators.queue),
                config.poll.clone(),
                config.call_timeout,
            ),
            Arc::clone(&collaborators.objects),
            config.overflow_bucket,
            config.call_timeout,
            Arc::clone(&metrics),
        );

        let dispatcher = TransformDispatcher::new(
            collaborators,
            engine.clone(),
            DispatchSettings {
                call_timeout: config.call_timeout,
                processing_deadline: config.processing_deadline,
                verify_credentials: config.verify_credentials,
                cache_capacity: config.cache_capacity,
                poll: config.poll,
            },
            Arc::clone(&metrics),
        );

        let provisioner = Provisioner::new(
            Arc::clone(&collaborators.credentials),
            Arc::clone(&collaborators.configs),
            engine,
            config.call_timeout,
        );

        Self {
            router,
            dispatcher: Arc::new(dispatcher),
            provisioner,
            metrics,
            idle_backoff: config.idle_backoff,
        }
    }

    pub fn router(&self) -> &PayloadRouter {
        &self.router
    }

    pub fn dispatcher(&self) -> &Arc<TransformDispatcher> {
        &self.dispatcher
    }

    pub fn provisioner(&self) -> &Provisioner {
        &self.provisioner
    }

    pub fn metrics(&self) -> &Arc<PipelineMetrics> {
        &self.metrics
    }

    /// A queue worker over this pipeline's dispatcher.
    pub fn worker(&self, shutdown_rx: mpsc::Receiver<()>) -> QueueWorker {
        QueueWorker::new(Arc::clone(&self.dispatcher), self.idle_backoff, shutdown_rx)
    }
}
