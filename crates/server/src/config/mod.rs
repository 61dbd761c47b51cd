mod backend;
mod pipeline;
mod server;
mod telemetry;


pub use backend::*;
pub use pipeline::*;
pub use server::*;
pub use telemetry::*;

use std::path::Path;
use std::time::Duration;

use serde::Deserialize;
use sluice_expr::EngineConfig;
use sluice_pipeline::{PipelineConfig, PollSettings};

use crate::error::ServerError;

/// Top-level configuration for the Sluice server, loaded from a TOML file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SluiceConfig {
    /// HTTP server bind configuration.
    #[serde(default)]
    pub server: ServerConfig,
    /// Collaborator backend selection.
    #[serde(default)]
    pub backend: BackendConfig,
    /// Ingestion queue settings.
    #[serde(default)]
    pub queue: QueueConfig,
    /// Object storage settings.
    #[serde(default)]
    pub storage: StorageConfig,
    /// Account table names.
    #[serde(default)]
    pub tables: TablesConfig,
    /// Pipeline timeouts.
    #[serde(default)]
    pub pipeline: PipelineServerConfig,
    /// Expression engine limits.
    #[serde(default)]
    pub expression: ExpressionConfig,
    /// Embedded queue worker.
    #[serde(default)]
    pub worker: WorkerConfig,
    /// Logging and distributed tracing.
    #[serde(default)]
    pub telemetry: TelemetryConfig,
}

impl SluiceConfig {
    /// Parse and validate a TOML document.
    pub fn from_toml(contents: &str) -> Result<Self, ServerError> {
        let config: Self =
            toml::from_str(contents).map_err(|e| ServerError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path`, falling back to the defaults when it does not exist.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ServerError> {
        let path = path.as_ref();
        if !path.exists() {
            return Self::from_toml("");
        }
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml(&contents)
    }

    fn validate(&self) -> Result<(), ServerError> {
        if self.pipeline.processing_deadline_seconds >= self.queue.visibility_timeout_seconds {
            return Err(ServerError::Config(format!(
                "pipeline.processing_deadline_seconds ({}) must be shorter than \
                 queue.visibility_timeout_seconds ({})",
                self.pipeline.processing_deadline_seconds, self.queue.visibility_timeout_seconds
            )));
        }
        if self.queue.ack_margin_seconds >= self.queue.visibility_timeout_seconds {
            return Err(ServerError::Config(format!(
                "queue.ack_margin_seconds ({}) must be shorter than \
                 queue.visibility_timeout_seconds ({})",
                self.queue.ack_margin_seconds, self.queue.visibility_timeout_seconds
            )));
        }
        if self.queue.max_messages == 0 {
            return Err(ServerError::Config(
                "queue.max_messages must be at least 1".into(),
            ));
        }
        if self.storage.overflow_bucket.trim().is_empty() {
            return Err(ServerError::Config(
                "storage.overflow_bucket must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// The pipeline tunables described by this configuration.
    pub fn pipeline_config(&self) -> PipelineConfig {
        PipelineConfig {
            overflow_bucket: self.storage.overflow_bucket.clone(),
            call_timeout: Duration::from_millis(self.pipeline.call_timeout_ms),
            processing_deadline: Duration::from_secs(self.pipeline.processing_deadline_seconds),
            verify_credentials: self.pipeline.verify_credentials,
            idle_backoff: Duration::from_millis(self.pipeline.idle_backoff_ms),
            cache_capacity: self.expression.cache_capacity,
            poll: PollSettings {
                max_messages: self.queue.max_messages,
                wait_time: Duration::from_secs(self.queue.wait_time_seconds),
                visibility_timeout: Duration::from_secs(self.queue.visibility_timeout_seconds),
                ack_margin: Duration::from_secs(self.queue.ack_margin_seconds),
            },
            engine: EngineConfig {
                null_policy: self.expression.null_policy,
                max_steps: self.expression.max_steps,
                max_expression_bytes: self.expression.max_expression_bytes,
                max_depth: self.expression.max_depth,
            },
        }
    }
}
