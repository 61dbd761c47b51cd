use serde::Deserialize;
use sluice_expr::NullPolicy;

/// Timeouts and switches for the pipeline stages.
#[derive(Debug, Clone, Deserialize)]
pub struct PipelineServerConfig {
    /// Bound on each store, queue or credential call, in milliseconds.
    #[serde(default = "default_call_timeout")]
    pub call_timeout_ms: u64,
    /// Bound on processing one queued message, in seconds. Must be shorter
    /// than the queue's visibility timeout.
    #[serde(default = "default_processing_deadline")]
    pub processing_deadline_seconds: u64,
    /// Re-check API keys when messages are dequeued.
    #[serde(default)]
    pub verify_credentials: bool,
    /// Worker pause after an empty or failed poll, in milliseconds.
    #[serde(default = "default_idle_backoff")]
    pub idle_backoff_ms: u64,
}

impl Default for PipelineServerConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: default_call_timeout(),
            processing_deadline_seconds: default_processing_deadline(),
            verify_credentials: false,
            idle_backoff_ms: default_idle_backoff(),
        }
    }
}

fn default_call_timeout() -> u64 {
    10_000
}

fn default_processing_deadline() -> u64 {
    45
}

fn default_idle_backoff() -> u64 {
    1_000
}

/// Expression engine limits.
///
/// # Example
///
/// ```toml
/// [expression]
/// null_policy = "strict"
/// max_steps = 50000
/// ```
#[derive(Debug, Clone, Deserialize)]
pub struct ExpressionConfig {
    /// How a path that finds nothing is treated.
    #[serde(default)]
    pub null_policy: NullPolicy,
    #[serde(default = "default_max_steps")]
    pub max_steps: u64,
    #[serde(default = "default_max_expression_bytes")]
    pub max_expression_bytes: usize,
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    /// Compiled expressions kept in memory.
    #[serde(default = "default_cache_capacity")]
    pub cache_capacity: u64,
}

impl Default for ExpressionConfig {
    fn default() -> Self {
        Self {
            null_policy: NullPolicy::default(),
            max_steps: default_max_steps(),
            max_expression_bytes: default_max_expression_bytes(),
            max_depth: default_max_depth(),
            cache_capacity: default_cache_capacity(),
        }
    }
}

fn default_max_steps() -> u64 {
    100_000
}

fn default_max_expression_bytes() -> usize {
    4096
}

fn default_max_depth() -> usize {
    64
}

fn default_cache_capacity() -> u64 {
    1_000
}

/// Embedded queue worker.
#[derive(Debug, Clone, Deserialize)]
pub struct WorkerConfig {
    /// Run the worker alongside the HTTP server in `serve` mode.
    #[serde(default = "default_worker_enabled")]
    pub enabled: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            enabled: default_worker_enabled(),
        }
    }
}

fn default_worker_enabled() -> bool {
    true
}
