use std::collections::HashMap;

use serde::Deserialize;

/// Output format of the `fmt` log layer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Transport used to ship spans to the collector.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OtlpProtocol {
    #[default]
    Grpc,
    Http,
}

/// Log output and optional OTLP span export.
///
/// ```toml
/// [telemetry]
/// log_format = "json"
/// otlp_enabled = true
/// otlp_endpoint = "http://localhost:4317"
/// sample_ratio = 0.25
/// ```
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TelemetryConfig {
    pub log_format: LogFormat,
    /// Attach an OTLP exporter layer to the subscriber.
    #[serde(alias = "enabled")]
    pub otlp_enabled: bool,
    #[serde(alias = "endpoint")]
    pub otlp_endpoint: String,
    #[serde(alias = "protocol")]
    pub otlp_protocol: OtlpProtocol,
    pub export_timeout_seconds: u64,
    /// Reported as `service.name` on every exported span.
    pub service_name: String,
    /// Fraction of root spans kept, clamped to `0.0..=1.0`.
    pub sample_ratio: f64,
    /// Extra resource attributes, e.g. `deployment.environment`.
    pub resource_attributes: HashMap<String, String>,
}

impl Default for TelemetryConfig {
    fn default() -> Self {
        Self {
            log_format: LogFormat::Text,
            otlp_enabled: false,
            otlp_endpoint: "http://localhost:4317".to_owned(),
            otlp_protocol: OtlpProtocol::Grpc,
            export_timeout_seconds: 10,
            service_name: "sluice".to_owned(),
            sample_ratio: 1.0,
            resource_attributes: HashMap::new(),
        }
    }
}
