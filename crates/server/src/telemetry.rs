//! Global subscriber setup: an `EnvFilter`, a text or JSON `fmt` layer, and
//! an optional OTLP layer exporting router, dispatcher and store spans.

use std::time::Duration;

use opentelemetry::trace::{TraceError, TracerProvider};
use opentelemetry::{KeyValue, global};
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::Resource;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::{BatchSpanProcessor, Sampler, SdkTracerProvider};
use tracing::{Subscriber, error, info, warn};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::registry::LookupSpan;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

use crate::config::{LogFormat, OtlpProtocol, TelemetryConfig};

/// Keeps the tracer provider alive; [`TelemetryGuard::shutdown`] flushes it.
pub struct TelemetryGuard {
    provider: Option<SdkTracerProvider>,
}

impl TelemetryGuard {
    pub fn shutdown(mut self) {
        let Some(provider) = self.provider.take() else {
            return;
        };
        if let Err(e) = provider.shutdown() {
            warn!(error = %e, "span exporter did not shut down cleanly");
        }
    }
}

/// Install the global subscriber.
///
/// An exporter that cannot be built is logged and skipped; the process keeps
/// running with local logs only.
pub fn init(config: &TelemetryConfig) -> TelemetryGuard {
    let export = config.otlp_enabled.then(|| tracer_provider(config));
    let provider = export.as_ref().and_then(|r| r.as_ref().ok()).cloned();
    let otel_layer = provider
        .as_ref()
        .map(|p| tracing_opentelemetry::layer().with_tracer(p.tracer("sluice")));

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt_layer(config.log_format))
        .with(otel_layer)
        .init();

    match export {
        Some(Ok(_)) => info!(
            endpoint = %config.otlp_endpoint,
            protocol = ?config.otlp_protocol,
            sample_ratio = config.sample_ratio,
            "span export enabled"
        ),
        Some(Err(e)) => error!(
            error = %e,
            endpoint = %config.otlp_endpoint,
            "span exporter unavailable, logging locally only"
        ),
        None => {}
    }

    TelemetryGuard { provider }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
}

fn fmt_layer<S>(format: LogFormat) -> Box<dyn Layer<S> + Send + Sync>
where
    S: Subscriber + for<'a> LookupSpan<'a>,
{
    match format {
        LogFormat::Text => tracing_subscriber::fmt::layer().boxed(),
        LogFormat::Json => tracing_subscriber::fmt::layer().json().boxed(),
    }
}

fn tracer_provider(config: &TelemetryConfig) -> Result<SdkTracerProvider, TraceError> {
    let exporter = span_exporter(config)?;
    let provider = SdkTracerProvider::builder()
        .with_span_processor(BatchSpanProcessor::builder(exporter).build())
        .with_sampler(Sampler::ParentBased(Box::new(root_sampler(
            config.sample_ratio,
        ))))
        .with_resource(resource(config))
        .build();
    global::set_text_map_propagator(TraceContextPropagator::new());
    global::set_tracer_provider(provider.clone());
    Ok(provider)
}

fn span_exporter(config: &TelemetryConfig) -> Result<SpanExporter, TraceError> {
    let timeout = Duration::from_secs(config.export_timeout_seconds);
    match config.otlp_protocol {
        OtlpProtocol::Grpc => SpanExporter::builder()
            .with_tonic()
            .with_endpoint(&config.otlp_endpoint)
            .with_timeout(timeout)
            .build(),
        OtlpProtocol::Http => SpanExporter::builder()
            .with_http()
            .with_endpoint(&config.otlp_endpoint)
            .with_timeout(timeout)
            .build(),
    }
}

/// Sampler for root spans; children follow their parent's decision.
fn root_sampler(ratio: f64) -> Sampler {
    if ratio >= 1.0 {
        Sampler::AlwaysOn
    } else if ratio > 0.0 {
        Sampler::TraceIdRatioBased(ratio)
    } else {
        Sampler::AlwaysOff
    }
}

fn resource(config: &TelemetryConfig) -> Resource {
    let mut attributes = vec![
        KeyValue::new("service.name", config.service_name.clone()),
        KeyValue::new("service.version", env!("CARGO_PKG_VERSION")),
    ];
    attributes.extend(
        config
            .resource_attributes
            .iter()
            .map(|(k, v)| KeyValue::new(k.clone(), v.clone())),
    );
    Resource::builder().with_attributes(attributes).build()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sampler_clamps_ratio() {
        assert!(matches!(root_sampler(1.5), Sampler::AlwaysOn));
        assert!(matches!(root_sampler(-1.0), Sampler::AlwaysOff));
        assert!(matches!(
            root_sampler(0.25),
            Sampler::TraceIdRatioBased(r) if (r - 0.25).abs() < f64::EPSILON
        ));
    }
}
