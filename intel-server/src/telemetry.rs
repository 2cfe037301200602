//! Telemetry wiring - OTLP traces and metrics
//!
//! Tracer and meter providers are process-scoped: built once at startup,
//! flushed and shut down at exit. Handlers receive instrument handles
//! through [`HttpMetrics`] instead of reaching into globals.

use std::time::Duration;

use opentelemetry::global;
use opentelemetry::metrics::{Counter, MeterProvider as _};
use opentelemetry::trace::TracerProvider as _;
use opentelemetry::KeyValue;
use opentelemetry_otlp::{ExporterBuildError, Protocol, WithExportConfig, WithHttpConfig};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;

const OTLP_EXPORT_TIMEOUT: Duration = Duration::from_secs(10);

/// Process-scoped telemetry state
pub struct Telemetry {
    tracer_provider: SdkTracerProvider,
    meter_provider: SdkMeterProvider,
}

impl Telemetry {
    /// Build providers, install the W3C propagator and initialize the
    /// tracing subscriber. Exporter construction failure downgrades to
    /// local logging only; it never prevents startup.
    pub fn init(config: &Config) -> Self {
        global::set_text_map_propagator(TraceContextPropagator::new());

        let resource = Resource::builder()
            .with_service_name(config.service_name.clone())
            .with_attributes([KeyValue::new("stream.name", config.stream_name.clone())])
            .build();

        let mut deferred_warnings = Vec::new();

        let mut traces = SdkTracerProvider::builder().with_resource(resource.clone());
        match build_span_exporter(config) {
            Ok(Some(exporter)) => traces = traces.with_batch_exporter(exporter),
            Ok(None) => {}
            Err(e) => deferred_warnings.push(format!("Tracing not exported: {e}")),
        }
        let tracer_provider = traces.build();

        let mut metrics = SdkMeterProvider::builder().with_resource(resource);
        match build_metric_exporter(config) {
            Ok(Some(exporter)) => metrics = metrics.with_periodic_exporter(exporter),
            Ok(None) => {}
            Err(e) => deferred_warnings.push(format!("Metrics not exported: {e}")),
        }
        let meter_provider = metrics.build();

        let filter = tracing_subscriber::EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| "threatintel_server=debug,tower_http=debug".into());
        let otel_layer = tracing_opentelemetry::layer()
            .with_tracer(tracer_provider.tracer(config.service_name.clone()));

        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .with(otel_layer)
            .init();

        for warning in deferred_warnings {
            tracing::warn!("{warning}");
        }

        Self {
            tracer_provider,
            meter_provider,
        }
    }

    /// Instrument handles for the HTTP tier
    pub fn http_metrics(&self, config: &Config) -> HttpMetrics {
        let meter = self.meter_provider.meter("intel-server");
        HttpMetrics {
            requests: meter
                .u64_counter("http_requests_total")
                .with_description("HTTP requests served by the query tier")
                .build(),
            stream_name: config.stream_name.clone(),
        }
    }

    /// Drain any buffered spans and metrics
    pub fn force_flush(&self) {
        if let Err(e) = self.tracer_provider.force_flush() {
            tracing::warn!("Span flush failed: {e}");
        }
        if let Err(e) = self.meter_provider.force_flush() {
            tracing::warn!("Metric flush failed: {e}");
        }
    }

    /// Flush and tear down the providers
    pub fn shutdown(self) {
        if let Err(e) = self.tracer_provider.shutdown() {
            tracing::warn!("Tracer shutdown failed: {e}");
        }
        if let Err(e) = self.meter_provider.shutdown() {
            tracing::warn!("Meter shutdown failed: {e}");
        }
    }
}

/// Counter handles shared across request handlers
#[derive(Clone)]
pub struct HttpMetrics {
    requests: Counter<u64>,
    stream_name: String,
}

impl HttpMetrics {
    pub fn record_request(&self, route: &'static str) {
        self.requests.add(
            1,
            &[
                KeyValue::new("stream.name", self.stream_name.clone()),
                KeyValue::new("http.route", route),
            ],
        );
    }
}

fn build_span_exporter(
    config: &Config,
) -> Result<Option<opentelemetry_otlp::SpanExporter>, ExporterBuildError> {
    let Some(endpoint) = &config.otlp_traces_endpoint else {
        return Ok(None);
    };

    let exporter = opentelemetry_otlp::SpanExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(endpoint.clone())
        .with_headers(config.otlp_headers())
        .with_timeout(OTLP_EXPORT_TIMEOUT)
        .build()?;

    Ok(Some(exporter))
}

fn build_metric_exporter(
    config: &Config,
) -> Result<Option<opentelemetry_otlp::MetricExporter>, ExporterBuildError> {
    let Some(endpoint) = &config.otlp_metrics_endpoint else {
        return Ok(None);
    };

    let exporter = opentelemetry_otlp::MetricExporter::builder()
        .with_http()
        .with_protocol(Protocol::HttpBinary)
        .with_endpoint(endpoint.clone())
        .with_headers(config.otlp_headers())
        .with_timeout(OTLP_EXPORT_TIMEOUT)
        .build()?;

    Ok(Some(exporter))
}
