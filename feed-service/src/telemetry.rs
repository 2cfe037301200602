//! Telemetry wiring - OTLP traces and metrics
//!
//! Tracer and meter providers are process-scoped: built once at startup,
//! flushed after each cycle and shut down at exit. The cycle receives its
//! instrument handles through [`FetchMetrics`] instead of reaching into
//! globals.

use std::time::Duration;

use opentelemetry::global;
use opentelemetry::metrics::{Counter, Gauge, Histogram, MeterProvider as _};
use opentelemetry::trace::{TraceContextExt, TracerProvider as _};
use opentelemetry::KeyValue;
use opentelemetry_otlp::{ExporterBuildError, Protocol, WithExportConfig, WithHttpConfig};
use opentelemetry_sdk::metrics::SdkMeterProvider;
use opentelemetry_sdk::propagation::TraceContextPropagator;
use opentelemetry_sdk::trace::SdkTracerProvider;
use opentelemetry_sdk::Resource;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use tracing_opentelemetry::OpenTelemetrySpanExt;
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
            .unwrap_or_else(|_| "threatintel_fetcher=debug".into());
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

    /// Instrument handles for the fetch cycle
    pub fn fetch_metrics(&self, config: &Config) -> FetchMetrics {
        let meter = self.meter_provider.meter("feed-service");
        FetchMetrics {
            indicators_fetched: meter
                .u64_counter("feed_indicators_total")
                .with_description("Indicators returned by the upstream feed")
                .build(),
            indicators_inserted: meter
                .u64_counter("threats_inserted_total")
                .with_description("Previously-unseen indicators persisted")
                .build(),
            cycle_duration: meter
                .f64_histogram("fetch_cycle_duration_seconds")
                .with_description("Wall-clock duration of one fetch cycle")
                .build(),
            cpu_usage: meter.f64_gauge("cpu_usage_percent").build(),
            memory_usage: meter.f64_gauge("memory_usage_mb").build(),
            stream_name: config.stream_name.clone(),
        }
    }

    /// Drain any buffered spans and metrics; called after each cycle
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

/// Instrument handles for the fetch cycle
pub struct FetchMetrics {
    indicators_fetched: Counter<u64>,
    indicators_inserted: Counter<u64>,
    cycle_duration: Histogram<f64>,
    cpu_usage: Gauge<f64>,
    memory_usage: Gauge<f64>,
    stream_name: String,
}

impl FetchMetrics {
    pub fn record_fetched(&self, indicator_type: &str, count: u64) {
        self.indicators_fetched
            .add(count, &self.typed_attrs(indicator_type));
    }

    pub fn record_inserted(&self, indicator_type: &str) {
        self.indicators_inserted
            .add(1, &self.typed_attrs(indicator_type));
    }

    pub fn record_cycle(&self, seconds: f64) {
        self.cycle_duration.record(seconds, &self.attrs());
    }

    /// Sample process CPU and memory once per cycle
    pub fn record_resources(&self) {
        use sysinfo::System;

        let mut sys = System::new();
        sys.refresh_all();

        let cpu = sys.cpus().iter().map(|c| c.cpu_usage()).sum::<f32>()
            / sys.cpus().len().max(1) as f32;

        let mem_mb = sysinfo::get_current_pid()
            .ok()
            .and_then(|pid| sys.process(pid))
            .map(|p| p.memory() as f64 / 1024.0 / 1024.0)
            .unwrap_or(0.0);

        self.cpu_usage.record(f64::from(cpu), &self.attrs());
        self.memory_usage.record(mem_mb, &self.attrs());

        tracing::info!("📊 CPU usage: {:.1}%, Memory usage: {:.2} MB", cpu, mem_mb);
    }

    fn attrs(&self) -> [KeyValue; 1] {
        [KeyValue::new("stream.name", self.stream_name.clone())]
    }

    fn typed_attrs(&self, indicator_type: &str) -> [KeyValue; 2] {
        [
            KeyValue::new("stream.name", self.stream_name.clone()),
            KeyValue::new("type", indicator_type.to_string()),
        ]
    }
}

/// Trace id of the current span, for stamping inserted records
pub fn current_trace_id() -> Option<String> {
    let cx = tracing::Span::current().context();
    let span = cx.span();
    let span_context = span.span_context();

    span_context
        .is_valid()
        .then(|| span_context.trace_id().to_string())
}

/// Inject the current trace context into outgoing feed request headers
pub fn inject_trace_context(headers: &mut HeaderMap) {
    let cx = tracing::Span::current().context();
    global::get_text_map_propagator(|propagator| {
        propagator.inject_context(&cx, &mut HeaderInjector(headers));
    });
}

struct HeaderInjector<'a>(&'a mut HeaderMap);

impl opentelemetry::propagation::Injector for HeaderInjector<'_> {
    fn set(&mut self, key: &str, value: String) {
        if let (Ok(name), Ok(value)) = (
            HeaderName::from_bytes(key.as_bytes()),
            HeaderValue::from_str(&value),
        ) {
            self.0.insert(name, value);
        }
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
