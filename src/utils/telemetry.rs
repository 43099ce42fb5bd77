//! Tracing and OpenTelemetry setup
//!
//! A fmt layer is always installed. OTLP span export is opt-in because it
//! needs a collector listening on the default endpoint.

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_sdk::{propagation::TraceContextPropagator, runtime, trace as sdktrace, Resource};
use std::error::Error;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

pub const DEFAULT_FILTER: &str = "purchase_intent=info";

/// Flushes and shuts down the tracer provider when dropped.
pub struct OtelGuard {
    otlp: bool,
}

impl Drop for OtelGuard {
    fn drop(&mut self) {
        if self.otlp {
            global::shutdown_tracer_provider();
        }
    }
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}

pub fn init_telemetry(service_name: &str, otlp: bool) -> Result<OtelGuard, Box<dyn Error>> {
    if !otlp {
        Registry::default()
            .with(env_filter())
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init()?;
        return Ok(OtelGuard { otlp });
    }

    global::set_text_map_propagator(TraceContextPropagator::new());

    let exporter = opentelemetry_otlp::new_exporter().tonic().build_span_exporter()?;

    let trace_config = sdktrace::Config::default().with_resource(Resource::new(vec![KeyValue::new(
        "service.name",
        service_name.to_string(),
    )]));

    let provider = sdktrace::TracerProvider::builder()
        .with_batch_exporter(exporter, runtime::Tokio)
        .with_config(trace_config)
        .build();
    global::set_tracer_provider(provider.clone());

    // sdktrace::Tracer, not the boxed global one: the layer needs PreSampledTracer
    let tracer = provider.tracer(service_name.to_string());

    Registry::default()
        .with(env_filter())
        .with(tracing_opentelemetry::layer().with_tracer(tracer))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()?;

    Ok(OtelGuard { otlp })
}
