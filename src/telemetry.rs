//! OpenTelemetry export of client spans over OTLP/gRPC.
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use opentelemetry::trace::TracerProvider as _;
use opentelemetry::{global, KeyValue};
use opentelemetry_otlp::{SpanExporter, WithExportConfig};
use opentelemetry_sdk::propagation::{BaggagePropagator, TraceContextPropagator};
use opentelemetry_sdk::runtime;
use opentelemetry_sdk::trace::span_processor_with_async_runtime::BatchSpanProcessor;
use opentelemetry_sdk::trace::{Sampler, SdkTracer, SdkTracerProvider};
use opentelemetry_sdk::Resource;

use crate::errors::{CliError, CliResult};

pub const SERVICE_NAME: &str = "cri-tools";
const TRACER_NAME: &str = "crictl";
const EXPORT_TIMEOUT: Duration = Duration::from_secs(5);

static INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Probability that a root trace is sampled for a per-million rate.
pub fn sampling_ratio(rate_per_million: i64) -> f64 {
    match rate_per_million {
        0 => 0.0,
        n if n < 0 => 1.0,
        n => (n as f64 / 1_000_000.0).min(1.0),
    }
}

/// Negative rates sample everything, zero samples nothing. Any other rate
/// is parent based, so children of sampled remote traces stay sampled.
pub fn sampler_for(rate_per_million: i64) -> Sampler {
    match rate_per_million {
        0 => Sampler::AlwaysOff,
        n if n < 0 => Sampler::AlwaysOn,
        n => Sampler::ParentBased(Box::new(Sampler::TraceIdRatioBased(sampling_ratio(n)))),
    }
}

/// Owns the tracer provider; dropping it without [`TracingHandle::shutdown`]
/// loses any spans still queued.
#[derive(Debug)]
pub struct TracingHandle {
    provider: SdkTracerProvider,
}

impl TracingHandle {
    pub fn tracer(&self) -> SdkTracer {
        self.provider.tracer(TRACER_NAME)
    }

    /// Flushes queued spans and stops the exporter.
    pub async fn shutdown(self) {
        let provider = self.provider;
        let flushed = tokio::task::spawn_blocking(move || provider.shutdown()).await;
        match flushed {
            Ok(Ok(())) => {}
            Ok(Err(err)) => tracing::warn!("failed to flush spans: {err}"),
            Err(err) => tracing::warn!("span flush task failed: {err}"),
        }
    }
}

/// Installs the process-wide tracer provider exporting to `collector`
/// (`host:port`). A second call in the same process is refused.
pub fn initialize(collector: &str, rate_per_million: i64) -> CliResult<TracingHandle> {
    if INITIALIZED.swap(true, Ordering::SeqCst) {
        return Err(CliError::TracingInit("tracing is already initialized".into()));
    }

    let endpoint = if collector.contains("://") {
        collector.to_string()
    } else {
        format!("http://{collector}")
    };
    let exporter = SpanExporter::builder()
        .with_tonic()
        .with_endpoint(endpoint)
        .with_timeout(EXPORT_TIMEOUT)
        .build()
        .map_err(|err| CliError::TracingInit(err.to_string()))?;

    let host = hostname::get()
        .map_err(|err| CliError::TracingInit(format!("failed to read hostname: {err}")))?
        .to_string_lossy()
        .into_owned();
    let resource = Resource::builder()
        .with_service_name(SERVICE_NAME)
        .with_attributes([
            KeyValue::new("host.name", host),
            KeyValue::new("process.pid", i64::from(std::process::id())),
        ])
        .build();

    let processor = BatchSpanProcessor::builder(exporter, runtime::Tokio).build();
    let provider = SdkTracerProvider::builder()
        .with_span_processor(processor)
        .with_sampler(sampler_for(rate_per_million))
        .with_resource(resource)
        .build();

    global::set_text_map_propagator(opentelemetry::propagation::TextMapCompositePropagator::new(
        vec![
            Box::new(TraceContextPropagator::new()),
            Box::new(BaggagePropagator::new()),
        ],
    ));
    global::set_tracer_provider(provider.clone());

    tracing::debug!(collector, rate_per_million, "tracing initialized");
    Ok(TracingHandle { provider })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rate_maps_to_probability() {
        assert_eq!(sampling_ratio(0), 0.0);
        assert_eq!(sampling_ratio(-1), 1.0);
        assert_eq!(sampling_ratio(500_000), 0.5);
        assert_eq!(sampling_ratio(5_000_000), 1.0);
    }

    #[test]
    fn rate_maps_to_sampler() {
        assert!(matches!(sampler_for(0), Sampler::AlwaysOff));
        assert!(matches!(sampler_for(-7), Sampler::AlwaysOn));
        match sampler_for(250) {
            Sampler::ParentBased(root) => {
                assert!(matches!(*root, Sampler::TraceIdRatioBased(r) if r == 0.00025))
            }
            other => panic!("unexpected sampler {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn second_initialization_is_refused() {
        let handle = initialize("127.0.0.1:4317", 0).unwrap();
        assert!(matches!(
            initialize("127.0.0.1:4317", 0),
            Err(CliError::TracingInit(_))
        ));
        handle.shutdown().await;
    }
}
