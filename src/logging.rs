use std::io;

use opentelemetry_sdk::trace::SdkTracer;
use tracing::Level;
use tracing_subscriber::filter::Targets;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{EnvFilter, Layer};

/// Installs the stderr log subscriber. `RUST_LOG` wins over `--debug`.
/// With a tracer, client spans are also exported to the collector.
pub fn init(debug: bool, tracer: Option<SdkTracer>) {
    let default_level = if debug { "critools=debug,warn" } else { "warn" };
    let filter = EnvFilter::builder()
        .parse_lossy(std::env::var("RUST_LOG").unwrap_or_else(|_| default_level.to_owned()));

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_writer(io::stderr)
        .with_target(false)
        .with_level(true)
        .with_filter(filter);

    let otel_layer = tracer.map(|tracer| {
        tracing_opentelemetry::layer()
            .with_tracer(tracer)
            .with_filter(Targets::new().with_target("critools", Level::INFO))
    });

    // A subscriber may already be installed when embedded in tests.
    let _ = tracing_subscriber::registry()
        .with(fmt_layer)
        .with(otel_layer)
        .try_init();
}
