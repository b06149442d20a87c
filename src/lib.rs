//! Client for CRI container runtimes.
//!
//! The `crictl` binary is a thin wrapper around [`run`]. The [`e2e`] module
//! holds the harness that drives the binary against a live runtime.
pub mod cli;
pub mod config;
pub mod cri;
pub mod e2e;
pub mod errors;
pub mod grpc;
pub mod logging;
pub mod output;
pub mod shutdown;
pub mod streaming;
pub mod telemetry;
pub mod utils;

use tracing::{debug, Instrument};

pub use cli::Cli;
use cli::Session;
use config::Config;
pub use errors::{CliError, CliResult};
use shutdown::Shutdown;
use telemetry::TracingHandle;

/// Runs one parsed invocation and returns the process exit code.
pub async fn run(cli: Cli) -> CliResult<u8> {
    let config = Config::resolve(cli.overrides())?;

    let exporter = match &config.tracing {
        Some(options) => Some(telemetry::initialize(
            &options.endpoint,
            options.sampling_rate_per_million,
        )?),
        None => None,
    };
    logging::init(config.debug, exporter.as_ref().map(TracingHandle::tracer));
    debug!(
        endpoints = ?config.runtime_endpoints,
        timeout = ?config.timeout,
        "resolved client configuration"
    );

    let shutdown = Shutdown::new();
    let signals = shutdown.watch_signals();
    let verb = cli.command.name();
    let session = Session::new(config, shutdown.token());

    let span = tracing::info_span!("crictl", otel.name = verb, verb);
    let result = cli::dispatch(cli.command, &session).instrument(span).await;

    signals.abort();
    if let Some(handle) = exporter {
        handle.shutdown().await;
    }
    result
}
