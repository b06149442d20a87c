pub mod commands;
pub mod session;

use std::path::PathBuf;
use std::time::Duration;

use clap::{Args, Parser, Subcommand};

use crate::config::{Overrides, TracingOptions, DEFAULT_TRACING_ENDPOINT};
use crate::errors::CliResult;
pub use session::Session;

/// crictl - client for CRI container runtimes
#[derive(Parser, Debug)]
#[clap(name = "crictl", author, version, about = "Client for CRI container runtimes")]
#[clap(propagate_version = true)]
pub struct Cli {
    #[clap(subcommand)]
    pub command: Commands,

    /// Container runtime endpoint, e.g. unix:///run/crio/crio.sock
    #[clap(short = 'r', long, env = "CONTAINER_RUNTIME_ENDPOINT")]
    pub runtime_endpoint: Option<String>,

    /// Image service endpoint; defaults to the runtime endpoint
    #[clap(short = 'i', long, env = "IMAGE_SERVICE_ENDPOINT")]
    pub image_endpoint: Option<String>,

    /// Per-call timeout, e.g. 2s or 200ms (bare numbers are seconds)
    #[clap(short = 't', long, value_parser = parse_timeout)]
    pub timeout: Option<Duration>,

    /// Enable debug logging
    #[clap(short = 'D', long)]
    pub debug: bool,

    /// Client config file
    #[clap(short = 'c', long, env = "CRICTL_CONFIG")]
    pub config: Option<PathBuf>,

    /// Export client spans to an OTLP collector
    #[clap(long)]
    pub enable_tracing: bool,

    /// OTLP/gRPC collector address
    #[clap(long, default_value = DEFAULT_TRACING_ENDPOINT)]
    pub tracing_endpoint: String,

    /// Sampling rate per million traces; negative samples everything
    #[clap(long, default_value_t = -1, allow_negative_numbers = true)]
    pub tracing_sampling_rate_per_million: i64,
}

impl Cli {
    pub fn overrides(&self) -> Overrides {
        Overrides {
            runtime_endpoint: self.runtime_endpoint.clone(),
            image_endpoint: self.image_endpoint.clone(),
            timeout: self.timeout,
            debug: self.debug,
            config_path: self.config.clone(),
            tracing: self.enable_tracing.then(|| TracingOptions {
                endpoint: self.tracing_endpoint.clone(),
                sampling_rate_per_million: self.tracing_sampling_rate_per_million,
            }),
        }
    }
}

fn parse_timeout(raw: &str) -> Result<Duration, String> {
    if let Ok(secs) = raw.parse::<u64>() {
        return Ok(Duration::from_secs(secs));
    }
    humantime::parse_duration(raw).map_err(|err| err.to_string())
}

/// `--output` / `--template` pair accepted by rendering verbs.
#[derive(Args, Debug, Clone, Default)]
pub struct OutputArgs {
    /// Output format: table, json, yaml or go-template
    #[clap(short = 'o', long)]
    pub output: Option<String>,

    /// Go template used with --output=go-template
    #[clap(long)]
    pub template: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Display runtime version information
    Version,

    /// Display runtime status and configuration
    Info {
        #[clap(flatten)]
        output: OutputArgs,
    },

    /// List pod sandboxes
    Pods(commands::sandbox::PodsArgs),

    /// List containers
    Ps(commands::container::PsArgs),

    /// List images
    #[clap(alias = "image", alias = "img")]
    Images(commands::image::ImagesArgs),

    /// Display the status of one or more containers
    Inspect {
        #[clap(required = true)]
        ids: Vec<String>,
        #[clap(flatten)]
        output: OutputArgs,
    },

    /// Display the status of one or more pod sandboxes
    Inspectp {
        #[clap(required = true)]
        ids: Vec<String>,
        #[clap(flatten)]
        output: OutputArgs,
    },

    /// Display the status of one or more images
    Inspecti {
        #[clap(required = true)]
        images: Vec<String>,
        #[clap(flatten)]
        output: OutputArgs,
    },

    /// Run a new pod sandbox from a config file
    Runp(commands::create::RunpArgs),

    /// Create a container in an existing pod sandbox
    Create(commands::create::CreateArgs),

    /// Run a pod sandbox and a container in it
    Run(commands::create::RunArgs),

    /// Start one or more created containers
    Start {
        #[clap(required = true)]
        ids: Vec<String>,
    },

    /// Stop one or more running containers
    Stop {
        #[clap(required = true)]
        ids: Vec<String>,

        /// Seconds to wait before killing the container
        #[clap(short = 't', long, default_value = "0")]
        timeout: i64,
    },

    /// Remove one or more containers
    Rm(commands::lifecycle::RmArgs),

    /// Stop one or more running pod sandboxes
    Stopp {
        #[clap(required = true)]
        ids: Vec<String>,
    },

    /// Remove one or more pod sandboxes
    Rmp(commands::sandbox::RmpArgs),

    /// Pull an image from a registry
    Pull(commands::image::PullArgs),

    /// Remove one or more images
    Rmi(commands::image::RmiArgs),

    /// Run a command in a running container
    Exec(commands::exec::ExecArgs),

    /// Attach to a running container
    Attach(commands::exec::AttachArgs),

    /// Forward local ports to a pod sandbox
    PortForward(commands::exec::PortForwardArgs),

    /// Fetch the logs of a container
    Logs(commands::logs::LogsArgs),

    /// Stream container events
    Events {
        #[clap(flatten)]
        output: OutputArgs,
    },

    /// List container resource usage statistics
    Stats(commands::stats::StatsArgs),

    /// List pod sandbox resource usage statistics
    Statsp(commands::stats::StatspArgs),
}

impl Commands {
    pub fn name(&self) -> &'static str {
        match self {
            Commands::Version => "version",
            Commands::Info { .. } => "info",
            Commands::Pods(_) => "pods",
            Commands::Ps(_) => "ps",
            Commands::Images(_) => "images",
            Commands::Inspect { .. } => "inspect",
            Commands::Inspectp { .. } => "inspectp",
            Commands::Inspecti { .. } => "inspecti",
            Commands::Runp(_) => "runp",
            Commands::Create(_) => "create",
            Commands::Run(_) => "run",
            Commands::Start { .. } => "start",
            Commands::Stop { .. } => "stop",
            Commands::Rm(_) => "rm",
            Commands::Stopp { .. } => "stopp",
            Commands::Rmp(_) => "rmp",
            Commands::Pull(_) => "pull",
            Commands::Rmi(_) => "rmi",
            Commands::Exec(_) => "exec",
            Commands::Attach(_) => "attach",
            Commands::PortForward(_) => "port-forward",
            Commands::Logs(_) => "logs",
            Commands::Events { .. } => "events",
            Commands::Stats(_) => "stats",
            Commands::Statsp(_) => "statsp",
        }
    }
}

/// Route a parsed verb to its handler. Returns the process exit code.
pub async fn dispatch(command: Commands, session: &Session) -> CliResult<u8> {
    use commands::*;

    match command {
        Commands::Version => info::handle_version(session).await,
        Commands::Info { output } => info::handle_info(session, &output).await,
        Commands::Pods(args) => sandbox::handle_pods(session, &args).await,
        Commands::Ps(args) => container::handle_ps(session, &args).await,
        Commands::Images(args) => image::handle_images(session, &args).await,
        Commands::Inspect { ids, output } => container::handle_inspect(session, &ids, &output).await,
        Commands::Inspectp { ids, output } => sandbox::handle_inspectp(session, &ids, &output).await,
        Commands::Inspecti { images, output } => {
            image::handle_inspecti(session, &images, &output).await
        }
        Commands::Runp(args) => create::handle_runp(session, &args).await,
        Commands::Create(args) => create::handle_create(session, &args).await,
        Commands::Run(args) => create::handle_run(session, &args).await,
        Commands::Start { ids } => lifecycle::handle_start(session, &ids).await,
        Commands::Stop { ids, timeout } => lifecycle::handle_stop(session, &ids, timeout).await,
        Commands::Rm(args) => lifecycle::handle_remove(session, &args).await,
        Commands::Stopp { ids } => sandbox::handle_stopp(session, &ids).await,
        Commands::Rmp(args) => sandbox::handle_rmp(session, &args).await,
        Commands::Pull(args) => image::handle_pull(session, &args).await,
        Commands::Rmi(args) => image::handle_rmi(session, &args).await,
        Commands::Exec(args) => exec::handle_exec(session, &args).await,
        Commands::Attach(args) => exec::handle_attach(session, &args).await,
        Commands::PortForward(args) => exec::handle_port_forward(session, &args).await,
        Commands::Logs(args) => logs::handle_logs(session, &args).await,
        Commands::Events { output } => events::handle_events(session, &output).await,
        Commands::Stats(args) => stats::handle_stats(session, &args).await,
        Commands::Statsp(args) => stats::handle_statsp(session, &args).await,
    }
}
