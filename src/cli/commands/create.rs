// Sandbox and container creation: runp, create, run

use std::path::PathBuf;

use clap::Args;

use super::common::{emit_line, resolve_sandbox_id};
use super::config_file::load_config_file;
use crate::cli::Session;
use crate::cri::{ContainerConfig, PodSandboxConfig};
use crate::errors::{CliError, CliResult};
use crate::grpc::CriClient;

#[derive(Args, Debug, Clone)]
pub struct RunpArgs {
    /// Pod sandbox config file (JSON or YAML)
    pub config: PathBuf,

    /// Runtime handler to use
    #[clap(short = 'r', long)]
    pub runtime: Option<String>,
}

#[derive(Args, Debug, Clone)]
pub struct CreateArgs {
    /// Pod sandbox id or prefix
    pub pod_id: String,

    /// Container config file
    pub container_config: PathBuf,

    /// Pod sandbox config file
    pub pod_config: PathBuf,

    /// Never pull the image
    #[clap(long, conflicts_with = "with_pull")]
    pub no_pull: bool,

    /// Pull the image before creating
    #[clap(long)]
    pub with_pull: bool,
}

#[derive(Args, Debug, Clone)]
pub struct RunArgs {
    /// Container config file
    pub container_config: PathBuf,

    /// Pod sandbox config file
    pub pod_config: PathBuf,

    /// Runtime handler to use
    #[clap(short = 'r', long)]
    pub runtime: Option<String>,

    /// Never pull the image
    #[clap(long)]
    pub no_pull: bool,
}

/// Pull `config`'s image unless it is already present.
async fn ensure_image(
    client: &CriClient,
    config: &ContainerConfig,
    sandbox: &PodSandboxConfig,
) -> CliResult<()> {
    let image = config
        .image
        .as_ref()
        .map(|spec| spec.image.as_str())
        .filter(|image| !image.is_empty())
        .ok_or_else(|| CliError::InvalidArgument("container config has no image".into()))?;

    match client.image_status(image, false).await {
        Ok(status) if status.image.is_some() => return Ok(()),
        Ok(_) | Err(CliError::NoSuchObject { .. }) => {}
        Err(err) => return Err(err),
    }

    tracing::debug!(image, "pulling image before create");
    client.pull_image(image, None, Some(sandbox.clone())).await?;
    Ok(())
}

async fn start_sandbox(
    client: &CriClient,
    config: PodSandboxConfig,
    runtime: Option<&str>,
) -> CliResult<String> {
    client.run_pod_sandbox(config, runtime.unwrap_or_default()).await
}

/// Run a pod sandbox and print its id.
pub async fn handle_runp(session: &Session, args: &RunpArgs) -> CliResult<u8> {
    let config: PodSandboxConfig = load_config_file(&args.config)?;

    let client = session.client().await?;
    let id = start_sandbox(client, config, args.runtime.as_deref()).await?;
    emit_line(&id)?;
    Ok(0)
}

/// Create a container in an existing sandbox and print its id.
pub async fn handle_create(session: &Session, args: &CreateArgs) -> CliResult<u8> {
    let config: ContainerConfig = load_config_file(&args.container_config)?;
    let sandbox: PodSandboxConfig = load_config_file(&args.pod_config)?;
    let pull = !args.no_pull && (args.with_pull || session.config().pull_image_on_create);

    let client = session.client().await?;
    let pod_id = resolve_sandbox_id(client, &args.pod_id).await?;
    if pull {
        ensure_image(client, &config, &sandbox).await?;
    }
    let id = client.create_container(&pod_id, config, Some(sandbox)).await?;
    emit_line(&id)?;
    Ok(0)
}

/// Run a sandbox, then create and start a container in it.
pub async fn handle_run(session: &Session, args: &RunArgs) -> CliResult<u8> {
    let config: ContainerConfig = load_config_file(&args.container_config)?;
    let sandbox: PodSandboxConfig = load_config_file(&args.pod_config)?;
    let pull = !args.no_pull && !session.config().disable_pull_on_run;

    let client = session.client().await?;
    if pull {
        ensure_image(client, &config, &sandbox).await?;
    }
    let pod_id = start_sandbox(client, sandbox.clone(), args.runtime.as_deref()).await?;
    let id = client.create_container(&pod_id, config, Some(sandbox)).await?;
    client.start_container(&id).await?;
    emit_line(&id)?;
    Ok(0)
}
