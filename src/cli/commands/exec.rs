// exec, attach and port-forward

use std::io::Write;
use std::time::Duration;

use clap::Args;
use tracing::debug;

use super::common::{resolve_container_id, resolve_sandbox_id};
use crate::cli::Session;
use crate::cri::{AttachRequest, ContainerState, ExecRequest};
use crate::errors::{CliError, CliResult};
use crate::streaming::{self, StreamOptions};

#[derive(Args, Debug, Clone)]
pub struct ExecArgs {
    /// Container id or id prefix
    pub container: String,

    /// Command and arguments to run
    #[clap(required = true, trailing_var_arg = true, allow_hyphen_values = true)]
    pub command: Vec<String>,

    /// Allocate a TTY
    #[clap(short = 't', long)]
    pub tty: bool,

    /// Keep stdin open
    #[clap(short = 'i', long)]
    pub interactive: bool,

    /// Run through ExecSync and wait for the result
    #[clap(short = 's', long)]
    pub sync: bool,

    /// Timeout in seconds for --sync; 0 waits forever
    #[clap(long, default_value = "0")]
    pub timeout: u64,
}

#[derive(Args, Debug, Clone)]
pub struct AttachArgs {
    /// Container id or id prefix
    pub container: String,

    /// The container was started with a TTY
    #[clap(short = 't', long)]
    pub tty: bool,

    /// Forward local stdin
    #[clap(short = 'i', long)]
    pub stdin: bool,
}

#[derive(Args, Debug, Clone)]
pub struct PortForwardArgs {
    /// Pod sandbox id or id prefix
    pub pod: String,

    /// Ports to forward as [LOCAL:]REMOTE
    #[clap(required = true)]
    pub ports: Vec<String>,
}

/// Remote exit codes outside 0..=255 are folded the way a shell would.
fn exit_status(code: i32) -> u8 {
    (code & 0xff) as u8
}

fn copy_output(mut out: impl Write, data: &[u8]) -> CliResult<()> {
    out.write_all(data)?;
    out.flush()?;
    Ok(())
}

/// Run a command in a container. The process exits with the remote code.
pub async fn handle_exec(session: &Session, args: &ExecArgs) -> CliResult<u8> {
    if args.sync && (args.tty || args.interactive) {
        return Err(CliError::FlagConflict(
            "--sync cannot be combined with --tty or --interactive".into(),
        ));
    }
    if !args.sync && args.timeout != 0 {
        return Err(CliError::FlagConflict("--timeout requires --sync".into()));
    }

    let client = session.client().await?;
    let container_id = resolve_container_id(client, &args.container).await?;

    if args.sync {
        let response = client
            .exec_sync(
                &container_id,
                args.command.clone(),
                Duration::from_secs(args.timeout),
            )
            .await?;
        copy_output(std::io::stdout().lock(), &response.stdout)?;
        copy_output(std::io::stderr().lock(), &response.stderr)?;
        return Ok(exit_status(response.exit_code));
    }

    let url = client
        .exec(ExecRequest {
            container_id,
            cmd: args.command.clone(),
            tty: args.tty,
            stdin: args.interactive,
            stdout: true,
            stderr: !args.tty,
        })
        .await?;
    debug!(%url, "exec streaming URL");

    let options = StreamOptions {
        stdin: args.interactive,
        tty: args.tty,
    };
    let code = streaming::run_session(&url, options, session.cancel_token()).await?;
    Ok(exit_status(code))
}

/// Attach to the main process of a running container.
pub async fn handle_attach(session: &Session, args: &AttachArgs) -> CliResult<u8> {
    let client = session.client().await?;
    let container_id = resolve_container_id(client, &args.container).await?;

    let state = client
        .container_status(&container_id, false)
        .await?
        .status
        .map(|status| status.state)
        .unwrap_or_default();
    if state != ContainerState::ContainerRunning as i32 {
        return Err(CliError::InvalidArgument(format!(
            "container {container_id:?} is not running"
        )));
    }

    let url = client
        .attach(AttachRequest {
            container_id,
            stdin: args.stdin,
            tty: args.tty,
            stdout: true,
            stderr: !args.tty,
        })
        .await?;
    debug!(%url, "attach streaming URL");

    let options = StreamOptions {
        stdin: args.stdin,
        tty: args.tty,
    };
    streaming::run_session(&url, options, session.cancel_token()).await?;
    Ok(0)
}

/// Forward local ports to a pod until interrupted.
pub async fn handle_port_forward(session: &Session, args: &PortForwardArgs) -> CliResult<u8> {
    let mappings = streaming::parse_mappings(&args.ports)?;

    let client = session.client().await?;
    let pod_id = resolve_sandbox_id(client, &args.pod).await?;
    let remotes = mappings.iter().map(|m| i32::from(m.remote)).collect();
    let url = client.port_forward(&pod_id, remotes).await?;
    debug!(%url, "port-forward streaming URL");

    streaming::forward(&url, &mappings, session.cancel_token()).await?;
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes_fold_into_a_byte() {
        assert_eq!(exit_status(0), 0);
        assert_eq!(exit_status(42), 42);
        assert_eq!(exit_status(256 + 3), 3);
        assert_eq!(exit_status(-1), 255);
    }
}
