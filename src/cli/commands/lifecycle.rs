// Container lifecycle: start, stop, rm

use clap::Args;

use super::common::{emit_line, match_prefix, resolve_container_id};
use crate::cli::Session;
use crate::cri::{Container, ContainerState};
use crate::errors::{CliError, CliResult};

#[derive(Args, Debug, Clone, Default)]
pub struct RmArgs {
    pub ids: Vec<String>,

    /// Stop running containers before removing them
    #[clap(short = 'f', long)]
    pub force: bool,

    /// Remove every container
    #[clap(short = 'a', long)]
    pub all: bool,
}

/// Start created containers, printing each id.
pub async fn handle_start(session: &Session, ids: &[String]) -> CliResult<u8> {
    let client = session.client().await?;
    for prefix in ids {
        let id = resolve_container_id(client, prefix).await?;
        client.start_container(&id).await?;
        emit_line(&id)?;
    }
    Ok(0)
}

/// Stop running containers with a grace period in seconds.
pub async fn handle_stop(session: &Session, ids: &[String], timeout: i64) -> CliResult<u8> {
    if timeout < 0 {
        return Err(CliError::InvalidArgument("--timeout must not be negative".into()));
    }

    let client = session.client().await?;
    // The call has to outlive the grace period.
    let stopper = match client.context().timeout() {
        Some(base) => client.with_timeout(Some(base + std::time::Duration::from_secs(timeout as u64))),
        None => client.clone(),
    };
    for prefix in ids {
        let id = resolve_container_id(client, prefix).await?;
        stopper.stop_container(&id, timeout).await?;
        emit_line(&id)?;
    }
    Ok(0)
}

/// Resolve `rm` arguments against one container listing.
fn removal_targets(all: Vec<Container>, args: &RmArgs) -> CliResult<Vec<Container>> {
    if args.all {
        return Ok(all);
    }
    let mut picked: Vec<Container> = Vec::new();
    for prefix in &args.ids {
        let id = match_prefix("container", all.iter().map(|c| c.id.as_str()), prefix)?;
        if picked.iter().any(|c| c.id == id) {
            continue;
        }
        if let Some(container) = all.iter().find(|c| c.id == id) {
            picked.push(container.clone());
        }
    }
    Ok(picked)
}

/// Remove containers; running ones need `--force`.
pub async fn handle_remove(session: &Session, args: &RmArgs) -> CliResult<u8> {
    if args.ids.is_empty() && !args.all {
        return Err(CliError::InvalidArgument("ID cannot be empty".into()));
    }

    let client = session.client().await?;
    let all = client.list_containers(None).await?;
    let targets = removal_targets(all, args)?;

    for container in targets {
        if container.state == ContainerState::ContainerRunning as i32 {
            if !args.force {
                return Err(CliError::InvalidArgument(format!(
                    "container {} is running, please stop it first or use --force",
                    container.id
                )));
            }
            client.stop_container(&container.id, 0).await?;
        }
        client.remove_container(&container.id).await?;
        emit_line(&container.id)?;
    }
    Ok(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn listing() -> Vec<Container> {
        ["abc111", "abc222", "def333"]
            .into_iter()
            .map(|id| Container {
                id: id.into(),
                ..Default::default()
            })
            .collect()
    }

    fn rm(ids: &[&str]) -> RmArgs {
        RmArgs {
            ids: ids.iter().map(|id| id.to_string()).collect(),
            ..Default::default()
        }
    }

    #[test]
    fn prefixes_resolve_against_the_listing() {
        let targets = removal_targets(listing(), &rm(&["def", "abc1", "def333"])).unwrap();
        let ids: Vec<_> = targets.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, ["def333", "abc111"]);
    }

    #[test]
    fn ambiguous_prefix_removes_nothing() {
        let err = removal_targets(listing(), &rm(&["def", "abc"])).unwrap_err();
        assert!(err.to_string().contains("abc111"));
    }

    #[test]
    fn all_takes_the_whole_listing() {
        let args = RmArgs {
            all: true,
            ..Default::default()
        };
        assert_eq!(removal_targets(listing(), &args).unwrap().len(), 3);
    }
}
