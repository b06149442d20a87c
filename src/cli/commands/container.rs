// Container listing and inspection: ps, inspect

use std::collections::HashMap;

use clap::Args;
use regex::Regex;
use serde_json::{json, Value};

use super::common::{
    emit, emit_line, format_age, format_timestamp, limit_listing, parse_labels,
    resolve_container_id, sort_newest_first, truncate_id,
};
use super::info::expand_info;
use crate::cli::{OutputArgs, Session};
use crate::cri::{
    container_state_name, Container, ContainerFilter, ContainerState, ContainerStateValue,
    ListContainersResponse,
};
use crate::errors::{CliError, CliResult};
use crate::output::table::CONTAINER_COLUMNS;
use crate::output::{render, OutputFormat, Table};

#[derive(Args, Debug, Clone, Default)]
pub struct PsArgs {
    /// Show all containers, not only running ones
    #[clap(short = 'a', long)]
    pub all: bool,

    /// Filter by container id prefix
    #[clap(long)]
    pub id: Option<String>,

    /// Filter by container name regular expression
    #[clap(long)]
    pub name: Option<String>,

    /// Filter by pod id prefix
    #[clap(short = 'p', long)]
    pub pod: Option<String>,

    /// Filter by state: created, running, exited or unknown
    #[clap(short = 's', long)]
    pub state: Option<String>,

    /// Filter by key=value label
    #[clap(long)]
    pub label: Vec<String>,

    /// Filter by image reference substring
    #[clap(long)]
    pub image: Option<String>,

    /// Show only the most recently created container
    #[clap(short = 'l', long)]
    pub latest: bool,

    /// Show the n most recently created containers
    #[clap(short = 'n', long, default_value = "0")]
    pub last: usize,

    /// Do not truncate ids
    #[clap(long)]
    pub no_trunc: bool,

    /// Print only container ids
    #[clap(short = 'q', long)]
    pub quiet: bool,

    #[clap(flatten)]
    pub output: OutputArgs,
}

pub fn parse_state(raw: &str) -> CliResult<ContainerState> {
    match raw.to_ascii_lowercase().as_str() {
        "created" | "container_created" => Ok(ContainerState::ContainerCreated),
        "running" | "container_running" => Ok(ContainerState::ContainerRunning),
        "exited" | "container_exited" => Ok(ContainerState::ContainerExited),
        "unknown" | "container_unknown" => Ok(ContainerState::ContainerUnknown),
        _ => Err(CliError::InvalidArgument(format!(
            "--state should be one of created, running, exited or unknown, got {raw:?}"
        ))),
    }
}

pub fn state_label(state: i32) -> &'static str {
    match ContainerState::try_from(state) {
        Ok(ContainerState::ContainerCreated) => "Created",
        Ok(ContainerState::ContainerRunning) => "Running",
        Ok(ContainerState::ContainerExited) => "Exited",
        _ => "Unknown",
    }
}

fn image_column(container: &Container, no_trunc: bool) -> String {
    let image = container
        .image
        .as_ref()
        .map(|spec| spec.image.as_str())
        .filter(|image| !image.is_empty())
        .unwrap_or(container.image_ref.as_str());
    if image.starts_with("sha256:") {
        truncate_id(image, no_trunc)
    } else {
        image.to_string()
    }
}

fn containers_table(
    containers: &[Container],
    pod_names: &HashMap<String, String>,
    no_trunc: bool,
) -> Table {
    let mut table = Table::new(CONTAINER_COLUMNS);
    for container in containers {
        let meta = container.metadata.clone().unwrap_or_default();
        table.push(vec![
            truncate_id(&container.id, no_trunc),
            image_column(container, no_trunc),
            format_age(container.created_at),
            state_label(container.state).to_string(),
            meta.name,
            meta.attempt.to_string(),
            truncate_id(&container.pod_sandbox_id, no_trunc),
            pod_names
                .get(&container.pod_sandbox_id)
                .cloned()
                .unwrap_or_else(|| "unknown".to_string()),
        ]);
    }
    table
}

/// List containers, newest first. Only running containers unless `--all`
/// or an explicit `--state` is given.
pub async fn handle_ps(session: &Session, args: &PsArgs) -> CliResult<u8> {
    let format = OutputFormat::from_flags(
        args.output.output.as_deref(),
        args.output.template.as_deref(),
        "table",
        true,
    )?;
    let name = args
        .name
        .as_deref()
        .filter(|p| !p.is_empty())
        .map(|p| Regex::new(p).map_err(|err| CliError::InvalidArgument(format!("invalid --name: {err}"))))
        .transpose()?;
    let state = match args.state.as_deref() {
        Some(raw) => Some(parse_state(raw)?),
        None if args.all => None,
        None => Some(ContainerState::ContainerRunning),
    };
    let label_selector = parse_labels(&args.label)?;

    let client = session.client().await?;
    let filter = ContainerFilter {
        state: state.map(|s| ContainerStateValue { state: s as i32 }),
        label_selector,
        ..Default::default()
    };
    let mut containers = client.list_containers(Some(filter)).await?;

    containers.retain(|c| {
        let meta_name = c.metadata.as_ref().map(|m| m.name.as_str()).unwrap_or_default();
        args.id.as_deref().map_or(true, |id| c.id.starts_with(id))
            && args.pod.as_deref().map_or(true, |pod| c.pod_sandbox_id.starts_with(pod))
            && name.as_ref().map_or(true, |re| re.is_match(meta_name))
            && args.image.as_deref().map_or(true, |image| {
                c.image.as_ref().is_some_and(|spec| spec.image.contains(image))
                    || c.image_ref.contains(image)
            })
    });
    sort_newest_first(&mut containers, |c| (c.created_at, c.id.as_str()));
    limit_listing(&mut containers, args.latest, args.last);

    if args.quiet {
        for container in &containers {
            emit_line(&container.id)?;
        }
        return Ok(0);
    }

    let pod_names = if format.is_table() {
        client
            .list_pod_sandbox(None)
            .await?
            .into_iter()
            .map(|pod| (pod.id, pod.metadata.unwrap_or_default().name))
            .collect()
    } else {
        HashMap::new()
    };

    let response = ListContainersResponse { containers };
    let text = render(&response, &format, || {
        Ok(containers_table(&response.containers, &pod_names, args.no_trunc))
    })?;
    emit(&text)?;
    Ok(0)
}

/// Show the status of one or more containers.
pub async fn handle_inspect(session: &Session, ids: &[String], output: &OutputArgs) -> CliResult<u8> {
    let format = OutputFormat::from_flags(
        output.output.as_deref(),
        output.template.as_deref(),
        "json",
        true,
    )?;

    let client = session.client().await?;
    for prefix in ids {
        let id = resolve_container_id(client, prefix).await?;
        let response = client.container_status(&id, true).await?;
        let document = json!({
            "status": response.status,
            "info": Value::Object(expand_info(&response.info)),
        });

        let text = render(&document, &format, || {
            let status = response.status.clone().unwrap_or_default();
            let meta = status.metadata.clone().unwrap_or_default();
            let image = status.image.clone().unwrap_or_default();
            let mut table = Table::new(&["FIELD", "VALUE"]).without_header();
            table.push(vec!["ID:".into(), status.id.clone()]);
            table.push(vec!["Name:".into(), meta.name]);
            table.push(vec!["Attempt:".into(), meta.attempt.to_string()]);
            table.push(vec!["State:".into(), container_state_name(status.state)]);
            table.push(vec!["Created:".into(), format_age(status.created_at)]);
            if status.started_at > 0 {
                table.push(vec!["Started:".into(), format_timestamp(status.started_at)]);
            }
            if status.finished_at > 0 {
                table.push(vec!["Finished:".into(), format_timestamp(status.finished_at)]);
                table.push(vec!["Exit Code:".into(), status.exit_code.to_string()]);
            }
            if !status.reason.is_empty() {
                table.push(vec!["Reason:".into(), status.reason.clone()]);
            }
            table.push(vec!["Image:".into(), image.image]);
            table.push(vec!["ImageRef:".into(), status.image_ref.clone()]);
            table.push(vec!["Log Path:".into(), status.log_path.clone()]);
            Ok(table)
        })?;
        emit(&text)?;
    }
    Ok(0)
}
