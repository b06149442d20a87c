// stats and statsp: resource usage of containers and pod sandboxes

use std::collections::{HashMap, HashSet};
use std::time::Duration;

use clap::Args;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;

use super::common::{
    emit, format_size, parse_labels, resolve_container_id, resolve_sandbox_id, truncate_id,
    until_cancelled,
};
use crate::cli::{OutputArgs, Session};
use crate::cri::{
    ContainerFilter, ContainerState, ContainerStateValue, ContainerStats, ContainerStatsFilter,
    CpuUsage, ListContainerStatsResponse, ListPodSandboxStatsResponse, PodSandboxStats,
    PodSandboxStatsFilter, UInt64Value,
};
use crate::errors::{CliError, CliResult};
use crate::grpc::CriClient;
use crate::output::table::{CONTAINER_STATS_COLUMNS, POD_STATS_COLUMNS};
use crate::output::{render, OutputFormat, Table};

#[derive(Args, Debug, Clone)]
pub struct StatsArgs {
    /// Container id prefix to report on
    #[clap(long)]
    pub id: Option<String>,

    /// Only containers of this pod (id prefix)
    #[clap(short = 'p', long)]
    pub pod: Option<String>,

    /// Filter by key=value label
    #[clap(long)]
    pub label: Vec<String>,

    /// Include stopped containers
    #[clap(short = 'a', long)]
    pub all: bool,

    #[clap(flatten)]
    pub output: OutputArgs,

    /// Keep refreshing until interrupted
    #[clap(short = 'w', long)]
    pub watch: bool,

    /// Sampling interval in seconds
    #[clap(short = 's', long, default_value = "1")]
    pub seconds: u64,
}

#[derive(Args, Debug, Clone)]
pub struct StatspArgs {
    /// Pod id prefix to report on
    #[clap(long)]
    pub id: Option<String>,

    /// Filter by key=value label
    #[clap(long)]
    pub label: Vec<String>,

    #[clap(flatten)]
    pub output: OutputArgs,

    /// Keep refreshing until interrupted
    #[clap(short = 'w', long)]
    pub watch: bool,

    /// Sampling interval in seconds
    #[clap(short = 's', long, default_value = "1")]
    pub seconds: u64,
}

fn value_of(field: &Option<UInt64Value>) -> Option<u64> {
    field.as_ref().map(|v| v.value)
}

/// CPU percentage between two cumulative samples. Falls back to the
/// runtime's instantaneous `usageNanoCores` when no usable pair exists.
pub fn cpu_percent(previous: Option<&CpuUsage>, current: Option<&CpuUsage>) -> f64 {
    let Some(current) = current else {
        return 0.0;
    };
    if let Some(previous) = previous {
        let totals = (
            value_of(&previous.usage_core_nano_seconds),
            value_of(&current.usage_core_nano_seconds),
        );
        let elapsed = current.timestamp - previous.timestamp;
        if let (Some(before), Some(after)) = totals {
            if elapsed > 0 && after >= before {
                return (after - before) as f64 / elapsed as f64 * 100.0;
            }
        }
    }
    value_of(&current.usage_nano_cores)
        .map(|nano_cores| nano_cores as f64 / 1e7)
        .unwrap_or(0.0)
}

fn interval(seconds: u64) -> CliResult<Duration> {
    if seconds == 0 {
        return Err(CliError::InvalidArgument(
            "--seconds must be greater than zero".into(),
        ));
    }
    Ok(Duration::from_secs(seconds))
}

fn stats_format(output: &OutputArgs) -> CliResult<OutputFormat> {
    OutputFormat::from_flags(
        output.output.as_deref(),
        output.template.as_deref(),
        "table",
        true,
    )
}

async fn pause(cancel: &CancellationToken, period: Duration) -> CliResult<()> {
    until_cancelled(cancel, sleep(period)).await
}

// Container stats

fn container_id_of(stats: &ContainerStats) -> &str {
    stats
        .attributes
        .as_ref()
        .map(|a| a.id.as_str())
        .unwrap_or_default()
}

fn container_cpu_index(stats: &[ContainerStats]) -> HashMap<String, CpuUsage> {
    stats
        .iter()
        .filter_map(|s| Some((container_id_of(s).to_string(), s.cpu.clone()?)))
        .collect()
}

pub fn container_stats_table(
    stats: &[ContainerStats],
    previous: &HashMap<String, CpuUsage>,
) -> Table {
    let mut table = Table::new(CONTAINER_STATS_COLUMNS);
    for entry in stats {
        let id = container_id_of(entry);
        let name = entry
            .attributes
            .as_ref()
            .and_then(|a| a.metadata.as_ref())
            .map(|m| m.name.clone())
            .unwrap_or_default();
        let memory = entry
            .memory
            .as_ref()
            .and_then(|m| value_of(&m.working_set_bytes))
            .unwrap_or_default();
        let layer = entry.writable_layer.as_ref();
        let disk = layer.and_then(|l| value_of(&l.used_bytes)).unwrap_or_default();
        let inodes = layer.and_then(|l| value_of(&l.inodes_used)).unwrap_or_default();

        table.push(vec![
            truncate_id(id, false),
            name,
            format!("{:.2}", cpu_percent(previous.get(id), entry.cpu.as_ref())),
            format_size(memory),
            format_size(disk),
            inodes.to_string(),
        ]);
    }
    table
}

async fn container_filter(client: &CriClient, args: &StatsArgs) -> CliResult<ContainerStatsFilter> {
    let id = match args.id.as_deref().filter(|id| !id.is_empty()) {
        Some(prefix) => resolve_container_id(client, prefix).await?,
        None => String::new(),
    };
    let pod_sandbox_id = match args.pod.as_deref().filter(|pod| !pod.is_empty()) {
        Some(prefix) => resolve_sandbox_id(client, prefix).await?,
        None => String::new(),
    };
    Ok(ContainerStatsFilter {
        id,
        pod_sandbox_id,
        label_selector: parse_labels(&args.label)?,
    })
}

async fn sample_containers(
    client: &CriClient,
    filter: &ContainerStatsFilter,
    all: bool,
) -> CliResult<Vec<ContainerStats>> {
    let mut stats = client.list_container_stats(Some(filter.clone())).await?;
    if !all {
        let running: HashSet<String> = client
            .list_containers(Some(ContainerFilter {
                state: Some(ContainerStateValue {
                    state: ContainerState::ContainerRunning as i32,
                }),
                ..Default::default()
            }))
            .await?
            .into_iter()
            .map(|c| c.id)
            .collect();
        stats.retain(|s| running.contains(container_id_of(s)));
    }
    stats.sort_by(|a, b| container_id_of(a).cmp(container_id_of(b)));
    Ok(stats)
}

/// Report container resource usage. The table view takes two samples one
/// interval apart so CPU % reflects recent usage.
pub async fn handle_stats(session: &Session, args: &StatsArgs) -> CliResult<u8> {
    let format = stats_format(&args.output)?;
    let period = interval(args.seconds)?;
    let client = session.client().await?;
    let cancel = session.cancel_token();
    let filter = container_filter(client, args).await?;

    let mut previous = HashMap::new();
    if format.is_table() {
        previous = container_cpu_index(&sample_containers(client, &filter, args.all).await?);
        pause(&cancel, period).await?;
    }

    loop {
        let response = ListContainerStatsResponse {
            stats: sample_containers(client, &filter, args.all).await?,
        };
        emit(&render(&response, &format, || {
            Ok(container_stats_table(&response.stats, &previous))
        })?)?;
        if !args.watch {
            return Ok(0);
        }
        previous = container_cpu_index(&response.stats);
        pause(&cancel, period).await?;
        if format.is_table() {
            emit("\n")?;
        }
    }
}

// Pod sandbox stats

fn pod_id_of(stats: &PodSandboxStats) -> &str {
    stats
        .attributes
        .as_ref()
        .map(|a| a.id.as_str())
        .unwrap_or_default()
}

fn pod_cpu(stats: &PodSandboxStats) -> Option<&CpuUsage> {
    stats.linux.as_ref().and_then(|l| l.cpu.as_ref())
}

fn pod_cpu_index(stats: &[PodSandboxStats]) -> HashMap<String, CpuUsage> {
    stats
        .iter()
        .filter_map(|s| Some((pod_id_of(s).to_string(), pod_cpu(s)?.clone())))
        .collect()
}

pub fn pod_stats_table(stats: &[PodSandboxStats], previous: &HashMap<String, CpuUsage>) -> Table {
    let mut table = Table::new(POD_STATS_COLUMNS);
    for entry in stats {
        let id = pod_id_of(entry);
        let name = entry
            .attributes
            .as_ref()
            .and_then(|a| a.metadata.as_ref())
            .map(|m| m.name.clone())
            .unwrap_or_default();
        let memory = entry
            .linux
            .as_ref()
            .and_then(|l| l.memory.as_ref())
            .and_then(|m| value_of(&m.working_set_bytes))
            .unwrap_or_default();

        table.push(vec![
            truncate_id(id, false),
            name,
            format!("{:.2}", cpu_percent(previous.get(id), pod_cpu(entry))),
            format_size(memory),
        ]);
    }
    table
}

async fn sample_pods(
    client: &CriClient,
    filter: &PodSandboxStatsFilter,
) -> CliResult<Vec<PodSandboxStats>> {
    let mut stats = client.list_pod_sandbox_stats(Some(filter.clone())).await?;
    stats.sort_by(|a, b| pod_id_of(a).cmp(pod_id_of(b)));
    Ok(stats)
}

/// Report pod sandbox resource usage.
pub async fn handle_statsp(session: &Session, args: &StatspArgs) -> CliResult<u8> {
    let format = stats_format(&args.output)?;
    let period = interval(args.seconds)?;
    let client = session.client().await?;
    let cancel = session.cancel_token();

    let id = match args.id.as_deref().filter(|id| !id.is_empty()) {
        Some(prefix) => resolve_sandbox_id(client, prefix).await?,
        None => String::new(),
    };
    let filter = PodSandboxStatsFilter {
        id,
        label_selector: parse_labels(&args.label)?,
    };

    let mut previous = HashMap::new();
    if format.is_table() {
        previous = pod_cpu_index(&sample_pods(client, &filter).await?);
        pause(&cancel, period).await?;
    }

    loop {
        let response = ListPodSandboxStatsResponse {
            stats: sample_pods(client, &filter).await?,
        };
        emit(&render(&response, &format, || {
            Ok(pod_stats_table(&response.stats, &previous))
        })?)?;
        if !args.watch {
            return Ok(0);
        }
        previous = pod_cpu_index(&response.stats);
        pause(&cancel, period).await?;
        if format.is_table() {
            emit("\n")?;
        }
    }
}
