// Pod sandbox verbs: pods, inspectp, stopp, rmp

use clap::Args;
use regex::Regex;
use serde_json::{json, Value};

use super::common::{
    emit, emit_line, format_age, format_timestamp, limit_listing, parse_labels,
    resolve_sandbox_id, sort_newest_first, truncate_id,
};
use super::info::expand_info;
use crate::cli::{OutputArgs, Session};
use crate::cri::{
    pod_sandbox_state_name, ListPodSandboxResponse, PodSandbox, PodSandboxFilter, PodSandboxState,
    PodSandboxStateValue,
};
use crate::errors::{CliError, CliResult};
use crate::output::table::POD_COLUMNS;
use crate::output::{render, OutputFormat, Table};

#[derive(Args, Debug, Clone, Default)]
pub struct PodsArgs {
    /// Filter by pod id prefix
    #[clap(long)]
    pub id: Option<String>,

    /// Filter by pod name regular expression
    #[clap(long)]
    pub name: Option<String>,

    /// Filter by pod namespace regular expression
    #[clap(long)]
    pub namespace: Option<String>,

    /// Filter by state: ready or notready
    #[clap(short = 's', long)]
    pub state: Option<String>,

    /// Filter by key=value label
    #[clap(long)]
    pub label: Vec<String>,

    /// Show only the most recently created pod
    #[clap(short = 'l', long)]
    pub latest: bool,

    /// Show the n most recently created pods
    #[clap(short = 'n', long, default_value = "0")]
    pub last: usize,

    /// Do not truncate ids
    #[clap(long)]
    pub no_trunc: bool,

    /// Print only pod ids
    #[clap(short = 'q', long)]
    pub quiet: bool,

    #[clap(flatten)]
    pub output: OutputArgs,
}

#[derive(Args, Debug, Clone, Default)]
pub struct RmpArgs {
    pub ids: Vec<String>,

    /// Stop running pods before removing them
    #[clap(short = 'f', long)]
    pub force: bool,

    /// Remove every pod sandbox
    #[clap(short = 'a', long)]
    pub all: bool,
}

fn parse_state(raw: &str) -> CliResult<PodSandboxState> {
    match raw.to_ascii_lowercase().as_str() {
        "ready" | "sandbox_ready" => Ok(PodSandboxState::SandboxReady),
        "notready" | "sandbox_notready" => Ok(PodSandboxState::SandboxNotready),
        _ => Err(CliError::InvalidArgument(format!(
            "--state should be ready or notready, got {raw:?}"
        ))),
    }
}

fn compile(pattern: Option<&str>, flag: &str) -> CliResult<Option<Regex>> {
    pattern
        .filter(|p| !p.is_empty())
        .map(|p| {
            Regex::new(p).map_err(|err| CliError::InvalidArgument(format!("invalid {flag}: {err}")))
        })
        .transpose()
}

pub fn state_label(state: i32) -> &'static str {
    match PodSandboxState::try_from(state) {
        Ok(PodSandboxState::SandboxReady) => "Ready",
        Ok(PodSandboxState::SandboxNotready) => "NotReady",
        Err(_) => "Unknown",
    }
}

fn pods_table(pods: &[PodSandbox], no_trunc: bool) -> Table {
    let mut table = Table::new(POD_COLUMNS);
    for pod in pods {
        let meta = pod.metadata.clone().unwrap_or_default();
        let handler = if pod.runtime_handler.is_empty() {
            "(default)".to_string()
        } else {
            pod.runtime_handler.clone()
        };
        table.push(vec![
            truncate_id(&pod.id, no_trunc),
            format_age(pod.created_at),
            state_label(pod.state).to_string(),
            meta.name,
            meta.namespace,
            meta.attempt.to_string(),
            handler,
        ]);
    }
    table
}

/// List pod sandboxes, newest first.
pub async fn handle_pods(session: &Session, args: &PodsArgs) -> CliResult<u8> {
    let format = OutputFormat::from_flags(
        args.output.output.as_deref(),
        args.output.template.as_deref(),
        "table",
        true,
    )?;
    let name = compile(args.name.as_deref(), "--name")?;
    let namespace = compile(args.namespace.as_deref(), "--namespace")?;
    let state = args.state.as_deref().map(parse_state).transpose()?;
    let label_selector = parse_labels(&args.label)?;

    let client = session.client().await?;
    let filter = PodSandboxFilter {
        id: String::new(),
        state: state.map(|s| PodSandboxStateValue { state: s as i32 }),
        label_selector,
    };
    let mut pods = client.list_pod_sandbox(Some(filter)).await?;

    pods.retain(|pod| {
        let meta = pod.metadata.clone().unwrap_or_default();
        args.id.as_deref().map_or(true, |id| pod.id.starts_with(id))
            && name.as_ref().map_or(true, |re| re.is_match(&meta.name))
            && namespace.as_ref().map_or(true, |re| re.is_match(&meta.namespace))
    });
    sort_newest_first(&mut pods, |pod| (pod.created_at, pod.id.as_str()));
    limit_listing(&mut pods, args.latest, args.last);

    if args.quiet {
        for pod in &pods {
            emit_line(&pod.id)?;
        }
        return Ok(0);
    }

    let response = ListPodSandboxResponse { items: pods };
    let text = render(&response, &format, || Ok(pods_table(&response.items, args.no_trunc)))?;
    emit(&text)?;
    Ok(0)
}

/// Show the status of one or more pod sandboxes.
pub async fn handle_inspectp(session: &Session, ids: &[String], output: &OutputArgs) -> CliResult<u8> {
    let format = OutputFormat::from_flags(
        output.output.as_deref(),
        output.template.as_deref(),
        "json",
        true,
    )?;

    let client = session.client().await?;
    for prefix in ids {
        let id = resolve_sandbox_id(client, prefix).await?;
        let response = client.pod_sandbox_status(&id, true).await?;
        let document = json!({
            "status": response.status,
            "info": Value::Object(expand_info(&response.info)),
        });

        let text = render(&document, &format, || {
            let status = response.status.clone().unwrap_or_default();
            let meta = status.metadata.clone().unwrap_or_default();
            let mut table = Table::new(&["FIELD", "VALUE"]).without_header();
            table.push(vec!["ID:".into(), status.id.clone()]);
            table.push(vec!["Name:".into(), meta.name]);
            table.push(vec!["UID:".into(), meta.uid]);
            table.push(vec!["Namespace:".into(), meta.namespace]);
            table.push(vec!["Attempt:".into(), meta.attempt.to_string()]);
            table.push(vec!["Status:".into(), pod_sandbox_state_name(status.state)]);
            table.push(vec!["Created:".into(), format_timestamp(status.created_at)]);
            if let Some(ip) = status.network.as_ref().map(|n| n.ip.clone()).filter(|ip| !ip.is_empty()) {
                table.push(vec!["IP Address:".into(), ip]);
            }
            Ok(table)
        })?;
        emit(&text)?;
    }
    Ok(0)
}

/// Stop pod sandboxes by id prefix.
pub async fn handle_stopp(session: &Session, ids: &[String]) -> CliResult<u8> {
    let client = session.client().await?;
    for prefix in ids {
        let id = resolve_sandbox_id(client, prefix).await?;
        client.stop_pod_sandbox(&id).await?;
        emit_line(&format!("Stopped sandbox {id}"))?;
    }
    Ok(0)
}

/// Remove pod sandboxes, stopping ready ones first with `--force`.
pub async fn handle_rmp(session: &Session, args: &RmpArgs) -> CliResult<u8> {
    if args.ids.is_empty() && !args.all {
        return Err(CliError::InvalidArgument("ID cannot be empty".into()));
    }

    let client = session.client().await?;
    let targets: Vec<PodSandbox> = if args.all {
        client.list_pod_sandbox(None).await?
    } else {
        let all = client.list_pod_sandbox(None).await?;
        let mut picked = Vec::new();
        for prefix in &args.ids {
            let id = resolve_sandbox_id(client, prefix).await?;
            if let Some(pod) = all.iter().find(|pod| pod.id == id) {
                picked.push(pod.clone());
            }
        }
        picked
    };

    for pod in targets {
        if pod.state == PodSandboxState::SandboxReady as i32 {
            if !args.force {
                return Err(CliError::InvalidArgument(format!(
                    "pod sandbox {} is running, please stop it first or use --force",
                    pod.id
                )));
            }
            client.stop_pod_sandbox(&pod.id).await?;
        }
        client.remove_pod_sandbox(&pod.id).await?;
        emit_line(&format!("Removed sandbox {}", pod.id))?;
    }
    Ok(0)
}
