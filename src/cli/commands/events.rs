// events: follow the runtime's container event stream

use tokio::time::sleep;
use tonic::Streaming;
use tracing::{debug, warn};

use super::common::{emit, format_timestamp, no_table, until_cancelled};
use crate::cli::{OutputArgs, Session};
use crate::cri::{event_type_name, ContainerEventResponse};
use crate::errors::{CliError, CliResult};
use crate::grpc::retry::{is_retryable, Backoff, RESUBSCRIBE_BACKOFF};
use crate::output::{render, OutputFormat};

/// Compact one-line form used by the table format.
pub fn event_line(event: &ContainerEventResponse) -> String {
    let pod = event
        .pod_sandbox_status
        .as_ref()
        .map(|status| status.id.as_str())
        .unwrap_or_default();
    format!(
        "{} {} container={} pod={}\n",
        format_timestamp(event.created_at),
        event_type_name(event.container_event_type),
        event.container_id,
        if pod.is_empty() { "<none>" } else { pod },
    )
}

fn render_event(event: &ContainerEventResponse, format: &OutputFormat) -> CliResult<String> {
    match format {
        OutputFormat::Table => Ok(event_line(event)),
        _ => render(event, format, no_table),
    }
}

/// Print every event as it arrives until the stream ends or the user
/// interrupts. `Unavailable` re-subscribes on a short backoff schedule.
pub async fn handle_events(session: &Session, output: &OutputArgs) -> CliResult<u8> {
    let format = OutputFormat::from_flags(
        output.output.as_deref(),
        output.template.as_deref(),
        "json",
        true,
    )?;

    let client = session.client().await?;
    let cancel = session.cancel_token();
    let mut backoff = Backoff::new(RESUBSCRIBE_BACKOFF);
    let mut stream: Option<Streaming<ContainerEventResponse>> = None;

    loop {
        let failure = match stream.as_mut() {
            None => match until_cancelled(&cancel, client.subscribe_events()).await? {
                Ok(opened) => {
                    debug!("subscribed to container events");
                    stream = Some(opened);
                    continue;
                }
                Err(status) => status,
            },
            Some(events) => match until_cancelled(&cancel, events.message()).await? {
                Ok(Some(event)) => {
                    emit(&render_event(&event, &format)?)?;
                    continue;
                }
                Ok(None) => {
                    debug!("container event stream closed by runtime");
                    return Ok(0);
                }
                Err(status) => status,
            },
        };

        stream = None;
        if !is_retryable(&failure) {
            return Err(CliError::from_status(failure, None));
        }
        let Some(delay) = backoff.next_delay() else {
            return Err(CliError::from_status(failure, None));
        };
        warn!(
            attempt = backoff.attempts(),
            delay_ms = delay.as_millis() as u64,
            "event stream unavailable, re-subscribing: {}",
            failure.message()
        );
        until_cancelled(&cancel, sleep(delay)).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cri::{ContainerEventType, PodSandboxStatus};

    fn event() -> ContainerEventResponse {
        ContainerEventResponse {
            container_id: "c0ffee".into(),
            container_event_type: ContainerEventType::ContainerStartedEvent as i32,
            created_at: 1_700_000_000_000_000_000,
            pod_sandbox_status: Some(PodSandboxStatus {
                id: "abcd".into(),
                ..Default::default()
            }),
            containers_statuses: Vec::new(),
        }
    }

    #[test]
    fn table_events_are_one_liners() {
        let line = render_event(&event(), &OutputFormat::Table).unwrap();
        assert_eq!(
            line,
            "2023-11-14T22:13:20.000000000Z CONTAINER_STARTED_EVENT container=c0ffee pod=abcd\n"
        );
    }

    #[test]
    fn json_events_name_the_event_type() {
        let doc = render_event(&event(), &OutputFormat::Json).unwrap();
        let value: serde_json::Value = serde_json::from_str(&doc).unwrap();
        assert_eq!(value["containerEventType"], "CONTAINER_STARTED_EVENT");
        assert_eq!(value["containerId"], "c0ffee");
    }

    #[test]
    fn missing_pod_is_marked() {
        let mut bare = event();
        bare.pod_sandbox_status = None;
        assert!(event_line(&bare).ends_with("pod=<none>\n"));
    }
}
