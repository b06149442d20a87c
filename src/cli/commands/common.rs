// Helpers shared by verb handlers: id resolution, formatting, output.

use std::collections::HashMap;
use std::future::Future;
use std::io::Write;

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use crate::cri::Image;
use crate::errors::{CliError, CliResult};
use crate::grpc::CriClient;
use crate::output::Table;

pub const TRUNCATED_ID_LEN: usize = 13;

/// Picks the single candidate that equals or starts with `prefix`.
pub fn match_prefix<'a, I>(kind: &'static str, candidates: I, prefix: &str) -> CliResult<String>
where
    I: IntoIterator<Item = &'a str>,
{
    if prefix.is_empty() {
        return Err(CliError::InvalidArgument(format!("{kind} id cannot be empty")));
    }

    let mut matches = Vec::new();
    for candidate in candidates {
        if candidate == prefix {
            return Ok(candidate.to_string());
        }
        if candidate.starts_with(prefix) {
            matches.push(candidate.to_string());
        }
    }

    match matches.len() {
        0 => Err(CliError::NoSuchObject {
            id: prefix.to_string(),
            message: format!("no {kind} matches this id"),
        }),
        1 => Ok(matches.remove(0)),
        _ => {
            matches.sort();
            Err(CliError::AmbiguousId {
                kind,
                prefix: prefix.to_string(),
                candidates: matches,
            })
        }
    }
}

/// Resolve a container id prefix to the full id.
pub async fn resolve_container_id(client: &CriClient, prefix: &str) -> CliResult<String> {
    let containers = client.list_containers(None).await?;
    match_prefix("container", containers.iter().map(|c| c.id.as_str()), prefix)
}

/// Resolve a pod sandbox id prefix to the full id.
pub async fn resolve_sandbox_id(client: &CriClient, prefix: &str) -> CliResult<String> {
    let sandboxes = client.list_pod_sandbox(None).await?;
    match_prefix("pod sandbox", sandboxes.iter().map(|p| p.id.as_str()), prefix)
}

/// Look an image up by reference, falling back to an image id prefix.
pub async fn resolve_image(client: &CriClient, reference: &str) -> CliResult<Image> {
    match client.image_status(reference, false).await {
        Ok(response) => {
            if let Some(image) = response.image {
                return Ok(image);
            }
        }
        Err(CliError::NoSuchObject { .. }) => {}
        Err(err) => return Err(err),
    }

    let images = client.list_images(None).await?;
    let wanted = reference.strip_prefix("sha256:").unwrap_or(reference);
    let id = match_prefix(
        "image",
        images
            .iter()
            .map(|image| image.id.strip_prefix("sha256:").unwrap_or(&image.id)),
        wanted,
    )
    .map_err(|err| match err {
        CliError::NoSuchObject { .. } => CliError::NoSuchObject {
            id: reference.to_string(),
            message: "image not found".to_string(),
        },
        other => other,
    })?;

    images
        .into_iter()
        .find(|image| image.id.strip_prefix("sha256:").unwrap_or(&image.id) == id)
        .ok_or_else(|| CliError::NoSuchObject {
            id: reference.to_string(),
            message: "image not found".to_string(),
        })
}

/// Shortened id for table output; image ids lose their digest algorithm.
pub fn truncate_id(id: &str, no_trunc: bool) -> String {
    let id = id.strip_prefix("sha256:").unwrap_or(id);
    if no_trunc {
        return id.to_string();
    }
    id.chars().take(TRUNCATED_ID_LEN).collect()
}

/// Sort newest first, ties broken by ascending id.
pub fn sort_newest_first<T>(items: &mut [T], key: impl Fn(&T) -> (i64, &str)) {
    items.sort_by(|a, b| {
        let (created_a, id_a) = key(a);
        let (created_b, id_b) = key(b);
        created_b.cmp(&created_a).then_with(|| id_a.cmp(id_b))
    });
}

/// Keeps the newest `last` items, or only the newest when `latest` is set.
pub fn limit_listing<T>(items: &mut Vec<T>, latest: bool, last: usize) {
    if latest {
        items.truncate(1);
    } else if last > 0 {
        items.truncate(last);
    }
}

fn from_unix_nanos(nanos: i64) -> Option<DateTime<Utc>> {
    if nanos <= 0 {
        return None;
    }
    Some(DateTime::<Utc>::from_timestamp_nanos(nanos))
}

/// Format a nanosecond timestamp as RFC 3339.
pub fn format_timestamp(nanos: i64) -> String {
    match from_unix_nanos(nanos) {
        Some(dt) => dt.to_rfc3339_opts(chrono::SecondsFormat::Nanos, true),
        None => "N/A".to_string(),
    }
}

/// Relative age such as "About a minute ago".
pub fn format_age(nanos: i64) -> String {
    match from_unix_nanos(nanos) {
        Some(created) => {
            let elapsed = (Utc::now() - created).to_std().unwrap_or_default();
            format!("{} ago", human_duration(elapsed))
        }
        None => "N/A".to_string(),
    }
}

pub fn human_duration(d: std::time::Duration) -> String {
    let seconds = d.as_secs();
    let hours = seconds / 3600;
    match seconds {
        0 => "Less than a second".to_string(),
        1 => "1 second".to_string(),
        s if s < 60 => format!("{s} seconds"),
        s if s / 60 == 1 => "About a minute".to_string(),
        s if s < 3600 => format!("{} minutes", s / 60),
        _ if hours == 1 => "About an hour".to_string(),
        _ if hours < 48 => format!("{hours} hours"),
        _ if hours < 24 * 7 * 2 => format!("{} days", hours / 24),
        _ if hours < 24 * 30 * 2 => format!("{} weeks", hours / 24 / 7),
        _ if hours < 24 * 365 * 2 => format!("{} months", hours / 24 / 30),
        _ => format!("{} years", hours / 24 / 365),
    }
}

/// Decimal size with four significant digits, e.g. `4.27MB`.
pub fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "kB", "MB", "GB", "TB", "PB"];

    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1000.0 && unit < UNITS.len() - 1 {
        size /= 1000.0;
        unit += 1;
    }

    let integer_digits = if size < 1.0 { 1 } else { size.log10().floor() as usize + 1 };
    let precision = 4usize.saturating_sub(integer_digits);
    let mut text = format!("{size:.precision$}");
    if text.contains('.') {
        text = text.trim_end_matches('0').trim_end_matches('.').to_string();
    }
    format!("{text}{}", UNITS[unit])
}

/// Parse repeated `key=value` label selectors.
pub fn parse_labels(labels: &[String]) -> CliResult<HashMap<String, String>> {
    labels
        .iter()
        .map(|label| match label.split_once('=') {
            Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
            _ => Err(CliError::InvalidArgument(format!(
                "incorrectly specified label: {label:?}"
            ))),
        })
        .collect()
}

/// Write rendered output to stdout.
pub fn emit(text: &str) -> CliResult<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(text.as_bytes())?;
    stdout.flush()?;
    Ok(())
}

/// Table builder for verbs that only offer document formats.
pub fn no_table() -> CliResult<Table> {
    Err(CliError::UnsupportedFormat("table".into()))
}

pub fn emit_line(text: &str) -> CliResult<()> {
    emit(&format!("{text}\n"))
}

/// Awaits `future` unless `cancel` fires first, which yields `Interrupted`.
pub async fn until_cancelled<F: Future>(
    cancel: &CancellationToken,
    future: F,
) -> CliResult<F::Output> {
    tokio::select! {
        _ = cancel.cancelled() => Err(CliError::Interrupted),
        output = future => Ok(output),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn prefix_resolution() {
        let ids = ["abc123", "abd456", "ffff00"];
        assert_eq!(match_prefix("container", ids, "abc").unwrap(), "abc123");
        assert_eq!(match_prefix("container", ids, "ffff00").unwrap(), "ffff00");

        match match_prefix("container", ids, "ab") {
            Err(CliError::AmbiguousId { candidates, .. }) => {
                assert_eq!(candidates, vec!["abc123", "abd456"])
            }
            other => panic!("expected ambiguity, got {other:?}"),
        }
        assert!(matches!(
            match_prefix("container", ids, "zz"),
            Err(CliError::NoSuchObject { .. })
        ));
        assert!(match_prefix("container", ids, "").is_err());
    }

    #[test]
    fn exact_match_wins_over_longer_candidates() {
        let ids = ["abc", "abcdef"];
        assert_eq!(match_prefix("container", ids, "abc").unwrap(), "abc");
    }

    #[test]
    fn ids_are_truncated_for_tables() {
        let id = "sha256:0123456789abcdef0123456789";
        assert_eq!(truncate_id(id, false), "0123456789abc");
        assert_eq!(truncate_id(id, true), "0123456789abcdef0123456789");
    }

    #[test]
    fn newest_first_then_id() {
        let mut items = vec![(10, "b"), (20, "z"), (10, "a")];
        sort_newest_first(&mut items, |(created, id)| (*created, *id));
        assert_eq!(items, vec![(20, "z"), (10, "a"), (10, "b")]);
    }

    #[test]
    fn listing_limits() {
        let mut items = vec![1, 2, 3, 4];
        limit_listing(&mut items, false, 2);
        assert_eq!(items, vec![1, 2]);
        limit_listing(&mut items, true, 0);
        assert_eq!(items, vec![1]);
    }

    #[test]
    fn human_durations() {
        assert_eq!(human_duration(Duration::from_millis(300)), "Less than a second");
        assert_eq!(human_duration(Duration::from_secs(45)), "45 seconds");
        assert_eq!(human_duration(Duration::from_secs(90)), "About a minute");
        assert_eq!(human_duration(Duration::from_secs(600)), "10 minutes");
        assert_eq!(human_duration(Duration::from_secs(3700)), "About an hour");
        assert_eq!(human_duration(Duration::from_secs(3 * 24 * 3600)), "3 days");
    }

    #[test]
    fn sizes_use_decimal_units() {
        assert_eq!(format_size(0), "0B");
        assert_eq!(format_size(512), "512B");
        assert_eq!(format_size(4_270_000), "4.27MB");
        assert_eq!(format_size(1_000_000_000), "1GB");
        assert_eq!(format_size(123_456), "123.5kB");
    }

    #[test]
    fn label_parsing() {
        let labels = parse_labels(&["app=web".into(), "tier=".into()]).unwrap();
        assert_eq!(labels["app"], "web");
        assert_eq!(labels["tier"], "");
        assert!(parse_labels(&["novalue".into()]).is_err());
    }

    #[test]
    fn timestamps() {
        assert_eq!(format_timestamp(0), "N/A");
        assert_eq!(
            format_timestamp(1_700_000_000_000_000_000),
            "2023-11-14T22:13:20.000000000Z"
        );
    }
}
