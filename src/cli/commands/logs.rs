// logs: read a container's CRI log file directly

use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;

use chrono::{DateTime, FixedOffset, SecondsFormat, Utc};
use clap::Args;
use tokio::fs::File;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::time::{sleep, Instant};
use tracing::debug;

use super::common::{resolve_container_id, until_cancelled};
use crate::cli::Session;
use crate::cri::ContainerState;
use crate::errors::{CliError, CliResult};
use crate::grpc::CriClient;

const FOLLOW_POLL_INTERVAL: Duration = Duration::from_millis(200);
const STATE_CHECK_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Args, Debug, Clone)]
pub struct LogsArgs {
    /// Container id or id prefix
    pub container: String,

    /// Keep streaming new output until the container exits
    #[clap(short = 'f', long)]
    pub follow: bool,

    /// Only print the last N lines
    #[clap(long)]
    pub tail: Option<usize>,

    /// Prefix every line with its timestamp
    #[clap(short = 't', long)]
    pub timestamps: bool,

    /// Only lines newer than a relative duration (5m) or RFC3339 time
    #[clap(long)]
    pub since: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogStream {
    Stdout,
    Stderr,
}

/// One physical line of a CRI log file.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub timestamp: DateTime<FixedOffset>,
    pub stream: LogStream,
    pub partial: bool,
    pub message: Vec<u8>,
}

/// A complete logical line, after partial records were joined.
#[derive(Debug, Clone, PartialEq)]
pub struct LogLine {
    pub timestamp: DateTime<FixedOffset>,
    pub stream: LogStream,
    pub message: Vec<u8>,
}

/// Parses `<rfc3339nano> <stdout|stderr> <P|F>[:tags] <message>`. Only the
/// header has to be text; the message is kept as the container wrote it.
pub fn parse_cri_line(line: &[u8]) -> Option<LogRecord> {
    let mut fields = line.splitn(4, |b| *b == b' ');
    let timestamp = DateTime::parse_from_rfc3339(std::str::from_utf8(fields.next()?).ok()?).ok()?;
    let stream = match fields.next()? {
        b"stdout" => LogStream::Stdout,
        b"stderr" => LogStream::Stderr,
        _ => return None,
    };
    let partial = match fields.next()?.split(|b| *b == b':').next()? {
        b"P" => true,
        b"F" => false,
        _ => return None,
    };
    Some(LogRecord {
        timestamp,
        stream,
        partial,
        message: fields.next().unwrap_or_default().to_vec(),
    })
}

/// Joins partial records per stream. A line keeps the timestamp of its
/// first fragment.
#[derive(Debug, Default)]
pub struct LineAssembler {
    pending: HashMap<LogStream, LogLine>,
}

impl LineAssembler {
    pub fn push(&mut self, record: LogRecord) -> Option<LogLine> {
        let line = match self.pending.remove(&record.stream) {
            Some(mut started) => {
                started.message.extend_from_slice(&record.message);
                started
            }
            None => LogLine {
                timestamp: record.timestamp,
                stream: record.stream,
                message: record.message,
            },
        };
        if record.partial {
            self.pending.insert(line.stream, line);
            None
        } else {
            Some(line)
        }
    }
}

/// `--since` accepts a relative duration or an absolute RFC 3339 time.
pub fn parse_since(raw: &str, now: DateTime<Utc>) -> CliResult<DateTime<Utc>> {
    if let Ok(relative) = humantime::parse_duration(raw) {
        let relative = chrono::Duration::from_std(relative)
            .map_err(|err| CliError::InvalidArgument(format!("invalid --since {raw:?}: {err}")))?;
        return Ok(now - relative);
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| {
            CliError::InvalidArgument(format!(
                "invalid --since {raw:?}: expected a duration like 5m or an RFC3339 time"
            ))
        })
}

struct LogSink {
    timestamps: bool,
    since: Option<DateTime<Utc>>,
}

impl LogSink {
    fn accepts(&self, line: &LogLine) -> bool {
        self.since.map_or(true, |since| line.timestamp >= since)
    }

    fn format(&self, line: &LogLine) -> Vec<u8> {
        let mut out = Vec::with_capacity(line.message.len() + 32);
        if self.timestamps {
            out.extend_from_slice(
                line.timestamp
                    .to_rfc3339_opts(SecondsFormat::Nanos, true)
                    .as_bytes(),
            );
            out.push(b' ');
        }
        out.extend_from_slice(&line.message);
        out.push(b'\n');
        out
    }

    fn write(&self, line: &LogLine) -> CliResult<()> {
        if !self.accepts(line) {
            return Ok(());
        }
        let bytes = self.format(line);
        match line.stream {
            LogStream::Stdout => {
                let mut out = std::io::stdout().lock();
                out.write_all(&bytes)?;
                out.flush()?;
            }
            LogStream::Stderr => {
                let mut err = std::io::stderr().lock();
                err.write_all(&bytes)?;
                err.flush()?;
            }
        }
        Ok(())
    }
}

/// Reads every complete line currently available. An unterminated trailing
/// line stays in `carry` until the writer finishes it. Lines are bytes, so
/// binary container output never stops the read.
pub async fn read_available<R>(reader: &mut R, carry: &mut Vec<u8>) -> CliResult<Vec<LogRecord>>
where
    R: AsyncBufRead + Unpin,
{
    let mut records = Vec::new();
    loop {
        let read = reader.read_until(b'\n', carry).await?;
        if read == 0 || carry.last() != Some(&b'\n') {
            return Ok(records);
        }
        let raw = std::mem::take(carry);
        let mut line = raw.as_slice();
        while let [rest @ .., b'\n' | b'\r'] = line {
            line = rest;
        }
        match parse_cri_line(line) {
            Some(record) => records.push(record),
            None => debug!(line = %String::from_utf8_lossy(line), "skipping malformed log line"),
        }
    }
}

async fn is_running(client: &CriClient, container_id: &str) -> CliResult<bool> {
    let status = client.container_status(container_id, false).await?;
    Ok(status
        .status
        .map_or(false, |s| s.state == ContainerState::ContainerRunning as i32))
}

/// Print a container's log. With `--follow` the file is polled until the
/// container stops or the user interrupts.
pub async fn handle_logs(session: &Session, args: &LogsArgs) -> CliResult<u8> {
    let since = args
        .since
        .as_deref()
        .map(|raw| parse_since(raw, Utc::now()))
        .transpose()?;
    let sink = LogSink {
        timestamps: args.timestamps,
        since,
    };

    let client = session.client().await?;
    let container_id = resolve_container_id(client, &args.container).await?;
    let status = client
        .container_status(&container_id, false)
        .await?
        .status
        .unwrap_or_default();
    if status.log_path.is_empty() {
        return Err(CliError::InvalidArgument(format!(
            "container {container_id:?} has no log path"
        )));
    }
    debug!(%container_id, log_path = %status.log_path, "reading container log");

    let mut reader = BufReader::new(File::open(&status.log_path).await?);
    let mut carry = Vec::new();
    let mut assembler = LineAssembler::default();

    let mut backlog: Vec<LogLine> = read_available(&mut reader, &mut carry)
        .await?
        .into_iter()
        .filter_map(|record| assembler.push(record))
        .filter(|line| sink.accepts(line))
        .collect();
    if let Some(tail) = args.tail {
        let skip = backlog.len().saturating_sub(tail);
        backlog.drain(..skip);
    }
    for line in &backlog {
        sink.write(line)?;
    }
    if !args.follow {
        return Ok(0);
    }

    let cancel = session.cancel_token();
    let mut last_check = Instant::now();
    let mut exited = false;
    loop {
        let records = read_available(&mut reader, &mut carry).await?;
        let idle = records.is_empty();
        for record in records {
            if let Some(line) = assembler.push(record) {
                sink.write(&line)?;
            }
        }
        if !idle {
            continue;
        }
        if exited {
            return Ok(0);
        }
        if last_check.elapsed() >= STATE_CHECK_INTERVAL {
            last_check = Instant::now();
            // One more drain after the container stops picks up its last lines.
            exited = !is_running(client, &container_id).await?;
            if exited {
                continue;
            }
        }
        until_cancelled(&cancel, sleep(FOLLOW_POLL_INTERVAL)).await?;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_full_and_partial_records() {
        let full = parse_cri_line(b"2016-10-06T00:17:09.669794202Z stdout F hello world").unwrap();
        assert_eq!(full.stream, LogStream::Stdout);
        assert!(!full.partial);
        assert_eq!(full.message, b"hello world");

        let partial = parse_cri_line(b"2016-10-06T00:17:09.669794203Z stderr P:extra abc").unwrap();
        assert_eq!(partial.stream, LogStream::Stderr);
        assert!(partial.partial);
        assert_eq!(partial.message, b"abc");
    }

    #[test]
    fn empty_message_is_allowed() {
        let record = parse_cri_line(b"2016-10-06T00:17:09.669794202Z stdout F").unwrap();
        assert!(record.message.is_empty());
    }

    #[test]
    fn malformed_lines_are_rejected() {
        assert!(parse_cri_line(b"not a log line").is_none());
        assert!(parse_cri_line(b"2016-10-06T00:17:09Z stdin F x").is_none());
        assert!(parse_cri_line(b"2016-10-06T00:17:09Z stdout X x").is_none());
        assert!(parse_cri_line(b"\xff\xfe stdout F x").is_none());
    }

    #[test]
    fn partials_join_per_stream() {
        let mut assembler = LineAssembler::default();
        let lines = [
            "2016-10-06T00:17:09Z stdout P hel",
            "2016-10-06T00:17:10Z stderr F oops",
            "2016-10-06T00:17:11Z stdout F lo",
        ];
        let joined: Vec<LogLine> = lines
            .iter()
            .filter_map(|l| assembler.push(parse_cri_line(l.as_bytes()).unwrap()))
            .collect();
        assert_eq!(joined.len(), 2);
        assert_eq!(joined[0].message, b"oops");
        assert_eq!(joined[1].message, b"hello");
        assert_eq!(joined[1].timestamp.to_rfc3339(), "2016-10-06T00:17:09+00:00");
    }

    #[test]
    fn since_accepts_duration_and_timestamp() {
        let now = DateTime::parse_from_rfc3339("2024-01-01T00:10:00Z")
            .unwrap()
            .with_timezone(&Utc);
        assert_eq!(
            parse_since("5m", now).unwrap().to_rfc3339(),
            "2024-01-01T00:05:00+00:00"
        );
        assert_eq!(
            parse_since("2024-01-01T00:00:00Z", now).unwrap().to_rfc3339(),
            "2024-01-01T00:00:00+00:00"
        );
        assert!(matches!(
            parse_since("yesterday", now),
            Err(CliError::InvalidArgument(_))
        ));
    }

    #[test]
    fn timestamps_prefix_lines() {
        let sink = LogSink {
            timestamps: true,
            since: None,
        };
        let line = LogLine {
            timestamp: DateTime::parse_from_rfc3339("2016-10-06T00:17:09.5Z").unwrap(),
            stream: LogStream::Stdout,
            message: b"hi".to_vec(),
        };
        assert_eq!(sink.format(&line), b"2016-10-06T00:17:09.500000000Z hi\n");
    }

    #[tokio::test]
    async fn unterminated_line_waits_for_newline() {
        let data: &[u8] = b"2016-10-06T00:17:09Z stdout F one\n2016-10-06T00:17:10Z stdout F tw";
        let mut reader = BufReader::new(data);
        let mut carry = Vec::new();
        let records = read_available(&mut reader, &mut carry).await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].message, b"one");
        assert!(carry.ends_with(b"F tw"));
    }

    #[tokio::test]
    async fn binary_output_does_not_stop_reading() {
        let data: &[u8] = b"2016-10-06T00:17:09Z stdout F ok\n\
            2016-10-06T00:17:10Z stdout F bin\xff\x00\n\
            2016-10-06T00:17:11Z stderr F after\r\n";
        let mut reader = BufReader::new(data);
        let mut carry = Vec::new();
        let records = read_available(&mut reader, &mut carry).await.unwrap();

        assert_eq!(records.len(), 3);
        assert_eq!(records[1].message, b"bin\xff\x00");
        assert_eq!(records[2].stream, LogStream::Stderr);
        assert_eq!(records[2].message, b"after");
        assert!(carry.is_empty());

        let sink = LogSink {
            timestamps: false,
            since: None,
        };
        let line = LineAssembler::default().push(records[1].clone()).unwrap();
        assert_eq!(sink.format(&line), b"bin\xff\x00\n");
    }
}
