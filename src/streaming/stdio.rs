//! Exec and attach sessions over the channel protocol.
use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use futures::stream::{SplitSink, SplitStream};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio::time::{interval, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::protocol::{
    connect, exit_code_from_status, frame, resize_frame, split_frame, ProtocolVersion, Socket,
    CLOSE, ERROR, REMOTE_COMMAND_PROTOCOLS, STDERR, STDIN, STDOUT,
};
use super::terminal::{enter_raw_mode, ResizeWatcher};
use crate::errors::{CliError, CliResult};

const RESIZE_POLL_INTERVAL: Duration = Duration::from_millis(250);
const CLOSE_GRACE: Duration = Duration::from_millis(100);
const STDIN_BUFFER: usize = 4096;
const OUTBOUND_QUEUE: usize = 32;

/// Which local streams are wired to the remote process.
#[derive(Debug, Clone, Copy, Default)]
pub struct StreamOptions {
    pub stdin: bool,
    pub tty: bool,
}

/// Runs a session against `url` until the server closes it. Returns the
/// remote exit code reported on the error channel, 0 if none was sent.
pub async fn run_session(
    url: &str,
    options: StreamOptions,
    cancel: CancellationToken,
) -> CliResult<i32> {
    let input = options
        .stdin
        .then(|| Box::new(std::io::stdin()) as Box<dyn Read + Send>);
    run_session_with(url, options.tty, input, cancel).await
}

pub(crate) async fn run_session_with(
    url: &str,
    tty: bool,
    input: Option<Box<dyn Read + Send>>,
    cancel: CancellationToken,
) -> CliResult<i32> {
    let (socket, negotiated) = tokio::select! {
        _ = cancel.cancelled() => return Err(CliError::Interrupted),
        connected = connect(url, REMOTE_COMMAND_PROTOCOLS) => connected?,
    };
    let version = ProtocolVersion::from_negotiated(&negotiated);
    let (sink, mut source) = socket.split();
    let (outbound, frames) = mpsc::channel(OUTBOUND_QUEUE);
    let writer = tokio::spawn(write_frames(sink, frames));

    let raw_terminal = if tty { enter_raw_mode() } else { None };
    let resizes = tty.then(|| tokio::spawn(forward_resizes(outbound.clone())));
    if let Some(input) = input {
        spawn_stdin_reader(input, outbound.clone(), version);
    }

    let result = pump_output(&mut source, &cancel).await;

    if let Some(task) = resizes {
        task.abort();
    }
    // The writer may already be gone if the server closed first.
    let _ = outbound.send(Message::Close(None)).await;
    drop(outbound);
    match timeout(CLOSE_GRACE, writer).await {
        Ok(Ok(Err(err))) => debug!("streaming writer stopped: {err}"),
        Ok(Err(err)) => debug!("streaming writer task failed: {err}"),
        _ => {}
    }
    drop(raw_terminal);
    result
}

async fn write_frames(
    mut sink: SplitSink<Socket, Message>,
    mut frames: mpsc::Receiver<Message>,
) -> CliResult<()> {
    while let Some(message) = frames.recv().await {
        let closing = message.is_close();
        sink.send(message).await.map_err(CliError::streaming)?;
        if closing {
            break;
        }
    }
    Ok(())
}

/// Copies remote output to local stdout/stderr. Local write failures end
/// the session.
async fn pump_output(
    source: &mut SplitStream<Socket>,
    cancel: &CancellationToken,
) -> CliResult<i32> {
    let mut exit_code = 0;
    loop {
        let next = tokio::select! {
            _ = cancel.cancelled() => return Err(CliError::Interrupted),
            next = source.next() => next,
        };
        let message = match next {
            None => return Ok(exit_code),
            Some(Ok(message)) => message,
            Some(Err(err)) => return Err(CliError::streaming(err)),
        };
        match message {
            Message::Binary(data) => {
                let Some((channel, payload)) = split_frame(&data) else {
                    continue;
                };
                match channel {
                    STDOUT => write_local(std::io::stdout().lock(), payload)?,
                    STDERR => write_local(std::io::stderr().lock(), payload)?,
                    ERROR if !payload.is_empty() => exit_code = exit_code_from_status(payload)?,
                    _ => {}
                }
            }
            Message::Close(_) => return Ok(exit_code),
            _ => {}
        }
    }
}

fn write_local(mut out: impl Write, payload: &[u8]) -> CliResult<()> {
    out.write_all(payload)
        .and_then(|_| out.flush())
        .map_err(|err| CliError::streaming(format!("writing local output: {err}")))
}

async fn forward_resizes(outbound: mpsc::Sender<Message>) {
    let mut watcher = ResizeWatcher::new();
    let mut ticker = interval(RESIZE_POLL_INTERVAL);
    loop {
        ticker.tick().await;
        let Some(size) = watcher.poll() else {
            continue;
        };
        let Ok(data) = resize_frame(size) else {
            continue;
        };
        if outbound.send(Message::Binary(data)).await.is_err() {
            return;
        }
    }
}

/// Blocking stdin reads live on their own thread so they never hold up
/// runtime shutdown.
fn spawn_stdin_reader(
    mut input: Box<dyn Read + Send>,
    outbound: mpsc::Sender<Message>,
    version: ProtocolVersion,
) {
    let spawned = std::thread::Builder::new()
        .name("stdin-forwarder".into())
        .spawn(move || {
            let mut buffer = [0u8; STDIN_BUFFER];
            loop {
                match input.read(&mut buffer) {
                    Ok(0) => break,
                    Ok(n) => {
                        let data = frame(STDIN, &buffer[..n]);
                        if outbound.blocking_send(Message::Binary(data)).is_err() {
                            return;
                        }
                    }
                    Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                    Err(err) => {
                        warn!("reading stdin: {err}");
                        break;
                    }
                }
            }
            debug!("local stdin closed");
            if version.supports_close() {
                let _ = outbound.blocking_send(Message::Binary(vec![CLOSE, STDIN]));
            }
        });
    if let Err(err) = spawned {
        warn!("failed to start stdin forwarder: {err}");
    }
}
