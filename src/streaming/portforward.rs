//! Local TCP listeners forwarded to pod ports.
//!
//! Each accepted connection gets its own WebSocket with `?port=N`. Data
//! flows on channel 0, remote errors on channel 1, and the first frame the
//! server sends on each channel is a two-byte little-endian port header.
use std::str::FromStr;

use crate::errors::{CliError, CliResult};

/// `[LOCAL:]REMOTE`; an empty local port lets the kernel choose.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortMapping {
    pub local: u16,
    pub remote: u16,
}

impl FromStr for PortMapping {
    type Err = CliError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let invalid = || CliError::InvalidArgument(format!("invalid port mapping {raw:?}"));
        let (local, remote) = match raw.split_once(':') {
            Some((local, remote)) => (local, remote),
            None => (raw, raw),
        };
        let remote: u16 = remote.parse().map_err(|_| invalid())?;
        let local: u16 = if local.is_empty() {
            0
        } else {
            local.parse().map_err(|_| invalid())?
        };
        if remote == 0 {
            return Err(invalid());
        }
        Ok(Self { local, remote })
    }
}

pub fn parse_mappings(raw: &[String]) -> CliResult<Vec<PortMapping>> {
    raw.iter().map(|mapping| mapping.parse()).collect()
}

/// Appends the port query parameter to a streaming URL.
pub fn port_url(url: &str, port: u16) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}port={port}")
}

/// Channel payload with the port header removed when this is the first
/// frame seen on that channel.
pub fn strip_port_header<'a>(payload: &'a [u8], header_seen: &mut bool) -> CliResult<&'a [u8]> {
    if *header_seen {
        return Ok(payload);
    }
    if payload.len() < 2 {
        return Err(CliError::streaming("short port header"));
    }
    *header_seen = true;
    Ok(&payload[2..])
}

#[cfg(unix)]
pub use self::forwarder::forward;

#[cfg(not(unix))]
pub async fn forward(
    _url: &str,
    _mappings: &[PortMapping],
    _cancel: tokio_util::sync::CancellationToken,
) -> CliResult<()> {
    Err(CliError::UnsupportedPlatform("port-forward"))
}

#[cfg(unix)]
mod forwarder {
    use futures::{SinkExt, StreamExt};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::{TcpListener, TcpStream};
    use tokio::task::JoinSet;
    use tokio_tungstenite::tungstenite::Message;
    use tokio_util::sync::CancellationToken;
    use tracing::{debug, info, warn};

    use super::{port_url, strip_port_header, PortMapping};
    use crate::errors::{CliError, CliResult};
    use crate::streaming::protocol::{connect, frame, split_frame, PORT_FORWARD_PROTOCOLS};

    const DATA: u8 = 0;
    const ERROR: u8 = 1;
    const READ_BUFFER: usize = 16 * 1024;

    /// Listens on every mapping until cancelled. A listener failure ends
    /// the whole session.
    pub async fn forward(
        url: &str,
        mappings: &[PortMapping],
        cancel: CancellationToken,
    ) -> CliResult<()> {
        let mut listeners = JoinSet::new();
        for mapping in mappings {
            let listener = TcpListener::bind(("127.0.0.1", mapping.local)).await?;
            let local = listener.local_addr()?;
            println!("Forwarding from {local} -> {}", mapping.remote);
            listeners.spawn(accept_loop(
                listener,
                url.to_string(),
                mapping.remote,
                cancel.clone(),
            ));
        }

        tokio::select! {
            _ = cancel.cancelled() => {
                listeners.abort_all();
                Err(CliError::Interrupted)
            }
            Some(finished) = listeners.join_next() => {
                listeners.abort_all();
                match finished {
                    Ok(result) => result,
                    Err(err) => Err(CliError::streaming(err)),
                }
            }
        }
    }

    async fn accept_loop(
        listener: TcpListener,
        url: String,
        remote: u16,
        cancel: CancellationToken,
    ) -> CliResult<()> {
        loop {
            let (conn, peer) = listener.accept().await?;
            info!(%peer, remote, "handling port-forward connection");
            let url = port_url(&url, remote);
            let cancel = cancel.clone();
            tokio::spawn(async move {
                tokio::select! {
                    _ = cancel.cancelled() => {}
                    result = pump_connection(&url, conn) => {
                        if let Err(err) = result {
                            warn!(%peer, remote, "port-forward connection failed: {err}");
                        }
                    }
                }
            });
        }
    }

    async fn pump_connection(url: &str, conn: TcpStream) -> CliResult<()> {
        let (socket, _) = connect(url, PORT_FORWARD_PROTOCOLS).await?;
        let (mut sink, mut source) = socket.split();
        let (mut local_read, mut local_write) = conn.into_split();

        let upstream = async move {
            let mut buffer = vec![0u8; READ_BUFFER];
            loop {
                let n = local_read.read(&mut buffer).await?;
                if n == 0 {
                    debug!("local connection closed");
                    let _ = sink.send(Message::Close(None)).await;
                    return Ok::<(), CliError>(());
                }
                sink.send(Message::Binary(frame(DATA, &buffer[..n])))
                    .await
                    .map_err(CliError::streaming)?;
            }
        };

        let downstream = async move {
            let mut data_header = false;
            let mut error_header = false;
            while let Some(message) = source.next().await {
                let data = match message.map_err(CliError::streaming)? {
                    Message::Binary(data) => data,
                    Message::Close(_) => break,
                    _ => continue,
                };
                let Some((channel, payload)) = split_frame(&data) else {
                    continue;
                };
                match channel {
                    DATA => {
                        let payload = strip_port_header(payload, &mut data_header)?;
                        local_write.write_all(payload).await?;
                    }
                    ERROR => {
                        let payload = strip_port_header(payload, &mut error_header)?;
                        if !payload.is_empty() {
                            return Err(CliError::streaming(String::from_utf8_lossy(payload)));
                        }
                    }
                    _ => {}
                }
            }
            local_write.shutdown().await?;
            Ok(())
        };

        tokio::select! {
            result = upstream => result,
            result = downstream => result,
        }
    }

}
