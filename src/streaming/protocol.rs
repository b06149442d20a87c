//! Kubernetes WebSocket channel protocol.
//!
//! Every binary frame starts with one byte naming the channel. The error
//! channel carries a `metav1.Status` document once the remote side is done.
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tonic::Code;
use tracing::debug;

use crate::errors::{CliError, CliResult};

pub type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

pub const STREAM_PROTOCOL_V5: &str = "v5.channel.k8s.io";
pub const STREAM_PROTOCOL_V4: &str = "v4.channel.k8s.io";
pub const PORT_FORWARD_PROTOCOL: &str = "portforward.k8s.io";

/// Exec and attach, newest first.
pub const REMOTE_COMMAND_PROTOCOLS: &[&str] = &[STREAM_PROTOCOL_V5, STREAM_PROTOCOL_V4];
pub const PORT_FORWARD_PROTOCOLS: &[&str] = &[STREAM_PROTOCOL_V4, PORT_FORWARD_PROTOCOL];

pub const STDIN: u8 = 0;
pub const STDOUT: u8 = 1;
pub const STDERR: u8 = 2;
pub const ERROR: u8 = 3;
pub const RESIZE: u8 = 4;
/// Half-close of a channel; v5 only.
pub const CLOSE: u8 = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolVersion {
    V4,
    V5,
}

impl ProtocolVersion {
    pub fn from_negotiated(name: &str) -> Self {
        if name == STREAM_PROTOCOL_V5 {
            ProtocolVersion::V5
        } else {
            ProtocolVersion::V4
        }
    }

    pub fn supports_close(self) -> bool {
        self == ProtocolVersion::V5
    }
}

pub fn frame(channel: u8, payload: &[u8]) -> Vec<u8> {
    let mut data = Vec::with_capacity(payload.len() + 1);
    data.push(channel);
    data.extend_from_slice(payload);
    data
}

pub fn split_frame(data: &[u8]) -> Option<(u8, &[u8])> {
    data.split_first().map(|(channel, payload)| (*channel, payload))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct TerminalSize {
    #[serde(rename = "Width")]
    pub width: u16,
    #[serde(rename = "Height")]
    pub height: u16,
}

pub fn resize_frame(size: TerminalSize) -> CliResult<Vec<u8>> {
    Ok(frame(RESIZE, &serde_json::to_vec(&size)?))
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct RemoteStatus {
    status: String,
    message: String,
    reason: String,
    details: Option<StatusDetails>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StatusDetails {
    causes: Vec<StatusCause>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct StatusCause {
    reason: String,
    message: String,
}

/// Decodes the error channel payload into the remote process exit code.
pub fn exit_code_from_status(payload: &[u8]) -> CliResult<i32> {
    let status: RemoteStatus = serde_json::from_slice(payload)
        .map_err(|err| CliError::streaming(format!("malformed status frame: {err}")))?;
    if status.status == "Success" {
        return Ok(0);
    }
    if status.reason == "NonZeroExitCode" {
        let code = status
            .details
            .iter()
            .flat_map(|details| details.causes.iter())
            .find(|cause| cause.reason == "ExitCode")
            .and_then(|cause| cause.message.parse::<i32>().ok());
        if let Some(code) = code {
            return Ok(code);
        }
    }
    Err(CliError::Runtime {
        code: Code::Unknown,
        message: status.message,
    })
}

/// Streaming servers hand out http(s) URLs; WebSockets need ws(s).
pub fn websocket_url(url: &str) -> CliResult<String> {
    if let Some(rest) = url.strip_prefix("http://") {
        Ok(format!("ws://{rest}"))
    } else if let Some(rest) = url.strip_prefix("https://") {
        Ok(format!("wss://{rest}"))
    } else if url.starts_with("ws://") || url.starts_with("wss://") {
        Ok(url.to_string())
    } else {
        Err(CliError::streaming(format!("unsupported streaming URL {url:?}")))
    }
}

/// Opens the upgrade and reports which subprotocol the server picked.
pub async fn connect(url: &str, protocols: &[&str]) -> CliResult<(Socket, String)> {
    let target = websocket_url(url)?;
    let mut request = target
        .as_str()
        .into_client_request()
        .map_err(CliError::streaming)?;
    // The client handshake splits on bare commas when checking the reply.
    let offered = HeaderValue::from_str(&protocols.join(",")).map_err(CliError::streaming)?;
    request.headers_mut().insert("Sec-WebSocket-Protocol", offered);

    let (socket, response) = connect_async(request).await.map_err(CliError::streaming)?;
    let negotiated = response
        .headers()
        .get("Sec-WebSocket-Protocol")
        .and_then(|value| value.to_str().ok())
        .unwrap_or_default()
        .to_string();
    debug!(url = %target, protocol = %negotiated, "streaming connection established");
    Ok((socket, negotiated))
}
