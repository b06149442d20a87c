use std::fmt;
use std::path::PathBuf;

use crate::errors::{CliError, CliResult};

/// Runtime endpoints probed in order when none is configured.
pub const DEFAULT_RUNTIME_ENDPOINTS: &[&str] = &[
    "unix:///run/containerd/containerd.sock",
    "unix:///run/crio/crio.sock",
    "unix:///var/run/cri-dockerd.sock",
];

/// Where a runtime or image service listens.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum EndpointAddr {
    Unix(PathBuf),
    Tcp(String),
}

impl EndpointAddr {
    /// Accepts `unix:///path`, `tcp://host:port` and a bare filesystem path,
    /// which is treated as a unix socket.
    pub fn parse(raw: &str) -> CliResult<Self> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(CliError::InvalidArgument("endpoint is not set".into()));
        }

        match raw.split_once("://") {
            Some(("unix", path)) if !path.is_empty() => Ok(EndpointAddr::Unix(PathBuf::from(path))),
            Some(("tcp", addr)) if addr.contains(':') => Ok(EndpointAddr::Tcp(addr.to_string())),
            Some(("unix" | "tcp", _)) => Err(CliError::InvalidArgument(format!(
                "endpoint {raw:?} is missing an address"
            ))),
            Some((scheme, _)) => Err(CliError::InvalidArgument(format!(
                "protocol {scheme:?} not supported in endpoint {raw:?}"
            ))),
            None => {
                tracing::debug!(endpoint = raw, "no scheme given, assuming unix socket");
                Ok(EndpointAddr::Unix(PathBuf::from(raw)))
            }
        }
    }

    pub fn defaults() -> Vec<Self> {
        DEFAULT_RUNTIME_ENDPOINTS
            .iter()
            .filter_map(|raw| Self::parse(raw).ok())
            .collect()
    }
}

impl fmt::Display for EndpointAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointAddr::Unix(path) => write!(f, "unix://{}", path.display()),
            EndpointAddr::Tcp(addr) => write!(f, "tcp://{addr}"),
        }
    }
}
