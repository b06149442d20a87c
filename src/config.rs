use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::{CliError, CliResult};
use crate::grpc::endpoint::EndpointAddr;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/crictl.yaml";
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);
pub const DEFAULT_TRACING_ENDPOINT: &str = "127.0.0.1:4317";

/// On-disk client configuration, e.g. `/etc/crictl.yaml`.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, rename_all = "kebab-case")]
pub struct ConfigFile {
    pub runtime_endpoint: Option<String>,
    pub image_endpoint: Option<String>,
    pub timeout: Option<TimeoutSetting>,
    pub debug: Option<bool>,
    pub pull_image_on_create: Option<bool>,
    pub disable_pull_on_run: Option<bool>,
}

/// `timeout:` accepts whole seconds or a duration string such as `500ms`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TimeoutSetting {
    Seconds(u64),
    Text(String),
}

impl TimeoutSetting {
    fn to_duration(&self, path: &Path) -> CliResult<Duration> {
        match self {
            TimeoutSetting::Seconds(secs) => Ok(Duration::from_secs(*secs)),
            TimeoutSetting::Text(text) => {
                humantime::parse_duration(text).map_err(|err| CliError::Config {
                    path: path.to_path_buf(),
                    message: format!("invalid timeout {text:?}: {err}"),
                })
            }
        }
    }
}

impl ConfigFile {
    pub fn parse(text: &str, path: &Path) -> CliResult<Self> {
        if text.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(text).map_err(|err| CliError::Config {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
    }

    /// Reads the file at `path`. A missing file is only an error when the
    /// path was given explicitly.
    pub fn load(path: &Path, explicit: bool) -> CliResult<Self> {
        match fs::read_to_string(path) {
            Ok(text) => Self::parse(&text, path),
            Err(err) if err.kind() == ErrorKind::NotFound && !explicit => Ok(Self::default()),
            Err(err) => Err(CliError::Config {
                path: path.to_path_buf(),
                message: err.to_string(),
            }),
        }
    }
}

/// Values coming from flags or their environment variables. These win over
/// the config file.
#[derive(Debug, Default, Clone)]
pub struct Overrides {
    pub runtime_endpoint: Option<String>,
    pub image_endpoint: Option<String>,
    pub timeout: Option<Duration>,
    pub debug: bool,
    pub config_path: Option<PathBuf>,
    pub tracing: Option<TracingOptions>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TracingOptions {
    pub endpoint: String,
    pub sampling_rate_per_million: i64,
}

/// Fully resolved client configuration.
#[derive(Debug, Clone)]
pub struct Config {
    /// Candidates tried in order; a single entry when one was configured.
    pub runtime_endpoints: Vec<EndpointAddr>,
    pub endpoint_configured: bool,
    pub image_endpoint: Option<EndpointAddr>,
    pub timeout: Duration,
    pub debug: bool,
    pub pull_image_on_create: bool,
    pub disable_pull_on_run: bool,
    pub tracing: Option<TracingOptions>,
}

impl Config {
    pub fn resolve(overrides: Overrides) -> CliResult<Self> {
        let file = match &overrides.config_path {
            Some(path) => ConfigFile::load(path, true)?,
            None => ConfigFile::load(Path::new(DEFAULT_CONFIG_PATH), false)?,
        };
        Self::merge(overrides, file)
    }

    pub fn merge(overrides: Overrides, file: ConfigFile) -> CliResult<Self> {
        let configured = pick(overrides.runtime_endpoint, file.runtime_endpoint);
        let endpoint_configured = configured.is_some();
        let runtime_endpoints = match configured {
            Some(raw) => vec![EndpointAddr::parse(&raw)?],
            None => EndpointAddr::defaults(),
        };
        let image_endpoint = pick(overrides.image_endpoint, file.image_endpoint)
            .map(|raw| EndpointAddr::parse(&raw))
            .transpose()?;
        let file_timeout = match &file.timeout {
            Some(setting) => Some(setting.to_duration(
                overrides.config_path.as_deref().unwrap_or(Path::new(DEFAULT_CONFIG_PATH)),
            )?),
            None => None,
        };
        let timeout = overrides
            .timeout
            .or(file_timeout.filter(|t| !t.is_zero()))
            .unwrap_or(DEFAULT_TIMEOUT);

        Ok(Self {
            runtime_endpoints,
            endpoint_configured,
            image_endpoint,
            timeout,
            debug: overrides.debug || file.debug.unwrap_or(false),
            pull_image_on_create: file.pull_image_on_create.unwrap_or(false),
            disable_pull_on_run: file.disable_pull_on_run.unwrap_or(false),
            tracing: overrides.tracing,
        })
    }
}

fn pick(flag: Option<String>, file: Option<String>) -> Option<String> {
    flag.filter(|v| !v.is_empty())
        .or_else(|| file.filter(|v| !v.is_empty()))
}
