use std::path::PathBuf;

use tonic::Code;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// Every failure a verb can surface. The exit code is derived from the
/// variant, never from the message.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    #[error("{0}")]
    FlagConflict(String),

    #[error("don't support {0:?} format")]
    UnsupportedFormat(String),

    #[error("failed to parse go-template: {0}")]
    TemplateParse(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed to load config file {path}: {message}")]
    Config { path: PathBuf, message: String },

    #[error("failed to connect to endpoint {endpoint}: {source}")]
    EndpointUnreachable {
        endpoint: String,
        #[source]
        source: BoxError,
    },

    #[error("failed to initialize tracing: {0}")]
    TracingInit(String),

    #[error("no such object {id:?}: {message}")]
    NoSuchObject { id: String, message: String },

    #[error("multiple {kind}s match {prefix:?}: {}", candidates.join(", "))]
    AmbiguousId {
        kind: &'static str,
        prefix: String,
        candidates: Vec<String>,
    },

    #[error("rpc error: code = {code:?} desc = {message}")]
    Runtime { code: Code, message: String },

    #[error("streaming transport failure: {0}")]
    StreamingTransport(String),

    #[error("{0} is not supported on this platform")]
    UnsupportedPlatform(&'static str),

    #[error("interrupted")]
    Interrupted,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),
}

impl CliError {
    /// Maps a gRPC status to the error surfaced to the user. `subject` names
    /// the object the call addressed, when there is one.
    pub fn from_status(status: tonic::Status, subject: Option<&str>) -> Self {
        match status.code() {
            Code::NotFound => CliError::NoSuchObject {
                id: subject.unwrap_or_default().to_string(),
                message: status.message().to_string(),
            },
            code => CliError::Runtime {
                code,
                message: status.message().to_string(),
            },
        }
    }

    pub fn streaming(err: impl std::fmt::Display) -> Self {
        CliError::StreamingTransport(err.to_string())
    }

    /// Process exit code for this failure: 125 for local streaming transport
    /// failures, 130 on interrupt, 1 otherwise.
    pub fn exit_code(&self) -> u8 {
        match self {
            CliError::StreamingTransport(_) => 125,
            CliError::Interrupted => 130,
            _ => 1,
        }
    }
}

pub type CliResult<T> = Result<T, CliError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_found_status_becomes_no_such_object() {
        let err = CliError::from_status(tonic::Status::not_found("container gone"), Some("abc"));
        match &err {
            CliError::NoSuchObject { id, message } => {
                assert_eq!(id, "abc");
                assert_eq!(message, "container gone");
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn other_status_codes_keep_code_and_message() {
        let err = CliError::from_status(tonic::Status::permission_denied("nope"), None);
        assert_eq!(
            err.to_string(),
            "rpc error: code = PermissionDenied desc = nope"
        );
    }

    #[test]
    fn exit_codes_follow_variant() {
        assert_eq!(CliError::Interrupted.exit_code(), 130);
        assert_eq!(CliError::streaming("reset").exit_code(), 125);
        assert_eq!(CliError::UnsupportedFormat("ini".into()).exit_code(), 1);
        assert_eq!(
            CliError::UnsupportedFormat("ini".into()).to_string(),
            "don't support \"ini\" format"
        );
    }
}
