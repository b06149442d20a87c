//! End-to-end harness.
//!
//! Builds or locates a CRI runtime, runs it inside a scratch tree, drives
//! the `crictl` binary as a black box and tears everything down again. The
//! in-process OTLP [`collector`] lets tests assert that client spans reach
//! a sink.
pub mod collector;
pub mod harness;
pub mod platform;

use std::io;
use std::path::PathBuf;
use std::time::Duration;

pub use collector::{CollectedSpan, Collector};
pub use harness::{
    ClientDriver, ClientOutput, ReadinessProbe, RuntimeBuild, RuntimeUnderTest, ScratchRoot,
    SuiteClock,
};
pub use platform::PlatformDefaults;

/// Wall-clock budget for a whole suite.
pub const SUITE_TIMEOUT: Duration = Duration::from_secs(10 * 60);

/// Wall-clock budget for one client invocation.
pub const CLIENT_DEADLINE: Duration = Duration::from_secs(60);

#[derive(Debug, thiserror::Error)]
pub enum HarnessError {
    #[error("failed to build runtime: {0}")]
    Build(String),

    #[error("runtime binary {0} does not exist")]
    MissingBinary(PathBuf),

    #[error("runtime not ready after {attempts} probes: {last_error}")]
    NotReady { attempts: u32, last_error: String },

    #[error("runtime exited unexpectedly: {0}")]
    RuntimeExited(String),

    #[error("client invocation exceeded {0:?}")]
    ClientTimeout(Duration),

    #[error("suite exceeded its {0:?} budget")]
    SuiteTimeout(Duration),

    #[error("{stream} mismatch: expected {expected:?}, got {actual:?}")]
    Mismatch {
        stream: &'static str,
        expected: String,
        actual: String,
    },

    #[error("expected exit {expected}, got {actual:?}\nstdout: {stdout}\nstderr: {stderr}")]
    UnexpectedExit {
        expected: &'static str,
        actual: Option<i32>,
        stdout: String,
        stderr: String,
    },

    #[error("platform defaults are already bound")]
    PlatformRebound,

    #[error("collector error: {0}")]
    Collector(String),

    #[error("invalid pattern: {0}")]
    Pattern(#[from] regex::Error),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}

pub type HarnessResult<T> = Result<T, HarnessError>;
