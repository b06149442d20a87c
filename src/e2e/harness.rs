//! Runtime lifecycle and black-box client driver.
use std::ffi::OsString;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use regex::Regex;
use tempfile::TempDir;
use tracing::{debug, info, warn};

use super::{HarnessError, HarnessResult, CLIENT_DEADLINE, SUITE_TIMEOUT};
use crate::utils::command::{CommandExecutor, CommandResult};
use crate::utils::process::ProcessUtils;

pub const DEFAULT_REPOSITORY: &str = "https://github.com/cri-o/cri-o";
pub const DEFAULT_REVISION: &str = "v1.31.0";

const SCRATCH_SUBDIRS: &[&str] = &["cni-config", "root", "runroot", "log", "exits", "attach"];
const TEARDOWN_GRACE: Duration = Duration::from_secs(30);

const SIGNATURE_POLICY: &str = r#"{
  "default": [{ "type": "insecureAcceptAnything" }]
}
"#;

const CNI_BRIDGE_CONFIG: &str = r#"{
  "cniVersion": "1.0.0",
  "name": "crio",
  "plugins": [
    {
      "type": "bridge",
      "bridge": "cni0",
      "isGateway": true,
      "ipMasq": true,
      "hairpinMode": true,
      "ipam": {
        "type": "host-local",
        "routes": [{ "dst": "0.0.0.0/0" }],
        "ranges": [[{ "subnet": "10.85.0.0/16" }]]
      }
    }
  ]
}
"#;

/// Tracks the suite-wide time budget.
#[derive(Debug, Clone, Copy)]
pub struct SuiteClock {
    started: Instant,
    budget: Duration,
}

impl SuiteClock {
    pub fn start() -> Self {
        Self::with_budget(SUITE_TIMEOUT)
    }

    pub fn with_budget(budget: Duration) -> Self {
        Self {
            started: Instant::now(),
            budget,
        }
    }

    pub fn remaining(&self) -> HarnessResult<Duration> {
        self.budget
            .checked_sub(self.started.elapsed())
            .filter(|left| !left.is_zero())
            .ok_or(HarnessError::SuiteTimeout(self.budget))
    }
}

/// Locates the runtime binary, building it from a pinned revision when no
/// prebuilt binary is given through `RUNTIME_BINARY`.
#[derive(Debug, Clone)]
pub struct RuntimeBuild {
    pub repository: String,
    pub revision: String,
    pub work_dir: PathBuf,
}

impl RuntimeBuild {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            repository: DEFAULT_REPOSITORY.to_string(),
            revision: DEFAULT_REVISION.to_string(),
            work_dir: work_dir.into(),
        }
    }

    pub fn checkout_dir(&self) -> PathBuf {
        self.work_dir.join(format!("cri-o-{}", self.revision))
    }

    pub fn binary_path(&self) -> PathBuf {
        self.checkout_dir().join("bin").join("crio")
    }

    pub fn resolve(&self) -> HarnessResult<PathBuf> {
        if let Some(prebuilt) = std::env::var_os("RUNTIME_BINARY") {
            let path = PathBuf::from(prebuilt);
            if !path.exists() {
                return Err(HarnessError::MissingBinary(path));
            }
            return Ok(path);
        }

        let binary = self.binary_path();
        if binary.exists() {
            debug!(binary = %binary.display(), "reusing runtime build");
            return Ok(binary);
        }
        self.build()?;
        if !binary.exists() {
            return Err(HarnessError::MissingBinary(binary));
        }
        Ok(binary)
    }

    fn build(&self) -> HarnessResult<()> {
        for tool in ["git", "make"] {
            if !CommandExecutor::is_command_available(tool) {
                return Err(HarnessError::Build(format!("{tool} is not installed")));
            }
        }
        fs::create_dir_all(&self.work_dir)?;
        let checkout = self.checkout_dir();

        if !checkout.exists() {
            let target = checkout.to_string_lossy().to_string();
            info!(repository = %self.repository, "cloning runtime");
            check(
                "git clone",
                CommandExecutor::execute("git", &["clone", &self.repository, &target], None)?,
            )?;
        }
        check(
            "git checkout",
            CommandExecutor::execute("git", &["checkout", &self.revision], Some(&checkout))?,
        )?;
        info!(revision = %self.revision, "building runtime");
        check(
            "make",
            CommandExecutor::execute("make", &["bin/crio"], Some(&checkout))?,
        )
    }
}

fn check(step: &str, result: CommandResult) -> HarnessResult<()> {
    if result.success {
        Ok(())
    } else {
        Err(HarnessError::Build(format!(
            "{step} failed ({:?}): {}",
            result.exit_code,
            result.stderr.trim()
        )))
    }
}

/// Temporary tree holding everything the runtime writes.
#[derive(Debug)]
pub struct ScratchRoot {
    dir: TempDir,
}

impl ScratchRoot {
    pub fn create() -> HarnessResult<Self> {
        let dir = tempfile::Builder::new().prefix("crictl-e2e-").tempdir()?;
        for sub in SCRATCH_SUBDIRS {
            fs::create_dir_all(dir.path().join(sub))?;
        }
        fs::write(dir.path().join("policy.json"), SIGNATURE_POLICY)?;
        fs::write(
            dir.path().join("cni-config").join("10-crio-bridge.conflist"),
            CNI_BRIDGE_CONFIG,
        )?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    pub fn subdir(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }

    pub fn policy(&self) -> PathBuf {
        self.subdir("policy.json")
    }

    pub fn socket(&self) -> PathBuf {
        self.subdir("crio.sock")
    }

    pub fn endpoint(&self) -> String {
        format!("unix://{}", self.socket().display())
    }

    pub fn close(self) -> HarnessResult<()> {
        Ok(self.dir.close()?)
    }
}

/// Captured result of one client invocation.
#[derive(Debug, Clone)]
pub struct ClientOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
}

impl ClientOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

/// Empty `pattern` means the stream must be empty; otherwise the regex
/// must match somewhere in it.
pub fn match_stream(stream: &'static str, actual: &str, pattern: &str) -> HarnessResult<()> {
    let matched = if pattern.is_empty() {
        actual.is_empty()
    } else {
        Regex::new(pattern)?.is_match(actual)
    };
    if matched {
        Ok(())
    } else {
        Err(HarnessError::Mismatch {
            stream,
            expected: pattern.to_string(),
            actual: actual.to_string(),
        })
    }
}

/// Runs the `crictl` binary with fixed leading arguments.
#[derive(Debug, Clone)]
pub struct ClientDriver {
    binary: PathBuf,
    global_args: Vec<OsString>,
    clock: SuiteClock,
}

impl ClientDriver {
    pub fn new(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
            global_args: Vec::new(),
            clock: SuiteClock::start(),
        }
    }

    pub fn with_clock(mut self, clock: SuiteClock) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_endpoint(self, endpoint: &str) -> Self {
        self.with_global_arg(format!("--runtime-endpoint={endpoint}"))
    }

    pub fn with_global_arg(mut self, arg: impl Into<OsString>) -> Self {
        self.global_args.push(arg.into());
        self
    }

    /// Points client tracing at `collector` with every trace sampled.
    pub fn with_tracing(self, collector: &str) -> Self {
        self.with_global_arg("--enable-tracing")
            .with_global_arg(format!("--tracing-endpoint={collector}"))
            .with_global_arg("--tracing-sampling-rate-per-million=-1")
    }

    pub fn run(&self, args: &[&str]) -> HarnessResult<ClientOutput> {
        let deadline = CLIENT_DEADLINE.min(self.clock.remaining()?);
        let mut command = Command::new(&self.binary);
        command.args(&self.global_args).args(args);
        debug!(?args, "running client");

        let result = CommandExecutor::execute_with_deadline(&mut command, deadline)?;
        if result.timed_out {
            return Err(HarnessError::ClientTimeout(deadline));
        }
        Ok(ClientOutput {
            stdout: result.stdout,
            stderr: result.stderr,
            exit_code: result.exit_code,
        })
    }

    pub fn expect_success(&self, args: &[&str], out_match: &str) -> HarnessResult<ClientOutput> {
        let output = self.run(args)?;
        if !output.success() {
            return Err(unexpected_exit("0", output));
        }
        match_stream("stdout", &output.stdout, out_match)?;
        Ok(output)
    }

    pub fn expect_failure(
        &self,
        args: &[&str],
        out_match: &str,
        err_match: &str,
    ) -> HarnessResult<ClientOutput> {
        let output = self.run(args)?;
        if output.success() {
            return Err(unexpected_exit("non-zero", output));
        }
        match_stream("stdout", &output.stdout, out_match)?;
        match_stream("stderr", &output.stderr, err_match)?;
        Ok(output)
    }
}

fn unexpected_exit(expected: &'static str, output: ClientOutput) -> HarnessError {
    HarnessError::UnexpectedExit {
        expected,
        actual: output.exit_code,
        stdout: output.stdout,
        stderr: output.stderr,
    }
}

/// How readiness is polled after spawning the runtime.
#[derive(Debug, Clone, Copy)]
pub struct ReadinessProbe {
    pub attempts: u32,
    pub interval: Duration,
    pub probe_timeout: Duration,
}

impl Default for ReadinessProbe {
    fn default() -> Self {
        Self {
            attempts: 100,
            interval: Duration::from_secs(3),
            probe_timeout: Duration::from_millis(200),
        }
    }
}

/// A runtime process paired with its scratch tree. Both are released
/// together by [`RuntimeUnderTest::teardown`], which also runs on drop.
#[derive(Debug)]
pub struct RuntimeUnderTest {
    child: Option<Child>,
    scratch: Option<ScratchRoot>,
    endpoint: String,
    client: ClientDriver,
}

impl RuntimeUnderTest {
    /// Spawns `runtime` inside a fresh scratch root. With a collector the
    /// runtime exports its own spans there too.
    pub fn start(
        runtime: &Path,
        client_binary: &Path,
        collector: Option<&str>,
        clock: SuiteClock,
    ) -> HarnessResult<Self> {
        let scratch = ScratchRoot::create()?;
        let endpoint = scratch.endpoint();
        let log_file = fs::File::create(scratch.subdir("log").join("runtime.log"))?;

        let mut command = Command::new(runtime);
        command
            .arg("--listen")
            .arg(scratch.socket())
            .arg("--root")
            .arg(scratch.subdir("root"))
            .arg("--runroot")
            .arg(scratch.subdir("runroot"))
            .arg("--log-dir")
            .arg(scratch.subdir("log"))
            .arg("--container-exits-dir")
            .arg(scratch.subdir("exits"))
            .arg("--container-attach-socket-dir")
            .arg(scratch.subdir("attach"))
            .arg("--cni-config-dir")
            .arg(scratch.subdir("cni-config"))
            .arg("--signature-policy")
            .arg(scratch.policy())
            .stdin(Stdio::null())
            .stdout(Stdio::from(log_file.try_clone()?))
            .stderr(Stdio::from(log_file));
        if let Some(collector) = collector {
            command
                .arg("--enable-tracing")
                .arg(format!("--tracing-endpoint={collector}"));
        }

        let child = command.spawn()?;
        info!(pid = child.id(), %endpoint, "runtime started");

        let client = ClientDriver::new(client_binary)
            .with_clock(clock)
            .with_endpoint(&endpoint);
        Ok(Self {
            child: Some(child),
            scratch: Some(scratch),
            endpoint,
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn scratch(&self) -> Option<&ScratchRoot> {
        self.scratch.as_ref()
    }

    /// Client bound to this runtime's endpoint.
    pub fn client(&self) -> &ClientDriver {
        &self.client
    }

    /// Polls `info` until it succeeds.
    pub fn wait_ready(&mut self, probe: &ReadinessProbe) -> HarnessResult<()> {
        let timeout = format!("--timeout={}ms", probe.probe_timeout.as_millis());
        let mut last_error = String::from("no probe ran");

        for attempt in 1..=probe.attempts {
            let output = self.client.run(&[timeout.as_str(), "info"])?;
            if output.success() {
                info!(attempt, "runtime is ready");
                return Ok(());
            }
            last_error = output.stderr.trim().to_string();
            debug!(attempt, error = %last_error, "runtime not ready yet");

            if let Some(child) = self.child.as_mut() {
                if let Some(status) = child.try_wait()? {
                    return Err(HarnessError::RuntimeExited(status.to_string()));
                }
            }
            if attempt < probe.attempts {
                thread::sleep(probe.interval);
            }
        }
        Err(HarnessError::NotReady {
            attempts: probe.attempts,
            last_error,
        })
    }

    /// Interrupts the runtime, expects a clean exit and removes the scratch
    /// root. Safe to call more than once.
    pub fn teardown(&mut self) -> HarnessResult<()> {
        let mut outcome = Ok(());
        if let Some(mut child) = self.child.take() {
            let stopped = ProcessUtils::interrupt_and_wait(&mut child, TEARDOWN_GRACE)?;
            if stopped.killed || !stopped.status.success() {
                outcome = Err(HarnessError::RuntimeExited(format!(
                    "{} after interrupt{}",
                    stopped.status,
                    if stopped.killed { " (killed)" } else { "" }
                )));
            }
        }
        if let Some(scratch) = self.scratch.take() {
            scratch.close()?;
        }
        outcome
    }
}

impl Drop for RuntimeUnderTest {
    fn drop(&mut self) {
        if let Err(err) = self.teardown() {
            warn!("runtime teardown failed: {err}");
        }
    }
}
