//! Scenarios against a live CRI runtime. They build or locate `crio`, need
//! root and take minutes, so they only run on request:
//!
//! ```text
//! sudo -E cargo test --test e2e -- --ignored --test-threads=1
//! ```
//!
//! `RUNTIME_BINARY` skips the build; `CRI_E2E_WORKDIR` keeps the checkout
//! between runs; `CRI_E2E_LCOW=1` selects Linux defaults on Windows hosts.
#![cfg(unix)]

use std::io::Read;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::thread;
use std::time::Duration;

use critools::e2e::platform::{self, PlatformDefaults};
use critools::e2e::{
    Collector, HarnessError, ReadinessProbe, RuntimeBuild, RuntimeUnderTest, SuiteClock,
};
use critools::utils::process::ProcessUtils;
use serde_json::json;

fn client_binary() -> PathBuf {
    PathBuf::from(env!("CARGO_BIN_EXE_crictl"))
}

fn defaults() -> &'static PlatformDefaults {
    let lcow = std::env::var("CRI_E2E_LCOW").is_ok_and(|v| v == "1");
    match platform::bind(lcow) {
        Ok(bound) => bound,
        Err(HarnessError::PlatformRebound) => platform::current().unwrap(),
        Err(err) => panic!("{err}"),
    }
}

fn runtime_binary() -> PathBuf {
    let work_dir = std::env::var_os("CRI_E2E_WORKDIR")
        .map(PathBuf::from)
        .unwrap_or_else(|| std::env::temp_dir().join("crictl-e2e-build"));
    RuntimeBuild::new(work_dir).resolve().unwrap()
}

/// A runtime that already answered `info`.
fn ready_runtime(collector: Option<&str>) -> RuntimeUnderTest {
    let clock = SuiteClock::start();
    let mut runtime =
        RuntimeUnderTest::start(&runtime_binary(), &client_binary(), collector, clock).unwrap();
    runtime.wait_ready(&ReadinessProbe::default()).unwrap();
    runtime
}

#[test]
#[ignore = "needs root and a CRI runtime build"]
fn runtime_becomes_ready() {
    let mut runtime = ready_runtime(None);
    assert!(runtime.endpoint().ends_with("/crio.sock"));
    runtime
        .client()
        .expect_success(&["--timeout=200ms", "info"], "RuntimeReady")
        .unwrap();
    runtime.teardown().unwrap();
    runtime.teardown().unwrap();
}

#[test]
#[ignore = "needs root and a CRI runtime build"]
fn events_stream_runs_until_interrupted() {
    let mut runtime = ready_runtime(None);

    let mut child = Command::new(client_binary())
        .arg(format!("--runtime-endpoint={}", runtime.endpoint()))
        .arg("events")
        .stdin(Stdio::null())
        .stdout(Stdio::null())
        .stderr(Stdio::piped())
        .spawn()
        .unwrap();
    thread::sleep(Duration::from_secs(3));
    assert!(child.try_wait().unwrap().is_none(), "events exited early");

    let stopped = ProcessUtils::interrupt_and_wait(&mut child, Duration::from_secs(5)).unwrap();
    let mut stderr = String::new();
    child.stderr.take().unwrap().read_to_string(&mut stderr).unwrap();

    assert!(!stopped.killed);
    assert_eq!(stopped.status.code(), Some(130), "stderr: {stderr}");
    assert!(!stderr.contains("unknown method GetContainerEvents"));
    runtime.teardown().unwrap();
}

#[test]
#[ignore = "needs root and a CRI runtime build"]
fn client_spans_reach_the_collector() {
    let tokio = tokio::runtime::Runtime::new().unwrap();
    let collector = tokio.block_on(Collector::start()).unwrap();
    let mut runtime = ready_runtime(Some(&collector.endpoint()));

    runtime
        .client()
        .clone()
        .with_tracing(&collector.endpoint())
        .expect_success(&["ps"], "CONTAINER")
        .unwrap();

    let spans = tokio
        .block_on(collector.wait_for_spans(Duration::from_secs(5), |spans| {
            spans
                .iter()
                .any(|s| s.service_name.as_deref() == Some("cri-tools"))
        }))
        .unwrap();
    assert!(spans.iter().any(|s| s.name == "ps"));
    runtime.teardown().unwrap();
}

fn write_json(dir: &Path, name: &str, value: serde_json::Value) -> String {
    let path = dir.join(name);
    std::fs::write(&path, serde_json::to_vec_pretty(&value).unwrap()).unwrap();
    path.to_string_lossy().into_owned()
}

#[test]
#[ignore = "needs root, network access and a CRI runtime build"]
fn exec_in_a_running_container() {
    let defaults = defaults();
    let mut runtime = ready_runtime(None);
    let configs = tempfile::tempdir().unwrap();

    let pod = write_json(
        configs.path(),
        "pod.json",
        json!({
            "metadata": { "name": "e2e-pod", "namespace": "default", "uid": "e2e-pod-uid" },
            "logDirectory": configs.path().join("logs").to_string_lossy(),
        }),
    );
    let container = write_json(
        configs.path(),
        "container.json",
        json!({
            "metadata": { "name": "web" },
            "image": { "image": defaults.web_server_image },
            "logPath": "web.log",
        }),
    );

    let client = runtime.client();
    let id = client
        .expect_success(&["run", &container, &pod], "^[0-9a-f]{64}\n$")
        .unwrap()
        .stdout
        .trim()
        .to_string();

    let mut exec = vec!["exec", "--sync", id.as_str()];
    exec.extend_from_slice(defaults.echo_hello);
    client.expect_success(&exec, defaults.echo_hello_output).unwrap();

    let mut probe = vec!["exec", "--sync", id.as_str()];
    probe.extend_from_slice(defaults.dns_probe);
    client.expect_success(&probe, defaults.dns_expectation).unwrap();

    client
        .expect_failure(&["inspect", "not-a-container"], "", "not-a-container")
        .unwrap();
    client.expect_success(&["ps", "-q"], &id).unwrap();
    client.expect_success(&["rm", "-f", &id], &id).unwrap();
    runtime.teardown().unwrap();
}
