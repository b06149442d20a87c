//! Flag and format validation that must fail before any network I/O. The
//! endpoint points nowhere, so reaching the runtime would surface as a
//! connection error instead of the expected message.
mod support;

use predicates::prelude::*;
use support::crictl;

const NOWHERE: &str = "--runtime-endpoint=unix:///nonexistent/crictl-test.sock";

#[test]
fn events_rejects_unknown_output_format() {
    crictl()
        .args([NOWHERE, "events", "--output=ini"])
        .assert()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::is_match("don't support .* format").unwrap());
}

#[test]
fn events_rejects_template_without_go_template_format() {
    crictl()
        .args([NOWHERE, "events", "--template={{.containerID}}"])
        .assert()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::is_match("template can't be used with .* format").unwrap());
}

#[test]
fn events_rejects_unparsable_template() {
    crictl()
        .args([NOWHERE, "events", "--output=go-template", "--template={{"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("failed to parse go-template"));
}

#[test]
fn listing_verbs_validate_format_too() {
    for verb in ["ps", "pods", "images"] {
        crictl()
            .args([NOWHERE, verb, "-o", "toml"])
            .assert()
            .code(1)
            .stderr(predicate::str::contains("don't support \"toml\" format"));
    }
}

#[test]
fn info_has_no_table_format() {
    crictl()
        .args([NOWHERE, "info", "-o", "table"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("don't support \"table\" format"));
}

#[test]
fn exec_sync_conflicts_with_tty() {
    crictl()
        .args([NOWHERE, "exec", "--sync", "--tty", "abc", "true"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("--sync cannot be combined"));
}

#[test]
fn exec_timeout_requires_sync() {
    crictl()
        .args([NOWHERE, "exec", "--timeout=5", "abc", "true"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("--timeout requires --sync"));
}

#[test]
fn port_forward_rejects_bad_mapping() {
    crictl()
        .args([NOWHERE, "port-forward", "pod", "8080:http"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("invalid port mapping"));
}

#[test]
fn unknown_verb_is_a_usage_error() {
    crictl()
        .arg("frobnicate")
        .assert()
        .code(1)
        .stdout(predicate::str::is_empty())
        .stderr(predicate::str::contains("frobnicate"));
}

#[test]
fn missing_required_ids_is_a_usage_error() {
    crictl().args([NOWHERE, "inspect"]).assert().code(1);
}

#[test]
fn help_exits_zero() {
    crictl()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("port-forward"));
}

#[test]
fn unreachable_endpoint_reports_connection_failure() {
    crictl()
        .args([NOWHERE, "--timeout=1s", "version"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("failed to connect to endpoint"));
}

#[test]
fn explicit_missing_config_file_fails() {
    support::crictl_without_config()
        .args(["--config=/nonexistent/crictl.yaml", NOWHERE, "version"])
        .assert()
        .code(1)
        .stderr(predicate::str::contains("failed to load config file"));
}
