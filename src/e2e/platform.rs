//! Per-OS command and image choices, bound once before a suite runs.
use std::sync::OnceLock;

use super::{HarnessError, HarnessResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HostOs {
    Linux,
    Windows,
}

impl HostOs {
    pub fn current() -> Self {
        if cfg!(windows) {
            HostOs::Windows
        } else {
            HostOs::Linux
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformDefaults {
    pub os: HostOs,
    /// Prefix that runs the remaining argument through a shell.
    pub shell: &'static [&'static str],
    pub sleep: &'static [&'static str],
    pub echo_hello: &'static [&'static str],
    /// Regex the output of `echo_hello` must match.
    pub echo_hello_output: &'static str,
    pub dns_probe: &'static [&'static str],
    /// Regex the DNS probe output must match.
    pub dns_expectation: &'static str,
    pub web_server_image: &'static str,
}

const LINUX: PlatformDefaults = PlatformDefaults {
    os: HostOs::Linux,
    shell: &["/bin/sh", "-c"],
    sleep: &["sleep", "3600"],
    echo_hello: &["echo", "hello"],
    echo_hello_output: "^hello\n$",
    dns_probe: &["cat", "/etc/resolv.conf"],
    dns_expectation: "nameserver",
    web_server_image: "registry.k8s.io/e2e-test-images/nginx:1.14-2",
};

const WINDOWS: PlatformDefaults = PlatformDefaults {
    os: HostOs::Windows,
    shell: &["cmd", "/c"],
    sleep: &["powershell", "-c", "Start-Sleep -Seconds 3600"],
    echo_hello: &["cmd", "/c", "echo hello"],
    echo_hello_output: "^hello\r\n$",
    dns_probe: &["ipconfig", "/all"],
    dns_expectation: "DNS Servers",
    web_server_image: "registry.k8s.io/e2e-test-images/httpd:2.4.39-4",
};

static BOUND: OnceLock<PlatformDefaults> = OnceLock::new();

/// Windows variants only on a Windows host without LCOW.
pub fn choose(host: HostOs, lcow: bool) -> PlatformDefaults {
    match host {
        HostOs::Windows if !lcow => WINDOWS,
        _ => LINUX,
    }
}

/// Binds the defaults for this host. A second bind is refused.
pub fn bind(lcow: bool) -> HarnessResult<&'static PlatformDefaults> {
    BOUND
        .set(choose(HostOs::current(), lcow))
        .map_err(|_| HarnessError::PlatformRebound)?;
    BOUND.get().ok_or(HarnessError::PlatformRebound)
}

/// The bound defaults, if a suite already bound them.
pub fn current() -> Option<&'static PlatformDefaults> {
    BOUND.get()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn windows_variant_only_without_lcow() {
        assert_eq!(choose(HostOs::Windows, false).os, HostOs::Windows);
        assert_eq!(choose(HostOs::Windows, true).os, HostOs::Linux);
        assert_eq!(choose(HostOs::Linux, false).os, HostOs::Linux);
        assert_eq!(choose(HostOs::Linux, true).os, HostOs::Linux);
    }

    #[test]
    fn linux_set_uses_posix_tools() {
        let defaults = choose(HostOs::Linux, false);
        assert_eq!(defaults.shell, ["/bin/sh", "-c"]);
        assert!(regex::Regex::new(defaults.echo_hello_output)
            .unwrap()
            .is_match("hello\n"));
    }

    #[test]
    fn second_bind_is_refused() {
        let first = bind(false);
        let second = bind(false);
        // Another test in this binary may have bound first.
        assert!(first.is_ok() || matches!(first, Err(HarnessError::PlatformRebound)));
        assert!(matches!(second, Err(HarnessError::PlatformRebound)));
        assert!(current().is_some());
    }
}
