use std::io;
use std::process::{Child, ExitStatus};
use std::time::Duration;

use wait_timeout::ChildExt;

/// Outcome of [`ProcessUtils::interrupt_and_wait`].
#[derive(Debug, Clone, Copy)]
pub struct Stopped {
    pub status: ExitStatus,
    /// The child ignored the interrupt and had to be killed.
    pub killed: bool,
}

pub struct ProcessUtils;

#[cfg(unix)]
impl ProcessUtils {
    /// Send a signal to a process
    pub fn send_signal(pid: u32, signal: nix::sys::signal::Signal) -> io::Result<()> {
        nix::sys::signal::kill(Self::pid(pid), signal).map_err(io::Error::from)
    }

    /// SIGINT, then SIGKILL if the child outlives `grace`.
    pub fn interrupt_and_wait(child: &mut Child, grace: Duration) -> io::Result<Stopped> {
        if let Some(status) = child.try_wait()? {
            return Ok(Stopped { status, killed: false });
        }
        Self::send_signal(child.id(), nix::sys::signal::Signal::SIGINT)?;
        Self::wait_or_kill(child, grace)
    }

    fn pid(pid: u32) -> nix::unistd::Pid {
        nix::unistd::Pid::from_raw(pid as i32)
    }
}

#[cfg(not(unix))]
impl ProcessUtils {
    /// No interrupt signal to deliver; the child is killed outright.
    pub fn interrupt_and_wait(child: &mut Child, _grace: Duration) -> io::Result<Stopped> {
        if let Some(status) = child.try_wait()? {
            return Ok(Stopped { status, killed: false });
        }
        child.kill()?;
        Ok(Stopped {
            status: child.wait()?,
            killed: true,
        })
    }
}

impl ProcessUtils {
    #[cfg_attr(not(unix), allow(dead_code))]
    fn wait_or_kill(child: &mut Child, grace: Duration) -> io::Result<Stopped> {
        if let Some(status) = child.wait_timeout(grace)? {
            return Ok(Stopped { status, killed: false });
        }
        child.kill()?;
        Ok(Stopped {
            status: child.wait()?,
            killed: true,
        })
    }
}
