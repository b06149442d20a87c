// Local terminal handling for TTY sessions

use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tracing::warn;

use super::protocol::TerminalSize;

/// RAII guard that puts stdout in raw mode and restores it on drop.
#[cfg(unix)]
pub struct RawTerminalGuard {
    _stdout: termion::raw::RawTerminal<io::Stdout>,
}

#[cfg(unix)]
impl RawTerminalGuard {
    pub fn new() -> io::Result<Self> {
        use termion::raw::IntoRawMode;
        let stdout = io::stdout().into_raw_mode()?;
        Ok(Self { _stdout: stdout })
    }
}

#[cfg(not(unix))]
pub struct RawTerminalGuard;

#[cfg(not(unix))]
impl RawTerminalGuard {
    pub fn new() -> io::Result<Self> {
        Ok(Self)
    }
}

impl Drop for RawTerminalGuard {
    fn drop(&mut self) {
        // Raw mode leaves the cursor mid-line
        let _ = io::stdout().write_all(b"\r\n");
        let _ = io::stdout().flush();
    }
}

/// Raw mode only when stdin is a terminal; piped input is passed through.
pub fn enter_raw_mode() -> Option<RawTerminalGuard> {
    if !stdin_is_tty() {
        return None;
    }
    match RawTerminalGuard::new() {
        Ok(guard) => Some(guard),
        Err(err) => {
            warn!("failed to put terminal in raw mode: {err}");
            None
        }
    }
}

#[cfg(unix)]
pub fn stdin_is_tty() -> bool {
    termion::is_tty(&io::stdin())
}

#[cfg(not(unix))]
pub fn stdin_is_tty() -> bool {
    false
}

#[cfg(unix)]
pub fn terminal_size() -> Option<TerminalSize> {
    termion::terminal_size()
        .ok()
        .map(|(width, height)| TerminalSize { width, height })
}

#[cfg(not(unix))]
pub fn terminal_size() -> Option<TerminalSize> {
    None
}

#[cfg(unix)]
fn register_resize_signal(flag: &Arc<AtomicBool>) {
    if let Err(err) = signal_hook::flag::register(signal_hook::consts::SIGWINCH, Arc::clone(flag)) {
        warn!("failed to register SIGWINCH handler: {err}");
    }
}

#[cfg(not(unix))]
fn register_resize_signal(_flag: &Arc<AtomicBool>) {}

/// Tracks SIGWINCH and reports size changes.
pub struct ResizeWatcher {
    flag: Arc<AtomicBool>,
    last: Option<TerminalSize>,
}

impl ResizeWatcher {
    pub fn new() -> Self {
        let flag = Arc::new(AtomicBool::new(false));
        register_resize_signal(&flag);
        Self { flag, last: None }
    }

    /// Current size if it differs from the last one handed out. The first
    /// call always reports.
    pub fn poll(&mut self) -> Option<TerminalSize> {
        let signalled = self.flag.swap(false, Ordering::Relaxed);
        if !signalled && self.last.is_some() {
            return None;
        }
        let size = terminal_size()?;
        if self.last == Some(size) {
            return None;
        }
        self.last = Some(size);
        Some(size)
    }
}

impl Default for ResizeWatcher {
    fn default() -> Self {
        Self::new()
    }
}
