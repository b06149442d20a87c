use std::io::{self, Read};
use std::path::Path;
use std::process::{Child, Command, Stdio};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use wait_timeout::ChildExt;

#[derive(Debug, Clone, Default)]
pub struct CommandResult {
    pub success: bool,
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<i32>,
    pub timed_out: bool,
}

pub struct CommandExecutor;

impl CommandExecutor {
    /// Run a program to completion in `cwd`, capturing its output
    pub fn execute(program: &str, args: &[&str], cwd: Option<&Path>) -> io::Result<CommandResult> {
        let mut command = Command::new(program);
        command.args(args);
        if let Some(dir) = cwd {
            command.current_dir(dir);
        }
        let output = command.output()?;

        Ok(CommandResult {
            success: output.status.success(),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code(),
            timed_out: false,
        })
    }

    /// Check if a command is available in the system PATH
    pub fn is_command_available(command: &str) -> bool {
        Command::new("which")
            .arg(command)
            .output()
            .map(|output| output.status.success())
            .unwrap_or(false)
    }

    /// Run `command` with a wall-clock deadline. The child is killed when
    /// the deadline passes and the result is marked `timed_out`.
    pub fn execute_with_deadline(command: &mut Command, deadline: Duration) -> io::Result<CommandResult> {
        let mut child = command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()?;

        // Drain both pipes concurrently so a chatty child never blocks
        let stdout = drain(child.stdout.take());
        let stderr = drain(child.stderr.take());

        let (status, timed_out) = match child.wait_timeout(deadline)? {
            Some(status) => (status, false),
            None => (kill_and_reap(&mut child)?, true),
        };

        Ok(CommandResult {
            success: status.success() && !timed_out,
            stdout: join_output(stdout),
            stderr: join_output(stderr),
            exit_code: status.code(),
            timed_out,
        })
    }
}

fn drain<R: Read + Send + 'static>(pipe: Option<R>) -> Option<JoinHandle<Vec<u8>>> {
    pipe.map(|mut pipe| {
        thread::spawn(move || {
            let mut buffer = Vec::new();
            let _ = pipe.read_to_end(&mut buffer);
            buffer
        })
    })
}

fn join_output(reader: Option<JoinHandle<Vec<u8>>>) -> String {
    reader
        .and_then(|handle| handle.join().ok())
        .map(|bytes| String::from_utf8_lossy(&bytes).to_string())
        .unwrap_or_default()
}

fn kill_and_reap(child: &mut Child) -> io::Result<std::process::ExitStatus> {
    child.kill()?;
    child.wait()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    #[test]
    fn captures_both_streams_and_exit_code() {
        let mut command = Command::new("sh");
        command.args(["-c", "echo out; echo err >&2; exit 3"]);
        let result = CommandExecutor::execute_with_deadline(&mut command, Duration::from_secs(10)).unwrap();
        assert_eq!(result.stdout, "out\n");
        assert_eq!(result.stderr, "err\n");
        assert_eq!(result.exit_code, Some(3));
        assert!(!result.success);
        assert!(!result.timed_out);
    }

    #[test]
    fn deadline_kills_the_child() {
        let mut command = Command::new("sleep");
        command.arg("30");
        let result = CommandExecutor::execute_with_deadline(&mut command, Duration::from_millis(200)).unwrap();
        assert!(result.timed_out);
        assert!(!result.success);
    }

    #[test]
    fn execute_runs_in_directory() {
        let dir = tempfile::tempdir().unwrap();
        let result = CommandExecutor::execute("pwd", &[], Some(dir.path())).unwrap();
        assert!(result.success);
        let reported = std::fs::canonicalize(result.stdout.trim()).unwrap();
        assert_eq!(reported, std::fs::canonicalize(dir.path()).unwrap());
    }
}
