//! Local child processes with a hard deadline.

use std::io::Read;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use provision_saga::{ErrorKind, StepError};
use tracing::{debug, warn};

use crate::types::CommandOutput;

const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Exit code used by `timeout(1)` and by hooks that enforce their own deadline.
pub const EXIT_TIMEOUT: i32 = 124;
/// `EX_TEMPFAIL`: try again later.
pub const EXIT_TEMPFAIL: i32 = 75;
/// `EX_UNAVAILABLE`: a required service or resource is missing.
pub const EXIT_UNAVAILABLE: i32 = 69;

/// Map a non-zero exit status to a failure kind.
#[must_use]
pub fn classify_exit(code: Option<i32>) -> ErrorKind {
    match code {
        Some(EXIT_TEMPFAIL) => ErrorKind::Transient,
        Some(EXIT_UNAVAILABLE) => ErrorKind::DependencyUnavailable,
        Some(EXIT_TIMEOUT) => ErrorKind::Timeout,
        _ => ErrorKind::Permanent,
    }
}

/// Last non-empty line of stderr, for error messages.
#[must_use]
pub fn stderr_summary(output: &CommandOutput) -> &str {
    output
        .stderr
        .lines()
        .rev()
        .map(str::trim)
        .find(|line| !line.is_empty())
        .unwrap_or("no error output")
}

/// Builder for a local command whose output is captured in full.
#[derive(Debug, Clone)]
pub struct ProcessCommand {
    program: PathBuf,
    args: Vec<String>,
    envs: Vec<(String, String)>,
    timeout: Duration,
}

impl ProcessCommand {
    #[must_use]
    pub fn new(program: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            envs: Vec::new(),
            timeout,
        }
    }

    #[must_use]
    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    #[must_use]
    pub fn args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.envs.push((key.into(), value.into()));
        self
    }

    /// Run to completion or until the deadline passes.
    ///
    /// A non-zero exit is returned as output, not as an error. On timeout the
    /// child is killed; its own children may outlive it.
    ///
    /// # Errors
    ///
    /// Returns `Timeout` when the deadline passes, `Permanent` when the
    /// program cannot be started and `Transient` for other I/O failures.
    pub fn run(&self) -> Result<CommandOutput, StepError> {
        let program = self.program.display().to_string();
        debug!(program = %program, args = ?self.args, timeout_secs = self.timeout.as_secs(), "spawning process");

        let mut child = Command::new(&self.program)
            .args(&self.args)
            .envs(self.envs.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .map_err(|e| {
                let kind = match e.kind() {
                    std::io::ErrorKind::NotFound | std::io::ErrorKind::PermissionDenied => {
                        ErrorKind::Permanent
                    }
                    _ => ErrorKind::Transient,
                };
                StepError::new(kind, format!("failed to start '{program}'")).with_cause(e)
            })?;

        // both pipes are drained concurrently; a full pipe blocks the child
        let stdout = child
            .stdout
            .take()
            .map(|pipe| thread::spawn(move || read_lossy(pipe)));
        let stderr = child
            .stderr
            .take()
            .map(|pipe| thread::spawn(move || read_lossy(pipe)));

        let deadline = Instant::now() + self.timeout;
        let status = loop {
            match child.try_wait() {
                Ok(Some(status)) => break status,
                Ok(None) if Instant::now() >= deadline => {
                    let _ = child.kill();
                    let _ = child.wait();
                    warn!(program = %program, timeout_secs = self.timeout.as_secs(), "process killed after timeout");
                    return Err(StepError::timeout(format!(
                        "'{program}' did not finish within {}s",
                        self.timeout.as_secs()
                    )));
                }
                Ok(None) => thread::sleep(POLL_INTERVAL),
                Err(e) => {
                    let _ = child.kill();
                    return Err(
                        StepError::transient(format!("failed to wait for '{program}'"))
                            .with_cause(e),
                    );
                }
            }
        };

        let output = CommandOutput {
            stdout: join_reader(stdout),
            stderr: join_reader(stderr),
            exit_code: status.code(),
        };
        debug!(program = %program, exit_code = ?output.exit_code, "process finished");
        Ok(output)
    }
}

fn read_lossy(mut pipe: impl Read) -> String {
    let mut buf = Vec::new();
    let _ = pipe.read_to_end(&mut buf);
    String::from_utf8_lossy(&buf).into_owned()
}

fn join_reader(handle: Option<thread::JoinHandle<String>>) -> String {
    handle
        .and_then(|h| h.join().ok())
        .unwrap_or_default()
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;

    fn sh(script: &str) -> ProcessCommand {
        ProcessCommand::new("/bin/sh", Duration::from_secs(10))
            .arg("-c")
            .arg(script)
    }

    #[test]
    fn captures_stdout_stderr_and_exit_code() {
        let output = sh("echo out; echo err >&2; exit 3").run().expect("run sh");

        assert_eq!(output.stdout.trim(), "out");
        assert_eq!(output.stderr.trim(), "err");
        assert_eq!(output.exit_code, Some(3));
        assert!(!output.success());
    }

    #[test]
    fn passes_environment_variables() {
        let output = sh("printf '%s' \"$PROVISION_NAME\"")
            .env("PROVISION_NAME", "lab-subnet")
            .run()
            .expect("run sh");

        assert_eq!(output.stdout, "lab-subnet");
    }

    #[test]
    fn kills_process_after_timeout() {
        let err = ProcessCommand::new("/bin/sh", Duration::from_millis(200))
            .args(["-c", "exec sleep 5"])
            .run()
            .expect_err("should time out");

        assert_eq!(err.kind(), ErrorKind::Timeout);
    }

    #[test]
    fn missing_program_is_permanent() {
        let err = ProcessCommand::new("/nonexistent/provision-hook", Duration::from_secs(1))
            .run()
            .expect_err("should not start");

        assert_eq!(err.kind(), ErrorKind::Permanent);
    }

    #[test]
    fn exit_codes_map_to_error_kinds() {
        assert_eq!(classify_exit(Some(75)), ErrorKind::Transient);
        assert_eq!(classify_exit(Some(69)), ErrorKind::DependencyUnavailable);
        assert_eq!(classify_exit(Some(124)), ErrorKind::Timeout);
        assert_eq!(classify_exit(Some(1)), ErrorKind::Permanent);
        assert_eq!(classify_exit(None), ErrorKind::Permanent);
    }

    #[test]
    fn stderr_summary_uses_last_line() {
        let output = CommandOutput {
            stderr: "warning: slow\nerror: quota exceeded\n\n".to_string(),
            ..CommandOutput::default()
        };

        assert_eq!(stderr_summary(&output), "error: quota exceeded");
    }
}
