use std::path::PathBuf;
use std::time::Duration;

use provision_core::SshConfig;
use provision_saga::StepError;

use super::process::{ProcessCommand, stderr_summary};
use crate::traits::RemoteRunner;
use crate::types::CommandOutput;

/// Exit status the `ssh` client uses for its own failures.
const SSH_CLIENT_ERROR: i32 = 255;

/// Runs commands through the system `ssh` client in batch mode.
///
/// Killing the local client on timeout does not stop the remote command.
#[derive(Debug, Clone)]
pub struct SshRunner {
    program: PathBuf,
    user: String,
    identity_file: Option<PathBuf>,
    connect_timeout: Duration,
}

impl SshRunner {
    #[must_use]
    pub fn new(user: impl Into<String>) -> Self {
        Self {
            program: PathBuf::from("ssh"),
            user: user.into(),
            identity_file: None,
            connect_timeout: Duration::from_secs(30),
        }
    }

    #[must_use]
    pub fn from_config(config: &SshConfig) -> Self {
        let mut runner = Self::new(config.user()).with_connect_timeout(config.connect_timeout());
        if let Some(identity) = config.identity_file() {
            runner = runner.with_identity_file(identity);
        }
        runner
    }

    #[must_use]
    pub fn with_identity_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.identity_file = Some(path.into());
        self
    }

    #[must_use]
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Use a different client binary (a wrapper script, or a fake in tests).
    #[must_use]
    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    fn arguments(&self, host: &str, command: &str) -> Vec<String> {
        let mut args = vec![
            "-o".to_string(),
            "BatchMode=yes".to_string(),
            "-o".to_string(),
            format!("ConnectTimeout={}", self.connect_timeout.as_secs()),
            "-o".to_string(),
            "StrictHostKeyChecking=accept-new".to_string(),
        ];
        if let Some(identity) = &self.identity_file {
            args.push("-i".to_string());
            args.push(identity.display().to_string());
        }
        args.push(format!("{}@{host}", self.user));
        args.push(command.to_string());
        args
    }
}

impl RemoteRunner for SshRunner {
    fn execute(
        &self,
        host: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, StepError> {
        let output = ProcessCommand::new(&self.program, timeout)
            .args(self.arguments(host, command))
            .run()?;

        if output.exit_code == Some(SSH_CLIENT_ERROR) {
            return Err(StepError::transient(format!(
                "ssh to {}@{host} failed: {}",
                self.user,
                stderr_summary(&output)
            )));
        }
        Ok(output)
    }
}
