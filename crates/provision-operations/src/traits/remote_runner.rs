use std::time::Duration;

use provision_saga::StepError;

use crate::types::CommandOutput;

/// Runs a shell command on a remote host.
pub trait RemoteRunner: Send + Sync {
    /// A non-zero exit status is a successful call; callers inspect
    /// [`CommandOutput::exit_code`].
    ///
    /// # Errors
    ///
    /// Returns `Timeout` if the command did not finish in time, and a
    /// classified error if it could not be started at all.
    fn execute(
        &self,
        host: &str,
        command: &str,
        timeout: Duration,
    ) -> Result<CommandOutput, StepError>;
}
