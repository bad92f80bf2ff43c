use std::sync::Arc;
use std::time::Duration;

use provision_saga::{GuardError, IdempotencyGuard, MarkerKey, SideEffects, StepError};

use crate::commands;
use crate::traits::RemoteRunner;
use crate::types::{CommandOutput, parse_key_values};

use super::process::stderr_summary;

const NOT_FOUND: i32 = 3;

/// Completion markers kept as files on the target host itself.
///
/// The marker for `(host, step)` is `<marker_dir>/<step>` on `host`, holding
/// the step's side effects as `key=value` lines. Markers disappear together
/// with the host.
#[derive(Clone)]
pub struct RemoteMarkerGuard {
    runner: Arc<dyn RemoteRunner>,
    marker_dir: String,
    timeout: Duration,
}

impl RemoteMarkerGuard {
    #[must_use]
    pub fn new(runner: Arc<dyn RemoteRunner>, marker_dir: impl Into<String>, timeout: Duration) -> Self {
        Self {
            runner,
            marker_dir: marker_dir.into(),
            timeout,
        }
    }

    #[must_use]
    pub fn marker_dir(&self) -> &str {
        &self.marker_dir
    }

    fn marker_path(&self, key: &MarkerKey) -> String {
        let step: String = key
            .step()
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        format!("{}/{step}", self.marker_dir.trim_end_matches('/'))
    }

    fn run(&self, key: &MarkerKey, command: &str) -> Result<CommandOutput, GuardError> {
        self.runner
            .execute(key.target(), command, self.timeout)
            .map_err(|source| GuardError::Backend {
                key: key.to_string(),
                source,
            })
    }

    fn expect_success(key: &MarkerKey, output: &CommandOutput, action: &str) -> Result<(), GuardError> {
        if output.success() {
            return Ok(());
        }
        Err(GuardError::Backend {
            key: key.to_string(),
            source: StepError::transient(format!(
                "could not {action} marker: {}",
                stderr_summary(output)
            )),
        })
    }
}

impl IdempotencyGuard for RemoteMarkerGuard {
    fn lookup(&self, key: &MarkerKey) -> Result<Option<SideEffects>, GuardError> {
        let output = self.run(key, &commands::read_marker(&self.marker_path(key)))?;
        match output.exit_code {
            Some(0) => Ok(Some(parse_key_values(&output.stdout))),
            Some(NOT_FOUND) => Ok(None),
            _ => Self::expect_success(key, &output, "read").map(|()| None),
        }
    }

    fn mark(&self, key: &MarkerKey, side_effects: &SideEffects) -> Result<(), GuardError> {
        let command =
            commands::write_marker(&self.marker_dir, &self.marker_path(key), side_effects);
        let output = self.run(key, &command)?;
        Self::expect_success(key, &output, "write")
    }

    fn clear(&self, key: &MarkerKey) -> Result<(), GuardError> {
        let output = self.run(key, &commands::remove_marker(&self.marker_path(key)))?;
        Self::expect_success(key, &output, "remove")
    }

    fn clear_target(&self, target: &str) -> Result<(), GuardError> {
        let key = MarkerKey::new(target, "*");
        let output = self.run(&key, &commands::remove_marker_dir(&self.marker_dir))?;
        Self::expect_success(&key, &output, "remove")
    }
}
