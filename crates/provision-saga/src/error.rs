use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::context::SideEffects;

/// Classification of a step failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The operation may succeed if the caller retries it.
    Transient,
    /// Retrying will not help.
    Permanent,
    /// A prerequisite resource (a network, a host, a context value) was not found.
    DependencyUnavailable,
    /// The blocking call did not return within the step's timeout.
    Timeout,
}

impl ErrorKind {
    /// Stable identifier used in result files and log fields.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::DependencyUnavailable => "dependency_unavailable",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by a step body or a compensation.
///
/// Only [`ErrorKind::Transient`] errors are eligible for retry, and retrying
/// is always the caller's decision. Pipelines never retry on their own.
#[derive(Debug, Error)]
#[error("{kind}: {message}")]
pub struct StepError {
    kind: ErrorKind,
    message: String,
    #[source]
    cause: Option<Box<dyn std::error::Error + Send + Sync + 'static>>,
}

impl StepError {
    #[must_use]
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            cause: None,
        }
    }

    #[must_use]
    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Transient, message)
    }

    #[must_use]
    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Permanent, message)
    }

    #[must_use]
    pub fn dependency_unavailable(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DependencyUnavailable, message)
    }

    #[must_use]
    pub fn timeout(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Timeout, message)
    }

    /// Attach the underlying cause.
    #[must_use]
    pub fn with_cause(
        mut self,
        cause: impl Into<Box<dyn std::error::Error + Send + Sync + 'static>>,
    ) -> Self {
        self.cause = Some(cause.into());
        self
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    /// Whether a caller may re-run the failed step.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        self.kind == ErrorKind::Transient
    }

    /// Fan-out details, when this error came from a [`crate::FanOutStep`].
    #[must_use]
    pub fn fan_out(&self) -> Option<&FanOutError> {
        self.cause.as_deref()?.downcast_ref::<FanOutError>()
    }
}

/// Error from a failed compensation operation.
#[derive(Debug, Error)]
#[error("compensation failed for step '{step}': {description}")]
pub struct CompensationError {
    /// Name of the step whose compensation failed.
    pub step: String,
    /// Description of what the compensation was trying to do.
    pub description: String,
    /// The underlying error.
    #[source]
    pub error: StepError,
}

/// Error from pipeline execution. Always produced after the rollback finished.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// A step failed and all compensations succeeded.
    #[error("step '{step}' failed")]
    StepFailed {
        /// Name of the step that failed.
        step: String,
        /// The error that caused the step to fail.
        #[source]
        source: StepError,
        /// Steps that were compensated, in unwind order.
        rolled_back: Vec<String>,
    },

    /// A step failed and some compensations also failed.
    #[error("step '{failed_step}' failed, and {} compensation(s) also failed", compensation_errors.len())]
    CompensationFailed {
        /// Name of the step that originally failed.
        failed_step: String,
        /// The error from the failed step.
        #[source]
        step_error: StepError,
        /// Steps that were compensated successfully, in unwind order.
        rolled_back: Vec<String>,
        /// Errors from failed compensations, in unwind order.
        compensation_errors: Vec<CompensationError>,
    },
}

impl PipelineError {
    #[must_use]
    pub fn failed_step(&self) -> &str {
        match self {
            Self::StepFailed { step, .. } => step,
            Self::CompensationFailed { failed_step, .. } => failed_step,
        }
    }

    /// The original error that triggered the rollback.
    #[must_use]
    pub fn step_error(&self) -> &StepError {
        match self {
            Self::StepFailed { source, .. } => source,
            Self::CompensationFailed { step_error, .. } => step_error,
        }
    }

    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.step_error().kind()
    }

    #[must_use]
    pub fn rolled_back(&self) -> &[String] {
        match self {
            Self::StepFailed { rolled_back, .. } | Self::CompensationFailed { rolled_back, .. } => {
                rolled_back
            }
        }
    }

    #[must_use]
    pub fn compensation_errors(&self) -> &[CompensationError] {
        match self {
            Self::StepFailed { .. } => &[],
            Self::CompensationFailed {
                compensation_errors,
                ..
            } => compensation_errors,
        }
    }

    /// True when part of the rollback failed and leftovers need an operator.
    ///
    /// Covers rollbacks inside a failed fan-out as well as this pipeline's own.
    #[must_use]
    pub fn requires_intervention(&self) -> bool {
        matches!(self, Self::CompensationFailed { .. })
            || self
                .step_error()
                .fan_out()
                .is_some_and(FanOutError::requires_intervention)
    }
}

/// Aggregated failure of a parallel fan-out.
///
/// `task` and `source` describe the first failed task in declaration order;
/// the rest are kept as secondary diagnostics.
#[derive(Debug, Error)]
#[error("task '{task}' failed at step '{}' ({} of {total} task(s) failed)", source.failed_step(), other_failures.len() + 1)]
pub struct FanOutError {
    pub task: String,
    #[source]
    pub source: PipelineError,
    pub other_failures: Vec<(String, PipelineError)>,
    pub succeeded: Vec<String>,
    /// Values written by the tasks that completed, keyed `"{task_id}.{key}"`.
    pub side_effects: SideEffects,
    pub total: usize,
}

impl FanOutError {
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        self.source.kind()
    }

    /// Every failed task id, primary first.
    #[must_use]
    pub fn failed_tasks(&self) -> Vec<&str> {
        std::iter::once(self.task.as_str())
            .chain(self.other_failures.iter().map(|(id, _)| id.as_str()))
            .collect()
    }

    fn failures(&self) -> impl Iterator<Item = (&str, &PipelineError)> {
        std::iter::once((self.task.as_str(), &self.source))
            .chain(self.other_failures.iter().map(|(id, err)| (id.as_str(), err)))
    }

    #[must_use]
    pub fn requires_intervention(&self) -> bool {
        self.failures().any(|(_, err)| err.requires_intervention())
    }

    /// Compensations that failed inside any task, paired with the task id.
    #[must_use]
    pub fn compensation_errors(&self) -> Vec<(&str, &CompensationError)> {
        self.failures()
            .flat_map(|(id, err)| {
                let nested = err
                    .step_error()
                    .fan_out()
                    .map(FanOutError::compensation_errors)
                    .unwrap_or_default();
                err.compensation_errors()
                    .iter()
                    .map(move |failure| (id, failure))
                    .chain(nested)
            })
            .collect()
    }
}

/// Error from an idempotency marker backend.
#[derive(Debug, Error)]
pub enum GuardError {
    #[error("failed to read marker '{path}'")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to write marker '{path}'")]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse marker '{path}'")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to serialize marker '{key}'")]
    Serialize {
        key: String,
        #[source]
        source: toml::ser::Error,
    },

    #[error("marker backend failed for '{key}'")]
    Backend {
        key: String,
        #[source]
        source: StepError,
    },
}
