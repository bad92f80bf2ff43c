use std::path::PathBuf;

use provision_saga::{PipelineError, StepError};
use thiserror::Error;

/// Details about a failed compensation during pipeline rollback.
#[derive(Debug)]
pub struct CompensationFailure {
    /// Name of the step whose compensation failed.
    pub step: String,
    /// Description of what the compensation was trying to do.
    pub description: String,
    /// The error that occurred during compensation.
    pub error: StepError,
}

#[derive(Debug, Error)]
pub enum OperationError {
    #[error(transparent)]
    Core(#[from] provision_core::CoreError),

    #[error("failed to locate '{name}'")]
    Lookup {
        name: String,
        #[source]
        source: StepError,
    },

    #[error("'{name}' does not exist; create the environment first")]
    NotProvisioned { name: String },

    #[error("'{name}' has no host address")]
    MissingHost { name: String },

    #[error("pipeline '{pipeline}' has no steps")]
    EmptyPlan { pipeline: String },

    #[error("failed to write result file '{path}'")]
    ResultWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to serialize result for '{environment}'")]
    ResultSerialize {
        environment: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("provisioning failed at step '{step}'")]
    SagaFailed {
        step: String,
        #[source]
        source: StepError,
        /// Steps that were compensated, in unwind order.
        rolled_back: Vec<String>,
    },

    #[error(
        "provisioning failed at step '{step}' and {} compensation(s) also failed", compensation_failures.len()
    )]
    SagaCompensationFailed {
        step: String,
        #[source]
        source: StepError,
        rolled_back: Vec<String>,
        compensation_failures: Vec<CompensationFailure>,
    },
}

pub type Result<T> = std::result::Result<T, OperationError>;

impl OperationError {
    /// True when a rollback left resources behind.
    #[must_use]
    pub fn requires_intervention(&self) -> bool {
        matches!(self, Self::SagaCompensationFailed { .. })
    }

    /// True for failures of the pipeline itself (as opposed to setup errors).
    #[must_use]
    pub fn is_saga_failure(&self) -> bool {
        matches!(
            self,
            Self::SagaFailed { .. } | Self::SagaCompensationFailed { .. }
        )
    }
}

impl From<PipelineError> for OperationError {
    fn from(err: PipelineError) -> Self {
        let mut compensation_failures = nested_compensation_failures(&err);
        match err {
            PipelineError::StepFailed {
                step,
                source,
                rolled_back,
            } if compensation_failures.is_empty() => Self::SagaFailed {
                step,
                source,
                rolled_back,
            },
            PipelineError::StepFailed {
                step,
                source,
                rolled_back,
            } => Self::SagaCompensationFailed {
                step,
                source,
                rolled_back,
                compensation_failures,
            },
            PipelineError::CompensationFailed {
                failed_step,
                step_error,
                rolled_back,
                compensation_errors,
            } => {
                let own = compensation_errors.into_iter().map(|e| CompensationFailure {
                    step: e.step,
                    description: e.description,
                    error: e.error,
                });
                compensation_failures.splice(0..0, own);
                Self::SagaCompensationFailed {
                    step: failed_step,
                    source: step_error,
                    rolled_back,
                    compensation_failures,
                }
            }
        }
    }
}

/// Compensations that failed inside a failed fan-out, named `"{task}/{step}"`.
fn nested_compensation_failures(err: &PipelineError) -> Vec<CompensationFailure> {
    let Some(fan_out) = err.step_error().fan_out() else {
        return Vec::new();
    };
    fan_out
        .compensation_errors()
        .into_iter()
        .map(|(task, failure)| CompensationFailure {
            step: format!("{task}/{}", failure.step),
            description: failure.description.clone(),
            error: StepError::new(failure.error.kind(), failure.error.message()),
        })
        .collect()
}
