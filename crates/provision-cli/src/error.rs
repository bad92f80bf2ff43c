use provision_core::CoreError;
use provision_operations::OperationError;
use thiserror::Error;

/// Failed and fully rolled back.
pub const EXIT_ROLLED_BACK: u8 = 1;
/// Failed and at least one compensation failed too.
pub const EXIT_ROLLBACK_INCOMPLETE: u8 = 2;
/// Usage, configuration or infrastructure error; no pipeline ran.
pub const EXIT_OTHER: u8 = 3;

#[derive(Debug, Error)]
pub enum CliError {
    #[error("failed to determine current directory")]
    CurrentDir(#[source] std::io::Error),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Operation(#[from] OperationError),
}

pub type Result<T> = std::result::Result<T, CliError>;

impl CliError {
    #[must_use]
    pub fn exit_code(&self) -> u8 {
        match self {
            Self::Operation(e) if e.requires_intervention() => EXIT_ROLLBACK_INCOMPLETE,
            Self::Operation(e) if e.is_saga_failure() => EXIT_ROLLED_BACK,
            _ => EXIT_OTHER,
        }
    }
}
