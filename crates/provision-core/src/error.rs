use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid environment name '{name}': {reason}")]
    InvalidName { name: String, reason: &'static str },

    #[error("a cluster needs at least one worker")]
    MissingWorkers,

    #[error("a notebook does not take workers (got {count})")]
    UnexpectedWorkers { count: usize },

    #[error("failed to read config '{path}'")]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config '{path}'")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

pub type Result<T> = std::result::Result<T, CoreError>;
