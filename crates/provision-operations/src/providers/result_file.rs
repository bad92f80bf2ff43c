use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::Result;
use crate::error::OperationError;
use crate::traits::ResultWriter;
use crate::types::ProvisioningResult;

/// Writes the run result as pretty JSON, replacing the file atomically.
#[derive(Debug, Clone)]
pub struct JsonResultWriter {
    path: PathBuf,
}

impl JsonResultWriter {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ResultWriter for JsonResultWriter {
    fn write(&self, result: &ProvisioningResult) -> Result<()> {
        let mut content =
            serde_json::to_string_pretty(result).map_err(|source| {
                OperationError::ResultSerialize {
                    environment: result.environment.clone(),
                    source,
                }
            })?;
        content.push('\n');

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|source| OperationError::ResultWrite {
                path: parent.to_path_buf(),
                source,
            })?;
        }

        let staging = self.path.with_extension("json.tmp");
        fs::write(&staging, content).map_err(|source| OperationError::ResultWrite {
            path: staging.clone(),
            source,
        })?;
        fs::rename(&staging, &self.path).map_err(|source| OperationError::ResultWrite {
            path: self.path.clone(),
            source,
        })?;

        debug!(path = %self.path.display(), status = ?result.status, "wrote result file");
        Ok(())
    }
}
