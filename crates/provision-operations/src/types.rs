use indexmap::IndexMap;
use provision_core::{CloudProvider, EnvironmentKind, LifecycleAction};
use provision_saga::{AuditLog, ErrorKind};
use serde::{Deserialize, Serialize};

/// What to create: one opaque cloud resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRequest {
    pub cloud: CloudProvider,
    /// Resource type, e.g. `subnet` or `instance`. Opaque to the pipeline.
    pub resource: String,
    /// Cloud-side name, unique within the environment.
    pub name: String,
    pub region: String,
    pub size: Option<String>,
    /// Identifiers of resources this one depends on, taken from the context.
    pub inputs: IndexMap<String, String>,
}

/// Handle to an existing (or possibly existing) resource.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceRef {
    pub cloud: CloudProvider,
    pub resource: String,
    pub name: String,
    pub region: String,
    /// Provider id when known; deletes by name otherwise.
    pub id: Option<String>,
}

/// A created or located resource.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ResourceRecord {
    pub id: String,
    pub attributes: IndexMap<String, String>,
}

impl ResourceRecord {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            attributes: IndexMap::new(),
        }
    }

    #[must_use]
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }
}

/// Captured result of one remote command.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    /// `None` when the process was terminated by a signal.
    pub exit_code: Option<i32>,
}

impl CommandOutput {
    #[must_use]
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Completed,
    RolledBack,
    /// Rollback ran but at least one compensation failed; leftovers need an operator.
    RollbackIncomplete,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepOutcome {
    pub name: String,
    pub status: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompensationFailureRecord {
    pub step: String,
    pub message: String,
}

/// Structured record of one orchestrator run, written for every terminal outcome.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProvisioningResult {
    pub environment: String,
    pub action: LifecycleAction,
    pub kind: EnvironmentKind,
    pub cloud: CloudProvider,
    pub status: ResultStatus,
    pub failed_step: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub error_message: Option<String>,
    #[serde(default)]
    pub rolled_back: Vec<String>,
    #[serde(default)]
    pub compensation_failures: Vec<CompensationFailureRecord>,
    #[serde(default)]
    pub resources: IndexMap<String, String>,
    #[serde(default)]
    pub steps: Vec<StepOutcome>,
    pub finished_at: String,
}

/// Successful orchestrator output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProvisioningOutput {
    pub environment: String,
    pub action: LifecycleAction,
    /// Everything the pipeline recorded in its context.
    pub resources: IndexMap<String, String>,
    pub steps: Vec<StepOutcome>,
}

impl ProvisioningOutput {
    /// Names of steps skipped because their marker was already present.
    #[must_use]
    pub fn skipped_steps(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.status == "skipped")
            .map(|s| s.name.as_str())
            .collect()
    }
}

pub(crate) fn step_outcomes(audit: &AuditLog) -> Vec<StepOutcome> {
    audit
        .records()
        .iter()
        .map(|record| StepOutcome {
            name: record.name.clone(),
            status: record.status.as_str().to_string(),
        })
        .collect()
}

/// Parse `key=value` lines. Blank lines and `#` comments are ignored, as is
/// any line without `=`.
#[must_use]
pub fn parse_key_values(text: &str) -> IndexMap<String, String> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| line.split_once('='))
        .map(|(key, value)| (key.trim().to_string(), value.trim().to_string()))
        .filter(|(key, _)| !key.is_empty())
        .collect()
}
