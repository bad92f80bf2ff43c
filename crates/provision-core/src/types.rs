use std::fmt;

use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::error::{CoreError, Result};

const MAX_NAME_LEN: usize = 32;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentKind {
    /// A single notebook host.
    Notebook,
    /// A master node with a fixed set of workers.
    Cluster,
}

impl EnvironmentKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Notebook => "notebook",
            Self::Cluster => "cluster",
        }
    }
}

impl fmt::Display for EnvironmentKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum CloudProvider {
    Aws,
    Gcp,
    Azure,
}

impl CloudProvider {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Aws => "aws",
            Self::Gcp => "gcp",
            Self::Azure => "azure",
        }
    }
}

impl fmt::Display for CloudProvider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleAction {
    Create,
    Configure,
    Terminate,
}

impl LifecycleAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Configure => "configure",
            Self::Terminate => "terminate",
        }
    }
}

impl fmt::Display for LifecycleAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Immutable description of one environment.
///
/// Everything a step needs to know about the environment comes from here;
/// the orchestrator seeds it into the initial pipeline context.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentSpec {
    pub name: String,
    pub kind: EnvironmentKind,
    pub cloud: CloudProvider,
    pub region: String,
    pub instance_size: String,
    #[serde(default)]
    pub worker_count: usize,
    #[serde(default)]
    pub worker_size: Option<String>,
    #[serde(default)]
    pub libraries: Vec<String>,
}

impl EnvironmentSpec {
    #[must_use]
    pub fn notebook(
        name: impl Into<String>,
        cloud: CloudProvider,
        region: impl Into<String>,
        instance_size: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: EnvironmentKind::Notebook,
            cloud,
            region: region.into(),
            instance_size: instance_size.into(),
            worker_count: 0,
            worker_size: None,
            libraries: Vec::new(),
        }
    }

    #[must_use]
    pub fn cluster(
        name: impl Into<String>,
        cloud: CloudProvider,
        region: impl Into<String>,
        master_size: impl Into<String>,
        worker_count: usize,
        worker_size: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            kind: EnvironmentKind::Cluster,
            cloud,
            region: region.into(),
            instance_size: master_size.into(),
            worker_count,
            worker_size: Some(worker_size.into()),
            libraries: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_libraries(mut self, libraries: Vec<String>) -> Self {
        self.libraries = libraries;
        self
    }

    /// Check the spec before any pipeline touches a cloud.
    ///
    /// # Errors
    ///
    /// Returns an error for a malformed name or a worker count that does not
    /// fit the environment kind.
    pub fn validate(&self) -> Result<()> {
        validate_name(&self.name)?;
        match self.kind {
            EnvironmentKind::Cluster if self.worker_count == 0 => Err(CoreError::MissingWorkers),
            EnvironmentKind::Notebook if self.worker_count > 0 => {
                Err(CoreError::UnexpectedWorkers {
                    count: self.worker_count,
                })
            }
            _ => Ok(()),
        }
    }

    /// Cloud name of an environment-level resource, e.g. `lab-subnet`.
    #[must_use]
    pub fn resource_name(&self, resource: &str) -> String {
        format!("{}-{resource}", self.name)
    }

    #[must_use]
    pub fn master_name(&self) -> String {
        self.resource_name("master")
    }

    /// Worker names are 1-based: `lab-worker-1`, `lab-worker-2`, ...
    #[must_use]
    pub fn worker_name(&self, index: usize) -> String {
        format!("{}-worker-{index}", self.name)
    }

    #[must_use]
    pub fn worker_names(&self) -> Vec<String> {
        (1..=self.worker_count).map(|i| self.worker_name(i)).collect()
    }

    /// Size of worker nodes; falls back to the master size.
    #[must_use]
    pub fn worker_size(&self) -> &str {
        self.worker_size.as_deref().unwrap_or(&self.instance_size)
    }
}

fn validate_name(name: &str) -> Result<()> {
    let invalid = |reason| CoreError::InvalidName {
        name: name.to_string(),
        reason,
    };

    if name.is_empty() {
        return Err(invalid("name must not be empty"));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(invalid("name must be at most 32 characters"));
    }
    if !name
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
    {
        return Err(invalid(
            "name may only contain lowercase letters, digits and '-'",
        ));
    }
    Ok(())
}
