use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::error::{CoreError, Result};

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SshConfig {
    user: String,
    identity_file: Option<PathBuf>,
    connect_timeout_secs: u64,
    marker_dir: String,
}

impl Default for SshConfig {
    fn default() -> Self {
        Self {
            user: String::from("datalab-user"),
            identity_file: None,
            connect_timeout_secs: 30,
            marker_dir: String::from("/home/datalab-user/.ensure_dir"),
        }
    }
}

impl SshConfig {
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    #[must_use]
    pub fn identity_file(&self) -> Option<&Path> {
        self.identity_file.as_deref()
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    /// Directory on the target host that holds completion markers.
    #[must_use]
    pub fn marker_dir(&self) -> &str {
        &self.marker_dir
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct SizeDefaults {
    region: String,
    instance_size: String,
    worker_size: String,
}

impl Default for SizeDefaults {
    fn default() -> Self {
        Self {
            region: String::from("us-west-2"),
            instance_size: String::from("t2.medium"),
            worker_size: String::from("t2.medium"),
        }
    }
}

impl SizeDefaults {
    #[must_use]
    pub fn region(&self) -> &str {
        &self.region
    }

    #[must_use]
    pub fn instance_size(&self) -> &str {
        &self.instance_size
    }

    #[must_use]
    pub fn worker_size(&self) -> &str {
        &self.worker_size
    }
}

/// Settings read from `provision.toml`. Every field has a default, so a
/// missing file and an empty file behave the same.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ProvisionConfig {
    hooks_dir: PathBuf,
    marker_dir: PathBuf,
    result_file: PathBuf,
    step_timeout_secs: u64,
    ssh: SshConfig,
    defaults: SizeDefaults,
}

impl Default for ProvisionConfig {
    fn default() -> Self {
        Self {
            hooks_dir: PathBuf::from("hooks"),
            marker_dir: PathBuf::from(".provision/markers"),
            result_file: PathBuf::from("provision-result.json"),
            step_timeout_secs: 600,
            ssh: SshConfig::default(),
            defaults: SizeDefaults::default(),
        }
    }
}

impl ProvisionConfig {
    /// Parse a config from TOML text. `path` is only used in errors.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::ConfigParse`] on malformed TOML or unknown keys.
    pub fn parse(content: &str, path: &Path) -> Result<Self> {
        toml::from_str(content).map_err(|source| CoreError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load a config file that must exist.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| CoreError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, path)
    }

    /// Load `provision.toml` from `dir`, falling back to defaults when absent.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn discover(dir: &Path) -> Result<Self> {
        let path = dir.join(crate::DEFAULT_CONFIG_FILE);
        match std::fs::read_to_string(&path) {
            Ok(content) => Self::parse(&content, &path),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(CoreError::ConfigRead { path, source }),
        }
    }

    #[must_use]
    pub fn hooks_dir(&self) -> &Path {
        &self.hooks_dir
    }

    #[must_use]
    pub fn marker_dir(&self) -> &Path {
        &self.marker_dir
    }

    #[must_use]
    pub fn result_file(&self) -> &Path {
        &self.result_file
    }

    #[must_use]
    pub fn step_timeout(&self) -> Duration {
        Duration::from_secs(self.step_timeout_secs)
    }

    #[must_use]
    pub fn ssh(&self) -> &SshConfig {
        &self.ssh
    }

    #[must_use]
    pub fn defaults(&self) -> &SizeDefaults {
        &self.defaults
    }

    /// Resolve relative paths against `base` (the directory of the config file).
    #[must_use]
    pub fn relative_to(mut self, base: &Path) -> Self {
        for path in [&mut self.hooks_dir, &mut self.marker_dir, &mut self.result_file] {
            if path.is_relative() {
                *path = base.join(&*path);
            }
        }
        self
    }

    #[must_use]
    pub fn with_result_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.result_file = path.into();
        self
    }
}
