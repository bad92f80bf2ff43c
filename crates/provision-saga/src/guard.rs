use std::collections::HashMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::context::SideEffects;
use crate::error::GuardError;

/// Identity of a completion marker: one per (target host, step name).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MarkerKey {
    target: String,
    step: String,
}

impl MarkerKey {
    #[must_use]
    pub fn new(target: impl Into<String>, step: impl Into<String>) -> Self {
        Self {
            target: target.into(),
            step: step.into(),
        }
    }

    #[must_use]
    pub fn target(&self) -> &str {
        &self.target
    }

    #[must_use]
    pub fn step(&self) -> &str {
        &self.step
    }
}

impl fmt::Display for MarkerKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.target, self.step)
    }
}

/// Persisted completion tokens for idempotent steps.
///
/// A present marker means the step already succeeded for that target. The
/// side effects recorded with it let a later run rebuild the step's outputs
/// and its compensation without re-running the step body.
pub trait IdempotencyGuard: Send + Sync {
    /// Returns the persisted side effects if the marker is present.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot be queried.
    fn lookup(&self, key: &MarkerKey) -> Result<Option<SideEffects>, GuardError>;

    /// Record that the step completed with the given side effects.
    ///
    /// # Errors
    ///
    /// Returns an error if the marker cannot be persisted.
    fn mark(&self, key: &MarkerKey, side_effects: &SideEffects) -> Result<(), GuardError>;

    /// Remove a single marker. Removing an absent marker is not an error.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot delete the marker.
    fn clear(&self, key: &MarkerKey) -> Result<(), GuardError>;

    /// Remove every marker recorded for `target`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backend cannot delete the markers.
    fn clear_target(&self, target: &str) -> Result<(), GuardError>;
}

/// Marker store held in memory; suitable for tests and one-shot runs.
#[derive(Debug, Default)]
pub struct InMemoryGuard {
    markers: Mutex<HashMap<MarkerKey, SideEffects>>,
}

impl InMemoryGuard {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn is_marked(&self, key: &MarkerKey) -> bool {
        self.lock().contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<MarkerKey, SideEffects>> {
        self.markers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl IdempotencyGuard for InMemoryGuard {
    fn lookup(&self, key: &MarkerKey) -> Result<Option<SideEffects>, GuardError> {
        Ok(self.lock().get(key).cloned())
    }

    fn mark(&self, key: &MarkerKey, side_effects: &SideEffects) -> Result<(), GuardError> {
        self.lock().insert(key.clone(), side_effects.clone());
        Ok(())
    }

    fn clear(&self, key: &MarkerKey) -> Result<(), GuardError> {
        self.lock().remove(key);
        Ok(())
    }

    fn clear_target(&self, target: &str) -> Result<(), GuardError> {
        self.lock().retain(|key, _| key.target() != target);
        Ok(())
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct MarkerFile {
    target: String,
    step: String,
    #[serde(default)]
    side_effects: SideEffects,
}

/// Marker store backed by one TOML file per marker:
/// `<root>/<target>/<step>.toml`.
#[derive(Debug, Clone)]
pub struct FileMarkerGuard {
    root: PathBuf,
}

impl FileMarkerGuard {
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn target_dir(&self, target: &str) -> PathBuf {
        self.root.join(sanitize(target))
    }

    fn marker_path(&self, key: &MarkerKey) -> PathBuf {
        self.target_dir(key.target())
            .join(format!("{}.toml", sanitize(key.step())))
    }
}

impl IdempotencyGuard for FileMarkerGuard {
    fn lookup(&self, key: &MarkerKey) -> Result<Option<SideEffects>, GuardError> {
        let path = self.marker_path(key);
        let content = match fs::read_to_string(&path) {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(GuardError::Read { path, source }),
        };

        let marker: MarkerFile =
            toml::from_str(&content).map_err(|source| GuardError::Parse {
                path: path.clone(),
                source,
            })?;
        Ok(Some(marker.side_effects))
    }

    fn mark(&self, key: &MarkerKey, side_effects: &SideEffects) -> Result<(), GuardError> {
        let dir = self.target_dir(key.target());
        fs::create_dir_all(&dir).map_err(|source| GuardError::Write {
            path: dir.clone(),
            source,
        })?;

        let marker = MarkerFile {
            target: key.target().to_string(),
            step: key.step().to_string(),
            side_effects: side_effects.clone(),
        };
        let content =
            toml::to_string_pretty(&marker).map_err(|source| GuardError::Serialize {
                key: key.to_string(),
                source,
            })?;

        let path = self.marker_path(key);
        let staging = path.with_extension("toml.tmp");
        fs::write(&staging, content).map_err(|source| GuardError::Write {
            path: staging.clone(),
            source,
        })?;
        fs::rename(&staging, &path).map_err(|source| GuardError::Write {
            path: path.clone(),
            source,
        })
    }

    fn clear(&self, key: &MarkerKey) -> Result<(), GuardError> {
        let path = self.marker_path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(GuardError::Write { path, source }),
        }
    }

    fn clear_target(&self, target: &str) -> Result<(), GuardError> {
        let dir = self.target_dir(target);
        match fs::remove_dir_all(&dir) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(GuardError::Write { path: dir, source }),
        }
    }
}

fn sanitize(component: &str) -> String {
    let cleaned: String = component
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();

    // "", "." and ".." must not resolve outside the marker root
    if cleaned.chars().all(|c| c == '.') {
        format!("_{cleaned}")
    } else {
        cleaned
    }
}
