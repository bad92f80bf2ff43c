use std::sync::Arc;

use indexmap::IndexMap;

use crate::error::StepError;

/// Outputs of a successful step: created resource identifiers and values for later steps.
pub type SideEffects = IndexMap<String, String>;

/// Key-value store threaded through the steps of one pipeline.
///
/// A context belongs to exactly one pipeline execution. Fan-out children get
/// their own context through [`Context::fork`]; the parent's values are shared
/// with them as a read-only snapshot and every write lands in the child's own map.
#[derive(Debug, Clone, Default)]
pub struct Context {
    target_host: String,
    values: IndexMap<String, String>,
    inherited: Arc<IndexMap<String, String>>,
}

impl Context {
    /// Create an empty context for the given target (a host name or a logical environment target).
    #[must_use]
    pub fn new(target_host: impl Into<String>) -> Self {
        Self {
            target_host: target_host.into(),
            values: IndexMap::new(),
            inherited: Arc::new(IndexMap::new()),
        }
    }

    #[must_use]
    pub fn with_value(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    #[must_use]
    pub fn target_host(&self) -> &str {
        &self.target_host
    }

    /// Look up a value, preferring this context's own values over inherited ones.
    #[must_use]
    pub fn get(&self, key: &str) -> Option<&str> {
        self.values
            .get(key)
            .or_else(|| self.inherited.get(key))
            .map(String::as_str)
    }

    /// Look up a value a step cannot run without.
    ///
    /// # Errors
    ///
    /// Returns a `DependencyUnavailable` error if the key is absent.
    pub fn require(&self, key: &str) -> Result<&str, StepError> {
        self.get(key).ok_or_else(|| {
            StepError::dependency_unavailable(format!(
                "context value '{key}' is missing for target '{}'",
                self.target_host
            ))
        })
    }

    #[must_use]
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.values.insert(key.into(), value.into());
    }

    /// Merge a step's side effects; later writes win.
    pub fn merge(&mut self, side_effects: &SideEffects) {
        for (key, value) in side_effects {
            self.values.insert(key.clone(), value.clone());
        }
    }

    /// Values written to this context (excluding inherited ones), in insertion order.
    #[must_use]
    pub fn own_values(&self) -> &IndexMap<String, String> {
        &self.values
    }

    /// Inherited values overlaid with own values.
    #[must_use]
    pub fn snapshot(&self) -> IndexMap<String, String> {
        let mut merged = (*self.inherited).clone();
        for (key, value) in &self.values {
            merged.insert(key.clone(), value.clone());
        }
        merged
    }

    /// Create a child context for a sub-pipeline targeting `target_host`.
    #[must_use]
    pub fn fork(&self, target_host: impl Into<String>) -> Self {
        Self {
            target_host: target_host.into(),
            values: IndexMap::new(),
            inherited: Arc::new(self.snapshot()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn get_returns_inserted_value() {
        let ctx = Context::new("env:demo").with_value("subnet.cidr", "10.0.1.0/24");

        assert_eq!(ctx.get("subnet.cidr"), Some("10.0.1.0/24"));
        assert_eq!(ctx.get("missing"), None);
    }

    #[test]
    fn require_missing_value_is_dependency_unavailable() {
        let ctx = Context::new("env:demo");

        let err = ctx.require("vpc.id").expect_err("value is missing");

        assert_eq!(err.kind(), ErrorKind::DependencyUnavailable);
        assert!(err.message().contains("vpc.id"));
        assert!(err.message().contains("env:demo"));
    }

    #[test]
    fn merge_overwrites_existing_keys() {
        let mut ctx = Context::new("host").with_value("a", "1");
        let mut effects = SideEffects::new();
        effects.insert("a".to_string(), "2".to_string());
        effects.insert("b".to_string(), "3".to_string());

        ctx.merge(&effects);

        assert_eq!(ctx.get("a"), Some("2"));
        assert_eq!(ctx.get("b"), Some("3"));
    }

    #[test]
    fn fork_shares_parent_values_read_only() {
        let parent = Context::new("env:demo").with_value("master.host", "10.0.0.5");

        let mut child = parent.fork("10.0.0.6");
        child.insert("user.created", "true");

        assert_eq!(child.target_host(), "10.0.0.6");
        assert_eq!(child.get("master.host"), Some("10.0.0.5"));
        assert_eq!(child.get("user.created"), Some("true"));
        assert!(parent.get("user.created").is_none());
        assert!(child.own_values().contains_key("user.created"));
        assert!(!child.own_values().contains_key("master.host"));
    }

    #[test]
    fn own_values_shadow_inherited_values() {
        let parent = Context::new("env").with_value("role", "master");
        let child = parent.fork("worker").with_value("role", "worker");

        assert_eq!(child.get("role"), Some("worker"));
        assert_eq!(child.snapshot().get("role").map(String::as_str), Some("worker"));
    }
}
