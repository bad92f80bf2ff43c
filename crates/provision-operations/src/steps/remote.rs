use std::time::Duration;

use provision_saga::{Context, SideEffects, Step, StepError, StepResult};

use super::{ENV_NAME, ProvisionDeps};
use crate::commands;
use crate::providers::process::{classify_exit, stderr_summary};

type CommandFn = Box<dyn Fn(&Context) -> Result<String, StepError> + Send + Sync>;

/// Which host a remote step runs on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostTarget {
    /// The pipeline's own target host.
    Target,
    /// A host address recorded in the context by an earlier step.
    ContextKey(String),
}

impl HostTarget {
    fn resolve<'a>(&self, ctx: &'a Context) -> Result<&'a str, StepError> {
        match self {
            Self::Target => Ok(ctx.target_host()),
            Self::ContextKey(key) => ctx.require(key),
        }
    }
}

/// Runs one shell command on a host, with an optional undo command.
///
/// A non-zero exit is classified like a hook exit code. On success the step
/// records `{name}.host` so a resumed run can reconstruct the undo target.
pub struct RemoteCommandStep {
    name: String,
    host: HostTarget,
    command: CommandFn,
    undo: Option<(String, CommandFn)>,
    timeout: Duration,
}

impl RemoteCommandStep {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        host: HostTarget,
        timeout: Duration,
        command: impl Fn(&Context) -> Result<String, StepError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            host,
            command: Box::new(command),
            undo: None,
            timeout,
        }
    }

    #[must_use]
    pub fn with_undo(
        mut self,
        description: impl Into<String>,
        undo: impl Fn(&Context) -> Result<String, StepError> + Send + Sync + 'static,
    ) -> Self {
        self.undo = Some((description.into(), Box::new(undo)));
        self
    }

    /// Create the environment's service user; rollback removes it again.
    #[must_use]
    pub fn ensure_user(name: impl Into<String>, host: HostTarget, timeout: Duration) -> Self {
        Self::new(name, host, timeout, |ctx| {
            Ok(commands::ensure_user(ctx.require(ENV_NAME)?))
        })
        .with_undo("remove the service user", |ctx| {
            Ok(commands::remove_user(ctx.require(ENV_NAME)?))
        })
    }

    /// Install system packages. Packages are left in place on rollback.
    #[must_use]
    pub fn install_prerequisites(name: impl Into<String>, host: HostTarget, timeout: Duration) -> Self {
        Self::new(name, host, timeout, |_| Ok(commands::install_prerequisites()))
    }

    fn execute(&self, deps: &ProvisionDeps, host: &str, command: &str) -> Result<(), StepError> {
        let output = deps.runner().execute(host, command, self.timeout)?;
        if output.success() {
            return Ok(());
        }
        let code = output
            .exit_code
            .map_or_else(|| "a signal".to_string(), |c| c.to_string());
        Err(StepError::new(
            classify_exit(output.exit_code),
            format!(
                "'{}' on {host} exited with {code}: {}",
                self.name,
                stderr_summary(&output)
            ),
        ))
    }
}

impl Step for RemoteCommandStep {
    type Deps = ProvisionDeps;

    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, deps: &ProvisionDeps, ctx: &Context) -> StepResult {
        let host = self.host.resolve(ctx)?;
        let command = (self.command)(ctx)?;
        self.execute(deps, host, &command)?;

        let mut effects = SideEffects::new();
        effects.insert(format!("{}.host", self.name), host.to_string());
        Ok(effects)
    }

    fn compensate(&self, deps: &ProvisionDeps, ctx: &Context) -> Result<(), StepError> {
        let Some((_, undo)) = &self.undo else {
            return Ok(());
        };
        let host = ctx
            .get(&format!("{}.host", self.name))
            .map_or_else(|| self.host.resolve(ctx), Ok)?;
        let command = undo(ctx)?;
        self.execute(deps, host, &command)
    }

    fn compensation_description(&self) -> String {
        match &self.undo {
            Some((description, _)) => description.clone(),
            None => format!("nothing to undo for {}", self.name),
        }
    }

    fn timeout(&self) -> Option<Duration> {
        Some(self.timeout)
    }
}
