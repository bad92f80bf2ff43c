use std::time::Duration;

use crate::context::{Context, SideEffects};
use crate::error::StepError;

/// Outcome of a step body: its side effects on success.
pub type StepResult = Result<SideEffects, StepError>;

/// A named, idempotent unit of pipeline work.
///
/// The pipeline skips `run` when the step's completion marker is already
/// present for the context's target host. On success the returned side
/// effects are merged into the context and `compensate` is registered for
/// rollback; on failure nothing is registered.
pub trait Step: Send + Sync {
    /// Shared dependencies (injected, not passed between steps).
    type Deps;

    /// Identifier used in logs, audit records and marker keys.
    fn name(&self) -> &str;

    /// Execute the step body.
    ///
    /// # Errors
    ///
    /// Returns the classified failure; the pipeline decides what to do with it.
    fn run(&self, deps: &Self::Deps, ctx: &Context) -> StepResult;

    /// Undo the step's effects.
    ///
    /// Receives the context as it was right after this step's side effects were
    /// merged. Must tolerate partially applied state. The default is a no-op,
    /// suitable for read-only steps.
    ///
    /// # Errors
    ///
    /// Returns an error if the cleanup fails; the unwind continues regardless.
    fn compensate(&self, deps: &Self::Deps, ctx: &Context) -> Result<(), StepError> {
        let _ = (deps, ctx);
        Ok(())
    }

    /// Human-readable description of what compensation will do.
    fn compensation_description(&self) -> String {
        format!("undo {}", self.name())
    }

    /// Upper bound for the step's blocking call, if it has one.
    fn timeout(&self) -> Option<Duration> {
        None
    }
}

type RunFn<D> = Box<dyn Fn(&D, &Context) -> StepResult + Send + Sync>;
type CompensateFn<D> = Box<dyn Fn(&D, &Context) -> Result<(), StepError> + Send + Sync>;

/// A step assembled from closures.
pub struct FnStep<D> {
    name: String,
    run: RunFn<D>,
    compensate: Option<CompensateFn<D>>,
    description: Option<String>,
    timeout: Option<Duration>,
}

impl<D> FnStep<D> {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        run: impl Fn(&D, &Context) -> StepResult + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            run: Box::new(run),
            compensate: None,
            description: None,
            timeout: None,
        }
    }

    #[must_use]
    pub fn with_compensation(
        mut self,
        description: impl Into<String>,
        compensate: impl Fn(&D, &Context) -> Result<(), StepError> + Send + Sync + 'static,
    ) -> Self {
        self.description = Some(description.into());
        self.compensate = Some(Box::new(compensate));
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl<D> Step for FnStep<D> {
    type Deps = D;

    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, deps: &D, ctx: &Context) -> StepResult {
        (self.run)(deps, ctx)
    }

    fn compensate(&self, deps: &D, ctx: &Context) -> Result<(), StepError> {
        match &self.compensate {
            Some(compensate) => compensate(deps, ctx),
            None => Ok(()),
        }
    }

    fn compensation_description(&self) -> String {
        self.description
            .clone()
            .unwrap_or_else(|| format!("undo {}", self.name))
    }

    fn timeout(&self) -> Option<Duration> {
        self.timeout
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn fn_step_delegates_run() {
        let step: FnStep<()> = FnStep::new("emit", |(), ctx| {
            let mut effects = SideEffects::new();
            effects.insert("target".to_string(), ctx.target_host().to_string());
            Ok(effects)
        });

        let effects = step
            .run(&(), &Context::new("host-a"))
            .expect("step should succeed");

        assert_eq!(step.name(), "emit");
        assert_eq!(effects.get("target").map(String::as_str), Some("host-a"));
    }

    #[test]
    fn fn_step_without_compensation_is_no_op() {
        let step: FnStep<()> = FnStep::new("read_only", |(), _| Ok(SideEffects::new()));

        assert!(step.compensate(&(), &Context::new("h")).is_ok());
        assert_eq!(step.compensation_description(), "undo read_only");
    }

    #[test]
    fn fn_step_runs_registered_compensation() {
        let calls = AtomicUsize::new(0);
        let step: FnStep<AtomicUsize> = FnStep::new("create", |_, _| Ok(SideEffects::new()))
            .with_compensation("delete thing", |calls: &AtomicUsize, _| {
                calls.fetch_add(1, Ordering::SeqCst);
                Ok(())
            });

        step.compensate(&calls, &Context::new("h"))
            .expect("compensation should succeed");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(step.compensation_description(), "delete thing");
    }

    #[test]
    fn fn_step_reports_timeout() {
        let step: FnStep<()> = FnStep::new("slow", |(), _| Ok(SideEffects::new()))
            .with_timeout(Duration::from_secs(5));

        assert_eq!(step.timeout(), Some(Duration::from_secs(5)));
    }
}
