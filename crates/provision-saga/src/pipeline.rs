use std::fmt;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::audit::{AuditLog, StepStatus};
use crate::context::Context;
use crate::error::{PipelineError, StepError};
use crate::guard::{IdempotencyGuard, MarkerKey};
use crate::rollback::{CompensatingAction, RollbackStack};
use crate::step::Step;

/// Lifecycle of a pipeline execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipelineState {
    Pending,
    Running,
    RollingBack,
    Completed,
    RolledBack,
}

impl PipelineState {
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::RolledBack)
    }
}

impl fmt::Display for PipelineState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::RollingBack => "rolling back",
            Self::Completed => "completed",
            Self::RolledBack => "rolled back",
        };
        f.write_str(s)
    }
}

/// Terminal report of one pipeline execution.
#[derive(Debug)]
pub struct PipelineReport {
    /// Pipeline name, for logs and diagnostics.
    pub name: String,
    /// Terminal state: `Completed` or `RolledBack`.
    pub state: PipelineState,
    /// Every state the pipeline passed through, starting with `Pending`.
    pub transitions: Vec<PipelineState>,
    /// `Ok` on completion; the original failure (plus compensation failures) otherwise.
    pub result: Result<(), PipelineError>,
    /// Context after the last executed step, including side effects of rolled-back steps.
    pub context: Context,
    pub audit: AuditLog,
}

impl PipelineReport {
    #[must_use]
    pub fn is_completed(&self) -> bool {
        self.result.is_ok()
    }

    /// Drop the diagnostics and keep the context on success.
    ///
    /// # Errors
    ///
    /// Returns the pipeline failure if the pipeline rolled back.
    pub fn into_result(self) -> Result<Context, PipelineError> {
        self.result.map(|()| self.context)
    }

    pub(crate) fn aborted(name: String, context: Context, step: &str, error: StepError) -> Self {
        let mut audit = AuditLog::new();
        audit.begin(step, context.target_host());
        audit.finish(StepStatus::Failed, None);
        Self {
            name,
            state: PipelineState::RolledBack,
            transitions: vec![
                PipelineState::Pending,
                PipelineState::Running,
                PipelineState::RollingBack,
                PipelineState::RolledBack,
            ],
            result: Err(PipelineError::StepFailed {
                step: step.to_string(),
                source: error,
                rolled_back: Vec::new(),
            }),
            context,
            audit,
        }
    }
}

/// An ordered, all-or-nothing sequence of steps.
///
/// Built with [`PipelineBuilder`](crate::PipelineBuilder) and executed at most
/// once: [`Pipeline::run`] consumes it.
pub struct Pipeline<D> {
    name: String,
    steps: Vec<Arc<dyn Step<Deps = D>>>,
    guard: Arc<dyn IdempotencyGuard>,
}

impl<D: 'static> Pipeline<D> {
    pub(crate) fn from_parts(
        name: String,
        steps: Vec<Arc<dyn Step<Deps = D>>>,
        guard: Arc<dyn IdempotencyGuard>,
    ) -> Self {
        Self { name, steps, guard }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Step names in execution order.
    #[must_use]
    pub fn step_names(&self) -> Vec<&str> {
        self.steps.iter().map(|s| s.name()).collect()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }

    /// Execute every step in order against `ctx`.
    ///
    /// On the first failure the rollback stack is unwound completely (most
    /// recent compensation first) and the original step error is reported.
    /// On success the stack is discarded without running anything.
    pub fn run(self, deps: &D, mut ctx: Context) -> PipelineReport {
        let mut audit = AuditLog::new();
        let mut rollback = RollbackStack::new();
        let mut transitions = vec![PipelineState::Pending];
        self.transition(&mut transitions, PipelineState::Running);

        for step in &self.steps {
            audit.begin(step.name(), ctx.target_host());

            if let Err(error) = self.execute_step(step, deps, &mut ctx, &mut rollback, &mut audit) {
                audit.finish(StepStatus::Failed, None);
                warn!(
                    pipeline = %self.name,
                    step = step.name(),
                    target = ctx.target_host(),
                    kind = %error.kind(),
                    error = %error,
                    "step failed; rolling back {} completed step(s)",
                    rollback.len()
                );
                self.transition(&mut transitions, PipelineState::RollingBack);

                let result = Self::roll_back(step.name(), error, rollback, deps, &mut audit);

                self.transition(&mut transitions, PipelineState::RolledBack);
                return PipelineReport {
                    name: self.name,
                    state: PipelineState::RolledBack,
                    transitions,
                    result: Err(result),
                    context: ctx,
                    audit,
                };
            }
        }

        let discarded = rollback.discard();
        self.transition(&mut transitions, PipelineState::Completed);
        info!(
            pipeline = %self.name,
            target = ctx.target_host(),
            steps = self.steps.len(),
            discarded,
            "pipeline completed"
        );

        PipelineReport {
            name: self.name,
            state: PipelineState::Completed,
            transitions,
            result: Ok(()),
            context: ctx,
            audit,
        }
    }

    fn execute_step(
        &self,
        step: &Arc<dyn Step<Deps = D>>,
        deps: &D,
        ctx: &mut Context,
        rollback: &mut RollbackStack<D>,
        audit: &mut AuditLog,
    ) -> Result<(), StepError> {
        let key = MarkerKey::new(ctx.target_host(), step.name());

        let persisted = self.guard.lookup(&key).map_err(|e| {
            StepError::dependency_unavailable(format!("cannot check completion marker '{key}'"))
                .with_cause(e)
        })?;

        if let Some(side_effects) = persisted {
            debug!(step = step.name(), target = ctx.target_host(), "marker present; skipping step");
            ctx.merge(&side_effects);
            rollback.push(self.compensation_for(step, key, ctx.clone()));
            audit.finish(StepStatus::Skipped, Some(step.compensation_description()));
            return Ok(());
        }

        debug!(
            step = step.name(),
            target = ctx.target_host(),
            timeout_secs = step.timeout().map(|t| t.as_secs()),
            "running step"
        );
        let side_effects = step.run(deps, ctx)?;
        ctx.merge(&side_effects);
        rollback.push(self.compensation_for(step, key.clone(), ctx.clone()));

        // the resource exists now; if the marker cannot be written the step is
        // reported failed and its own compensation is unwound with the rest
        self.guard.mark(&key, &side_effects).map_err(|e| {
            StepError::transient(format!("step succeeded but marker '{key}' could not be written"))
                .with_cause(e)
        })?;

        audit.finish(StepStatus::Executed, Some(step.compensation_description()));
        debug!(step = step.name(), target = ctx.target_host(), "step succeeded");
        Ok(())
    }

    fn compensation_for(
        &self,
        step: &Arc<dyn Step<Deps = D>>,
        key: MarkerKey,
        snapshot: Context,
    ) -> CompensatingAction<D> {
        let name = step.name().to_string();
        let description = step.compensation_description();
        let step = Arc::clone(step);
        let guard = Arc::clone(&self.guard);

        CompensatingAction::new(name, description, move |deps: &D| {
            step.compensate(deps, &snapshot)?;
            guard.clear(&key).map_err(|e| {
                StepError::transient(format!(
                    "step compensated but marker '{key}' could not be cleared"
                ))
                .with_cause(e)
            })
        })
    }

    fn roll_back(
        failed_step: &str,
        step_error: StepError,
        rollback: RollbackStack<D>,
        deps: &D,
        audit: &mut AuditLog,
    ) -> PipelineError {
        let unwind = rollback.unwind(deps);

        for step in &unwind.compensated {
            audit.unwound(step, true);
        }
        for failure in &unwind.failures {
            audit.unwound(&failure.step, false);
        }

        if unwind.failures.is_empty() {
            PipelineError::StepFailed {
                step: failed_step.to_string(),
                source: step_error,
                rolled_back: unwind.compensated,
            }
        } else {
            PipelineError::CompensationFailed {
                failed_step: failed_step.to_string(),
                step_error,
                rolled_back: unwind.compensated,
                compensation_errors: unwind.failures,
            }
        }
    }

    fn transition(&self, transitions: &mut Vec<PipelineState>, next: PipelineState) {
        debug!(pipeline = %self.name, state = %next, "pipeline state transition");
        transitions.push(next);
    }
}

impl<D> fmt::Debug for Pipeline<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("name", &self.name)
            .field(
                "steps",
                &self.steps.iter().map(|s| s.name().to_string()).collect::<Vec<_>>(),
            )
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;
    use crate::builder::PipelineBuilder;
    use crate::context::SideEffects;
    use crate::error::ErrorKind;
    use crate::guard::InMemoryGuard;
    use crate::step::FnStep;

    #[derive(Default)]
    struct TestDeps {
        log: Mutex<Vec<String>>,
    }

    impl TestDeps {
        fn push(&self, entry: String) {
            self.log.lock().expect("log mutex").push(entry);
        }

        fn entries(&self) -> Vec<String> {
            self.log.lock().expect("log mutex").clone()
        }
    }

    fn creating(name: &'static str) -> FnStep<TestDeps> {
        FnStep::new(name, move |deps: &TestDeps, _ctx| {
            deps.push(format!("run {name}"));
            let mut effects = SideEffects::new();
            effects.insert(format!("{name}.id"), format!("{name}-1"));
            Ok(effects)
        })
        .with_compensation(format!("delete {name}"), move |deps: &TestDeps, ctx| {
            deps.push(format!(
                "undo {name} ({})",
                ctx.get(&format!("{name}.id")).unwrap_or("?")
            ));
            Ok(())
        })
    }

    fn failing(name: &'static str, kind: ErrorKind) -> FnStep<TestDeps> {
        FnStep::new(name, move |deps: &TestDeps, _ctx| {
            deps.push(format!("run {name}"));
            Err(StepError::new(kind, "boom"))
        })
    }

    #[test]
    fn completed_pipeline_records_transitions() {
        let deps = TestDeps::default();
        let pipeline = PipelineBuilder::new("demo")
            .first_step(creating("a"))
            .then(creating("b"))
            .build();

        let report = pipeline.run(&deps, Context::new("h"));

        assert!(report.is_completed());
        assert_eq!(report.state, PipelineState::Completed);
        assert_eq!(
            report.transitions,
            vec![
                PipelineState::Pending,
                PipelineState::Running,
                PipelineState::Completed
            ]
        );
        assert_eq!(deps.entries(), vec!["run a", "run b"]);
    }

    #[test]
    fn failed_pipeline_passes_through_rolling_back() {
        let deps = TestDeps::default();
        let pipeline = PipelineBuilder::new("demo")
            .first_step(creating("a"))
            .then(failing("b", ErrorKind::Permanent))
            .build();

        let report = pipeline.run(&deps, Context::new("h"));

        assert_eq!(report.state, PipelineState::RolledBack);
        assert_eq!(
            report.transitions,
            vec![
                PipelineState::Pending,
                PipelineState::Running,
                PipelineState::RollingBack,
                PipelineState::RolledBack
            ]
        );
        assert!(report.state.is_terminal());
    }

    #[test]
    fn compensation_sees_context_snapshot_of_its_step() {
        let deps = TestDeps::default();
        let pipeline = PipelineBuilder::new("demo")
            .first_step(creating("subnet"))
            .then(failing("instance", ErrorKind::Transient))
            .build();

        let report = pipeline.run(&deps, Context::new("h"));

        assert!(report.result.is_err());
        assert_eq!(
            deps.entries(),
            vec!["run subnet", "run instance", "undo subnet (subnet-1)"]
        );
    }

    #[test]
    fn successful_steps_set_markers_and_compensation_clears_them() {
        let deps = TestDeps::default();
        let guard = Arc::new(InMemoryGuard::new());
        let pipeline = PipelineBuilder::new("demo")
            .with_guard(guard.clone())
            .first_step(creating("a"))
            .then(creating("b"))
            .then(failing("c", ErrorKind::Permanent))
            .build();

        let report = pipeline.run(&deps, Context::new("h"));

        assert!(report.result.is_err());
        assert!(guard.is_empty(), "rolled back steps must not stay marked");
    }

    #[test]
    fn failed_step_is_not_marked() {
        let deps = TestDeps::default();
        let guard = Arc::new(InMemoryGuard::new());
        let pipeline = PipelineBuilder::new("demo")
            .with_guard(guard.clone())
            .first_step(failing("only", ErrorKind::Timeout))
            .build();

        let report = pipeline.run(&deps, Context::new("h"));

        let err = report.result.expect_err("pipeline should fail");
        assert_eq!(err.kind(), ErrorKind::Timeout);
        assert!(err.rolled_back().is_empty());
        assert!(!guard.is_marked(&MarkerKey::new("h", "only")));
        assert_eq!(report.audit.status_of("only"), Some(StepStatus::Failed));
    }

    #[test]
    fn into_result_returns_context_on_success() {
        let deps = TestDeps::default();
        let pipeline = PipelineBuilder::new("demo")
            .first_step(creating("a"))
            .build();

        let ctx = pipeline
            .run(&deps, Context::new("h"))
            .into_result()
            .expect("pipeline should complete");

        assert_eq!(ctx.get("a.id"), Some("a-1"));
    }

    #[test]
    fn step_names_follow_declaration_order() {
        let pipeline = PipelineBuilder::new("demo")
            .first_step(creating("x"))
            .then(creating("y"))
            .then(creating("z"))
            .build();

        assert_eq!(pipeline.step_names(), vec!["x", "y", "z"]);
        assert_eq!(pipeline.len(), 3);
    }
}
