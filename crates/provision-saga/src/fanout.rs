use std::thread;

use tracing::{info, warn};

use crate::context::{Context, SideEffects};
use crate::error::{FanOutError, PipelineError, StepError};
use crate::pipeline::{Pipeline, PipelineReport};
use crate::step::{Step, StepResult};

/// One independent sub-pipeline of a fan-out, bound to a single node.
pub struct FanOutTask<D> {
    id: String,
    target_host: String,
    pipeline: Pipeline<D>,
}

impl<D> FanOutTask<D> {
    #[must_use]
    pub fn new(id: impl Into<String>, target_host: impl Into<String>, pipeline: Pipeline<D>) -> Self {
        Self {
            id: id.into(),
            target_host: target_host.into(),
            pipeline,
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    #[must_use]
    pub fn target_host(&self) -> &str {
        &self.target_host
    }
}

/// Runs a fixed set of sub-pipelines concurrently and joins all of them.
///
/// Every task gets its own context forked from the parent (read-only parent
/// values, private writes) and its own rollback stack. Siblings are never
/// cancelled when one fails: partially configured nodes must stay
/// identifiable for the parent's compensation.
pub struct ParallelFanOut<D> {
    tasks: Vec<FanOutTask<D>>,
}

impl<D: Sync + 'static> ParallelFanOut<D> {
    #[must_use]
    pub fn new(tasks: Vec<FanOutTask<D>>) -> Self {
        Self { tasks }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    /// Launch every task on its own scoped thread and wait for all of them.
    pub fn execute(self, deps: &D, parent: &Context) -> FanOutReport {
        let total = self.tasks.len();

        let results = thread::scope(|scope| {
            let mut launched = Vec::with_capacity(total);
            for task in self.tasks {
                let FanOutTask {
                    id,
                    target_host,
                    pipeline,
                } = task;
                let ctx = parent.fork(target_host);
                let fallback = (pipeline.name().to_string(), ctx.clone());

                let handle = thread::Builder::new()
                    .name(format!("fanout-{id}"))
                    .spawn_scoped(scope, move || pipeline.run(deps, ctx));
                launched.push((id, handle, fallback));
            }

            launched
                .into_iter()
                .map(|(id, handle, (name, ctx))| {
                    let report = match handle {
                        Ok(handle) => handle.join().unwrap_or_else(|_| {
                            PipelineReport::aborted(
                                name,
                                ctx,
                                "<panic>",
                                StepError::permanent(format!("task '{id}' panicked")),
                            )
                        }),
                        Err(source) => PipelineReport::aborted(
                            name,
                            ctx,
                            "<spawn>",
                            StepError::transient(format!("could not start task '{id}'"))
                                .with_cause(source),
                        ),
                    };
                    (id, report)
                })
                .collect::<Vec<_>>()
        });

        let report = FanOutReport { results };
        let failed = report.failed_tasks();
        if failed.is_empty() {
            info!(tasks = total, "fan-out joined; all tasks completed");
        } else {
            warn!(
                tasks = total,
                failed = failed.len(),
                first_failure = failed[0],
                "fan-out joined with failures"
            );
        }
        report
    }
}

/// Per-task reports of a joined fan-out, in task declaration order.
#[derive(Debug)]
pub struct FanOutReport {
    results: Vec<(String, PipelineReport)>,
}

impl FanOutReport {
    #[must_use]
    pub fn results(&self) -> &[(String, PipelineReport)] {
        &self.results
    }

    #[must_use]
    pub fn get(&self, task_id: &str) -> Option<&PipelineReport> {
        self.results
            .iter()
            .find(|(id, _)| id == task_id)
            .map(|(_, report)| report)
    }

    #[must_use]
    pub fn is_success(&self) -> bool {
        self.results.iter().all(|(_, report)| report.is_completed())
    }

    #[must_use]
    pub fn failed_tasks(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|(_, report)| !report.is_completed())
            .map(|(id, _)| id.as_str())
            .collect()
    }

    #[must_use]
    pub fn succeeded_tasks(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|(_, report)| report.is_completed())
            .map(|(id, _)| id.as_str())
            .collect()
    }

    /// Values written by successful tasks, keyed `"{task_id}.{key}"`.
    #[must_use]
    pub fn side_effects(&self) -> SideEffects {
        let mut effects = SideEffects::new();
        for (id, report) in &self.results {
            if report.is_completed() {
                for (key, value) in report.context.own_values() {
                    effects.insert(format!("{id}.{key}"), value.clone());
                }
            }
        }
        effects
    }

    /// Aggregate into a single outcome.
    ///
    /// # Errors
    ///
    /// Returns the first failure in task order, with every later failure attached.
    pub fn into_result(self) -> Result<SideEffects, FanOutError> {
        let effects = self.side_effects();
        let total = self.results.len();
        let mut succeeded = Vec::new();
        let mut failures: Vec<(String, PipelineError)> = Vec::new();

        for (id, report) in self.results {
            match report.result {
                Ok(()) => succeeded.push(id),
                Err(err) => failures.push((id, err)),
            }
        }

        if failures.is_empty() {
            return Ok(effects);
        }

        let (task, source) = failures.remove(0);
        Err(FanOutError {
            task,
            source,
            other_failures: failures,
            succeeded,
            side_effects: effects,
            total,
        })
    }
}

type TaskFactory<D> = Box<dyn Fn(&Context) -> Result<Vec<FanOutTask<D>>, StepError> + Send + Sync>;
type CompensateFn<D> = Box<dyn Fn(&D, &Context) -> Result<(), StepError> + Send + Sync>;

/// A fan-out presented to its parent pipeline as a single step.
///
/// The factory builds one task per node from the parent context each time the
/// step runs. Success returns the namespaced side effects of every node.
pub struct FanOutStep<D> {
    name: String,
    factory: TaskFactory<D>,
    compensate: Option<CompensateFn<D>>,
    description: Option<String>,
}

impl<D> FanOutStep<D> {
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        factory: impl Fn(&Context) -> Result<Vec<FanOutTask<D>>, StepError> + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            factory: Box::new(factory),
            compensate: None,
            description: None,
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
}

impl<D: Sync + 'static> Step for FanOutStep<D> {
    type Deps = D;

    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, deps: &D, ctx: &Context) -> StepResult {
        let tasks = (self.factory)(ctx)?;
        let report = ParallelFanOut::new(tasks).execute(deps, ctx);

        report.into_result().map_err(|err| {
            let message = format!(
                "{} of {} node task(s) failed; first failure: task '{}' at step '{}': {}",
                err.other_failures.len() + 1,
                err.total,
                err.task,
                err.source.failed_step(),
                err.source.step_error().message()
            );
            StepError::new(err.kind(), message).with_cause(err)
        })
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
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::PipelineBuilder;
    use crate::error::ErrorKind;
    use crate::step::FnStep;

    fn node_pipeline(fail: bool) -> Pipeline<()> {
        PipelineBuilder::new("node")
            .first_step(FnStep::new("configure", move |_: &(), ctx: &Context| {
                if fail {
                    return Err(StepError::transient(format!(
                        "install failed on {}",
                        ctx.target_host()
                    )));
                }
                let mut effects = SideEffects::new();
                effects.insert(
                    "joined".to_string(),
                    ctx.get("master.host").unwrap_or("none").to_string(),
                );
                Ok(effects)
            }))
            .build()
    }

    #[test]
    fn empty_fan_out_succeeds() {
        let report = ParallelFanOut::<()>::new(Vec::new()).execute(&(), &Context::new("p"));

        assert!(report.is_success());
        assert!(report.into_result().expect("no tasks").is_empty());
    }

    #[test]
    fn tasks_inherit_parent_values() {
        let parent = Context::new("env").with_value("master.host", "10.0.0.1");
        let tasks = vec![
            FanOutTask::new("w1", "10.0.0.2", node_pipeline(false)),
            FanOutTask::new("w2", "10.0.0.3", node_pipeline(false)),
        ];

        let report = ParallelFanOut::new(tasks).execute(&(), &parent);
        let effects = report.into_result().expect("all tasks succeed");

        assert_eq!(effects.get("w1.joined").map(String::as_str), Some("10.0.0.1"));
        assert_eq!(effects.get("w2.joined").map(String::as_str), Some("10.0.0.1"));
    }

    #[test]
    fn first_failure_in_task_order_is_primary() {
        let tasks = vec![
            FanOutTask::new("w1", "h1", node_pipeline(false)),
            FanOutTask::new("w2", "h2", node_pipeline(true)),
            FanOutTask::new("w3", "h3", node_pipeline(true)),
        ];

        let err = ParallelFanOut::new(tasks)
            .execute(&(), &Context::new("env"))
            .into_result()
            .expect_err("two tasks fail");

        assert_eq!(err.task, "w2");
        assert_eq!(err.failed_tasks(), vec!["w2", "w3"]);
        assert_eq!(err.succeeded, vec!["w1"]);
        assert_eq!(err.side_effects.get("w1.joined").map(String::as_str), Some("none"));
        assert!(err.side_effects.keys().all(|key| key.starts_with("w1.")));
        assert_eq!(err.total, 3);
        assert_eq!(err.kind(), ErrorKind::Transient);
    }

    #[test]
    fn panicking_task_becomes_permanent_failure() {
        let panicking = PipelineBuilder::new("node")
            .first_step(FnStep::new("explode", |_: &(), _: &Context| -> StepResult {
                panic!("node agent crashed")
            }))
            .build();
        let tasks = vec![
            FanOutTask::new("w1", "h1", panicking),
            FanOutTask::new("w2", "h2", node_pipeline(false)),
        ];

        let report = ParallelFanOut::new(tasks).execute(&(), &Context::new("env"));

        assert_eq!(report.failed_tasks(), vec!["w1"]);
        assert_eq!(report.succeeded_tasks(), vec!["w2"]);
        let err = report.into_result().expect_err("w1 panicked");
        assert_eq!(err.kind(), ErrorKind::Permanent);
    }

    #[test]
    fn fan_out_step_reports_failing_task() {
        let step = FanOutStep::new("configure_workers", |_ctx: &Context| {
            Ok(vec![
                FanOutTask::new("worker-1", "h1", node_pipeline(false)),
                FanOutTask::new("worker-2", "h2", node_pipeline(true)),
            ])
        });

        let err = step
            .run(&(), &Context::new("env"))
            .expect_err("worker-2 fails");

        assert_eq!(err.kind(), ErrorKind::Transient);
        assert!(err.message().contains("worker-2"));
        assert!(err.message().contains("1 of 2"));
    }
}
