use std::sync::Arc;
use std::time::Duration;

use provision_core::CloudProvider;
use provision_saga::{
    Context, ErrorKind, FanOutStep, FanOutTask, IdempotencyGuard, MarkerKey, PipelineBuilder,
    SideEffects, Step, StepError, StepResult,
};
use tracing::warn;

use super::remote::{HostTarget, RemoteCommandStep};
use super::{ENV_NAME, ProvisionDeps};
use crate::commands;
use crate::types::ResourceRef;

/// Finds the master and worker nodes of an existing cluster.
///
/// Records `master.host`, `master.id`, `worker_{i}.host` and `worker_{i}.id`.
/// Its compensation tears the whole cluster down: a cluster whose
/// configuration failed half way is not left running. Every node it deletes
/// also loses its `create_{key}` marker, so a later create builds it again.
#[derive(Debug, Clone)]
pub struct LocateClusterStep {
    cloud: CloudProvider,
    region: String,
    master: String,
    workers: Vec<String>,
}

impl LocateClusterStep {
    #[must_use]
    pub fn new(
        cloud: CloudProvider,
        region: impl Into<String>,
        master: impl Into<String>,
        workers: Vec<String>,
    ) -> Self {
        Self {
            cloud,
            region: region.into(),
            master: master.into(),
            workers,
        }
    }

    fn reference(&self, name: &str, id: Option<&str>) -> ResourceRef {
        ResourceRef {
            cloud: self.cloud,
            resource: "instance".to_string(),
            name: name.to_string(),
            region: self.region.clone(),
            id: id.map(str::to_string),
        }
    }

    /// `(context key, resource name)` for every node, master first.
    fn nodes(&self) -> Vec<(String, &str)> {
        std::iter::once(("master".to_string(), self.master.as_str()))
            .chain(
                self.workers
                    .iter()
                    .enumerate()
                    .map(|(i, name)| (format!("worker_{}", i + 1), name.as_str())),
            )
            .collect()
    }
}

impl Step for LocateClusterStep {
    type Deps = ProvisionDeps;

    fn name(&self) -> &'static str {
        "locate_cluster"
    }

    fn run(&self, deps: &ProvisionDeps, _ctx: &Context) -> StepResult {
        let mut effects = SideEffects::new();
        for (key, name) in self.nodes() {
            let record = deps
                .provisioner()
                .lookup(&self.reference(name, None))?
                .ok_or_else(|| {
                    StepError::dependency_unavailable(format!("cluster node '{name}' does not exist"))
                })?;
            let host = record.attribute("host").ok_or_else(|| {
                StepError::dependency_unavailable(format!("cluster node '{name}' has no host address"))
            })?;
            effects.insert(format!("{key}.host"), host.to_string());
            effects.insert(format!("{key}.id"), record.id.clone());
        }
        Ok(effects)
    }

    fn compensate(&self, deps: &ProvisionDeps, ctx: &Context) -> Result<(), StepError> {
        let env = ctx.get(ENV_NAME).unwrap_or(ctx.target_host());
        let nodes = self.nodes();
        let total = nodes.len();
        let mut failures: Vec<(String, StepError)> = Vec::new();

        // workers before the master they are attached to
        for (key, name) in nodes.into_iter().rev() {
            let id = ctx.get(&format!("{key}.id"));
            if let Err(err) = deps.provisioner().delete(&self.reference(name, id)) {
                warn!(node = name, kind = %err.kind(), error = %err, "failed to delete cluster node");
                failures.push((name.to_string(), err));
                continue;
            }
            let marker = MarkerKey::new(env, format!("create_{key}"));
            if let Err(err) = deps.markers().clear(&marker) {
                warn!(node = name, marker = %marker, error = %err, "failed to clear creation marker");
                failures.push((
                    name.to_string(),
                    StepError::transient(format!("could not clear marker '{marker}'")).with_cause(err),
                ));
            }
        }

        let Some((first, first_err)) = failures.first() else {
            return Ok(());
        };
        Err(StepError::new(
            first_err.kind(),
            format!(
                "failed to delete {} of {total} cluster node(s); first: '{first}': {}",
                failures.len(),
                first_err.message()
            ),
        ))
    }

    fn compensation_description(&self) -> String {
        format!(
            "delete cluster '{}' and its {} worker(s)",
            self.master,
            self.workers.len()
        )
    }
}

/// Configure every worker node concurrently: one sub-pipeline per worker,
/// each guarded by markers on the worker itself.
///
/// Requires `master.host` and `worker_{i}.host` in the parent context.
#[must_use]
pub fn configure_workers(
    worker_count: usize,
    guard: Arc<dyn IdempotencyGuard>,
    timeout: Duration,
) -> FanOutStep<ProvisionDeps> {
    FanOutStep::new("configure_workers", move |ctx: &Context| {
        let master_host = ctx.require("master.host")?.to_string();
        (1..=worker_count)
            .map(|i| -> Result<FanOutTask<ProvisionDeps>, StepError> {
                let host = ctx.require(&format!("worker_{i}.host"))?;
                let pipeline = worker_pipeline(i, &master_host, Arc::clone(&guard), timeout);
                Ok(FanOutTask::new(format!("worker-{i}"), host, pipeline))
            })
            .collect()
    })
    .with_compensation("detach every worker from the master", move |deps, ctx| {
        detach_workers(deps, ctx, worker_count, timeout)
    })
}

/// Step names of one worker's sub-pipeline.
#[must_use]
pub fn worker_step_names() -> Vec<&'static str> {
    vec!["ensure_user", "install_prerequisites", "join_master"]
}

fn worker_pipeline(
    index: usize,
    master_host: &str,
    guard: Arc<dyn IdempotencyGuard>,
    timeout: Duration,
) -> provision_saga::Pipeline<ProvisionDeps> {
    let join = commands::join_master(master_host);
    PipelineBuilder::new(format!("configure-worker-{index}"))
        .with_guard(guard)
        .first_step(RemoteCommandStep::ensure_user("ensure_user", HostTarget::Target, timeout))
        .then(RemoteCommandStep::install_prerequisites(
            "install_prerequisites",
            HostTarget::Target,
            timeout,
        ))
        .then(
            RemoteCommandStep::new("join_master", HostTarget::Target, timeout, move |_| {
                Ok(join.clone())
            })
            .with_undo("detach the worker from the master", |_| {
                Ok(commands::leave_master())
            }),
        )
        .build()
}

fn detach_workers(
    deps: &ProvisionDeps,
    ctx: &Context,
    worker_count: usize,
    timeout: Duration,
) -> Result<(), StepError> {
    let mut first_failure = None;
    for i in 1..=worker_count {
        let Some(host) = ctx.get(&format!("worker_{i}.host")) else {
            continue;
        };
        let outcome = deps
            .runner()
            .execute(host, &commands::leave_master(), timeout)
            .and_then(|output| {
                if output.success() {
                    Ok(())
                } else {
                    Err(StepError::new(
                        ErrorKind::Permanent,
                        format!("could not detach worker {host} from the master"),
                    ))
                }
            });
        if let Err(err) = outcome {
            warn!(host, error = %err, "failed to detach worker");
            if first_failure.is_none() {
                first_failure = Some(err);
            }
        }
    }
    first_failure.map_or(Ok(()), Err)
}
