use std::sync::Arc;
use std::time::Duration;

use provision_core::{EnvironmentKind, EnvironmentSpec, LifecycleAction, ProvisionConfig};
use provision_saga::{
    Context, FileMarkerGuard, IdempotencyGuard, PipelineBuilder, PipelineError, PipelineReport,
};
use tracing::{info, warn};

use crate::Result;
use crate::error::OperationError;
use crate::plans::{self, PlanStep};
use crate::providers::{HookProvisioner, JsonResultWriter, RemoteMarkerGuard, SshRunner};
use crate::steps::{
    ENV_CLOUD, ENV_INSTANCE_SIZE, ENV_KIND, ENV_LIBRARIES, ENV_NAME, ENV_REGION, ENV_WORKER_COUNT,
    ProvisionDeps,
};
use crate::traits::{RemoteRunner, ResultWriter};
use crate::types::{
    CompensationFailureRecord, ProvisioningOutput, ProvisioningResult, ResourceRef, ResultStatus,
    step_outcomes,
};

const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(600);

/// Runs lifecycle actions on environments as compensating pipelines.
///
/// Every call builds a fresh pipeline from the plan for (action, kind). A
/// result record is written for every pipeline that reached a terminal
/// state, whether it completed or rolled back.
pub struct ProvisioningOrchestrator {
    deps: ProvisionDeps,
    node_markers: Arc<dyn IdempotencyGuard>,
    writer: Arc<dyn ResultWriter>,
    step_timeout: Duration,
}

impl ProvisioningOrchestrator {
    /// `deps.markers()` keeps markers of environment-level steps;
    /// `node_markers` keeps markers of steps that run on a host, keyed by host.
    #[must_use]
    pub fn new(
        deps: ProvisionDeps,
        node_markers: Arc<dyn IdempotencyGuard>,
        writer: Arc<dyn ResultWriter>,
    ) -> Self {
        Self {
            deps,
            node_markers,
            writer,
            step_timeout: DEFAULT_STEP_TIMEOUT,
        }
    }

    /// Hook scripts for the cloud, `ssh` for hosts, TOML markers on disk and
    /// markers under the configured directory on each host.
    #[must_use]
    pub fn from_config(config: &ProvisionConfig) -> Self {
        let timeout = config.step_timeout();
        let runner: Arc<dyn RemoteRunner> = Arc::new(SshRunner::from_config(config.ssh()));
        let node_markers = Arc::new(RemoteMarkerGuard::new(
            Arc::clone(&runner),
            config.ssh().marker_dir(),
            timeout,
        ));
        let deps = ProvisionDeps::new(
            Arc::new(HookProvisioner::new(config.hooks_dir(), timeout)),
            runner,
            Arc::new(FileMarkerGuard::new(config.marker_dir())),
        );

        Self::new(
            deps,
            node_markers,
            Arc::new(JsonResultWriter::new(config.result_file())),
        )
        .with_step_timeout(timeout)
    }

    #[must_use]
    pub fn with_step_timeout(mut self, timeout: Duration) -> Self {
        self.step_timeout = timeout;
        self
    }

    /// Dispatch on `action`.
    ///
    /// # Errors
    ///
    /// See the individual actions.
    pub fn run(&self, action: LifecycleAction, spec: &EnvironmentSpec) -> Result<ProvisioningOutput> {
        match action {
            LifecycleAction::Create => self.create_environment(spec),
            LifecycleAction::Configure => self.configure_environment(spec),
            LifecycleAction::Terminate => self.terminate_environment(spec),
        }
    }

    /// Create the environment's cloud resources. Re-running after a partial
    /// success skips resources whose markers are present.
    ///
    /// # Errors
    ///
    /// Returns an error for an invalid spec, a rolled-back pipeline
    /// (`SagaFailed` or `SagaCompensationFailed`), or an unwritable result.
    pub fn create_environment(&self, spec: &EnvironmentSpec) -> Result<ProvisioningOutput> {
        spec.validate()?;
        self.execute(
            LifecycleAction::Create,
            spec,
            seed(spec, &spec.name),
            Some(Arc::clone(self.deps.markers())),
            plans::create_steps(spec),
        )
    }

    /// Configure a created environment; clusters go through [`Self::configure_cluster`].
    ///
    /// # Errors
    ///
    /// Returns an error if the notebook instance cannot be found, in addition
    /// to the errors of [`Self::create_environment`].
    pub fn configure_environment(&self, spec: &EnvironmentSpec) -> Result<ProvisioningOutput> {
        spec.validate()?;
        match spec.kind {
            EnvironmentKind::Notebook => self.configure_notebook(spec),
            EnvironmentKind::Cluster => self.configure_cluster(spec),
        }
    }

    /// Configure the master, then every worker in parallel. If any node fails
    /// the whole cluster is deleted.
    ///
    /// # Errors
    ///
    /// Same as [`Self::create_environment`].
    pub fn configure_cluster(&self, spec: &EnvironmentSpec) -> Result<ProvisioningOutput> {
        spec.validate()?;
        self.execute(
            LifecycleAction::Configure,
            spec,
            seed(spec, &spec.name),
            Some(Arc::clone(self.deps.markers())),
            plans::configure_cluster_steps(spec, Arc::clone(&self.node_markers), self.step_timeout),
        )
    }

    /// Delete every resource of the environment and forget its markers.
    /// Resources that are already gone count as deleted.
    ///
    /// # Errors
    ///
    /// Same as [`Self::create_environment`].
    pub fn terminate_environment(&self, spec: &EnvironmentSpec) -> Result<ProvisioningOutput> {
        spec.validate()?;
        self.execute(
            LifecycleAction::Terminate,
            spec,
            seed(spec, &spec.name),
            None,
            plans::terminate_steps(spec),
        )
    }

    fn configure_notebook(&self, spec: &EnvironmentSpec) -> Result<ProvisioningOutput> {
        let host = self.notebook_host(spec)?;
        self.execute(
            LifecycleAction::Configure,
            spec,
            seed(spec, &host),
            Some(Arc::clone(&self.node_markers)),
            plans::configure_notebook_steps(spec, self.step_timeout),
        )
    }

    fn notebook_host(&self, spec: &EnvironmentSpec) -> Result<String> {
        let name = spec.resource_name("instance");
        let instance = ResourceRef {
            cloud: spec.cloud,
            resource: "instance".to_string(),
            name: name.clone(),
            region: spec.region.clone(),
            id: None,
        };

        let record = self
            .deps
            .provisioner()
            .lookup(&instance)
            .map_err(|source| OperationError::Lookup {
                name: name.clone(),
                source,
            })?
            .ok_or_else(|| OperationError::NotProvisioned { name: name.clone() })?;

        record
            .attribute("host")
            .map(str::to_string)
            .ok_or(OperationError::MissingHost { name })
    }

    fn execute(
        &self,
        action: LifecycleAction,
        spec: &EnvironmentSpec,
        ctx: Context,
        guard: Option<Arc<dyn IdempotencyGuard>>,
        steps: Vec<PlanStep>,
    ) -> Result<ProvisioningOutput> {
        let name = format!("{action}-{}", spec.kind);
        let mut builder = PipelineBuilder::from_steps(name.clone(), steps)
            .ok_or_else(|| OperationError::EmptyPlan {
                pipeline: name.clone(),
            })?;
        if let Some(guard) = guard {
            builder = builder.with_guard(guard);
        }

        info!(
            environment = %spec.name,
            pipeline = %name,
            target = ctx.target_host(),
            "starting pipeline"
        );
        let report = builder.build().run(&self.deps, ctx);
        self.finish(action, spec, report)
    }

    fn finish(
        &self,
        action: LifecycleAction,
        spec: &EnvironmentSpec,
        report: PipelineReport,
    ) -> Result<ProvisioningOutput> {
        let resources: indexmap::IndexMap<String, String> = report
            .context
            .snapshot()
            .into_iter()
            .filter(|(key, _)| !key.starts_with("env."))
            .collect();
        let steps = step_outcomes(&report.audit);

        let mut result = ProvisioningResult {
            environment: spec.name.clone(),
            action,
            kind: spec.kind,
            cloud: spec.cloud,
            status: ResultStatus::Completed,
            failed_step: None,
            error_kind: None,
            error_message: None,
            rolled_back: Vec::new(),
            compensation_failures: Vec::new(),
            resources: resources.clone(),
            steps: steps.clone(),
            finished_at: chrono::Utc::now().to_rfc3339(),
        };

        match report.result {
            Ok(()) => {
                self.writer.write(&result)?;
                info!(environment = %spec.name, %action, "environment {action} completed");
                Ok(ProvisioningOutput {
                    environment: spec.name.clone(),
                    action,
                    resources,
                    steps,
                })
            }
            Err(err) => {
                record_failure(&mut result, &err);
                if let Err(write_err) = self.writer.write(&result) {
                    warn!(
                        environment = %spec.name,
                        error = %write_err,
                        "could not write result after a failed {action}"
                    );
                }
                warn!(
                    environment = %spec.name,
                    step = err.failed_step(),
                    kind = %err.kind(),
                    intervention = err.requires_intervention(),
                    "environment {action} rolled back"
                );
                Err(err.into())
            }
        }
    }
}

fn record_failure(result: &mut ProvisioningResult, err: &PipelineError) {
    result.status = if err.requires_intervention() {
        ResultStatus::RollbackIncomplete
    } else {
        ResultStatus::RolledBack
    };
    result.failed_step = Some(err.failed_step().to_string());
    result.error_kind = Some(err.kind());
    result.error_message = Some(err.step_error().message().to_string());
    result.rolled_back = err.rolled_back().to_vec();
    result.compensation_failures = err
        .compensation_errors()
        .iter()
        .map(|failure| CompensationFailureRecord {
            step: failure.step.clone(),
            message: failure.error.to_string(),
        })
        .collect();

    if let Some(fan_out) = err.step_error().fan_out() {
        result.compensation_failures.extend(fan_out.compensation_errors().into_iter().map(
            |(task, failure)| CompensationFailureRecord {
                step: format!("{task}/{}", failure.step),
                message: failure.error.to_string(),
            },
        ));
        result.resources.extend(
            fan_out
                .side_effects
                .iter()
                .map(|(key, value)| (key.clone(), value.clone())),
        );
    }
}

/// Context for one run: the environment spec under `env.*`.
fn seed(spec: &EnvironmentSpec, target: &str) -> Context {
    let mut ctx = Context::new(target)
        .with_value(ENV_NAME, spec.name.as_str())
        .with_value(ENV_KIND, spec.kind.as_str())
        .with_value(ENV_CLOUD, spec.cloud.as_str())
        .with_value(ENV_REGION, spec.region.as_str())
        .with_value(ENV_INSTANCE_SIZE, spec.instance_size.as_str())
        .with_value(ENV_WORKER_COUNT, spec.worker_count.to_string());
    if !spec.libraries.is_empty() {
        ctx.insert(ENV_LIBRARIES, spec.libraries.join(","));
    }
    ctx
}

#[cfg(test)]
mod tests {
    use provision_core::CloudProvider;
    use provision_saga::{ErrorKind, InMemoryGuard, MarkerKey};

    use super::*;
    use crate::mocks::{MockProvisioner, MockRemoteRunner, MockResultWriter};

    struct Fixture {
        provisioner: Arc<MockProvisioner>,
        runner: Arc<MockRemoteRunner>,
        markers: Arc<InMemoryGuard>,
        writer: Arc<MockResultWriter>,
    }

    impl Fixture {
        fn new(provisioner: MockProvisioner, runner: MockRemoteRunner) -> Self {
            Self {
                provisioner: Arc::new(provisioner),
                runner: Arc::new(runner),
                markers: Arc::new(InMemoryGuard::new()),
                writer: Arc::new(MockResultWriter::new()),
            }
        }

        fn orchestrator(&self) -> ProvisioningOrchestrator {
            let deps = ProvisionDeps::new(
                self.provisioner.clone(),
                self.runner.clone(),
                self.markers.clone(),
            );
            ProvisioningOrchestrator::new(deps, Arc::new(InMemoryGuard::new()), self.writer.clone())
        }
    }

    fn notebook() -> EnvironmentSpec {
        EnvironmentSpec::notebook("lab", CloudProvider::Aws, "us-west-2", "t2.medium")
    }

    #[test]
    fn create_records_resources_and_result() {
        let fixture = Fixture::new(MockProvisioner::new(), MockRemoteRunner::new());

        let output = fixture
            .orchestrator()
            .create_environment(&notebook())
            .expect("create succeeds");

        assert_eq!(output.resources.get("subnet.id").map(String::as_str), Some("id-lab-subnet"));
        assert!(output.resources.contains_key("instance.host"));
        assert!(!output.resources.contains_key("env.name"));
        let result = fixture.writer.last().expect("result written");
        assert_eq!(result.status, ResultStatus::Completed);
        assert_eq!(result.steps.len(), 4);
        assert!(fixture.markers.is_marked(&MarkerKey::new("lab", "create_instance")));
    }

    #[test]
    fn failed_create_rolls_back_and_writes_result() {
        let fixture = Fixture::new(
            MockProvisioner::new().fail_create("lab-instance", ErrorKind::Transient),
            MockRemoteRunner::new(),
        );

        let err = fixture
            .orchestrator()
            .create_environment(&notebook())
            .expect_err("instance fails");

        assert!(matches!(err, OperationError::SagaFailed { ref step, .. } if step == "create_instance"));
        let result = fixture.writer.last().expect("result written");
        assert_eq!(result.status, ResultStatus::RolledBack);
        assert_eq!(result.error_kind, Some(ErrorKind::Transient));
        assert_eq!(
            result.rolled_back,
            vec!["create_iam_role", "create_security_group", "create_subnet"]
        );
        assert!(!fixture.provisioner.exists("lab-subnet"));
        assert!(fixture.markers.is_empty());
    }

    #[test]
    fn failed_compensation_is_flagged() {
        let fixture = Fixture::new(
            MockProvisioner::new()
                .fail_create("lab-instance", ErrorKind::Permanent)
                .fail_delete("lab-subnet", ErrorKind::Transient),
            MockRemoteRunner::new(),
        );

        let err = fixture
            .orchestrator()
            .create_environment(&notebook())
            .expect_err("instance fails");

        assert!(err.requires_intervention());
        let result = fixture.writer.last().expect("result written");
        assert_eq!(result.status, ResultStatus::RollbackIncomplete);
        assert_eq!(result.compensation_failures[0].step, "create_subnet");
    }

    #[test]
    fn invalid_spec_runs_nothing() {
        let fixture = Fixture::new(MockProvisioner::new(), MockRemoteRunner::new());
        let spec = EnvironmentSpec::notebook("Bad Name", CloudProvider::Aws, "us-west-2", "t2.small");

        let err = fixture
            .orchestrator()
            .create_environment(&spec)
            .expect_err("invalid name");

        assert!(matches!(err, OperationError::Core(_)));
        assert!(fixture.provisioner.calls().is_empty());
        assert!(fixture.writer.last().is_none());
    }

    #[test]
    fn configure_notebook_runs_on_instance_host() {
        let fixture = Fixture::new(
            MockProvisioner::new().with_existing("lab-instance", "10.0.0.42"),
            MockRemoteRunner::new(),
        );
        let spec = notebook().with_libraries(vec!["pandas".to_string(), "numpy".to_string()]);

        let output = fixture
            .orchestrator()
            .configure_environment(&spec)
            .expect("configure succeeds");

        let commands = fixture.runner.commands_on("10.0.0.42");
        assert_eq!(commands.len(), 4);
        assert!(commands[0].contains("useradd --create-home --shell /bin/bash lab"));
        assert!(commands[2].contains("pip install --user pandas numpy"));
        assert!(commands[3].contains("jupyter-notebook"));
        assert_eq!(output.steps.len(), 4);
    }

    #[test]
    fn configure_notebook_requires_created_instance() {
        let fixture = Fixture::new(MockProvisioner::new(), MockRemoteRunner::new());

        let err = fixture
            .orchestrator()
            .configure_environment(&notebook())
            .expect_err("no instance");

        assert!(matches!(err, OperationError::NotProvisioned { ref name } if name == "lab-instance"));
        assert!(fixture.runner.calls().is_empty());
    }

    #[test]
    fn terminate_deletes_in_reverse_and_clears_markers() {
        let fixture = Fixture::new(MockProvisioner::new(), MockRemoteRunner::new());
        let orchestrator = fixture.orchestrator();
        orchestrator.create_environment(&notebook()).expect("create succeeds");

        orchestrator
            .terminate_environment(&notebook())
            .expect("terminate succeeds");

        let deletes: Vec<String> = fixture
            .provisioner
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("delete"))
            .collect();
        assert_eq!(
            deletes,
            vec![
                "delete lab-instance",
                "delete lab-iam-role",
                "delete lab-security-group",
                "delete lab-subnet",
            ]
        );
        assert!(fixture.markers.is_empty());
        assert_eq!(
            fixture.writer.last().map(|r| r.action),
            Some(LifecycleAction::Terminate)
        );
    }
}
