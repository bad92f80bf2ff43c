//! Ordered step lists per (action, environment kind).

use std::sync::Arc;
use std::time::Duration;

use provision_core::{EnvironmentKind, EnvironmentSpec, LifecycleAction};
use provision_saga::{IdempotencyGuard, InMemoryGuard, Step};

use crate::commands::{self, MASTER_SERVICE, NOTEBOOK_SERVICE};
use crate::steps::{
    ClearMarkersStep, CreateResourceStep, ENV_LIBRARIES, ENV_NAME, HostTarget, LocateClusterStep,
    ProvisionDeps, RemoteCommandStep, configure_workers,
};

pub type PlanStep = Arc<dyn Step<Deps = ProvisionDeps>>;

const MASTER_HOST: &str = "master.host";

/// Resource steps of `create`, in creation order.
#[must_use]
pub fn resource_steps(spec: &EnvironmentSpec) -> Vec<CreateResourceStep> {
    let cloud = spec.cloud;
    let region = spec.region.as_str();
    let resource = |key: &str| {
        let name = spec.resource_name(&key.replace('_', "-"));
        CreateResourceStep::new(key, key, name, cloud, region)
    };

    let mut steps = vec![
        resource("subnet"),
        resource("security_group").requires("subnet.id"),
    ];
    match spec.kind {
        EnvironmentKind::Notebook => {
            steps.push(resource("iam_role"));
            steps.push(
                resource("instance")
                    .with_size(&spec.instance_size)
                    .requires("subnet.id")
                    .requires("security_group.id")
                    .requires("iam_role.id"),
            );
        }
        EnvironmentKind::Cluster => {
            steps.push(resource("bucket"));
            steps.push(
                CreateResourceStep::new("master", "instance", spec.master_name(), cloud, region)
                    .with_size(&spec.instance_size)
                    .with_param("role", "master")
                    .requires("subnet.id")
                    .requires("security_group.id"),
            );
            for i in 1..=spec.worker_count {
                steps.push(
                    CreateResourceStep::new(
                        format!("worker_{i}"),
                        "instance",
                        spec.worker_name(i),
                        cloud,
                        region,
                    )
                    .with_size(spec.worker_size())
                    .with_param("role", "worker")
                    .requires("subnet.id")
                    .requires("security_group.id"),
                );
            }
        }
    }
    steps
}

#[must_use]
pub fn create_steps(spec: &EnvironmentSpec) -> Vec<PlanStep> {
    resource_steps(spec)
        .into_iter()
        .map(|step| Arc::new(step) as PlanStep)
        .collect()
}

/// Deletes in reverse creation order, then forgets the environment's markers.
#[must_use]
pub fn terminate_steps(spec: &EnvironmentSpec) -> Vec<PlanStep> {
    let mut steps: Vec<PlanStep> = resource_steps(spec)
        .iter()
        .rev()
        .map(|step| Arc::new(step.teardown()) as PlanStep)
        .collect();
    steps.push(Arc::new(ClearMarkersStep::new(vec![spec.name.clone()])));
    steps
}

/// Runs on the notebook host itself.
#[must_use]
pub fn configure_notebook_steps(spec: &EnvironmentSpec, timeout: Duration) -> Vec<PlanStep> {
    let mut steps: Vec<PlanStep> = vec![
        Arc::new(RemoteCommandStep::ensure_user("ensure_user", HostTarget::Target, timeout)),
        Arc::new(RemoteCommandStep::install_prerequisites(
            "install_prerequisites",
            HostTarget::Target,
            timeout,
        )),
    ];
    if !spec.libraries.is_empty() {
        steps.push(Arc::new(
            RemoteCommandStep::new("install_libraries", HostTarget::Target, timeout, |ctx| {
                let libs = libraries(ctx.require(ENV_LIBRARIES)?);
                Ok(commands::install_libraries(ctx.require(ENV_NAME)?, &libs))
            })
            .with_undo("uninstall the requested libraries", |ctx| {
                let libs = libraries(ctx.require(ENV_LIBRARIES)?);
                Ok(commands::uninstall_libraries(ctx.require(ENV_NAME)?, &libs))
            }),
        ));
    }
    steps.push(Arc::new(service_step(
        "configure_service",
        HostTarget::Target,
        NOTEBOOK_SERVICE,
        timeout,
    )));
    steps
}

/// Runs against the environment; node work happens on the hosts that
/// `locate_cluster` finds.
#[must_use]
pub fn configure_cluster_steps(
    spec: &EnvironmentSpec,
    node_markers: Arc<dyn IdempotencyGuard>,
    timeout: Duration,
) -> Vec<PlanStep> {
    let master = || HostTarget::ContextKey(MASTER_HOST.to_string());
    vec![
        Arc::new(LocateClusterStep::new(
            spec.cloud,
            spec.region.clone(),
            spec.master_name(),
            spec.worker_names(),
        )),
        Arc::new(RemoteCommandStep::ensure_user("master_ensure_user", master(), timeout)),
        Arc::new(RemoteCommandStep::install_prerequisites(
            "master_install_prerequisites",
            master(),
            timeout,
        )),
        Arc::new(service_step("start_master", master(), MASTER_SERVICE, timeout)),
        Arc::new(configure_workers(spec.worker_count, node_markers, timeout)),
    ]
}

/// Top-level step names for `action`, without running anything.
#[must_use]
pub fn plan(action: LifecycleAction, spec: &EnvironmentSpec) -> Vec<String> {
    let timeout = Duration::from_secs(1);
    let steps = match (action, spec.kind) {
        (LifecycleAction::Create, _) => create_steps(spec),
        (LifecycleAction::Configure, EnvironmentKind::Notebook) => {
            configure_notebook_steps(spec, timeout)
        }
        (LifecycleAction::Configure, EnvironmentKind::Cluster) => {
            configure_cluster_steps(spec, Arc::new(InMemoryGuard::new()), timeout)
        }
        (LifecycleAction::Terminate, _) => terminate_steps(spec),
    };
    steps.iter().map(|step| step.name().to_string()).collect()
}

fn service_step(
    name: &str,
    host: HostTarget,
    service: &'static str,
    timeout: Duration,
) -> RemoteCommandStep {
    RemoteCommandStep::new(name, host, timeout, move |_| Ok(commands::start_service(service)))
        .with_undo(format!("stop {service}"), move |_| Ok(commands::stop_service(service)))
}

fn libraries(joined: &str) -> Vec<String> {
    joined
        .split(',')
        .map(str::trim)
        .filter(|lib| !lib.is_empty())
        .map(str::to_string)
        .collect()
}

#[cfg(test)]
mod tests {
    use provision_core::CloudProvider;

    use super::*;

    fn notebook() -> EnvironmentSpec {
        EnvironmentSpec::notebook("lab", CloudProvider::Aws, "us-west-2", "t2.medium")
    }

    fn cluster(workers: usize) -> EnvironmentSpec {
        EnvironmentSpec::cluster(
            "spark",
            CloudProvider::Gcp,
            "europe-west1",
            "n2-standard-4",
            workers,
            "n2-standard-2",
        )
    }

    #[test]
    fn create_notebook_plan() {
        assert_eq!(
            plan(LifecycleAction::Create, &notebook()),
            vec!["create_subnet", "create_security_group", "create_iam_role", "create_instance"]
        );
    }

    #[test]
    fn create_cluster_plan_has_one_step_per_worker() {
        assert_eq!(
            plan(LifecycleAction::Create, &cluster(2)),
            vec![
                "create_subnet",
                "create_security_group",
                "create_bucket",
                "create_master",
                "create_worker_1",
                "create_worker_2",
            ]
        );
    }

    #[test]
    fn terminate_reverses_creation_and_clears_markers() {
        assert_eq!(
            plan(LifecycleAction::Terminate, &cluster(1)),
            vec![
                "delete_worker_1",
                "delete_master",
                "delete_bucket",
                "delete_security_group",
                "delete_subnet",
                "clear_markers",
            ]
        );
    }

    #[test]
    fn libraries_step_only_when_requested() {
        let without = plan(LifecycleAction::Configure, &notebook());
        let with = plan(
            LifecycleAction::Configure,
            &notebook().with_libraries(vec!["pandas".to_string()]),
        );

        assert!(!without.contains(&"install_libraries".to_string()));
        assert_eq!(
            with,
            vec!["ensure_user", "install_prerequisites", "install_libraries", "configure_service"]
        );
    }

    #[test]
    fn configure_cluster_locates_before_touching_nodes() {
        assert_eq!(
            plan(LifecycleAction::Configure, &cluster(3)),
            vec![
                "locate_cluster",
                "master_ensure_user",
                "master_install_prerequisites",
                "start_master",
                "configure_workers",
            ]
        );
    }

    #[test]
    fn library_list_ignores_blanks() {
        assert_eq!(libraries("numpy, ,pandas"), vec!["numpy", "pandas"]);
    }
}
