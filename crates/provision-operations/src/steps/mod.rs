//! Pipeline steps over the provisioning collaborators.

mod cluster;
mod markers;
mod remote;
mod resource;

use std::sync::Arc;

use provision_saga::IdempotencyGuard;

use crate::traits::{RemoteRunner, ResourceProvisioner};

pub use cluster::{LocateClusterStep, configure_workers, worker_step_names};
pub use markers::ClearMarkersStep;
pub use remote::{HostTarget, RemoteCommandStep};
pub use resource::{CreateResourceStep, DeleteResourceStep};

/// Context key holding the environment name; also the remote service user.
pub const ENV_NAME: &str = "env.name";
pub const ENV_KIND: &str = "env.kind";
pub const ENV_CLOUD: &str = "env.cloud";
pub const ENV_REGION: &str = "env.region";
pub const ENV_INSTANCE_SIZE: &str = "env.instance_size";
pub const ENV_WORKER_COUNT: &str = "env.worker_count";
/// Comma-separated library list; absent when none were requested.
pub const ENV_LIBRARIES: &str = "env.libraries";

/// Collaborators shared by every provisioning step.
#[derive(Clone)]
pub struct ProvisionDeps {
    provisioner: Arc<dyn ResourceProvisioner>,
    runner: Arc<dyn RemoteRunner>,
    markers: Arc<dyn IdempotencyGuard>,
}

impl ProvisionDeps {
    #[must_use]
    pub fn new(
        provisioner: Arc<dyn ResourceProvisioner>,
        runner: Arc<dyn RemoteRunner>,
        markers: Arc<dyn IdempotencyGuard>,
    ) -> Self {
        Self {
            provisioner,
            runner,
            markers,
        }
    }

    #[must_use]
    pub fn provisioner(&self) -> &dyn ResourceProvisioner {
        self.provisioner.as_ref()
    }

    #[must_use]
    pub fn runner(&self) -> &dyn RemoteRunner {
        self.runner.as_ref()
    }

    /// Marker store for cloud-level steps, keyed by environment name.
    #[must_use]
    pub fn markers(&self) -> &Arc<dyn IdempotencyGuard> {
        &self.markers
    }
}
