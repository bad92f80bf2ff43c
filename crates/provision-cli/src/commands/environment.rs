use clap::Args;
use provision_core::{CloudProvider, EnvironmentKind, EnvironmentSpec, SizeDefaults};

#[derive(Args, Debug, Clone)]
pub(crate) struct EnvironmentArgs {
    /// Environment kind
    #[arg(long, value_enum)]
    pub kind: EnvironmentKind,

    /// Cloud provider
    #[arg(long, value_enum, default_value_t = CloudProvider::Aws)]
    pub cloud: CloudProvider,

    /// Environment name; prefixes every resource name
    #[arg(long)]
    pub name: String,

    /// Region (default from config)
    #[arg(long)]
    pub region: Option<String>,

    /// Instance size of the notebook or the cluster master
    #[arg(long = "instance-size")]
    pub instance_size: Option<String>,

    /// Number of cluster workers
    #[arg(long, default_value_t = 0)]
    pub workers: usize,

    /// Instance size of cluster workers
    #[arg(long = "worker-size")]
    pub worker_size: Option<String>,

    /// Library to install on a notebook (repeatable)
    #[arg(long = "library", value_name = "LIBRARY")]
    pub libraries: Vec<String>,
}

impl EnvironmentArgs {
    /// Build the spec, filling unset sizes and region from `defaults`.
    pub(crate) fn to_spec(&self, defaults: &SizeDefaults) -> EnvironmentSpec {
        let region = self.region.as_deref().unwrap_or(defaults.region());
        let size = self
            .instance_size
            .as_deref()
            .unwrap_or(defaults.instance_size());

        let spec = match self.kind {
            EnvironmentKind::Notebook => {
                let mut spec = EnvironmentSpec::notebook(&self.name, self.cloud, region, size);
                spec.worker_count = self.workers;
                spec
            }
            EnvironmentKind::Cluster => EnvironmentSpec::cluster(
                &self.name,
                self.cloud,
                region,
                size,
                self.workers,
                self.worker_size
                    .as_deref()
                    .unwrap_or(defaults.worker_size()),
            ),
        };
        spec.with_libraries(self.libraries.clone())
    }
}
