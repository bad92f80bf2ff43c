mod environment;
mod lifecycle;

use std::path::PathBuf;

use clap::Subcommand;
use provision_core::LifecycleAction;

use crate::error::Result;

pub(crate) use environment::EnvironmentArgs;

/// Options shared by every subcommand.
pub(crate) struct GlobalOptions {
    pub config: Option<PathBuf>,
    pub result_file: Option<PathBuf>,
    pub dry_run: bool,
}

#[derive(Subcommand)]
pub(crate) enum Commands {
    /// Create the cloud resources of an environment
    Create(EnvironmentArgs),
    /// Configure the hosts of a created environment
    Configure(EnvironmentArgs),
    /// Delete every resource of an environment
    Terminate(EnvironmentArgs),
}

impl Commands {
    pub(crate) fn execute(self, options: &GlobalOptions) -> Result<()> {
        match self {
            Self::Create(args) => lifecycle::run(LifecycleAction::Create, &args, options),
            Self::Configure(args) => lifecycle::run(LifecycleAction::Configure, &args, options),
            Self::Terminate(args) => lifecycle::run(LifecycleAction::Terminate, &args, options),
        }
    }
}
