use std::path::Path;

use provision_core::{EnvironmentKind, EnvironmentSpec, LifecycleAction, ProvisionConfig};
use provision_operations::ProvisioningOrchestrator;
use provision_operations::plans;
use provision_operations::steps::worker_step_names;
use tracing::debug;

use super::{EnvironmentArgs, GlobalOptions};
use crate::error::{CliError, Result};
use crate::output;

pub(super) fn run(
    action: LifecycleAction,
    args: &EnvironmentArgs,
    options: &GlobalOptions,
) -> Result<()> {
    let config = load_config(options)?;
    let spec = args.to_spec(config.defaults());
    spec.validate()?;

    if options.dry_run {
        print_plan(action, &spec);
        return Ok(());
    }

    debug!(
        hooks = %config.hooks_dir().display(),
        markers = %config.marker_dir().display(),
        "running {action} for {}",
        spec.name
    );
    let output = ProvisioningOrchestrator::from_config(&config).run(action, &spec)?;
    output::print_success(&output, config.result_file());
    Ok(())
}

fn load_config(options: &GlobalOptions) -> Result<ProvisionConfig> {
    let config = if let Some(path) = &options.config {
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        ProvisionConfig::load(path)?.relative_to(base)
    } else {
        let cwd = std::env::current_dir().map_err(CliError::CurrentDir)?;
        ProvisionConfig::discover(&cwd)?.relative_to(&cwd)
    };

    Ok(match &options.result_file {
        Some(path) => config.with_result_file(path.clone()),
        None => config,
    })
}

fn print_plan(action: LifecycleAction, spec: &EnvironmentSpec) {
    println!("{action} {} '{}' would run:", spec.kind, spec.name);
    for step in plans::plan(action, spec) {
        println!("  {step}");
        if step == "configure_workers" && spec.kind == EnvironmentKind::Cluster {
            for worker in 1..=spec.worker_count {
                println!("    worker-{worker}: {}", worker_step_names().join(", "));
            }
        }
    }
}
