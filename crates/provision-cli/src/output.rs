use std::path::Path;

use provision_operations::OperationError;
use provision_operations::types::ProvisioningOutput;

use crate::error::CliError;

pub(crate) fn print_success(output: &ProvisioningOutput, result_file: &Path) {
    println!("{} '{}' completed", output.action, output.environment);

    let skipped = output.skipped_steps();
    let ran = output.steps.len() - skipped.len();
    println!("  {ran} step(s) ran, {} skipped", skipped.len());
    for step in skipped {
        println!("  skipped {step} (already done)");
    }
    println!("  result written to {}", result_file.display());
}

/// Rollback details that the error chain alone does not carry.
pub(crate) fn print_rollback_summary(error: &CliError) {
    let CliError::Operation(error) = error else {
        return;
    };

    match error {
        OperationError::SagaFailed { rolled_back, .. } => print_rolled_back(rolled_back),
        OperationError::SagaCompensationFailed {
            rolled_back,
            compensation_failures,
            ..
        } => {
            print_rolled_back(rolled_back);
            eprintln!("compensations that failed (manual cleanup needed):");
            for failure in compensation_failures {
                eprintln!(
                    "  {}: {}: {}",
                    failure.step, failure.description, failure.error
                );
            }
        }
        _ => {}
    }
}

fn print_rolled_back(steps: &[String]) {
    if steps.is_empty() {
        eprintln!("nothing to roll back");
        return;
    }
    eprintln!("rolled back:");
    for step in steps {
        eprintln!("  {step}");
    }
}
