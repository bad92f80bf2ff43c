use provision_saga::{Context, SideEffects, Step, StepError, StepResult};
use tracing::debug;

use super::ProvisionDeps;

/// Forgets every completion marker of the given targets, so the next
/// `create` starts from scratch.
#[derive(Debug, Clone)]
pub struct ClearMarkersStep {
    targets: Vec<String>,
}

impl ClearMarkersStep {
    #[must_use]
    pub fn new(targets: Vec<String>) -> Self {
        Self { targets }
    }
}

impl Step for ClearMarkersStep {
    type Deps = ProvisionDeps;

    fn name(&self) -> &'static str {
        "clear_markers"
    }

    fn run(&self, deps: &ProvisionDeps, _ctx: &Context) -> StepResult {
        for target in &self.targets {
            deps.markers().clear_target(target).map_err(|e| {
                StepError::transient(format!("could not clear markers of '{target}'")).with_cause(e)
            })?;
            debug!(target = %target, "markers cleared");
        }

        let mut effects = SideEffects::new();
        effects.insert("markers.cleared".to_string(), self.targets.join(","));
        Ok(effects)
    }

    fn compensation_description(&self) -> String {
        "nothing: cleared markers are not restored".to_string()
    }
}
