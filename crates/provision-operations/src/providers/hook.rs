use std::path::{Path, PathBuf};
use std::time::Duration;

use provision_saga::StepError;
use tracing::debug;

use super::process::{ProcessCommand, classify_exit, stderr_summary};
use crate::traits::ResourceProvisioner;
use crate::types::{CommandOutput, ResourceRecord, ResourceRef, ResourceRequest, parse_key_values};

/// Exit code of a `lookup` hook for a resource that does not exist.
pub const EXIT_NOT_FOUND: i32 = 3;

/// Provisioner that delegates every cloud call to an executable hook.
///
/// Hooks live at `<hooks_dir>/<cloud>/<verb>-<resource>` (underscores in the
/// resource type become dashes), receive their arguments as `PROVISION_*`
/// environment variables and report results as `key=value` lines on stdout.
#[derive(Debug, Clone)]
pub struct HookProvisioner {
    hooks_dir: PathBuf,
    timeout: Duration,
}

impl HookProvisioner {
    #[must_use]
    pub fn new(hooks_dir: impl Into<PathBuf>, timeout: Duration) -> Self {
        Self {
            hooks_dir: hooks_dir.into(),
            timeout,
        }
    }

    #[must_use]
    pub fn hooks_dir(&self) -> &Path {
        &self.hooks_dir
    }

    #[must_use]
    pub fn hook_path(&self, cloud: &str, verb: &str, resource: &str) -> PathBuf {
        self.hooks_dir
            .join(cloud)
            .join(format!("{verb}-{}", resource.replace('_', "-")))
    }

    fn invoke(
        &self,
        verb: &str,
        cloud: &str,
        resource: &str,
        envs: Vec<(String, String)>,
    ) -> Result<CommandOutput, StepError> {
        let path = self.hook_path(cloud, verb, resource);
        if !path.is_file() {
            return Err(StepError::permanent(format!(
                "no hook for '{verb} {resource}' on {cloud} (expected '{}')",
                path.display()
            )));
        }

        debug!(hook = %path.display(), verb, resource, "running hook");
        let command = envs
            .into_iter()
            .fold(ProcessCommand::new(&path, self.timeout), |cmd, (k, v)| {
                cmd.env(k, v)
            });
        command.run()
    }
}

fn input_var(key: &str) -> String {
    let suffix: String = key
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() {
                c.to_ascii_uppercase()
            } else {
                '_'
            }
        })
        .collect();
    format!("PROVISION_INPUT_{suffix}")
}

fn ref_envs(resource: &ResourceRef) -> Vec<(String, String)> {
    let mut envs = vec![
        ("PROVISION_CLOUD".to_string(), resource.cloud.to_string()),
        ("PROVISION_RESOURCE".to_string(), resource.resource.clone()),
        ("PROVISION_NAME".to_string(), resource.name.clone()),
        ("PROVISION_REGION".to_string(), resource.region.clone()),
    ];
    if let Some(id) = &resource.id {
        envs.push(("PROVISION_ID".to_string(), id.clone()));
    }
    envs
}

fn hook_failure(verb: &str, resource: &str, output: &CommandOutput) -> StepError {
    let code = output
        .exit_code
        .map_or_else(|| "a signal".to_string(), |c| c.to_string());
    StepError::new(
        classify_exit(output.exit_code),
        format!(
            "{verb}-{resource} hook exited with {code}: {}",
            stderr_summary(output)
        ),
    )
}

fn record_from(output: &CommandOutput, fallback_id: Option<&str>) -> Option<ResourceRecord> {
    let mut attributes = parse_key_values(&output.stdout);
    let id = attributes
        .shift_remove("id")
        .or_else(|| fallback_id.map(str::to_string))?;
    Some(ResourceRecord { id, attributes })
}

impl ResourceProvisioner for HookProvisioner {
    fn create(&self, request: &ResourceRequest) -> Result<ResourceRecord, StepError> {
        let mut envs = vec![
            ("PROVISION_CLOUD".to_string(), request.cloud.to_string()),
            ("PROVISION_RESOURCE".to_string(), request.resource.clone()),
            ("PROVISION_NAME".to_string(), request.name.clone()),
            ("PROVISION_REGION".to_string(), request.region.clone()),
        ];
        if let Some(size) = &request.size {
            envs.push(("PROVISION_SIZE".to_string(), size.clone()));
        }
        envs.extend(
            request
                .inputs
                .iter()
                .map(|(key, value)| (input_var(key), value.clone())),
        );

        let cloud = request.cloud.as_str();
        let output = self.invoke("create", cloud, &request.resource, envs)?;
        if !output.success() {
            return Err(hook_failure("create", &request.resource, &output));
        }

        record_from(&output, None).ok_or_else(|| {
            StepError::permanent(format!(
                "create-{} hook for '{}' succeeded but reported no id",
                request.resource, request.name
            ))
        })
    }

    fn delete(&self, resource: &ResourceRef) -> Result<(), StepError> {
        let cloud = resource.cloud.as_str();
        let output = self.invoke("delete", cloud, &resource.resource, ref_envs(resource))?;
        if output.success() {
            Ok(())
        } else {
            Err(hook_failure("delete", &resource.resource, &output))
        }
    }

    fn lookup(&self, resource: &ResourceRef) -> Result<Option<ResourceRecord>, StepError> {
        let cloud = resource.cloud.as_str();
        let output = self.invoke("lookup", cloud, &resource.resource, ref_envs(resource))?;
        match output.exit_code {
            Some(0) => Ok(record_from(&output, Some(&resource.name))),
            Some(EXIT_NOT_FOUND) => Ok(None),
            _ => Err(hook_failure("lookup", &resource.resource, &output)),
        }
    }
}
