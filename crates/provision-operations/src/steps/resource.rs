use provision_core::CloudProvider;
use provision_saga::{Context, SideEffects, Step, StepError, StepResult};
use tracing::debug;

use super::ProvisionDeps;
use crate::types::{ResourceRef, ResourceRequest};

/// Creates one cloud resource and deletes it again on rollback.
///
/// Side effects are namespaced by the step's context key: `{key}.id` plus
/// `{key}.{attribute}` for every attribute the provider reported, so later
/// steps can require e.g. `subnet.id` or `master.host`.
#[derive(Debug, Clone)]
pub struct CreateResourceStep {
    name: String,
    key: String,
    request: ResourceRequest,
    required: Vec<String>,
}

impl CreateResourceStep {
    /// A step named `create_{key}` for the resource `resource_name` of type `resource`.
    #[must_use]
    pub fn new(
        key: impl Into<String>,
        resource: impl Into<String>,
        resource_name: impl Into<String>,
        cloud: CloudProvider,
        region: impl Into<String>,
    ) -> Self {
        let key = key.into();
        Self {
            name: format!("create_{key}"),
            key,
            request: ResourceRequest {
                cloud,
                resource: resource.into(),
                name: resource_name.into(),
                region: region.into(),
                size: None,
                inputs: indexmap::IndexMap::new(),
            },
            required: Vec::new(),
        }
    }

    #[must_use]
    pub fn with_size(mut self, size: impl Into<String>) -> Self {
        self.request.size = Some(size.into());
        self
    }

    /// Pass the context value `ctx_key` to the provider; the step fails with
    /// `DependencyUnavailable` when it is missing.
    #[must_use]
    pub fn requires(mut self, ctx_key: impl Into<String>) -> Self {
        self.required.push(ctx_key.into());
        self
    }

    /// Pass a fixed value to the provider.
    #[must_use]
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.request.inputs.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn resource_name(&self) -> &str {
        &self.request.name
    }

    /// The step that removes this resource during teardown.
    #[must_use]
    pub fn teardown(&self) -> DeleteResourceStep {
        DeleteResourceStep::new(
            &self.key,
            self.request.resource.clone(),
            self.request.name.clone(),
            self.request.cloud,
            self.request.region.clone(),
        )
    }

    fn reference(&self, ctx: &Context) -> ResourceRef {
        ResourceRef {
            cloud: self.request.cloud,
            resource: self.request.resource.clone(),
            name: self.request.name.clone(),
            region: self.request.region.clone(),
            id: ctx.get(&format!("{}.id", self.key)).map(str::to_string),
        }
    }
}

impl Step for CreateResourceStep {
    type Deps = ProvisionDeps;

    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, deps: &ProvisionDeps, ctx: &Context) -> StepResult {
        let mut request = self.request.clone();
        for ctx_key in &self.required {
            request
                .inputs
                .insert(ctx_key.clone(), ctx.require(ctx_key)?.to_string());
        }

        let record = deps.provisioner().create(&request)?;
        debug!(step = %self.name, resource = %request.name, id = %record.id, "resource created");

        let mut effects = SideEffects::new();
        effects.insert(format!("{}.id", self.key), record.id);
        for (attribute, value) in record.attributes {
            effects.insert(format!("{}.{attribute}", self.key), value);
        }
        Ok(effects)
    }

    fn compensate(&self, deps: &ProvisionDeps, ctx: &Context) -> Result<(), StepError> {
        deps.provisioner().delete(&self.reference(ctx))
    }

    fn compensation_description(&self) -> String {
        format!("delete {} '{}'", self.request.resource, self.request.name)
    }
}

/// Deletes one cloud resource; a resource that is already gone counts as deleted.
#[derive(Debug, Clone)]
pub struct DeleteResourceStep {
    name: String,
    reference: ResourceRef,
}

impl DeleteResourceStep {
    #[must_use]
    pub fn new(
        key: &str,
        resource: impl Into<String>,
        resource_name: impl Into<String>,
        cloud: CloudProvider,
        region: impl Into<String>,
    ) -> Self {
        Self {
            name: format!("delete_{key}"),
            reference: ResourceRef {
                cloud,
                resource: resource.into(),
                name: resource_name.into(),
                region: region.into(),
                id: None,
            },
        }
    }
}

impl Step for DeleteResourceStep {
    type Deps = ProvisionDeps;

    fn name(&self) -> &str {
        &self.name
    }

    fn run(&self, deps: &ProvisionDeps, _ctx: &Context) -> StepResult {
        deps.provisioner().delete(&self.reference)?;
        let mut effects = SideEffects::new();
        effects.insert(format!("{}.deleted", self.reference.name), "true".to_string());
        Ok(effects)
    }

    fn compensation_description(&self) -> String {
        format!(
            "nothing: deleted {} '{}' cannot be restored",
            self.reference.resource, self.reference.name
        )
    }
}
