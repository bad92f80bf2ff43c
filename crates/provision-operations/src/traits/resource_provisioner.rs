use provision_saga::StepError;

use crate::types::{ResourceRecord, ResourceRef, ResourceRequest};

/// Boundary to the cloud: creates, deletes and finds opaque resources.
///
/// Errors are already classified, so steps can return them unchanged.
pub trait ResourceProvisioner: Send + Sync {
    /// # Errors
    ///
    /// Returns a classified error if the resource could not be created.
    fn create(&self, request: &ResourceRequest) -> Result<ResourceRecord, StepError>;

    /// Deleting a resource that does not exist succeeds.
    ///
    /// # Errors
    ///
    /// Returns a classified error if the resource exists and could not be deleted.
    fn delete(&self, resource: &ResourceRef) -> Result<(), StepError>;

    /// # Errors
    ///
    /// Returns a classified error if the lookup itself failed; a missing
    /// resource is `Ok(None)`.
    fn lookup(&self, resource: &ResourceRef) -> Result<Option<ResourceRecord>, StepError>;
}
