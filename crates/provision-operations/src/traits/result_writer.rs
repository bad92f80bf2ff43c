use crate::Result;
use crate::types::ProvisioningResult;

pub trait ResultWriter: Send + Sync {
    /// # Errors
    ///
    /// Returns an error if the result cannot be serialized or persisted.
    fn write(&self, result: &ProvisioningResult) -> Result<()>;
}
