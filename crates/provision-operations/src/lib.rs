//! Provisioning operations: collaborator traits, their concrete providers,
//! the steps built on top of them and the orchestrator that runs a plan as a
//! compensating pipeline.

pub mod commands;
mod error;
pub mod orchestrator;
pub mod plans;
pub mod providers;
pub mod steps;
pub mod traits;
pub mod types;

#[cfg(test)]
pub mod mocks;

pub use error::{CompensationFailure, OperationError, Result};
pub use orchestrator::ProvisioningOrchestrator;
