//! Compensating step pipelines for environment provisioning.
//!
//! A [`Pipeline`] executes an ordered list of [`Step`]s against a shared
//! [`Context`]. Every successful step pushes a [`CompensatingAction`] onto a
//! [`RollbackStack`]; when a later step fails the stack is unwound in reverse
//! order before the original error is surfaced. Steps are keyed by an
//! idempotency marker per target host, so re-running a pipeline skips work
//! that already completed. A [`ParallelFanOut`] runs homogeneous
//! sub-pipelines concurrently (one per cluster node) and joins all of them
//! before reporting.

mod audit;
mod builder;
mod context;
mod error;
mod fanout;
mod guard;
mod pipeline;
mod rollback;
mod step;

pub use audit::{AuditLog, StepRecord, StepStatus};
pub use builder::{Empty, HasSteps, PipelineBuilder};
pub use context::{Context, SideEffects};
pub use error::{CompensationError, ErrorKind, FanOutError, GuardError, PipelineError, StepError};
pub use fanout::{FanOutReport, FanOutStep, FanOutTask, ParallelFanOut};
pub use guard::{FileMarkerGuard, IdempotencyGuard, InMemoryGuard, MarkerKey};
pub use pipeline::{Pipeline, PipelineReport, PipelineState};
pub use rollback::{CompensatingAction, RollbackStack, UnwindReport};
pub use step::{FnStep, Step, StepResult};
