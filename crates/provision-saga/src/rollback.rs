use std::fmt;

use tracing::{debug, warn};

use crate::error::{CompensationError, StepError};

type UndoFn<D> = Box<dyn FnOnce(&D) -> Result<(), StepError> + Send>;

/// A reversible unit of work: the inverse of one successful step.
pub struct CompensatingAction<D> {
    owner_step: String,
    description: String,
    undo: UndoFn<D>,
}

impl<D> CompensatingAction<D> {
    #[must_use]
    pub fn new(
        owner_step: impl Into<String>,
        description: impl Into<String>,
        undo: impl FnOnce(&D) -> Result<(), StepError> + Send + 'static,
    ) -> Self {
        Self {
            owner_step: owner_step.into(),
            description: description.into(),
            undo: Box::new(undo),
        }
    }

    #[must_use]
    pub fn owner_step(&self) -> &str {
        &self.owner_step
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Run the undo. Consumes the action; a compensation runs at most once.
    ///
    /// # Errors
    ///
    /// Returns whatever the undo function returned.
    pub fn run(self, deps: &D) -> Result<(), StepError> {
        (self.undo)(deps)
    }
}

impl<D> fmt::Debug for CompensatingAction<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompensatingAction")
            .field("owner_step", &self.owner_step)
            .field("description", &self.description)
            .finish_non_exhaustive()
    }
}

/// Result of unwinding a [`RollbackStack`].
#[derive(Debug, Default)]
pub struct UnwindReport {
    /// Steps compensated successfully, in the order they were undone.
    pub compensated: Vec<String>,
    /// Compensations that failed, in the order they were attempted.
    pub failures: Vec<CompensationError>,
}

impl UnwindReport {
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// LIFO stack of compensations owned by a single pipeline execution.
pub struct RollbackStack<D> {
    actions: Vec<CompensatingAction<D>>,
}

impl<D> RollbackStack<D> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            actions: Vec::new(),
        }
    }

    pub fn push(&mut self, action: CompensatingAction<D>) {
        self.actions.push(action);
    }

    pub fn pop(&mut self) -> Option<CompensatingAction<D>> {
        self.actions.pop()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Owner step names from bottom to top.
    #[must_use]
    pub fn owners(&self) -> Vec<&str> {
        self.actions.iter().map(CompensatingAction::owner_step).collect()
    }

    /// Pop and run every compensation, most recent first.
    ///
    /// A failing undo is recorded and the unwind carries on with the rest of
    /// the stack: every compensation is attempted exactly once.
    pub fn unwind(mut self, deps: &D) -> UnwindReport {
        let mut report = UnwindReport::default();

        while let Some(action) = self.pop() {
            let step = action.owner_step.clone();
            let description = action.description.clone();
            debug!(step = %step, compensation = %description, "running compensation");

            match action.run(deps) {
                Ok(()) => report.compensated.push(step),
                Err(error) => {
                    warn!(
                        step = %step,
                        kind = %error.kind(),
                        error = %error,
                        "compensation failed; continuing rollback"
                    );
                    report.failures.push(CompensationError {
                        step,
                        description,
                        error,
                    });
                }
            }
        }

        report
    }

    /// Drop every compensation without running it. Returns how many were dropped.
    pub fn discard(self) -> usize {
        self.actions.len()
    }
}

impl<D> Default for RollbackStack<D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D> fmt::Debug for RollbackStack<D> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RollbackStack")
            .field("owners", &self.owners())
            .finish()
    }
}
