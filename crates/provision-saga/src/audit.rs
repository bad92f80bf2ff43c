use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum StepStatus {
    /// The body is running, or ran and succeeded.
    Executed,
    /// The completion marker was present, so the body did not run.
    Skipped,
    Failed,
    /// Undone during rollback.
    Compensated,
    /// Rollback tried to undo the step and could not.
    CompensationFailed,
}

impl StepStatus {
    /// Stable identifier used in result files.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Executed => "executed",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
            Self::Compensated => "compensated",
            Self::CompensationFailed => "compensation_failed",
        }
    }

    fn was_undone(self) -> bool {
        matches!(self, Self::Compensated | Self::CompensationFailed)
    }
}

/// One step as seen by one pipeline run.
#[derive(Debug, Clone)]
pub struct StepRecord {
    pub name: String,
    /// Host or logical target the step ran against.
    pub target: String,
    pub status: StepStatus,
    /// What rollback would do for this step; set once the step has succeeded
    /// or been skipped.
    pub undo: Option<String>,
    /// Time from start until the step settled, including any rollback of it.
    pub elapsed: Option<Duration>,
    started: Instant,
}

/// Per-run trail of step outcomes, in execution order.
#[derive(Debug, Default)]
pub struct AuditLog {
    records: Vec<StepRecord>,
}

impl AuditLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub(crate) fn begin(&mut self, name: &str, target: &str) {
        self.records.push(StepRecord {
            name: name.to_string(),
            target: target.to_string(),
            status: StepStatus::Executed,
            undo: None,
            elapsed: None,
            started: Instant::now(),
        });
    }

    /// Settle the step most recently begun.
    pub(crate) fn finish(&mut self, status: StepStatus, undo: Option<String>) {
        if let Some(record) = self.records.last_mut() {
            record.status = status;
            record.elapsed = Some(record.started.elapsed());
            if undo.is_some() {
                record.undo = undo;
            }
        }
    }

    /// Note the rollback outcome for `name`.
    pub(crate) fn unwound(&mut self, name: &str, succeeded: bool) {
        let Some(record) = self
            .records
            .iter_mut()
            .rev()
            .find(|r| r.name == name && !r.status.was_undone())
        else {
            return;
        };
        record.status = if succeeded {
            StepStatus::Compensated
        } else {
            StepStatus::CompensationFailed
        };
        record.elapsed = Some(record.started.elapsed());
    }

    #[must_use]
    pub fn records(&self) -> &[StepRecord] {
        &self.records
    }

    /// Latest status recorded for `name`.
    #[must_use]
    pub fn status_of(&self, name: &str) -> Option<StepStatus> {
        self.records
            .iter()
            .rev()
            .find(|r| r.name == name)
            .map(|r| r.status)
    }

    /// Steps whose body actually ran, skipped ones excluded.
    #[must_use]
    pub fn executed_steps(&self) -> Vec<&str> {
        self.records
            .iter()
            .filter(|r| r.status != StepStatus::Skipped)
            .map(|r| r.name.as_str())
            .collect()
    }
}
