//! Operation progress state machine.
//!
//! One [`ProgressTracker`] is shared between the orchestration layer and any
//! number of readers. Readers take copies with [`ProgressTracker::snapshot`];
//! all mutation goes through the single [`ProgressWriter`] handed out by
//! [`ProgressTracker::begin`], so only one flow writes at a time.
//!
//! ```text
//! idle -> active -> (completed | failed | aborted) -> idle
//! ```

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::classify::ErrorInstruction;

/// Most recent log lines kept per operation.
pub const MAX_LOG_LINES: usize = 5_000;

/// Lifecycle phase of the tracked operation.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub enum Phase {
    /// Nothing is running and nothing awaits acknowledgement.
    #[default]
    Idle,
    /// An operation is running.
    Active,
    /// The last operation finished all of its steps.
    Completed,
    /// The last operation failed; it stays visible until dismissed.
    Failed,
    /// The last operation was abandoned locally.
    Aborted,
}

/// Status of a single step.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum StepStatus {
    /// Not started.
    Pending,
    /// Running.
    InProgress,
    /// Finished cleanly.
    Completed,
    /// Reported an error.
    Error,
    /// Reported a transient problem.
    Warning,
}

/// One step of an operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Step {
    /// Stable identifier used by the writer.
    pub id: String,
    /// Human readable description.
    pub description: String,
    /// Current status.
    pub status: StepStatus,
}

impl Step {
    /// Creates a pending step.
    #[must_use]
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            status: StepStatus::Pending,
        }
    }
}

/// Failure attached to a failed operation.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FailureReport {
    /// Raw failure message.
    pub message: String,
    /// Classified remediation, when the message matched a known signature.
    pub instruction: Option<ErrorInstruction>,
}

/// Copy of the tracker state handed to readers.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct OperationProgress {
    /// Identifier of the current or last operation.
    pub operation_id: Option<Uuid>,
    /// Lifecycle phase.
    pub phase: Phase,
    /// Ordered steps.
    pub steps: Vec<Step>,
    /// Index of the running step; equals `steps.len()` once all finished.
    pub current_step_index: usize,
    /// Overall completion, never decreasing within one operation.
    pub overall_progress_percent: u8,
    /// Most recent output lines.
    pub log_lines: Vec<String>,
    /// Total lines received, including any no longer retained.
    pub log_line_count: u64,
    /// What the operation acts on, for display.
    pub target_label: String,
    /// Failure details once the operation failed.
    pub failure: Option<FailureReport>,
    /// Time of the last received signal.
    pub last_update: Option<DateTime<Utc>>,
}

impl OperationProgress {
    /// Returns `true` while an operation is running.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.phase == Phase::Active
    }

    /// Returns `true` when an active operation has been silent for longer
    /// than `threshold`. Such an operation is still running, not failed.
    #[must_use]
    pub fn is_stalled(&self, threshold: Duration, now: DateTime<Utc>) -> bool {
        if !self.is_active() {
            return false;
        }
        let Some(last) = self.last_update else {
            return false;
        };
        now.signed_duration_since(last)
            .to_std()
            .is_ok_and(|silence| silence > threshold)
    }

    fn push_line(&mut self, line: String) {
        self.log_lines.push(line);
        self.log_line_count = self.log_line_count.saturating_add(1);
        let excess = self.log_lines.len().saturating_sub(MAX_LOG_LINES);
        if excess > 0 {
            self.log_lines.drain(..excess);
        }
    }

    fn step_mut(&mut self, step_id: &str) -> Option<(usize, &mut Step)> {
        self.steps
            .iter_mut()
            .enumerate()
            .find(|(_, step)| step.id == step_id)
    }

    fn raise_percent(&mut self, percent: u8) {
        self.overall_progress_percent = self.overall_progress_percent.max(percent.min(100));
    }

    fn finished_percent(&self) -> u8 {
        let finished = self
            .steps
            .iter()
            .filter(|step| {
                matches!(
                    step.status,
                    StepStatus::Completed | StepStatus::Error | StepStatus::Warning
                )
            })
            .count();
        finished
            .saturating_mul(100)
            .checked_div(self.steps.len())
            .and_then(|value| u8::try_from(value).ok())
            .unwrap_or(100)
    }
}

/// Errors raised by tracker transitions.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProgressError {
    /// Raised when an operation is already running.
    #[error("operation '{label}' is already in progress")]
    Busy {
        /// Label of the running operation.
        label: String,
    },
    /// Raised when a failed operation has not been acknowledged yet.
    #[error("the previous operation '{label}' failed and must be dismissed first")]
    AwaitingDismissal {
        /// Label of the failed operation.
        label: String,
    },
    /// Raised when dismissing while an operation is still running.
    #[error("cannot dismiss operation '{label}' while it is running")]
    StillActive {
        /// Label of the running operation.
        label: String,
    },
    /// Raised when an operation is started without steps.
    #[error("an operation needs at least one step")]
    NoSteps,
}

/// Shared handle to the progress state.
#[derive(Clone, Debug, Default)]
pub struct ProgressTracker {
    state: Arc<Mutex<OperationProgress>>,
}

impl ProgressTracker {
    /// Creates an idle tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a new operation and returns its writer.
    ///
    /// A completed or aborted operation is replaced. A running operation
    /// rejects the start, and so does a failed one until it is dismissed.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError::Busy`], [`ProgressError::AwaitingDismissal`]
    /// or [`ProgressError::NoSteps`].
    pub fn begin(
        &self,
        target_label: impl Into<String>,
        steps: Vec<Step>,
    ) -> Result<ProgressWriter, ProgressError> {
        if steps.is_empty() {
            return Err(ProgressError::NoSteps);
        }
        let mut state = self.lock();
        match state.phase {
            Phase::Active => {
                return Err(ProgressError::Busy {
                    label: state.target_label.clone(),
                });
            }
            Phase::Failed => {
                return Err(ProgressError::AwaitingDismissal {
                    label: state.target_label.clone(),
                });
            }
            Phase::Idle | Phase::Completed | Phase::Aborted => {}
        }

        let operation_id = Uuid::new_v4();
        *state = OperationProgress {
            operation_id: Some(operation_id),
            phase: Phase::Active,
            steps,
            target_label: target_label.into(),
            last_update: Some(Utc::now()),
            ..OperationProgress::default()
        };
        info!(
            operation = %operation_id,
            label = %state.target_label,
            steps = state.steps.len(),
            "operation started"
        );
        drop(state);

        Ok(ProgressWriter {
            tracker: self.clone(),
            operation_id,
        })
    }

    /// Returns a copy of the current state.
    #[must_use]
    pub fn snapshot(&self) -> OperationProgress {
        self.lock().clone()
    }

    /// Clears a finished, failed or aborted operation back to idle.
    ///
    /// # Errors
    ///
    /// Returns [`ProgressError::StillActive`] while an operation is running.
    pub fn dismiss(&self) -> Result<(), ProgressError> {
        let mut state = self.lock();
        if state.is_active() {
            return Err(ProgressError::StillActive {
                label: state.target_label.clone(),
            });
        }
        *state = OperationProgress::default();
        Ok(())
    }

    /// Marks the running operation as abandoned. Later signals from its
    /// writer are ignored; the remote job itself is not cancelled.
    ///
    /// Returns `true` when an operation was running.
    pub fn abandon(&self) -> bool {
        let mut state = self.lock();
        if !state.is_active() {
            return false;
        }
        state.phase = Phase::Aborted;
        state.last_update = Some(Utc::now());
        warn!(label = %state.target_label, "operation abandoned; the remote job may still be running");
        true
    }

    fn lock(&self) -> MutexGuard<'_, OperationProgress> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Exclusive write access to one active operation.
///
/// Dropping the writer while its operation is still active marks the
/// operation aborted.
#[derive(Debug)]
pub struct ProgressWriter {
    tracker: ProgressTracker,
    operation_id: Uuid,
}

impl ProgressWriter {
    /// Identifier of the operation this writer owns.
    #[must_use]
    pub const fn operation_id(&self) -> Uuid {
        self.operation_id
    }

    /// Returns `true` once the operation is no longer active, for example
    /// after [`ProgressTracker::abandon`].
    #[must_use]
    pub fn is_abandoned(&self) -> bool {
        let state = self.tracker.lock();
        state.operation_id != Some(self.operation_id) || !state.is_active()
    }

    /// Appends an output line.
    pub fn log(&self, line: impl Into<String>) {
        let text = line.into();
        self.update(|state| {
            debug!(line = %text, "operation output");
            state.push_line(text);
        });
    }

    /// Marks `step_id` as running and makes it the current step.
    pub fn start_step(&self, step_id: &str) {
        self.update(|state| {
            if let Some((index, step)) = state.step_mut(step_id) {
                step.status = StepStatus::InProgress;
                info!(step = step_id, "step started");
                state.current_step_index = index;
            }
        });
    }

    /// Flags the current step with `status` without finishing it. An error
    /// flag is not downgraded to a warning.
    pub fn flag_current_step(&self, status: StepStatus) {
        self.update(|state| {
            let index = state.current_step_index;
            if let Some(step) = state.steps.get_mut(index) {
                let keep_error = step.status == StepStatus::Error && status == StepStatus::Warning;
                if !keep_error {
                    step.status = status;
                }
            }
        });
    }

    /// Finishes `step_id`, keeping any error or warning flag, and advances
    /// the current step index and percentage.
    pub fn finish_step(&self, step_id: &str) {
        self.update(|state| {
            let Some((index, step)) = state.step_mut(step_id) else {
                return;
            };
            if matches!(step.status, StepStatus::Pending | StepStatus::InProgress) {
                step.status = StepStatus::Completed;
            }
            info!(step = step_id, status = ?step.status, "step finished");
            let next = index.saturating_add(1).min(state.steps.len());
            state.current_step_index = state.current_step_index.max(next);
            let percent = state.finished_percent();
            state.raise_percent(percent);
        });
    }

    /// Reports an intermediate percentage. Lower values than the current
    /// one are ignored.
    pub fn report_percent(&self, percent: u8) {
        self.update(|state| state.raise_percent(percent));
    }

    /// Marks the operation completed.
    pub fn complete(self) {
        self.update(|state| {
            for step in &mut state.steps {
                if matches!(step.status, StepStatus::Pending | StepStatus::InProgress) {
                    step.status = StepStatus::Completed;
                }
            }
            state.current_step_index = state.steps.len();
            state.overall_progress_percent = 100;
            state.phase = Phase::Completed;
            info!(label = %state.target_label, "operation completed");
        });
    }

    /// Marks the operation failed. The current step is flagged as an error,
    /// or as a warning when the instruction is warning-level.
    pub fn fail(self, message: impl Into<String>, instruction: Option<ErrorInstruction>) {
        let text = message.into();
        self.update(|state| {
            let warning = instruction.as_ref().is_some_and(ErrorInstruction::is_warning);
            let index = state.current_step_index;
            if let Some(step) = state.steps.get_mut(index) {
                if warning && step.status != StepStatus::Error {
                    step.status = StepStatus::Warning;
                } else {
                    step.status = StepStatus::Error;
                }
            }
            if warning {
                warn!(label = %state.target_label, error = %text, "operation stopped on a transient failure");
            } else {
                warn!(label = %state.target_label, error = %text, "operation failed");
            }
            state.push_line(text.clone());
            state.failure = Some(FailureReport {
                message: text,
                instruction,
            });
            state.phase = Phase::Failed;
        });
    }

    fn update(&self, apply: impl FnOnce(&mut OperationProgress)) {
        let mut state = self.tracker.lock();
        if state.operation_id != Some(self.operation_id) || !state.is_active() {
            return;
        }
        apply(&mut state);
        state.last_update = Some(Utc::now());
    }
}

impl Drop for ProgressWriter {
    fn drop(&mut self) {
        let mut state = self.tracker.lock();
        if state.operation_id == Some(self.operation_id) && state.is_active() {
            state.phase = Phase::Aborted;
            state.last_update = Some(Utc::now());
            warn!(label = %state.target_label, "operation writer dropped while active");
        }
    }
}

#[cfg(test)]
mod tests;
