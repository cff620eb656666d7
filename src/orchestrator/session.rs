//! Ownership of the progress writer across async and blocking steps.

use std::marker::PhantomData;
use std::sync::Arc;

use crate::classify::ErrorInstruction;
use crate::executor::{Executor, TransferError, TransferRunner};
use crate::progress::ProgressWriter;

use super::OrchestratorError;

/// Carries the operation's writer through its steps.
///
/// Export and import jobs block, so the blocking task borrows a shared
/// handle to the writer. The session keeps ownership even when that task
/// panics, so the operation still ends failed rather than aborted.
pub(super) struct Session<E> {
    writer: Option<Arc<ProgressWriter>>,
    error: PhantomData<fn() -> E>,
}

impl<E> Session<E>
where
    E: std::error::Error + 'static,
{
    pub(super) fn new(writer: ProgressWriter) -> Self {
        Self {
            writer: Some(Arc::new(writer)),
            error: PhantomData,
        }
    }

    pub(super) fn start_step(&self, step_id: &str) {
        if let Some(writer) = &self.writer {
            writer.start_step(step_id);
        }
    }

    pub(super) fn finish_step(&self, step_id: &str) {
        if let Some(writer) = &self.writer {
            writer.finish_step(step_id);
        }
    }

    pub(super) fn log(&self, line: impl Into<String>) {
        if let Some(writer) = &self.writer {
            writer.log(line);
        }
    }

    /// Fails with [`OrchestratorError::Abandoned`] once the operation was
    /// abandoned, so no further remote work is started for it.
    pub(super) fn ensure_live(&self) -> Result<(), OrchestratorError<E>> {
        if self
            .writer
            .as_ref()
            .is_none_or(|writer| writer.is_abandoned())
        {
            return Err(OrchestratorError::Abandoned);
        }
        Ok(())
    }

    /// Runs an export or import job on the blocking pool.
    pub(super) async fn transfer<R, T, F>(
        &self,
        executor: &Arc<Executor<R>>,
        job: F,
    ) -> Result<T, OrchestratorError<E>>
    where
        R: TransferRunner + 'static,
        T: Send + 'static,
        F: FnOnce(&Executor<R>, &ProgressWriter) -> Result<T, TransferError> + Send + 'static,
    {
        let writer = self
            .writer
            .as_ref()
            .map(Arc::clone)
            .ok_or(OrchestratorError::Abandoned)?;
        let shared = Arc::clone(executor);
        let joined = tokio::task::spawn_blocking(move || job(&shared, &writer)).await;
        match joined {
            Ok(result) => result.map_err(OrchestratorError::from),
            Err(err) => Err(OrchestratorError::Interrupted {
                message: err.to_string(),
            }),
        }
    }

    /// Completes or fails the operation according to `outcome`.
    pub(super) fn conclude<T>(
        self,
        outcome: Result<T, OrchestratorError<E>>,
    ) -> Result<T, OrchestratorError<E>> {
        // The blocking task has finished, so the session holds the only handle.
        let Some(writer) = self.writer.and_then(Arc::into_inner) else {
            return outcome;
        };
        match outcome {
            Ok(value) => {
                writer.complete();
                Ok(value)
            }
            Err(err) => {
                let instruction: Option<ErrorInstruction> = err.instruction();
                writer.fail(err.to_string(), instruction);
                Err(err)
            }
        }
    }
}
