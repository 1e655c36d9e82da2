//! The four-stage job pipeline: acquire -> transcribe -> edit -> render.
//!
//! Each stage runner wraps exactly one collaborator call with a per-attempt
//! deadline, the shared retry executor, input validation, and typed failure
//! mapping. The orchestrator sequences the runners as an explicit state
//! machine with fail-fast semantics.

pub mod acquire;
pub mod edit;
pub mod orchestrator;
pub mod render;
pub mod transcribe;

pub use orchestrator::{PipelineOrchestrator, StageRunners};

use std::time::Duration;

use thiserror::Error;

use crate::util::retry::FailureClass;

/// One attempt against a collaborator: the collaborator's own failure, or
/// the stage deadline elapsing while waiting on it.
#[derive(Debug, Error)]
pub enum StageCallError<E> {
    #[error("{0}")]
    Collaborator(E),
    #[error("stage deadline of {0:?} exceeded")]
    DeadlineExceeded(Duration),
}

impl<E: FailureClass> FailureClass for StageCallError<E> {
    fn is_transient(&self) -> bool {
        match self {
            Self::Collaborator(error) => error.is_transient(),
            // Spending the deadline waiting is treated like any other
            // transient timeout, charged against the stage budget.
            Self::DeadlineExceeded(_) => true,
        }
    }
}

/// Run one collaborator call under the stage deadline.
pub(crate) async fn with_deadline<T, E>(
    deadline: Duration,
    call: impl Future<Output = Result<T, E>>,
) -> Result<T, StageCallError<E>> {
    match tokio::time::timeout(deadline, call).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(error)) => Err(StageCallError::Collaborator(error)),
        Err(_elapsed) => Err(StageCallError::DeadlineExceeded(deadline)),
    }
}
