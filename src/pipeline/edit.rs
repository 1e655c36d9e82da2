//! Edit stage: format the raw transcript into a structured document.
//!
//! The editing service's output is validated against the section schema on
//! every attempt. A schema violation is retried like a transient failure
//! (editor output is stochastic), but once the budget is spent it surfaces
//! as the permanent [`EditError::MalformedOutput`].

use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tracing::info;

use super::{StageCallError, with_deadline};
use crate::clients::{EditingService, ServiceError};
use crate::config::Config;
use crate::job::{EditError, FailureKind};
use crate::schema::{StructuredText, parse_structured};
use crate::settings::SettingsSnapshot;
use crate::util::retry::{self, FailureClass, RetryConfig};

#[derive(Debug, Error)]
enum EditAttemptError {
    #[error("{0}")]
    Call(StageCallError<ServiceError>),
    #[error("schema validation failed: {}", .0.join("; "))]
    Schema(Vec<String>),
}

impl FailureClass for EditAttemptError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Call(error) => error.is_transient(),
            Self::Schema(_) => true,
        }
    }
}

pub struct EditRunner {
    service: Arc<dyn EditingService>,
    retry: RetryConfig,
    deadline: Duration,
}

impl EditRunner {
    #[must_use]
    pub fn new(service: Arc<dyn EditingService>, config: &Config) -> Self {
        Self {
            service,
            retry: config.edit_retry(),
            deadline: config.stage_timeout(),
        }
    }

    /// Edit the transcript with the snapshot's editor model and validate
    /// the structured output.
    ///
    /// # Errors
    /// Returns the mapped [`FailureKind`] once the retry budget is spent or
    /// the service rejects the content.
    pub async fn run(
        &self,
        transcript: &str,
        snapshot: &SettingsSnapshot,
        attempts: &mut u32,
    ) -> Result<StructuredText, FailureKind> {
        let translation_enabled = snapshot.translation_enabled;
        let result = retry::execute(&self.retry, attempts, "edit", || async move {
            let markdown = with_deadline(
                self.deadline,
                self.service
                    .edit(transcript, &snapshot.editor, translation_enabled),
            )
            .await
            .map_err(EditAttemptError::Call)?;

            let document = parse_structured(&markdown).map_err(EditAttemptError::Schema)?;
            if !translation_enabled && document.translation_lines > 0 {
                return Err(EditAttemptError::Schema(vec![
                    "translation lines present with translation disabled".to_string(),
                ]));
            }
            Ok(document)
        })
        .await;

        let document = result.map_err(|error| match error {
            EditAttemptError::Call(StageCallError::Collaborator(service_error)) => {
                FailureKind::Edit(EditError::Service(service_error))
            }
            EditAttemptError::Call(StageCallError::DeadlineExceeded(deadline)) => {
                FailureKind::Edit(EditError::Service(ServiceError::Unavailable(format!(
                    "editing deadline of {deadline:?} exceeded"
                ))))
            }
            EditAttemptError::Schema(violations) => {
                FailureKind::Edit(EditError::MalformedOutput { violations })
            }
        })?;

        info!(
            model = %snapshot.editor.model,
            translation_enabled,
            has_key_points = document.has_key_points,
            translation_lines = document.translation_lines,
            "transcript edited"
        );
        Ok(document)
    }
}
