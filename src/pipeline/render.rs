//! Render stage: produce both delivery artifacts from the structured text.
//!
//! Rendering is local work; failures indicate malformed input from the edit
//! stage and are permanent. The default budget is a single attempt.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::{StageCallError, with_deadline};
use crate::clients::{DocumentRenderer, RenderError};
use crate::config::Config;
use crate::job::{FailureKind, RenderedDocuments};
use crate::schema::StructuredText;
use crate::util::retry::{self, RetryConfig};

pub struct RenderRunner {
    renderer: Arc<dyn DocumentRenderer>,
    retry: RetryConfig,
    deadline: Duration,
}

impl RenderRunner {
    #[must_use]
    pub fn new(renderer: Arc<dyn DocumentRenderer>, config: &Config) -> Self {
        Self {
            renderer,
            retry: config.render_retry(),
            deadline: config.stage_timeout(),
        }
    }

    /// Render the Markdown and PDF artifacts.
    ///
    /// # Errors
    /// Any renderer failure is permanent and surfaces as
    /// [`FailureKind::Render`].
    pub async fn run(
        &self,
        document: &StructuredText,
        attempts: &mut u32,
    ) -> Result<RenderedDocuments, FailureKind> {
        let markdown = self.renderer.render_markdown(document);
        if markdown.is_empty() {
            return Err(FailureKind::InternalInvariant(
                "renderer produced an empty markdown artifact".to_string(),
            ));
        }

        let result = retry::execute(&self.retry, attempts, "render", || {
            with_deadline(self.deadline, self.renderer.render_pdf(document))
        })
        .await;

        let pdf = result.map_err(|error| match error {
            StageCallError::Collaborator(render_error) => FailureKind::Render(render_error),
            StageCallError::DeadlineExceeded(deadline) => FailureKind::Render(
                RenderError::ConverterFailed(format!("render deadline of {deadline:?} exceeded")),
            ),
        })?;

        if pdf.is_empty() {
            return Err(FailureKind::InternalInvariant(
                "renderer produced an empty pdf artifact".to_string(),
            ));
        }

        info!(
            markdown_bytes = markdown.len(),
            pdf_bytes = pdf.len(),
            "documents rendered"
        );
        Ok(RenderedDocuments { markdown, pdf })
    }
}
