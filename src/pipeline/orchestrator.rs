//! Pipeline orchestrator: sequences the four stage runners for one job.
//!
//! Explicit state machine with fail-fast transitions. A stage failure moves
//! the job straight to `Failed`; no later stage runs, no stage is ever
//! re-entered, and every terminal path records the attempt count of the
//! stage that decided the outcome.

use std::path::Path;

use chrono::Utc;
use tracing::{error, info, warn};

use super::acquire::AcquireRunner;
use super::edit::EditRunner;
use super::render::RenderRunner;
use super::transcribe::TranscribeRunner;
use crate::dispatcher::CancelHandle;
use crate::job::{
    FailureKind, JobFailure, JobOutput, JobPhase, JobState, MediaSource, Stage, StageArtifact,
};
use crate::schema::StructuredText;
use crate::util::text::{extract_title, sanitize_filename};
use crate::util::url::extract_media_id;

/// Container for the four stage runners.
pub struct StageRunners {
    pub acquire: AcquireRunner,
    pub transcribe: TranscribeRunner,
    pub edit: EditRunner,
    pub render: RenderRunner,
}

pub struct PipelineOrchestrator {
    runners: StageRunners,
}

impl PipelineOrchestrator {
    #[must_use]
    pub fn new(runners: StageRunners) -> Self {
        Self { runners }
    }

    /// Run the job to its single terminal outcome.
    ///
    /// Cancellation is observed between stages only: an in-flight
    /// collaborator call is never aborted, the job just stops advancing
    /// once the current stage returns.
    ///
    /// # Errors
    /// Returns the job's terminal [`JobFailure`]; exactly one terminal
    /// value is produced per invocation.
    pub async fn execute(
        &self,
        state: &mut JobState,
        workdir: &Path,
        cancel: &CancelHandle,
    ) -> Result<JobOutput, JobFailure> {
        info!(
            job_id = %state.job_id,
            requester = %state.request.requester_id,
            source = state.request.source.dir_prefix(),
            "starting pipeline"
        );

        Self::check_cancelled(state, cancel)?;
        state.advance(JobPhase::Acquiring);
        let mut attempts = 0;
        let audio = match self
            .runners
            .acquire
            .run(&state.request.source, workdir, &mut attempts)
            .await
        {
            Ok(audio) => audio,
            Err(kind) => return Err(Self::fail(state, Stage::Acquire, kind, attempts)),
        };
        state.record_attempts(Stage::Acquire, attempts);
        state.record_output(Stage::Acquire, StageArtifact::Audio(audio.clone()));

        Self::check_cancelled(state, cancel)?;
        state.advance(JobPhase::Transcribing);
        let mut attempts = 0;
        let transcript = match self
            .runners
            .transcribe
            .run(&audio, &state.snapshot, &mut attempts)
            .await
        {
            Ok(transcript) => transcript,
            Err(kind) => return Err(Self::fail(state, Stage::Transcribe, kind, attempts)),
        };
        state.record_attempts(Stage::Transcribe, attempts);
        state.record_output(Stage::Transcribe, StageArtifact::Transcript(transcript.clone()));

        Self::check_cancelled(state, cancel)?;
        state.advance(JobPhase::Editing);
        let mut attempts = 0;
        let document = match self
            .runners
            .edit
            .run(&transcript, &state.snapshot, &mut attempts)
            .await
        {
            Ok(document) => document,
            Err(kind) => return Err(Self::fail(state, Stage::Edit, kind, attempts)),
        };
        state.record_attempts(Stage::Edit, attempts);
        state.record_output(Stage::Edit, StageArtifact::Structured(document.clone()));

        Self::check_cancelled(state, cancel)?;
        state.advance(JobPhase::Rendering);
        let mut attempts = 0;
        let documents = match self.runners.render.run(&document, &mut attempts).await {
            Ok(documents) => documents,
            Err(kind) => return Err(Self::fail(state, Stage::Render, kind, attempts)),
        };
        state.record_attempts(Stage::Render, attempts);
        state.record_output(Stage::Render, StageArtifact::Documents(documents.clone()));

        state.advance(JobPhase::Succeeded);
        state.mark_finished();

        let file_stem = Self::file_stem(state, &document);
        info!(
            job_id = %state.job_id,
            file_stem = %file_stem,
            "pipeline succeeded"
        );

        Ok(JobOutput {
            job_id: state.job_id,
            file_stem,
            transcript: document.transcript.clone(),
            markdown: documents.markdown,
            pdf: documents.pdf,
        })
    }

    fn fail(state: &mut JobState, stage: Stage, kind: FailureKind, attempts: u32) -> JobFailure {
        state.record_attempts(stage, attempts);
        state.advance(JobPhase::Failed);
        state.mark_finished();
        error!(
            job_id = %state.job_id,
            stage = %stage,
            attempts,
            error = %kind,
            "pipeline failed"
        );
        JobFailure::in_stage(stage, kind, attempts)
    }

    /// The `stage` on a cancellation failure is the last completed stage,
    /// or `None` when the job was cancelled before any stage finished.
    fn check_cancelled(state: &mut JobState, cancel: &CancelHandle) -> Result<(), JobFailure> {
        if !cancel.is_cancelled() {
            return Ok(());
        }
        let last_completed = state.completed_stages().last().copied();
        state.advance(JobPhase::Failed);
        state.mark_finished();
        warn!(job_id = %state.job_id, "job cancelled, stopping before next stage");
        Err(JobFailure::cancelled(last_completed))
    }

    /// Delivered-file base name: sanitized document title, falling back to
    /// the media id, stamped with the current date.
    fn file_stem(state: &JobState, document: &StructuredText) -> String {
        let base = extract_title(document.as_markdown())
            .map(|title| sanitize_filename(&title, 30))
            .or_else(|| match &state.request.source {
                MediaSource::Url { url, platform } => extract_media_id(url, *platform),
                MediaSource::File { local_path, .. } => local_path
                    .file_stem()
                    .map(|stem| sanitize_filename(&stem.to_string_lossy(), 30)),
            })
            .unwrap_or_else(|| "transcript".to_string());
        format!("{}_{}", base, Utc::now().format("%Y%m%d"))
    }
}
