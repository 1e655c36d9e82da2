//! Job-scoped data model: requests, pipeline stages, per-job mutable state,
//! and the terminal outcome types.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::clients::{AudioRef, FetchError, RenderError, ServiceError};
use crate::schema::StructuredText;
use crate::settings::SettingsSnapshot;
use crate::util::retry::FailureClass;

/// Opaque requester identity. Authorization happens upstream; the worker
/// trusts any id it is handed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequesterId(pub i64);

impl fmt::Display for RequesterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Hosting platform of a URL media source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Platform {
    Youtube,
    Bilibili,
    ApplePodcasts,
}

impl Platform {
    /// The platform label used in events and logging.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Youtube => "youtube",
            Self::Bilibili => "bilibili",
            Self::ApplePodcasts => "apple_podcasts",
        }
    }

    /// Short prefix used for per-job working directories.
    #[must_use]
    pub const fn dir_prefix(self) -> &'static str {
        match self {
            Self::Youtube => "yt",
            Self::Bilibili => "bili",
            Self::ApplePodcasts => "pod",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Where the audio comes from. Exactly one variant per request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MediaSource {
    Url { url: String, platform: Platform },
    File {
        local_path: PathBuf,
        declared_mime: Option<String>,
    },
}

impl MediaSource {
    /// Working-directory prefix for this source.
    #[must_use]
    pub fn dir_prefix(&self) -> &'static str {
        match self {
            Self::Url { platform, .. } => platform.dir_prefix(),
            Self::File { .. } => "audio",
        }
    }
}

/// One incoming transcription request. Immutable once constructed.
#[derive(Debug, Clone)]
pub struct Request {
    pub requester_id: RequesterId,
    pub source: MediaSource,
    pub received_at: DateTime<Utc>,
}

impl Request {
    #[must_use]
    pub fn new(requester_id: RequesterId, source: MediaSource) -> Self {
        Self {
            requester_id,
            source,
            received_at: Utc::now(),
        }
    }
}

/// One discrete pipeline stage, in canonical execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    Acquire,
    Transcribe,
    Edit,
    Render,
}

impl Stage {
    /// The stage label used in events and logging.
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Acquire => "acquire",
            Self::Transcribe => "transcribe",
            Self::Edit => "edit",
            Self::Render => "render",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Lifecycle phase of one job. Transitions are strictly forward:
/// Pending -> Acquiring -> Transcribing -> Editing -> Rendering -> Succeeded,
/// with any stage failure jumping directly to Failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPhase {
    Pending,
    Acquiring,
    Transcribing,
    Editing,
    Rendering,
    Succeeded,
    Failed,
}

impl JobPhase {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Acquiring => "acquiring",
            Self::Transcribing => "transcribing",
            Self::Editing => "editing",
            Self::Rendering => "rendering",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for JobPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Both rendered artifacts for one job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedDocuments {
    pub markdown: Vec<u8>,
    pub pdf: Vec<u8>,
}

/// Output produced by a completed stage, recorded append-only on the job.
#[derive(Debug, Clone)]
pub enum StageArtifact {
    Audio(AudioRef),
    Transcript(String),
    Structured(StructuredText),
    Documents(RenderedDocuments),
}

/// Mutable record of one request's progress through the pipeline.
///
/// Exclusively owned by one orchestrator run; never shared across jobs.
#[derive(Debug)]
pub struct JobState {
    pub job_id: Uuid,
    pub request: Request,
    pub snapshot: SettingsSnapshot,
    phase: JobPhase,
    stage_outputs: Vec<(Stage, StageArtifact)>,
    attempt_counts: BTreeMap<Stage, u32>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl JobState {
    #[must_use]
    pub fn new(request: Request, snapshot: SettingsSnapshot) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            request,
            snapshot,
            phase: JobPhase::Pending,
            stage_outputs: Vec::new(),
            attempt_counts: BTreeMap::new(),
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    #[must_use]
    pub const fn phase(&self) -> JobPhase {
        self.phase
    }

    /// Advance the lifecycle phase. Forward-only by construction: the
    /// orchestrator is the sole caller and never revisits a stage.
    pub fn advance(&mut self, phase: JobPhase) {
        tracing::debug!(job_id = %self.job_id, from = %self.phase, to = %phase, "phase transition");
        self.phase = phase;
    }

    pub fn record_output(&mut self, stage: Stage, artifact: StageArtifact) {
        self.stage_outputs.push((stage, artifact));
    }

    pub fn record_attempts(&mut self, stage: Stage, attempts: u32) {
        self.attempt_counts.insert(stage, attempts);
    }

    #[must_use]
    pub fn attempts_for(&self, stage: Stage) -> u32 {
        self.attempt_counts.get(&stage).copied().unwrap_or(0)
    }

    /// Stages that have produced an output so far, in completion order.
    #[must_use]
    pub fn completed_stages(&self) -> Vec<Stage> {
        self.stage_outputs.iter().map(|(stage, _)| *stage).collect()
    }

    #[must_use]
    pub fn output_for(&self, stage: Stage) -> Option<&StageArtifact> {
        self.stage_outputs
            .iter()
            .find(|(s, _)| *s == stage)
            .map(|(_, artifact)| artifact)
    }

    pub fn mark_finished(&mut self) {
        self.finished_at = Some(Utc::now());
    }
}

/// Terminal success value: both rendered artifacts plus the final transcript.
#[derive(Debug, Clone)]
pub struct JobOutput {
    pub job_id: Uuid,
    /// Sanitized base name for delivered files, derived from the document title.
    pub file_stem: String,
    pub transcript: String,
    pub markdown: Vec<u8>,
    pub pdf: Vec<u8>,
}

/// Failure taxonomy. Wraps the typed collaborator error where one exists.
#[derive(Debug, Error)]
pub enum FailureKind {
    #[error("acquisition failed: {0}")]
    Acquisition(#[from] FetchError),
    #[error("transcription failed: {0}")]
    Transcription(ServiceError),
    #[error("editing failed: {0}")]
    Edit(#[from] EditError),
    #[error("rendering failed: {0}")]
    Render(#[from] RenderError),
    #[error("requester is at its concurrency bound")]
    Throttled,
    #[error("job was cancelled")]
    Cancelled,
    #[error("collaborator contract violated: {0}")]
    InternalInvariant(String),
}

/// Edit-stage failure: either the editing service failed, or its output
/// never satisfied the section schema within the retry budget.
#[derive(Debug, Error)]
pub enum EditError {
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("structured output failed schema validation: {}", violations.join("; "))]
    MalformedOutput { violations: Vec<String> },
}

impl FailureClass for EditError {
    fn is_transient(&self) -> bool {
        match self {
            Self::Service(error) => error.is_transient(),
            // Editor output is stochastic: a fresh attempt can produce a
            // well-formed document, so schema violations are retried until
            // the stage budget runs out.
            Self::MalformedOutput { .. } => true,
        }
    }
}

/// Terminal error value for one request.
#[derive(Debug, Error)]
#[error("job failed at {} ({kind}) after {attempts_made} attempt(s)", .stage.map_or("dispatch", Stage::label))]
pub struct JobFailure {
    /// Stage the failure occurred in; `None` when no stage ever started
    /// (throttled or cancelled before dispatch).
    pub stage: Option<Stage>,
    pub kind: FailureKind,
    /// Opaque description of the underlying error.
    pub cause: String,
    pub attempts_made: u32,
}

impl JobFailure {
    #[must_use]
    pub fn in_stage(stage: Stage, kind: FailureKind, attempts_made: u32) -> Self {
        let cause = kind.to_string();
        Self {
            stage: Some(stage),
            kind,
            cause,
            attempts_made,
        }
    }

    #[must_use]
    pub fn throttled() -> Self {
        Self {
            stage: None,
            kind: FailureKind::Throttled,
            cause: "per-requester concurrency bound reached".to_string(),
            attempts_made: 0,
        }
    }

    #[must_use]
    pub fn cancelled(stage: Option<Stage>) -> Self {
        Self {
            stage,
            kind: FailureKind::Cancelled,
            cause: "cancelled by caller".to_string(),
            attempts_made: 0,
        }
    }
}

/// Terminal outcome of one request: exactly one per submission.
pub type JobOutcome = Result<JobOutput, JobFailure>;
