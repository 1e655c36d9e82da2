//! Dispatcher: the submission, throttling, and cancellation boundary.
//!
//! `submit` turns one request into exactly one terminal outcome. Settings
//! are snapshotted before anything else, the concurrency token is held for
//! the whole job via scoped acquisition, and the per-job scratch directory
//! is removed on every exit path.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{info, warn};

use crate::clients::SettingsResolver;
use crate::config::Config;
use crate::job::{FailureKind, JobFailure, JobOutcome, JobState, Request};
use crate::limiter::ConcurrencyLimiter;
use crate::pipeline::PipelineOrchestrator;
use crate::settings::SettingsSnapshot;

/// Cooperative cancellation flag for one submission.
///
/// Cancelling never aborts an in-flight collaborator call; the orchestrator
/// checks the flag between stages.
#[derive(Debug, Clone, Default)]
pub struct CancelHandle {
    flag: Arc<AtomicBool>,
}

impl CancelHandle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }
}

pub struct Dispatcher {
    config: Arc<Config>,
    limiter: Arc<ConcurrencyLimiter>,
    orchestrator: Arc<PipelineOrchestrator>,
    settings: Arc<dyn SettingsResolver>,
}

impl Dispatcher {
    #[must_use]
    pub fn new(
        config: Arc<Config>,
        limiter: Arc<ConcurrencyLimiter>,
        orchestrator: Arc<PipelineOrchestrator>,
        settings: Arc<dyn SettingsResolver>,
    ) -> Self {
        Self {
            config,
            limiter,
            orchestrator,
            settings,
        }
    }

    /// Submit one request and wait for its terminal outcome.
    pub async fn submit(&self, request: Request) -> JobOutcome {
        self.submit_with_cancel(request, CancelHandle::new()).await
    }

    /// Submit one request with an external cancellation handle.
    ///
    /// Order matters: the settings snapshot is taken first (the job must not
    /// observe later settings changes), then the concurrency token; a
    /// throttled refusal returns before any job state or scratch space
    /// exists.
    pub async fn submit_with_cancel(&self, request: Request, cancel: CancelHandle) -> JobOutcome {
        let requester = request.requester_id;
        let settings = self.settings.resolve(requester);
        let snapshot = SettingsSnapshot::capture(&settings, &self.config);

        let Ok(_token) = self.limiter.acquire(requester).await else {
            warn!(%requester, "request throttled");
            return Err(JobFailure::throttled());
        };

        let mut state = JobState::new(request, snapshot);
        let workdir = match WorkDir::create(self.config.temp_dir(), &state) {
            Ok(workdir) => workdir,
            Err(error) => {
                return Err(JobFailure {
                    stage: None,
                    kind: FailureKind::InternalInvariant(format!(
                        "failed to create working directory: {error}"
                    )),
                    cause: error.to_string(),
                    attempts_made: 0,
                });
            }
        };

        info!(job_id = %state.job_id, %requester, "job admitted");
        self.orchestrator
            .execute(&mut state, workdir.path(), &cancel)
            .await
        // token and workdir drop here, on success, failure, and cancellation alike
    }
}

/// Per-job scratch directory, removed when dropped.
struct WorkDir {
    path: PathBuf,
}

impl WorkDir {
    fn create(root: &Path, state: &JobState) -> std::io::Result<Self> {
        let job_id = state.job_id.simple().to_string();
        let short_id = &job_id[..12];
        let path = root.join(format!("{}_{short_id}", state.request.source.dir_prefix()));
        std::fs::create_dir_all(&path)?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkDir {
    fn drop(&mut self) {
        if let Err(error) = std::fs::remove_dir_all(&self.path) {
            warn!(path = %self.path.display(), %error, "failed to clean up job workdir");
        }
    }
}
