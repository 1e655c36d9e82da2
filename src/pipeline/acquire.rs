//! Acquire stage: resolve the request's media source into local audio.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::{StageCallError, with_deadline};
use crate::clients::{AudioRef, FetchError, MediaFetcher};
use crate::config::Config;
use crate::job::{FailureKind, MediaSource};
use crate::util::retry::{self, RetryConfig};

pub struct AcquireRunner {
    fetcher: Arc<dyn MediaFetcher>,
    retry: RetryConfig,
    deadline: Duration,
    max_audio_bytes: u64,
    max_audio_duration: Duration,
}

impl AcquireRunner {
    #[must_use]
    pub fn new(fetcher: Arc<dyn MediaFetcher>, config: &Config) -> Self {
        Self {
            fetcher,
            retry: config.acquire_retry(),
            deadline: config.stage_timeout(),
            max_audio_bytes: config.max_audio_bytes(),
            max_audio_duration: config.max_audio_duration(),
        }
    }

    /// Fetch the media and validate it against the configured limits.
    ///
    /// # Errors
    /// Returns the mapped [`FailureKind`] once the retry budget is spent or
    /// a permanent fetch error occurs. `attempts` reflects the calls made.
    pub async fn run(
        &self,
        source: &MediaSource,
        workdir: &Path,
        attempts: &mut u32,
    ) -> Result<AudioRef, FailureKind> {
        let result = retry::execute(&self.retry, attempts, "acquire", || {
            with_deadline(self.deadline, self.fetcher.fetch(source, workdir))
        })
        .await;

        let audio = result.map_err(|error| match error {
            StageCallError::Collaborator(fetch_error) => FailureKind::Acquisition(fetch_error),
            StageCallError::DeadlineExceeded(deadline) => FailureKind::Acquisition(
                FetchError::NetworkFailure(format!("fetch deadline of {deadline:?} exceeded")),
            ),
        })?;

        if audio.size_bytes == 0 {
            return Err(FailureKind::InternalInvariant(
                "acquire stage reported success with empty audio".to_string(),
            ));
        }
        if audio.size_bytes > self.max_audio_bytes {
            return Err(FailureKind::Acquisition(FetchError::TooLarge(format!(
                "{} bytes exceeds cap of {} bytes",
                audio.size_bytes, self.max_audio_bytes
            ))));
        }
        if let Some(duration) = audio.duration {
            if duration > self.max_audio_duration {
                return Err(FailureKind::Acquisition(FetchError::TooLarge(format!(
                    "{}s exceeds duration cap of {}s",
                    duration.as_secs(),
                    self.max_audio_duration.as_secs()
                ))));
            }
        }

        info!(
            path = %audio.path.display(),
            size_bytes = audio.size_bytes,
            "audio acquired"
        );
        Ok(audio)
    }
}
