//! Transcribe stage: turn acquired audio into raw transcript text.

use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use super::{StageCallError, with_deadline};
use crate::clients::{AudioRef, ServiceError, TranscriptionService};
use crate::config::Config;
use crate::job::FailureKind;
use crate::settings::SettingsSnapshot;
use crate::util::retry::{self, RetryConfig};
use crate::util::text::collapse_repeated_chars;

/// Runs of the same character longer than this are collapsed before the
/// transcript enters the edit stage.
const REPEAT_THRESHOLD: usize = 10;

pub struct TranscribeRunner {
    service: Arc<dyn TranscriptionService>,
    retry: RetryConfig,
    deadline: Duration,
}

impl TranscribeRunner {
    #[must_use]
    pub fn new(service: Arc<dyn TranscriptionService>, config: &Config) -> Self {
        Self {
            service,
            retry: config.transcribe_retry(),
            deadline: config.stage_timeout(),
        }
    }

    /// Transcribe the audio with the snapshot's transcriber model.
    ///
    /// # Errors
    /// Returns the mapped [`FailureKind`] once the retry budget is spent or
    /// the service rejects the content.
    pub async fn run(
        &self,
        audio: &AudioRef,
        snapshot: &SettingsSnapshot,
        attempts: &mut u32,
    ) -> Result<String, FailureKind> {
        let result = retry::execute(&self.retry, attempts, "transcribe", || {
            with_deadline(
                self.deadline,
                self.service.transcribe(audio, &snapshot.transcriber),
            )
        })
        .await;

        let transcript = result.map_err(|error| match error {
            StageCallError::Collaborator(service_error) => {
                FailureKind::Transcription(service_error)
            }
            StageCallError::DeadlineExceeded(deadline) => FailureKind::Transcription(
                ServiceError::Unavailable(format!("transcription deadline of {deadline:?} exceeded")),
            ),
        })?;

        if transcript.trim().is_empty() {
            return Err(FailureKind::InternalInvariant(
                "transcribe stage reported success with empty transcript".to_string(),
            ));
        }

        let cleaned = collapse_repeated_chars(&transcript, REPEAT_THRESHOLD);
        info!(
            model = %snapshot.transcriber.model,
            raw_chars = transcript.chars().count(),
            cleaned_chars = cleaned.chars().count(),
            "transcription completed"
        );
        Ok(cleaned)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicU32, Ordering};

    use crate::settings::Settings;

    struct ScriptedService {
        calls: AtomicU32,
        fail_times: u32,
        response: String,
        error: fn() -> ServiceError,
    }

    #[async_trait]
    impl TranscriptionService for ScriptedService {
        async fn transcribe(
            &self,
            _audio: &AudioRef,
            _model: &crate::settings::ModelConfig,
        ) -> Result<String, ServiceError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if call < self.fail_times {
                Err((self.error)())
            } else {
                Ok(self.response.clone())
            }
        }
    }

    fn audio() -> AudioRef {
        AudioRef {
            path: PathBuf::from("/tmp/test/audio.mp3"),
            mime_type: "audio/mpeg".to_string(),
            size_bytes: 100,
            duration: None,
        }
    }

    fn snapshot() -> SettingsSnapshot {
        let _guard = crate::config::ENV_MUTEX.lock().expect("env mutex poisoned");
        // SAFETY: tests run sequentially under ENV_MUTEX.
        unsafe {
            std::env::set_var("GEMINI_API_KEY", "test-key");
        }
        let config = Config::from_env().expect("config should load");
        SettingsSnapshot::capture(&Settings::default(), &config)
    }

    fn runner(service: ScriptedService, max_attempts: u32) -> TranscribeRunner {
        TranscribeRunner {
            service: Arc::new(service),
            retry: RetryConfig::new(max_attempts, 1, 2, 2.0),
            deadline: Duration::from_secs(5),
        }
    }

    #[tokio::test]
    async fn rate_limits_are_retried_within_budget() {
        let runner = runner(
            ScriptedService {
                calls: AtomicU32::new(0),
                fail_times: 2,
                response: "hello world".to_string(),
                error: || ServiceError::RateLimited,
            },
            3,
        );
        let mut attempts = 0;

        let transcript = runner
            .run(&audio(), &snapshot(), &mut attempts)
            .await
            .expect("third attempt should succeed");

        assert_eq!(transcript, "hello world");
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn budget_exhaustion_reports_final_failure() {
        let runner = runner(
            ScriptedService {
                calls: AtomicU32::new(0),
                fail_times: u32::MAX,
                response: String::new(),
                error: || ServiceError::RateLimited,
            },
            3,
        );
        let mut attempts = 0;

        let error = runner
            .run(&audio(), &snapshot(), &mut attempts)
            .await
            .expect_err("must fail");

        assert!(matches!(
            error,
            FailureKind::Transcription(ServiceError::RateLimited)
        ));
        assert_eq!(attempts, 3);
    }

    #[tokio::test]
    async fn rejection_is_not_retried() {
        let runner = runner(
            ScriptedService {
                calls: AtomicU32::new(0),
                fail_times: u32::MAX,
                response: String::new(),
                error: || ServiceError::Rejected("policy".into()),
            },
            3,
        );
        let mut attempts = 0;

        let error = runner
            .run(&audio(), &snapshot(), &mut attempts)
            .await
            .expect_err("must fail");

        assert!(matches!(
            error,
            FailureKind::Transcription(ServiceError::Rejected(_))
        ));
        assert_eq!(attempts, 1);
    }

    #[tokio::test]
    async fn empty_transcript_is_an_invariant_violation() {
        let runner = runner(
            ScriptedService {
                calls: AtomicU32::new(0),
                fail_times: 0,
                response: "   ".to_string(),
                error: || ServiceError::RateLimited,
            },
            3,
        );
        let mut attempts = 0;

        let error = runner
            .run(&audio(), &snapshot(), &mut attempts)
            .await
            .expect_err("must fail");

        assert!(matches!(error, FailureKind::InternalInvariant(_)));
    }

    #[tokio::test]
    async fn runaway_repetitions_are_collapsed() {
        let runner = runner(
            ScriptedService {
                calls: AtomicU32::new(0),
                fail_times: 0,
                response: format!("start {} end", "а".repeat(50)),
                error: || ServiceError::RateLimited,
            },
            3,
        );
        let mut attempts = 0;

        let transcript = runner
            .run(&audio(), &snapshot(), &mut attempts)
            .await
            .expect("should succeed");

        assert_eq!(transcript, "start а end");
    }
}
