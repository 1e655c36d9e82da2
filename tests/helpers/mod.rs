#![allow(dead_code)]

//! Shared test doubles: well-behaved collaborator implementations plus a
//! gated fetcher for concurrency tests.

use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use async_trait::async_trait;
use tokio::sync::Semaphore;

use transcript_worker::clients::{
    AudioRef, DocumentRenderer, EditingService, FetchError, MediaFetcher, RenderError,
    ServiceError, TranscriptionService,
};
use transcript_worker::config::Config;
use transcript_worker::dispatcher::Dispatcher;
use transcript_worker::job::MediaSource;
use transcript_worker::limiter::ConcurrencyLimiter;
use transcript_worker::pipeline::{
    PipelineOrchestrator, StageRunners, acquire::AcquireRunner, edit::EditRunner,
    render::RenderRunner, transcribe::TranscribeRunner,
};
use transcript_worker::schema::StructuredText;
use transcript_worker::settings::{ModelConfig, SettingsStore};

/// Load a [`Config`] for tests. The environment is seeded exactly once per
/// test binary, before any concurrent reads.
pub fn test_config() -> Config {
    static INIT: std::sync::Once = std::sync::Once::new();
    INIT.call_once(|| {
        // SAFETY: runs once, before any test thread reads the environment.
        unsafe {
            std::env::set_var("GEMINI_API_KEY", "test-key");
            std::env::set_var("BACKOFF_BASE_MS", "1");
            std::env::set_var("BACKOFF_CAP_MS", "2");
            std::env::set_var(
                "TEMP_DIR",
                std::env::temp_dir().join("transcript-worker-tests"),
            );
        }
    });
    Config::from_env().expect("test config should load")
}

pub fn fake_audio(workdir: &Path) -> AudioRef {
    AudioRef {
        path: workdir.join("audio.mp3"),
        mime_type: "audio/mpeg".to_string(),
        size_bytes: 1000,
        duration: None,
    }
}

/// Fetcher that always succeeds and counts its calls.
#[derive(Default)]
pub struct StaticFetcher {
    pub calls: AtomicU32,
}

#[async_trait]
impl MediaFetcher for StaticFetcher {
    async fn fetch(&self, _source: &MediaSource, workdir: &Path) -> Result<AudioRef, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(fake_audio(workdir))
    }
}

/// Fetcher that parks until the test hands it a permit, so jobs can be held
/// in-flight deliberately.
pub struct GatedFetcher {
    pub gate: Arc<Semaphore>,
    pub calls: AtomicU32,
}

impl GatedFetcher {
    pub fn new() -> (Arc<Self>, Arc<Semaphore>) {
        let gate = Arc::new(Semaphore::new(0));
        let fetcher = Arc::new(Self {
            gate: Arc::clone(&gate),
            calls: AtomicU32::new(0),
        });
        (fetcher, gate)
    }
}

#[async_trait]
impl MediaFetcher for GatedFetcher {
    async fn fetch(&self, _source: &MediaSource, workdir: &Path) -> Result<AudioRef, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let permit = self.gate.acquire().await.expect("gate closed");
        permit.forget();
        Ok(fake_audio(workdir))
    }
}

/// Transcriber that returns a fixed transcript.
pub struct StaticTranscriber {
    pub transcript: String,
    pub calls: AtomicU32,
}

impl StaticTranscriber {
    pub fn new(transcript: impl Into<String>) -> Self {
        Self {
            transcript: transcript.into(),
            calls: AtomicU32::new(0),
        }
    }
}

#[async_trait]
impl TranscriptionService for StaticTranscriber {
    async fn transcribe(
        &self,
        _audio: &AudioRef,
        _model: &ModelConfig,
    ) -> Result<String, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.transcript.clone())
    }
}

/// Editor that produces a schema-conforming document and honors the
/// translation flag it is handed.
#[derive(Default)]
pub struct StructuredEditor {
    pub calls: AtomicU32,
}

#[async_trait]
impl EditingService for StructuredEditor {
    async fn edit(
        &self,
        transcript: &str,
        _model: &ModelConfig,
        translation_enabled: bool,
    ) -> Result<String, ServiceError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut document = String::from(
            "# Meeting Notes\n\n## 📝 Summary\n会议摘要。\n\n## ✨ Key Points\n- 要点一\n\n---\n\n## 📄 Transcript\n",
        );
        for paragraph in transcript.split("\n\n") {
            document.push_str(paragraph);
            document.push('\n');
            if translation_enabled {
                document.push_str("> 中文翻译。\n");
            }
            document.push('\n');
        }
        Ok(document)
    }
}

/// Renderer that serializes the document and fabricates a PDF header.
#[derive(Default)]
pub struct StaticRenderer;

#[async_trait]
impl DocumentRenderer for StaticRenderer {
    fn render_markdown(&self, document: &StructuredText) -> Vec<u8> {
        document.as_markdown().as_bytes().to_vec()
    }

    async fn render_pdf(&self, document: &StructuredText) -> Result<Vec<u8>, RenderError> {
        let mut bytes = b"%PDF-1.7\n".to_vec();
        bytes.extend_from_slice(document.as_markdown().as_bytes());
        Ok(bytes)
    }
}

/// Assemble a full dispatcher around the given collaborators.
pub fn build_dispatcher(
    fetcher: Arc<dyn MediaFetcher>,
    transcriber: Arc<dyn TranscriptionService>,
    editor: Arc<dyn EditingService>,
    renderer: Arc<dyn DocumentRenderer>,
    store: Arc<SettingsStore>,
    limiter: Arc<ConcurrencyLimiter>,
) -> Dispatcher {
    let config = test_config();
    let runners = StageRunners {
        acquire: AcquireRunner::new(fetcher, &config),
        transcribe: TranscribeRunner::new(transcriber, &config),
        edit: EditRunner::new(editor, &config),
        render: RenderRunner::new(renderer, &config),
    };
    Dispatcher::new(
        Arc::new(config),
        limiter,
        Arc::new(PipelineOrchestrator::new(runners)),
        store,
    )
}
