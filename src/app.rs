use std::sync::Arc;

use anyhow::{Context, Result};

use crate::{
    clients::{SettingsResolver, gemini::GeminiClient, renderer::PandocRenderer, ytdlp::YtDlpFetcher},
    config::Config,
    dispatcher::Dispatcher,
    limiter::ConcurrencyLimiter,
    observability::Telemetry,
    pipeline::{
        PipelineOrchestrator, StageRunners, acquire::AcquireRunner, edit::EditRunner,
        render::RenderRunner, transcribe::TranscribeRunner,
    },
    settings::SettingsStore,
};

/// アプリケーション全体の共有コンポーネント。
pub struct ComponentRegistry {
    config: Arc<Config>,
    telemetry: Telemetry,
    dispatcher: Arc<Dispatcher>,
    settings: Arc<SettingsStore>,
}

impl ComponentRegistry {
    /// 構成情報と依存をまとめて初期化し、アプリケーションの共有レジストリを構築する。
    ///
    /// # Errors
    /// Telemetry の初期化や HTTP クライアント構築が失敗した場合はエラーを返す。
    pub fn build(config: Config) -> Result<Self> {
        let config = Arc::new(config);
        let telemetry = Telemetry::new()?;

        let gemini =
            Arc::new(GeminiClient::new(&config).context("failed to build gemini client")?);
        let fetcher = Arc::new(YtDlpFetcher::new(config.ytdlp_binary().clone()));
        let renderer = Arc::new(PandocRenderer::new(config.pandoc_binary().clone()));

        let runners = StageRunners {
            acquire: AcquireRunner::new(fetcher, &config),
            transcribe: TranscribeRunner::new(gemini.clone(), &config),
            edit: EditRunner::new(gemini, &config),
            render: RenderRunner::new(renderer, &config),
        };
        let orchestrator = Arc::new(PipelineOrchestrator::new(runners));
        let limiter = Arc::new(ConcurrencyLimiter::new(
            config.max_concurrent_jobs(),
            config.max_jobs_per_requester(),
        ));
        let settings = Arc::new(SettingsStore::from_config(&config));
        let resolver: Arc<dyn SettingsResolver> = settings.clone();
        let dispatcher = Arc::new(Dispatcher::new(
            Arc::clone(&config),
            limiter,
            orchestrator,
            resolver,
        ));

        Ok(Self {
            config,
            telemetry,
            dispatcher,
            settings,
        })
    }

    #[must_use]
    pub fn config(&self) -> Arc<Config> {
        Arc::clone(&self.config)
    }

    #[must_use]
    pub fn telemetry(&self) -> &Telemetry {
        &self.telemetry
    }

    #[must_use]
    pub fn dispatcher(&self) -> Arc<Dispatcher> {
        Arc::clone(&self.dispatcher)
    }

    #[must_use]
    pub fn settings(&self) -> Arc<SettingsStore> {
        Arc::clone(&self.settings)
    }
}
