use std::{env, path::PathBuf, time::Duration};

use thiserror::Error;

use crate::settings::{ModelChoice, ThinkingLevel};
use crate::util::retry::RetryConfig;

#[cfg(test)]
use once_cell::sync::Lazy;
#[cfg(test)]
pub(crate) static ENV_MUTEX: Lazy<std::sync::Mutex<()>> = Lazy::new(|| std::sync::Mutex::new(()));

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    temp_dir: PathBuf,
    output_dir: PathBuf,
    gemini_base_url: String,
    gemini_api_key: String,
    gemini_connect_timeout: Duration,
    model_flash: String,
    model_pro: String,
    transcriber_temperature: f32,
    transcriber_thinking: ThinkingLevel,
    editor_temperature: f32,
    editor_thinking: ThinkingLevel,
    default_transcriber_model: ModelChoice,
    default_editor_model: ModelChoice,
    acquire_max_attempts: u32,
    transcribe_max_attempts: u32,
    edit_max_attempts: u32,
    render_max_attempts: u32,
    backoff_base_ms: u64,
    backoff_cap_ms: u64,
    backoff_multiplier: f64,
    max_concurrent_jobs: usize,
    max_jobs_per_requester: usize,
    stage_timeout: Duration,
    max_audio_bytes: u64,
    max_audio_duration: Duration,
    ytdlp_binary: PathBuf,
    pandoc_binary: PathBuf,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("missing environment variable: {0}")]
    Missing(&'static str),
    #[error("invalid value for {name}: {source}")]
    Invalid {
        name: &'static str,
        #[source]
        source: anyhow::Error,
    },
}

impl Config {
    /// 環境変数から Transcript Worker の設定値を読み込み、検証する。
    ///
    /// 必須の環境変数が揃っていない場合や、数値のパースに失敗した場合はエラーを返す。
    ///
    /// # Errors
    /// `GEMINI_API_KEY` が未設定、各種値のパースに失敗した場合、または
    /// `MAX_JOBS_PER_REQUESTER` が `MAX_CONCURRENT_JOBS` を超える場合は
    /// [`ConfigError`] を返す。
    pub fn from_env() -> Result<Self, ConfigError> {
        let gemini_api_key = env_var("GEMINI_API_KEY")?;
        let gemini_base_url = env::var("GEMINI_BASE_URL")
            .unwrap_or_else(|_| "https://generativelanguage.googleapis.com".to_string());
        let gemini_connect_timeout = parse_duration_ms("GEMINI_CONNECT_TIMEOUT_MS", 3000)?;

        let temp_dir = parse_path("TEMP_DIR", "/tmp/transcript_worker");
        let output_dir = parse_path("OUTPUT_DIR", ".");

        // Model table (flash/pro) and per-role generation parameters
        let model_flash =
            env::var("MODEL_FLASH").unwrap_or_else(|_| "gemini-3-flash-preview".to_string());
        let model_pro =
            env::var("MODEL_PRO").unwrap_or_else(|_| "gemini-3-pro-preview".to_string());
        let transcriber_temperature = parse_f64("TRANSCRIBER_TEMPERATURE", 1.0)? as f32;
        let transcriber_thinking = parse_thinking_level("TRANSCRIBER_THINKING_LEVEL", "low")?;
        let editor_temperature = parse_f64("EDITOR_TEMPERATURE", 1.0)? as f32;
        let editor_thinking = parse_thinking_level("EDITOR_THINKING_LEVEL", "high")?;
        let default_transcriber_model = parse_model_choice("DEFAULT_TRANSCRIBER_MODEL", "flash")?;
        let default_editor_model = parse_model_choice("DEFAULT_EDITOR_MODEL", "pro")?;

        // Per-stage retry budgets (attempt counts, initial call included)
        let acquire_max_attempts = parse_u32("ACQUIRE_MAX_ATTEMPTS", 2)?;
        let transcribe_max_attempts = parse_u32("TRANSCRIBE_MAX_ATTEMPTS", 3)?;
        let edit_max_attempts = parse_u32("EDIT_MAX_ATTEMPTS", 3)?;
        let render_max_attempts = parse_u32("RENDER_MAX_ATTEMPTS", 1)?;

        // Backoff settings (exponential + jitter)
        let backoff_base_ms = parse_u64("BACKOFF_BASE_MS", 1000)?;
        let backoff_cap_ms = parse_u64("BACKOFF_CAP_MS", 30000)?;
        let backoff_multiplier = parse_f64("BACKOFF_MULTIPLIER", 2.0)?;

        // Concurrency bounds: global and per requester
        let max_concurrent_jobs = parse_usize("MAX_CONCURRENT_JOBS", 4)?;
        let max_jobs_per_requester = parse_usize("MAX_JOBS_PER_REQUESTER", 2)?;
        if max_jobs_per_requester > max_concurrent_jobs {
            return Err(ConfigError::Invalid {
                name: "MAX_JOBS_PER_REQUESTER",
                source: anyhow::anyhow!(
                    "per-requester bound {max_jobs_per_requester} exceeds global bound {max_concurrent_jobs}"
                ),
            });
        }
        if max_concurrent_jobs == 0 || max_jobs_per_requester == 0 {
            return Err(ConfigError::Invalid {
                name: "MAX_CONCURRENT_JOBS",
                source: anyhow::anyhow!("concurrency bounds must be greater than zero"),
            });
        }

        // External collaborator call deadline, applied per attempt
        let stage_timeout = parse_duration_secs("STAGE_TIMEOUT_SECS", 600)?;

        // Media limits enforced by the acquire stage
        let max_audio_bytes = parse_u64("MAX_AUDIO_BYTES", 100 * 1024 * 1024)?;
        let max_audio_duration = parse_duration_secs("MAX_AUDIO_DURATION_SECS", 14400)?;

        let ytdlp_binary = parse_path("YTDLP_BIN", "yt-dlp");
        let pandoc_binary = parse_path("PANDOC_BIN", "pandoc");

        Ok(Self {
            temp_dir,
            output_dir,
            gemini_base_url,
            gemini_api_key,
            gemini_connect_timeout,
            model_flash,
            model_pro,
            transcriber_temperature,
            transcriber_thinking,
            editor_temperature,
            editor_thinking,
            default_transcriber_model,
            default_editor_model,
            acquire_max_attempts,
            transcribe_max_attempts,
            edit_max_attempts,
            render_max_attempts,
            backoff_base_ms,
            backoff_cap_ms,
            backoff_multiplier,
            max_concurrent_jobs,
            max_jobs_per_requester,
            stage_timeout,
            max_audio_bytes,
            max_audio_duration,
            ytdlp_binary,
            pandoc_binary,
        })
    }

    #[must_use]
    pub fn temp_dir(&self) -> &PathBuf {
        &self.temp_dir
    }

    #[must_use]
    pub fn output_dir(&self) -> &PathBuf {
        &self.output_dir
    }

    #[must_use]
    pub fn gemini_base_url(&self) -> &str {
        &self.gemini_base_url
    }

    #[must_use]
    pub fn gemini_api_key(&self) -> &str {
        &self.gemini_api_key
    }

    #[must_use]
    pub const fn gemini_connect_timeout(&self) -> Duration {
        self.gemini_connect_timeout
    }

    /// モデル選択（flash/pro）を具体的なモデルIDに解決する。
    #[must_use]
    pub fn model_id(&self, choice: ModelChoice) -> &str {
        match choice {
            ModelChoice::Flash => &self.model_flash,
            ModelChoice::Pro => &self.model_pro,
        }
    }

    #[must_use]
    pub const fn transcriber_temperature(&self) -> f32 {
        self.transcriber_temperature
    }

    #[must_use]
    pub const fn transcriber_thinking(&self) -> ThinkingLevel {
        self.transcriber_thinking
    }

    #[must_use]
    pub const fn editor_temperature(&self) -> f32 {
        self.editor_temperature
    }

    #[must_use]
    pub const fn editor_thinking(&self) -> ThinkingLevel {
        self.editor_thinking
    }

    #[must_use]
    pub const fn default_transcriber_model(&self) -> ModelChoice {
        self.default_transcriber_model
    }

    #[must_use]
    pub const fn default_editor_model(&self) -> ModelChoice {
        self.default_editor_model
    }

    #[must_use]
    pub const fn acquire_retry(&self) -> RetryConfig {
        self.retry_with(self.acquire_max_attempts)
    }

    #[must_use]
    pub const fn transcribe_retry(&self) -> RetryConfig {
        self.retry_with(self.transcribe_max_attempts)
    }

    #[must_use]
    pub const fn edit_retry(&self) -> RetryConfig {
        self.retry_with(self.edit_max_attempts)
    }

    #[must_use]
    pub const fn render_retry(&self) -> RetryConfig {
        self.retry_with(self.render_max_attempts)
    }

    const fn retry_with(&self, max_attempts: u32) -> RetryConfig {
        RetryConfig::new(
            max_attempts,
            self.backoff_base_ms,
            self.backoff_cap_ms,
            self.backoff_multiplier,
        )
    }

    #[must_use]
    pub const fn max_concurrent_jobs(&self) -> usize {
        self.max_concurrent_jobs
    }

    #[must_use]
    pub const fn max_jobs_per_requester(&self) -> usize {
        self.max_jobs_per_requester
    }

    #[must_use]
    pub const fn stage_timeout(&self) -> Duration {
        self.stage_timeout
    }

    #[must_use]
    pub const fn max_audio_bytes(&self) -> u64 {
        self.max_audio_bytes
    }

    #[must_use]
    pub const fn max_audio_duration(&self) -> Duration {
        self.max_audio_duration
    }

    #[must_use]
    pub fn ytdlp_binary(&self) -> &PathBuf {
        &self.ytdlp_binary
    }

    #[must_use]
    pub fn pandoc_binary(&self) -> &PathBuf {
        &self.pandoc_binary
    }
}

fn env_var(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn parse_path(name: &'static str, default: &str) -> PathBuf {
    PathBuf::from(env::var(name).unwrap_or_else(|_| default.to_string()))
}

fn parse_duration_secs(name: &'static str, default_secs: u64) -> Result<Duration, ConfigError> {
    let value = parse_u64(name, default_secs)?;
    Ok(Duration::from_secs(value))
}

fn parse_duration_ms(name: &'static str, default_ms: u64) -> Result<Duration, ConfigError> {
    let ms = parse_u64(name, default_ms)?;
    Ok(Duration::from_millis(ms))
}

fn parse_usize(name: &'static str, default: usize) -> Result<usize, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<usize>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_u32(name: &'static str, default: u32) -> Result<u32, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<u32>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_u64(name: &'static str, default: u64) -> Result<u64, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<u64>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_f64(name: &'static str, default: f64) -> Result<f64, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    raw.parse::<f64>().map_err(|error| ConfigError::Invalid {
        name,
        source: anyhow::Error::new(error),
    })
}

fn parse_thinking_level(
    name: &'static str,
    default: &str,
) -> Result<ThinkingLevel, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    match raw.to_lowercase().as_str() {
        "low" => Ok(ThinkingLevel::Low),
        "high" => Ok(ThinkingLevel::High),
        _ => Err(ConfigError::Invalid {
            name,
            source: anyhow::anyhow!("expected 'low' or 'high', got: {raw}"),
        }),
    }
}

fn parse_model_choice(name: &'static str, default: &str) -> Result<ModelChoice, ConfigError> {
    let raw = env::var(name).unwrap_or_else(|_| default.to_string());
    match raw.to_lowercase().as_str() {
        "flash" => Ok(ModelChoice::Flash),
        "pro" => Ok(ModelChoice::Pro),
        _ => Err(ConfigError::Invalid {
            name,
            source: anyhow::anyhow!("expected 'flash' or 'pro', got: {raw}"),
        }),
    }
}
