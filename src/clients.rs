//! 外部コラボレータの契約。
//!
//! パイプラインはここで定義されたトレイト越しにのみ外部と通信する。
//! 実装はサブモジュール（Gemini HTTP クライアント、yt-dlp フェッチャ、
//! 文書レンダラ）にあり、テストではモックに差し替えられる。

pub mod gemini;
pub mod renderer;
pub mod ytdlp;

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use thiserror::Error;

use crate::job::{MediaSource, RequesterId};
use crate::schema::StructuredText;
use crate::settings::{ModelConfig, Settings};
use crate::util::retry::FailureClass;

/// 取得済み音声への参照。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioRef {
    pub path: PathBuf,
    pub mime_type: String,
    pub size_bytes: u64,
    /// 取得元ツールが報告した場合のみ判明する。
    pub duration: Option<Duration>,
}

/// メディア取得の失敗。
#[derive(Debug, Error)]
pub enum FetchError {
    #[error("media not found")]
    NotFound,
    #[error("unsupported source: {0}")]
    Unsupported(String),
    #[error("network failure: {0}")]
    NetworkFailure(String),
    #[error("media exceeds limits: {0}")]
    TooLarge(String),
}

impl FailureClass for FetchError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::NetworkFailure(_))
    }
}

/// 文字起こし・編集サービスの失敗。
#[derive(Debug, Error)]
pub enum ServiceError {
    #[error("rate limited")]
    RateLimited,
    #[error("service unavailable: {0}")]
    Unavailable(String),
    #[error("content rejected: {0}")]
    Rejected(String),
}

impl FailureClass for ServiceError {
    fn is_transient(&self) -> bool {
        matches!(self, Self::RateLimited | Self::Unavailable(_))
    }
}

/// 文書レンダリングの失敗。レンダリングはローカル処理であり、失敗は
/// 入力（編集結果）の不備を意味するため常に恒久的と分類される。
#[derive(Debug, Error)]
pub enum RenderError {
    #[error("converter failed: {0}")]
    ConverterFailed(String),
    #[error("render I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

impl FailureClass for RenderError {
    fn is_transient(&self) -> bool {
        false
    }
}

/// メディア取得コラボレータ。URLまたはローカルファイルを音声参照に解決する。
#[async_trait]
pub trait MediaFetcher: Send + Sync {
    async fn fetch(&self, source: &MediaSource, workdir: &Path) -> Result<AudioRef, FetchError>;
}

/// 音声認識コラボレータ。
#[async_trait]
pub trait TranscriptionService: Send + Sync {
    async fn transcribe(&self, audio: &AudioRef, model: &ModelConfig)
    -> Result<String, ServiceError>;
}

/// 編集・整形コラボレータ。構造化されたMarkdownを返す。
#[async_trait]
pub trait EditingService: Send + Sync {
    async fn edit(
        &self,
        transcript: &str,
        model: &ModelConfig,
        translation_enabled: bool,
    ) -> Result<String, ServiceError>;
}

/// 文書レンダリングコラボレータ。
#[async_trait]
pub trait DocumentRenderer: Send + Sync {
    /// 構造化文書をMarkdownバイト列として直列化する。
    fn render_markdown(&self, document: &StructuredText) -> Vec<u8>;

    /// 構造化文書をPDFに変換する。
    ///
    /// # Errors
    /// 変換ツールの失敗、または入出力エラーの場合は [`RenderError`] を返す。
    async fn render_pdf(&self, document: &StructuredText) -> Result<Vec<u8>, RenderError>;
}

/// 設定ストアからの同期読み出し。ジョブ開始時のスナップショット取得にのみ使う。
pub trait SettingsResolver: Send + Sync {
    fn resolve(&self, requester: RequesterId) -> Settings;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_network_fetch_failures_are_transient() {
        assert!(FetchError::NetworkFailure("timeout".into()).is_transient());
        assert!(!FetchError::NotFound.is_transient());
        assert!(!FetchError::Unsupported("vimeo".into()).is_transient());
        assert!(!FetchError::TooLarge("601s over 600s cap".into()).is_transient());
    }

    #[test]
    fn rate_limit_and_outage_are_transient_rejection_is_not() {
        assert!(ServiceError::RateLimited.is_transient());
        assert!(ServiceError::Unavailable("502".into()).is_transient());
        assert!(!ServiceError::Rejected("safety".into()).is_transient());
    }

    #[test]
    fn render_failures_are_always_permanent() {
        assert!(!RenderError::ConverterFailed("bad input".into()).is_transient());
    }
}
