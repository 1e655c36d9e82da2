//! Per-requester configurable behavior and its per-job immutable snapshot.
//!
//! The mutable store lives outside the pipeline; a job only ever sees a
//! [`SettingsSnapshot`] captured at submission, so mid-flight settings
//! changes affect future jobs only.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::clients::SettingsResolver;
use crate::config::Config;
use crate::job::RequesterId;

/// モデルの思考レベル。思考トークン予算に対応する。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ThinkingLevel {
    Low,
    High,
}

impl ThinkingLevel {
    /// 思考レベルに対応するトークン予算。
    #[must_use]
    pub const fn token_budget(self) -> u32 {
        match self {
            Self::Low => 1024,
            Self::High => 8192,
        }
    }
}

/// 要求者が選択できるモデルの階級。具体的なモデルIDは [`Config`] が解決する。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelChoice {
    Flash,
    Pro,
}

impl ModelChoice {
    #[must_use]
    pub const fn label(self) -> &'static str {
        match self {
            Self::Flash => "flash",
            Self::Pro => "pro",
        }
    }
}

/// 1ロール分の解決済みモデル設定。
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    pub model: String,
    pub temperature: f32,
    pub thinking: ThinkingLevel,
}

/// 要求者ごとの可変設定。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Settings {
    pub transcriber_model: ModelChoice,
    pub editor_model: ModelChoice,
    pub translation_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            transcriber_model: ModelChoice::Flash,
            editor_model: ModelChoice::Pro,
            translation_enabled: false,
        }
    }
}

/// ジョブ開始時点の設定の不変コピー。
///
/// ジョブ実行中に要求者が設定を変更しても、実行中のジョブの挙動は変わらない。
#[derive(Debug, Clone)]
pub struct SettingsSnapshot {
    pub transcriber: ModelConfig,
    pub editor: ModelConfig,
    pub translation_enabled: bool,
    pub taken_at: DateTime<Utc>,
}

impl SettingsSnapshot {
    /// 可変設定と構成からスナップショットを作る。モデル選択をここで具体的な
    /// モデルID・温度・思考レベルへ解決する。
    #[must_use]
    pub fn capture(settings: &Settings, config: &Config) -> Self {
        Self {
            transcriber: ModelConfig {
                model: config.model_id(settings.transcriber_model).to_string(),
                temperature: config.transcriber_temperature(),
                thinking: config.transcriber_thinking(),
            },
            editor: ModelConfig {
                model: config.model_id(settings.editor_model).to_string(),
                temperature: config.editor_temperature(),
                thinking: config.editor_thinking(),
            },
            translation_enabled: settings.translation_enabled,
            taken_at: Utc::now(),
        }
    }
}

/// インメモリの要求者別設定ストア。
///
/// プロセスを跨ぐ永続化は行わない。読み出しは [`SettingsResolver`] として
/// パイプライン側から同期的に行われる。
#[derive(Debug)]
pub struct SettingsStore {
    defaults: Settings,
    inner: RwLock<HashMap<RequesterId, Settings>>,
}

impl SettingsStore {
    #[must_use]
    pub fn new(defaults: Settings) -> Self {
        Self {
            defaults,
            inner: RwLock::new(HashMap::new()),
        }
    }

    /// [`Config`] の既定モデル選択を初期値とするストアを作る。
    #[must_use]
    pub fn from_config(config: &Config) -> Self {
        Self::new(Settings {
            transcriber_model: config.default_transcriber_model(),
            editor_model: config.default_editor_model(),
            translation_enabled: false,
        })
    }

    pub fn set_transcriber_model(&self, requester: RequesterId, choice: ModelChoice) {
        let mut inner = self.inner.write().expect("settings store lock poisoned");
        inner.entry(requester).or_insert(self.defaults).transcriber_model = choice;
    }

    pub fn set_editor_model(&self, requester: RequesterId, choice: ModelChoice) {
        let mut inner = self.inner.write().expect("settings store lock poisoned");
        inner.entry(requester).or_insert(self.defaults).editor_model = choice;
    }

    pub fn set_translation(&self, requester: RequesterId, enabled: bool) {
        let mut inner = self.inner.write().expect("settings store lock poisoned");
        inner.entry(requester).or_insert(self.defaults).translation_enabled = enabled;
    }
}

impl SettingsResolver for SettingsStore {
    fn resolve(&self, requester: RequesterId) -> Settings {
        let inner = self.inner.read().expect("settings store lock poisoned");
        inner.get(&requester).copied().unwrap_or(self.defaults)
    }
}
