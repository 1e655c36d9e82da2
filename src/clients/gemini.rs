//! Gemini generateContent HTTPクライアント。
//!
//! 文字起こしと編集の両コラボレータ実装を兼ねる。音声はインラインbase64で
//! 送信し、モデル・温度・思考予算はジョブのスナップショットから渡される。

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD as BASE64;
use reqwest::{Client, StatusCode, Url};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use async_trait::async_trait;

use crate::clients::{AudioRef, EditingService, ServiceError, TranscriptionService};
use crate::config::Config;
use crate::settings::ModelConfig;

pub(crate) const TRANSCRIPTION_PROMPT: &str = "Transcribe this audio. If the language is Chinese, please use Simplified Chinese characters. Provide only the direct transcription text without any introductory phrases.";

pub(crate) const USER_PROMPT_PREFIX: &str = "Here's the transcript:\n\n";

pub(crate) const DEFAULT_EDITOR_SYSTEM_PROMPT: &str = r"You are a professional meeting-minutes generation assistant. Upon receiving the user's raw transcript, output a structured Markdown document according to the following requirements.

## Language Rules
- **Summary and Key Points**: Always output in **Chinese**, regardless of the transcript's language
- **Transcript**: Preserve the **original language** of the speech (do not translate)

## Format

Divide into three sections with level-2 headings:

### 1. Summary (中文)
- No more than 300 Chinese characters
- Capture the main purpose, key decisions, and outcomes

### 2. Key Points (中文)
- Up to 20 concise bullet points
- Focus on actionable items, decisions, and important information

### 3. Transcript (保持原文语言)
- **Correct mistranscriptions**: Fix any clearly erroneous words or phrases based on context (output only the corrected version, do not show original errors)
- **Clean up**: Remove all fillers, stammers, repetitions, and meaningless padding
- **Paragraph breaks**: Split by speaker change or natural topic shifts (not by rigid word/sentence counts)

## Content Requirements
- Do **not** add new information or commentary, only refine what's in the original
- Preserve full semantic integrity; do **not** alter facts

## Output Requirements
- Start directly with `## 📝 Summary`
- Output only the structured Markdown, no explanations, acknowledgments, or dialogue";

pub(crate) const TRANSLATION_PROMPT_ADDITION: &str = r"

## Translation Mode (ENABLED)
Since translation mode is enabled, you must add inline Chinese translations to the Transcript section:

1. **Detect language**: First determine if the transcript is primarily in Chinese
2. **If NOT Chinese**: After each paragraph in the Transcript section, add a blockquote with the Chinese translation
3. **If Chinese**: No translation needed, output normally

### Translation Format
For non-Chinese transcripts, add a `> ` blockquote line with the Chinese translation after each paragraph.

### Translation Requirements
- Translate the meaning accurately, not word-for-word
- Maintain the same paragraph structure
- Keep translations natural and readable in Chinese";

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
    #[serde(rename = "systemInstruction", skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    text: Option<String>,
    #[serde(rename = "inlineData", skip_serializing_if = "Option::is_none")]
    inline_data: Option<InlineData>,
}

impl Part {
    fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            inline_data: None,
        }
    }

    fn inline_data(mime_type: impl Into<String>, data: String) -> Self {
        Self {
            text: None,
            inline_data: Some(InlineData {
                mime_type: mime_type.into(),
                data,
            }),
        }
    }
}

#[derive(Debug, Serialize)]
struct InlineData {
    #[serde(rename = "mimeType")]
    mime_type: String,
    data: String,
}

#[derive(Debug, Serialize)]
struct GenerationConfig {
    temperature: f32,
    #[serde(rename = "thinkingConfig")]
    thinking_config: ThinkingConfig,
}

#[derive(Debug, Serialize)]
struct ThinkingConfig {
    #[serde(rename = "thinkingBudget")]
    thinking_budget: u32,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(rename = "promptFeedback")]
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<CandidateContent>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
struct CandidatePart {
    text: Option<String>,
}

#[derive(Debug, Clone)]
pub struct GeminiClient {
    client: Client,
    base_url: Url,
    api_key: String,
}

impl GeminiClient {
    /// # Errors
    /// HTTPクライアントの構築、またはベースURLのパースに失敗した場合はエラーを返す。
    pub fn new(config: &Config) -> anyhow::Result<Self> {
        use anyhow::Context as _;

        let client = Client::builder()
            .connect_timeout(config.gemini_connect_timeout())
            .timeout(config.stage_timeout())
            .build()
            .context("failed to build gemini client")?;
        let base_url = Url::parse(config.gemini_base_url()).context("invalid gemini base URL")?;

        Ok(Self {
            client,
            base_url,
            api_key: config.gemini_api_key().to_string(),
        })
    }

    #[cfg(test)]
    pub(crate) fn new_for_test(base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: Url::parse(&base_url.into()).expect("test base URL must parse"),
            api_key: "test-key".to_string(),
        }
    }

    async fn generate(
        &self,
        model: &ModelConfig,
        system_instruction: Option<&str>,
        parts: Vec<Part>,
    ) -> Result<String, ServiceError> {
        let url = self
            .base_url
            .join(&format!("v1beta/models/{}:generateContent", model.model))
            .map_err(|error| ServiceError::Unavailable(format!("invalid request URL: {error}")))?;

        let request = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts,
            }],
            system_instruction: system_instruction.map(|text| Content {
                role: None,
                parts: vec![Part::text(text)],
            }),
            generation_config: GenerationConfig {
                temperature: model.temperature,
                thinking_config: ThinkingConfig {
                    thinking_budget: model.thinking.token_budget(),
                },
            },
        };

        debug!(model = %model.model, "sending generateContent request");
        let response = self
            .client
            .post(url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(classify_send_error)?;

        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(ServiceError::RateLimited);
        }
        if status.is_server_error() {
            return Err(ServiceError::Unavailable(format!(
                "gemini returned status {status}"
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ServiceError::Rejected(format!(
                "gemini returned status {status}: {}",
                truncate_error_body(&body)
            )));
        }

        let body: GenerateContentResponse = response.json().await.map_err(|error| {
            ServiceError::Unavailable(format!("malformed gemini response: {error}"))
        })?;

        if let Some(feedback) = &body.prompt_feedback {
            if let Some(reason) = &feedback.block_reason {
                return Err(ServiceError::Rejected(format!(
                    "prompt blocked: {reason}"
                )));
            }
        }

        let text: String = body
            .candidates
            .first()
            .and_then(|candidate| candidate.content.as_ref())
            .map(|content| {
                content
                    .parts
                    .iter()
                    .filter_map(|part| part.text.as_deref())
                    .collect::<Vec<_>>()
                    .join("")
            })
            .unwrap_or_default();

        if text.trim().is_empty() {
            warn!(model = %model.model, "gemini returned an empty result");
            return Err(ServiceError::Unavailable(
                "gemini returned an empty result".to_string(),
            ));
        }

        Ok(text)
    }
}

#[derive(Debug, Deserialize)]
struct PromptFeedback {
    #[serde(rename = "blockReason")]
    block_reason: Option<String>,
}

#[async_trait]
impl TranscriptionService for GeminiClient {
    async fn transcribe(
        &self,
        audio: &AudioRef,
        model: &ModelConfig,
    ) -> Result<String, ServiceError> {
        let bytes = tokio::fs::read(&audio.path).await.map_err(|error| {
            ServiceError::Unavailable(format!(
                "failed to read audio {}: {error}",
                audio.path.display()
            ))
        })?;

        debug!(
            path = %audio.path.display(),
            size_bytes = bytes.len(),
            "uploading audio inline"
        );
        let parts = vec![
            Part::text(TRANSCRIPTION_PROMPT),
            Part::inline_data(audio.mime_type.clone(), BASE64.encode(bytes)),
        ];
        self.generate(model, None, parts).await
    }
}

#[async_trait]
impl EditingService for GeminiClient {
    async fn edit(
        &self,
        transcript: &str,
        model: &ModelConfig,
        translation_enabled: bool,
    ) -> Result<String, ServiceError> {
        let mut system_prompt = DEFAULT_EDITOR_SYSTEM_PROMPT.to_string();
        if translation_enabled {
            system_prompt.push_str(TRANSLATION_PROMPT_ADDITION);
        }

        let user_content = format!("{USER_PROMPT_PREFIX}{transcript}");
        self.generate(
            model,
            Some(&system_prompt),
            vec![Part::text(user_content)],
        )
        .await
    }
}

fn classify_send_error(error: reqwest::Error) -> ServiceError {
    if error.is_timeout() || error.is_connect() {
        ServiceError::Unavailable(format!("network failure: {error}"))
    } else {
        ServiceError::Unavailable(error.to_string())
    }
}

/// エラーレスポンス本文をログ・エラーメッセージ向けに切り詰める。
fn truncate_error_body(body: &str) -> String {
    const MAX_LEN: usize = 300;
    if body.chars().count() <= MAX_LEN {
        body.to_string()
    } else {
        let truncated: String = body.chars().take(MAX_LEN).collect();
        format!("{truncated}... (truncated)")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::path::PathBuf;

    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use crate::settings::ThinkingLevel;

    fn model() -> ModelConfig {
        ModelConfig {
            model: "gemini-3-flash-preview".to_string(),
            temperature: 1.0,
            thinking: ThinkingLevel::Low,
        }
    }

    fn success_body(text: &str) -> serde_json::Value {
        serde_json::json!({
            "candidates": [
                { "content": { "parts": [ { "text": text } ] } }
            ]
        })
    }

    fn write_audio_file() -> (tempfile::TempDir, AudioRef) {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("audio.mp3");
        let mut file = std::fs::File::create(&path).expect("create audio file");
        file.write_all(b"fake mp3 bytes").expect("write audio file");
        let audio = AudioRef {
            path: path.clone(),
            mime_type: "audio/mpeg".to_string(),
            size_bytes: 14,
            duration: None,
        };
        (dir, audio)
    }

    #[tokio::test]
    async fn transcribe_posts_inline_audio_and_returns_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-3-flash-preview:generateContent"))
            .and(header("x-goog-api-key", "test-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(success_body("hello world")))
            .mount(&server)
            .await;

        let client = GeminiClient::new_for_test(server.uri());
        let (_dir, audio) = write_audio_file();

        let transcript = client
            .transcribe(&audio, &model())
            .await
            .expect("transcription should succeed");
        assert_eq!(transcript, "hello world");
    }

    #[tokio::test]
    async fn transcribe_maps_429_to_rate_limited() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let client = GeminiClient::new_for_test(server.uri());
        let (_dir, audio) = write_audio_file();

        let error = client
            .transcribe(&audio, &model())
            .await
            .expect_err("must fail");
        assert!(matches!(error, ServiceError::RateLimited));
    }

    #[tokio::test]
    async fn server_errors_map_to_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = GeminiClient::new_for_test(server.uri());
        let (_dir, audio) = write_audio_file();

        let error = client
            .transcribe(&audio, &model())
            .await
            .expect_err("must fail");
        assert!(matches!(error, ServiceError::Unavailable(_)));
    }

    #[tokio::test]
    async fn blocked_prompt_maps_to_rejected() {
        let server = MockServer::start().await;
        let body = serde_json::json!({
            "candidates": [],
            "promptFeedback": { "blockReason": "SAFETY" }
        });
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(body))
            .mount(&server)
            .await;

        let client = GeminiClient::new_for_test(server.uri());
        let (_dir, audio) = write_audio_file();

        let error = client
            .transcribe(&audio, &model())
            .await
            .expect_err("must fail");
        assert!(matches!(error, ServiceError::Rejected(message) if message.contains("SAFETY")));
    }

    #[tokio::test]
    async fn empty_candidates_map_to_unavailable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"candidates": []})),
            )
            .mount(&server)
            .await;

        let client = GeminiClient::new_for_test(server.uri());
        let (_dir, audio) = write_audio_file();

        let error = client
            .transcribe(&audio, &model())
            .await
            .expect_err("must fail");
        assert!(matches!(error, ServiceError::Unavailable(_)));
    }

    #[tokio::test]
    async fn edit_sends_system_instruction_with_translation_addition() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1beta/models/gemini-3-flash-preview:generateContent"))
            .and(body_partial_json(serde_json::json!({
                "generationConfig": { "thinkingConfig": { "thinkingBudget": 1024 } }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(success_body("## edited")))
            .mount(&server)
            .await;

        let client = GeminiClient::new_for_test(server.uri());
        let edited = client
            .edit("raw transcript", &model(), true)
            .await
            .expect("edit should succeed");
        assert_eq!(edited, "## edited");
    }

    #[tokio::test]
    async fn missing_audio_file_maps_to_unavailable() {
        let client = GeminiClient::new_for_test("http://localhost:1");
        let audio = AudioRef {
            path: PathBuf::from("/nonexistent/audio.mp3"),
            mime_type: "audio/mpeg".to_string(),
            size_bytes: 1,
            duration: None,
        };

        let error = client
            .transcribe(&audio, &model())
            .await
            .expect_err("must fail");
        assert!(matches!(error, ServiceError::Unavailable(_)));
    }

    #[test]
    fn truncate_keeps_short_bodies_intact() {
        assert_eq!(truncate_error_body("short"), "short");
        let long = "x".repeat(400);
        let truncated = truncate_error_body(&long);
        assert!(truncated.ends_with("(truncated)"));
        assert!(truncated.chars().count() < 400);
    }
}
