//! 文書レンダラ。
//!
//! Markdown成果物は構造化文書の直列化そのもの。PDFは外部の pandoc
//! （weasyprintエンジン）をサブプロセスとして呼び出して生成し、A4ページと
//! CJK対応フォントのスタイルを適用する。

use std::io;
use std::path::PathBuf;

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::clients::{DocumentRenderer, RenderError};
use crate::schema::StructuredText;

const PAGE_CSS: &str = r#"
@page {
    size: A4;
    margin: 2cm;
}

body {
    font-family: "Noto Sans CJK SC", "PingFang SC", "Hiragino Sans GB",
                 "Microsoft YaHei", "WenQuanYi Micro Hei", sans-serif;
    font-size: 12pt;
    line-height: 1.6;
    color: #333;
}

h1 {
    font-size: 24pt;
    color: #1a1a1a;
    border-bottom: 2px solid #333;
    padding-bottom: 0.3em;
}

h2 {
    font-size: 18pt;
    color: #2a2a2a;
    border-bottom: 1px solid #ccc;
    padding-bottom: 0.2em;
    margin-top: 1.5em;
}

p {
    margin: 0.8em 0;
    text-align: justify;
}

blockquote {
    border-left: 4px solid #ddd;
    margin: 1em 0;
    padding-left: 1em;
    color: #666;
}
"#;

pub struct PandocRenderer {
    binary: PathBuf,
}

impl PandocRenderer {
    #[must_use]
    pub fn new(binary: PathBuf) -> Self {
        Self { binary }
    }
}

#[async_trait]
impl DocumentRenderer for PandocRenderer {
    fn render_markdown(&self, document: &StructuredText) -> Vec<u8> {
        document.as_markdown().as_bytes().to_vec()
    }

    async fn render_pdf(&self, document: &StructuredText) -> Result<Vec<u8>, RenderError> {
        let scratch = ScratchDir::create().await?;
        let input_path = scratch.path.join("document.md");
        let css_path = scratch.path.join("page.css");
        let output_path = scratch.path.join("document.pdf");

        tokio::fs::write(&input_path, document.as_markdown()).await?;
        tokio::fs::write(&css_path, PAGE_CSS).await?;

        debug!(input = %input_path.display(), "converting document to pdf");
        let output = Command::new(&self.binary)
            .arg("--from")
            .arg("markdown")
            .arg("--pdf-engine")
            .arg("weasyprint")
            .arg("--css")
            .arg(&css_path)
            .arg("--output")
            .arg(&output_path)
            .arg(&input_path)
            .output()
            .await
            .map_err(|error| {
                if error.kind() == io::ErrorKind::NotFound {
                    RenderError::ConverterFailed(format!(
                        "{} is not installed",
                        self.binary.display()
                    ))
                } else {
                    RenderError::Io(error)
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(RenderError::ConverterFailed(
                stderr.lines().next().unwrap_or("unknown error").to_string(),
            ));
        }

        Ok(tokio::fs::read(&output_path).await?)
    }
}

/// レンダリング用の一時ディレクトリ。ドロップ時に削除する。
struct ScratchDir {
    path: PathBuf,
}

impl ScratchDir {
    async fn create() -> Result<Self, RenderError> {
        let path =
            std::env::temp_dir().join(format!("transcript-render-{}", Uuid::new_v4().simple()));
        tokio::fs::create_dir_all(&path).await?;
        Ok(Self { path })
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(error) = std::fs::remove_dir_all(&self.path) {
            warn!(path = %self.path.display(), %error, "failed to clean up render scratch dir");
        }
    }
}
