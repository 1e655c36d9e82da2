//! yt-dlp サブプロセスによるメディア取得。
//!
//! URLソースは yt-dlp で音声(mp3)として抽出し、ファイルソースは拡張子と
//! 申告MIMEを検査してそのまま参照を返す。標準エラー出力の内容から
//! [`FetchError`] の種別（恒久/一時）へ分類する。

use std::io;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::process::Command;
use tracing::{debug, info};

use crate::clients::{AudioRef, FetchError, MediaFetcher};
use crate::job::{MediaSource, Platform};
use crate::util::url::extract_media_id;

/// 受け付ける音声拡張子。
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "wav", "webm", "ogg", "flac", "aac", "opus"];

/// yt-dlp の後処理が mp3 以外を残した場合に探す拡張子。
const FALLBACK_EXTENSIONS: &[&str] = &["mp3", "m4a", "webm", "opus", "wav"];

fn mime_type_for(extension: &str) -> &'static str {
    match extension {
        "m4a" => "audio/mp4",
        "wav" => "audio/wav",
        "webm" => "audio/webm",
        "ogg" | "opus" => "audio/ogg",
        "flac" => "audio/flac",
        "aac" => "audio/aac",
        _ => "audio/mpeg",
    }
}

pub struct YtDlpFetcher {
    binary: PathBuf,
}

impl YtDlpFetcher {
    #[must_use]
    pub fn new(binary: PathBuf) -> Self {
        Self { binary }
    }

    async fn download(
        &self,
        url: &str,
        platform: Platform,
        workdir: &Path,
    ) -> Result<AudioRef, FetchError> {
        let media_id = extract_media_id(url, platform).ok_or_else(|| {
            FetchError::Unsupported(format!("could not extract a {platform} media id from URL"))
        })?;

        info!(%platform, media_id = %media_id, "downloading audio");
        let output_template = workdir.join(format!("{media_id}.%(ext)s"));
        let output = Command::new(&self.binary)
            .arg("--format")
            .arg("bestaudio/best")
            .arg("--extract-audio")
            .arg("--audio-format")
            .arg("mp3")
            .arg("--audio-quality")
            .arg("128K")
            .arg("--output")
            .arg(&output_template)
            .arg("--no-warnings")
            .arg("--quiet")
            .arg(url)
            .output()
            .await
            .map_err(|error| {
                if error.kind() == io::ErrorKind::NotFound {
                    FetchError::Unsupported(format!("{} is not installed", self.binary.display()))
                } else {
                    FetchError::NetworkFailure(error.to_string())
                }
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(classify_ytdlp_failure(&stderr));
        }

        let audio_path = locate_output(workdir, &media_id)?;
        let metadata = tokio::fs::metadata(&audio_path)
            .await
            .map_err(|_| FetchError::NotFound)?;

        let extension = audio_path
            .extension()
            .and_then(|extension| extension.to_str())
            .unwrap_or("mp3");
        debug!(path = %audio_path.display(), size_bytes = metadata.len(), "audio downloaded");
        Ok(AudioRef {
            mime_type: mime_type_for(extension).to_string(),
            size_bytes: metadata.len(),
            duration: None,
            path: audio_path,
        })
    }
}

#[async_trait]
impl MediaFetcher for YtDlpFetcher {
    async fn fetch(&self, source: &MediaSource, workdir: &Path) -> Result<AudioRef, FetchError> {
        match source {
            MediaSource::Url { url, platform } => self.download(url, *platform, workdir).await,
            MediaSource::File {
                local_path,
                declared_mime,
            } => local_audio_ref(local_path, declared_mime.as_deref()),
        }
    }
}

/// yt-dlp の失敗を標準エラー出力の内容から分類する。
fn classify_ytdlp_failure(stderr: &str) -> FetchError {
    let lowered = stderr.to_lowercase();
    if lowered.contains("video unavailable")
        || lowered.contains("private video")
        || lowered.contains("not found")
        || lowered.contains("404")
        || lowered.contains("has been removed")
    {
        FetchError::NotFound
    } else if lowered.contains("unsupported url") || lowered.contains("no suitable extractor") {
        FetchError::Unsupported(first_line(stderr))
    } else {
        // Default to transient: most remaining failures are network-shaped
        // and a retry within the acquire budget is cheap.
        FetchError::NetworkFailure(first_line(stderr))
    }
}

fn first_line(text: &str) -> String {
    text.lines().next().unwrap_or("unknown error").to_string()
}

/// 後処理済みの出力ファイルを探す。mp3が基本だが、後処理が走らなかった
/// 場合に備えて他の拡張子も確認する。
fn locate_output(workdir: &Path, media_id: &str) -> Result<PathBuf, FetchError> {
    for extension in FALLBACK_EXTENSIONS {
        let candidate = workdir.join(format!("{media_id}.{extension}"));
        if candidate.exists() {
            return Ok(candidate);
        }
    }
    Err(FetchError::NotFound)
}

fn local_audio_ref(path: &Path, declared_mime: Option<&str>) -> Result<AudioRef, FetchError> {
    let metadata = std::fs::metadata(path).map_err(|_| FetchError::NotFound)?;

    let extension = path
        .extension()
        .and_then(|extension| extension.to_str())
        .map(str::to_lowercase);

    // webm containers are accepted even when declared as video: they are
    // commonly audio-only.
    let is_webm = extension.as_deref() == Some("webm")
        || declared_mime == Some("video/webm");
    let declared_audio = declared_mime.is_some_and(|mime| mime.starts_with("audio/"));
    let known_extension = extension
        .as_deref()
        .is_some_and(|extension| AUDIO_EXTENSIONS.contains(&extension));

    if !declared_audio && !known_extension && !is_webm {
        return Err(FetchError::Unsupported(format!(
            "{} does not look like an audio file",
            path.display()
        )));
    }

    let mime_type = declared_mime.map_or_else(
        || mime_type_for(extension.as_deref().unwrap_or("mp3")).to_string(),
        str::to_string,
    );

    Ok(AudioRef {
        path: path.to_path_buf(),
        mime_type,
        size_bytes: metadata.len(),
        duration: None,
    })
}
