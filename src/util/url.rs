/// 対応プラットフォームのURL判定とメディアID抽出。
///
/// YouTube（watch / shorts / embed / v / youtu.be 形式）、Bilibili（BV/av ID）、
/// Apple Podcasts（番組ID）に対応する。
use once_cell::sync::Lazy;
use regex::Regex;

use crate::job::Platform;

static YOUTUBE_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"(?:youtube(?:-nocookie)?\.com/(?:watch\?(?:[^#\s]*&)*v=|shorts/|embed/|v/)|youtu\.be/)([A-Za-z0-9_-]{11})",
    )
    .expect("youtube id pattern must compile")
});

static BILIBILI_ID: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"bilibili\.com/video/(BV[0-9A-Za-z]{10}|av\d+)")
        .expect("bilibili id pattern must compile")
});

static APPLE_PODCASTS_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"podcasts\.apple\.com/\S*/id(\d+)").expect("podcast id pattern must compile"));

/// テキストが対応プラットフォームのURLであればそのプラットフォームを返す。
#[must_use]
pub fn detect_platform(text: &str) -> Option<Platform> {
    let text = text.trim();
    if text.contains("youtube.com")
        || text.contains("youtu.be")
        || text.contains("youtube-nocookie.com")
    {
        Some(Platform::Youtube)
    } else if text.contains("bilibili.com") {
        Some(Platform::Bilibili)
    } else if text.contains("podcasts.apple.com") {
        Some(Platform::ApplePodcasts)
    } else {
        None
    }
}

/// URLからプラットフォーム固有のメディアIDを抽出する。
///
/// IDが見つからない場合は `None`（対応プラットフォームのドメインでも
/// 動画・エピソードを指していないURLはここで弾かれる）。
#[must_use]
pub fn extract_media_id(url: &str, platform: Platform) -> Option<String> {
    let url = url.trim();
    let pattern = match platform {
        Platform::Youtube => &YOUTUBE_ID,
        Platform::Bilibili => &BILIBILI_ID,
        Platform::ApplePodcasts => &APPLE_PODCASTS_ID,
    };
    pattern
        .captures(url)
        .and_then(|captures| captures.get(1))
        .map(|id| id.as_str().to_string())
}
