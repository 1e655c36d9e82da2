/// 文字起こしテキストと成果物ファイル名まわりのユーティリティ。
use once_cell::sync::Lazy;
use regex::Regex;
use tracing::debug;

static H1_TITLE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^#\s+(.+?)\s*$").expect("title pattern must compile"));

static UNSAFE_FILENAME_CHAR: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[^\w\-.]").expect("filename pattern must compile"));

/// 同一文字の過剰な繰り返しを1文字に畳み込む。
///
/// 文字起こしモデルが稀に出力する「ああああ…」のような暴走列への対処。
/// `max_repeats` を超えて連続した文字だけが対象となる。
#[must_use]
pub fn collapse_repeated_chars(text: &str, max_repeats: usize) -> String {
    let mut result = String::with_capacity(text.len());
    let mut run_char: Option<char> = None;
    let mut run_len = 0_usize;

    for ch in text.chars() {
        if Some(ch) == run_char {
            run_len += 1;
        } else {
            if let Some(prev) = run_char {
                flush_run(&mut result, prev, run_len, max_repeats);
            }
            run_char = Some(ch);
            run_len = 1;
        }
    }
    if let Some(prev) = run_char {
        flush_run(&mut result, prev, run_len, max_repeats);
    }

    result
}

fn flush_run(result: &mut String, ch: char, run_len: usize, max_repeats: usize) {
    if run_len > max_repeats {
        debug!(character = %ch, count = run_len, "collapsing repeated character run");
        result.push(ch);
    } else {
        for _ in 0..run_len {
            result.push(ch);
        }
    }
}

/// Markdown文書の最初のH1見出しをタイトルとして取り出す。
#[must_use]
pub fn extract_title(markdown: &str) -> Option<String> {
    H1_TITLE
        .captures(markdown)
        .and_then(|captures| captures.get(1))
        .map(|title| title.as_str().trim().to_string())
        .filter(|title| !title.is_empty())
}

/// ファイル名をサニタイズする。
///
/// パス要素を取り除き、安全でない文字をアンダースコアに置換し、長さを制限する。
/// 空になった場合は `file` にフォールバックする。
#[must_use]
pub fn sanitize_filename(filename: &str, max_length: usize) -> String {
    // Strip any path components first
    let base = filename
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(filename);

    let (name, ext) = match base.rsplit_once('.') {
        Some((name, ext)) if !name.is_empty() => (name, Some(ext)),
        _ => (base, None),
    };

    let mut name = UNSAFE_FILENAME_CHAR.replace_all(name, "_").to_string();
    if name.chars().count() > max_length {
        name = name.chars().take(max_length).collect();
    }
    if name.is_empty() || name.chars().all(|c| c == '_' || c == '.') {
        name = "file".to_string();
    }

    match ext {
        Some(ext) => {
            let ext = UNSAFE_FILENAME_CHAR.replace_all(ext, "_");
            format!("{name}.{ext}")
        }
        None => name,
    }
}
