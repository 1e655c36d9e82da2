//! 編集済み文書のセクション構造の検証。
//!
//! 編集サービスの出力は「要約 → （任意の）要点 → 原文トランスクリプト」の
//! 順のレベル2見出しを持つMarkdownでなければならない。翻訳モードでは
//! トランスクリプト段落の下に `> ` 引用行として訳文が入る。

use std::fmt;

/// 検証済みの構造化文書。
#[derive(Debug, Clone)]
pub struct StructuredText {
    raw: String,
    pub summary: String,
    pub transcript: String,
    pub has_key_points: bool,
    /// トランスクリプト節内の翻訳引用行の数。
    pub translation_lines: usize,
}

impl StructuredText {
    #[must_use]
    pub fn as_markdown(&self) -> &str {
        &self.raw
    }

    #[must_use]
    pub fn into_markdown(self) -> String {
        self.raw
    }
}

impl fmt::Display for StructuredText {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Summary,
    KeyPoints,
    Transcript,
}

/// Markdown文書をセクション文法に対して検証し、成功すれば分解結果を返す。
///
/// # Errors
/// 文法違反の一覧を返す。呼び出し側（編集ステージ）が再試行可否を決める。
pub fn parse_structured(markdown: &str) -> Result<StructuredText, Vec<String>> {
    let mut violations = Vec::new();

    let mut current = Section::Preamble;
    let mut summary = String::new();
    let mut transcript = String::new();
    let mut saw_summary = false;
    let mut saw_key_points = false;
    let mut saw_transcript = false;
    let mut translation_lines = 0_usize;

    for line in markdown.lines() {
        if let Some(heading) = line.strip_prefix("## ") {
            let lowered = heading.to_lowercase();
            if lowered.contains("summary") {
                if saw_summary {
                    violations.push("duplicate summary section".to_string());
                }
                if saw_transcript {
                    violations.push("summary section appears after transcript".to_string());
                }
                saw_summary = true;
                current = Section::Summary;
            } else if lowered.contains("key points") {
                if !saw_summary {
                    violations.push("key points section appears before summary".to_string());
                }
                if saw_transcript {
                    violations.push("key points section appears after transcript".to_string());
                }
                saw_key_points = true;
                current = Section::KeyPoints;
            } else if lowered.contains("transcript") {
                if saw_transcript {
                    violations.push("duplicate transcript section".to_string());
                }
                saw_transcript = true;
                current = Section::Transcript;
            } else {
                violations.push(format!("unexpected section heading: {heading}"));
            }
            continue;
        }

        match current {
            Section::Summary => {
                summary.push_str(line);
                summary.push('\n');
            }
            Section::Transcript => {
                if line.starts_with("> ") {
                    translation_lines += 1;
                }
                transcript.push_str(line);
                transcript.push('\n');
            }
            Section::Preamble | Section::KeyPoints => {}
        }
    }

    if !saw_summary {
        violations.push("missing summary section".to_string());
    } else if summary.trim().is_empty() {
        violations.push("summary section is empty".to_string());
    }

    if !saw_transcript {
        violations.push("missing transcript section".to_string());
    } else if transcript.trim().is_empty() {
        violations.push("transcript section is empty".to_string());
    }

    if violations.is_empty() {
        Ok(StructuredText {
            raw: markdown.to_string(),
            summary: summary.trim().to_string(),
            transcript: transcript.trim().to_string(),
            has_key_points: saw_key_points,
            translation_lines,
        })
    } else {
        Err(violations)
    }
}
