//! Character-safe text helpers
//!
//! Drafts are mostly CJK, so every length in the engine is counted in
//! `char`s, never bytes, and every truncation lands on a char boundary.

use regex::Regex;
use std::collections::HashSet;
use std::sync::OnceLock;

/// Sentence terminators, CJK and Latin
const SENTENCE_TERMINATORS: [char; 6] = ['。', '！', '？', '.', '!', '?'];

/// Length in characters
pub fn char_len(s: &str) -> usize {
    s.chars().count()
}

/// First `max` characters of `s`
pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// First `max` characters of the trimmed text, with an ellipsis when cut
pub fn excerpt(s: &str, max: usize) -> String {
    let trimmed = s.trim();
    if char_len(trimmed) <= max {
        trimmed.to_string()
    } else {
        format!("{}…", truncate_chars(trimmed, max))
    }
}

/// Trim entries, drop empties and drop later duplicates
pub fn dedupe<I, S>(items: I) -> Vec<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    for item in items {
        let trimmed = item.as_ref().trim();
        if trimmed.is_empty() {
            continue;
        }
        if seen.insert(trimmed.to_string()) {
            out.push(trimmed.to_string());
        }
    }
    out
}

/// Case-insensitive substring test
pub fn contains_ci(haystack: &str, needle: &str) -> bool {
    haystack.to_lowercase().contains(&needle.to_lowercase())
}

/// Terms from `terms` found in `text`, case-insensitively
pub fn find_terms<'a>(text: &str, terms: &'a [String]) -> Vec<&'a str> {
    let lower = text.to_lowercase();
    terms
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty() && lower.contains(&t.to_lowercase()))
        .collect()
}

/// Remove every case-insensitive occurrence of the terms.
///
/// Repeats until none is left, since a removal can join two halves of a term.
pub fn remove_terms(text: &str, terms: &[String]) -> String {
    let patterns: Vec<Regex> = terms
        .iter()
        .map(|t| t.trim())
        .filter(|t| !t.is_empty())
        .filter_map(|t| Regex::new(&format!("(?i){}", regex::escape(t))).ok())
        .collect();

    let mut out = text.to_string();
    loop {
        let before = char_len(&out);
        for re in &patterns {
            out = re.replace_all(&out, "").into_owned();
        }
        if char_len(&out) == before {
            return out;
        }
    }
}

/// Split on sentence terminators, dropping empty pieces
pub fn split_sentences(text: &str) -> Vec<&str> {
    text.split(SENTENCE_TERMINATORS)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect()
}

/// Split on blank lines, dropping empty paragraphs
pub fn split_paragraphs(text: &str) -> Vec<&str> {
    static BLANK_LINE: OnceLock<Regex> = OnceLock::new();
    let re = BLANK_LINE.get_or_init(|| Regex::new(r"\n[ \t\r\u{3000}]*\n").expect("valid regex"));
    re.split(text)
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

/// Split on whitespace and punctuation (ASCII and CJK)
pub fn split_tokens(text: &str) -> Vec<&str> {
    text.split(|c: char| c.is_whitespace() || is_punctuation(c))
        .filter(|t| !t.is_empty())
        .collect()
}

fn is_punctuation(c: char) -> bool {
    c.is_ascii_punctuation()
        || matches!(
            c,
            '，' | '。'
                | '！'
                | '？'
                | '；'
                | '：'
                | '、'
                | '“'
                | '”'
                | '‘'
                | '’'
                | '（'
                | '）'
                | '《'
                | '》'
                | '「'
                | '」'
                | '『'
                | '』'
                | '【'
                | '】'
                | '…'
                | '—'
                | '·'
        )
}

/// True for characters in the common CJK ideograph blocks
pub fn is_cjk(c: char) -> bool {
    matches!(c as u32, 0x3400..=0x4DBF | 0x4E00..=0x9FFF | 0xF900..=0xFAFF)
}

/// True when the text contains quoted dialogue
pub fn has_dialogue(text: &str) -> bool {
    static QUOTED: OnceLock<Regex> = OnceLock::new();
    let re = QUOTED.get_or_init(|| {
        Regex::new(r#"“[^”]+”|「[^」]+」|『[^』]+』|"[^"\n]+""#).expect("valid regex")
    });
    re.is_match(text)
}
