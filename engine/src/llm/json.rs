//! Resilient JSON parsing for LLM responses
//!
//! Stages that ask a model for JSON parse the answer in three explicit tiers:
//!
//! 1. **Strict**: the whole (trimmed) response is a JSON object.
//! 2. **Extracted**: the object is buried in prose. Tried in order: the body
//!    of the first markdown code fence, the span from the first `{` to the
//!    last `}`, and the brace-balanced object at each `{` in turn.
//! 3. **Unparsed**: no object could be located; the raw text is handed back
//!    so the stage can apply its documented textual fallback.

use serde_json::{Map, Value};

/// Outcome of [`parse_object`]
#[derive(Debug, Clone, PartialEq)]
pub enum ParsedJson {
    Strict(Map<String, Value>),
    Extracted(Map<String, Value>),
    Unparsed(String),
}

impl ParsedJson {
    /// The decoded object, if any tier produced one
    pub fn object(&self) -> Option<&Map<String, Value>> {
        match self {
            ParsedJson::Strict(map) | ParsedJson::Extracted(map) => Some(map),
            ParsedJson::Unparsed(_) => None,
        }
    }

    /// Consume into the decoded object, if any
    pub fn into_object(self) -> Option<Map<String, Value>> {
        match self {
            ParsedJson::Strict(map) | ParsedJson::Extracted(map) => Some(map),
            ParsedJson::Unparsed(_) => None,
        }
    }

    /// Tier name for logs
    pub fn tier(&self) -> &'static str {
        match self {
            ParsedJson::Strict(_) => "strict",
            ParsedJson::Extracted(_) => "extracted",
            ParsedJson::Unparsed(_) => "unparsed",
        }
    }
}

/// Parse an LLM response into a JSON object, falling through the three tiers
pub fn parse_object(content: &str) -> ParsedJson {
    if let Some(map) = parse_strict(content) {
        return ParsedJson::Strict(map);
    }
    if let Some(map) = extract_object(content) {
        return ParsedJson::Extracted(map);
    }
    tracing::debug!(
        "No JSON object in {} chars of model output",
        content.chars().count()
    );
    ParsedJson::Unparsed(content.trim().to_string())
}

/// Tier 1: the entire response is an object
pub fn parse_strict(content: &str) -> Option<Map<String, Value>> {
    match serde_json::from_str::<Value>(content.trim()) {
        Ok(Value::Object(map)) => Some(map),
        _ => None,
    }
}

/// Tier 2: locate an object inside surrounding prose
pub fn extract_object(content: &str) -> Option<Map<String, Value>> {
    let text = content.trim();
    let fenced = fenced_body(text).map(|body| ("code fence", body));
    let outer = outer_span(text).map(|span| ("outer braces", span));
    let balanced = balanced_spans(text).map(|span| ("balanced braces", span));

    fenced
        .into_iter()
        .chain(outer)
        .chain(balanced)
        .find_map(|(locator, candidate)| {
            let map = parse_strict(candidate)?;
            tracing::debug!("Located JSON object via {}", locator);
            Some(map)
        })
}

/// Body of the first closed code fence, without its language tag line
fn fenced_body(text: &str) -> Option<&str> {
    let mut parts = text.splitn(3, "```");
    parts.next()?;
    let block = parts.next()?;
    // A fence is only usable once it is closed
    parts.next()?;
    let (_tag, body) = block.split_once('\n')?;
    Some(body).filter(|b| !b.trim().is_empty())
}

/// From the first `{` to the last `}`
fn outer_span(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (start < end).then(|| &text[start..=end])
}

/// Brace-balanced objects opening at each `{`, left to right.
/// Catches objects that trailing or leading prose braces hide from
/// [`outer_span`].
fn balanced_spans(text: &str) -> impl Iterator<Item = &str> {
    text.match_indices('{')
        .take(MAX_BALANCED_STARTS)
        .filter_map(move |(start, _)| balanced_from(&text[start..]))
}

/// Opening braces tried by [`balanced_spans`] before giving up
const MAX_BALANCED_STARTS: usize = 16;

/// The object that `s` opens with, ignoring braces inside string literals
fn balanced_from(s: &str) -> Option<&str> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut chars = s.char_indices();

    while let Some((i, ch)) = chars.next() {
        match ch {
            '\\' if in_string => {
                chars.next();
            }
            '"' => in_string = !in_string,
            '{' if !in_string => depth += 1,
            '}' if !in_string => {
                depth = depth.checked_sub(1)?;
                if depth == 0 {
                    return Some(&s[..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Trimmed non-empty string field
pub fn str_field<'a>(map: &'a Map<String, Value>, key: &str) -> Option<&'a str> {
    map.get(key)
        .and_then(|v| v.as_str())
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

/// String list field (array or separator-delimited string)
pub fn list_field(map: &Map<String, Value>, key: &str) -> Vec<String> {
    map.get(key)
        .map(quill_sdk::types::string_list)
        .unwrap_or_default()
}
