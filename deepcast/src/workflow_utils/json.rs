//! JSON extraction and repair for model output

use crate::workflow_utils::text::strip_thinking_tokens;
use deepcast_sdk::ScriptTurn;
use regex::Regex;
use serde_json::Value;
use std::sync::LazyLock;

static CODE_BLOCK: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json|JSON)?\s*(.*?)```").unwrap());
static TRAILING_COMMA: LazyLock<Regex> = LazyLock::new(|| Regex::new(r",\s*([\]}])").unwrap());
static MISSING_COMMA: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\}\s*\{").unwrap());
static FLAT_OBJECT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\{[^{}]*\}").unwrap());
static ROLE_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""role"\s*:\s*"((?:[^"\\]|\\.)*)""#).unwrap());
static CONTENT_FIELD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#""content"\s*:\s*"((?:[^"\\]|\\.)*)""#).unwrap());

/// Contents of the first fenced code block, if any
pub fn extract_code_block(text: &str) -> Option<&str> {
    CODE_BLOCK
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
}

/// Slice from the first `open` to the last `close`, inclusive
pub fn slice_between(text: &str, open: char, close: char) -> Option<&str> {
    let start = text.find(open)?;
    let end = text.rfind(close)?;
    (end > start).then(|| &text[start..=end])
}

/// First JSON object or array found in free text
///
/// Tries the text (or its code block) as a whole, then the outermost
/// `{...}`, then the outermost `[...]`.
pub fn extract_json_value(text: &str) -> Option<Value> {
    let text = extract_code_block(text).unwrap_or(text).trim();
    serde_json::from_str(text)
        .ok()
        .or_else(|| {
            slice_between(text, '{', '}').and_then(|candidate| serde_json::from_str(candidate).ok())
        })
        .or_else(|| {
            slice_between(text, '[', ']').and_then(|candidate| serde_json::from_str(candidate).ok())
        })
}

/// Fix the delimiter mistakes models commonly make
///
/// Removes trailing commas, inserts commas between adjacent objects and
/// closes an array that was cut off after its last complete object.
pub fn repair_json(text: &str) -> String {
    let mut repaired = TRAILING_COMMA.replace_all(text.trim(), "$1").into_owned();
    repaired = MISSING_COMMA.replace_all(&repaired, "},{").into_owned();

    if repaired.starts_with('[') && !repaired.ends_with(']') {
        if let Some(last) = repaired.rfind('}') {
            repaired.truncate(last + 1);
        }
        repaired.push(']');
    }
    repaired
}

/// Failure to recover any dialogue from model output
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScriptParseError {
    #[error("script output is empty")]
    Empty,
    #[error("no dialogue turns could be recovered from script output: {preview}")]
    Unrecoverable { preview: String },
}

/// Recovery strategies for script output, tried in order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryStrategy {
    /// The whole text is a JSON array
    Direct,
    /// Array inside a fenced code block
    CodeBlock,
    /// First `[` to last `]`
    BracketSlice,
    /// Bracket slice (or code block) after [`repair_json`]
    DelimiterRepair,
    /// Each flat `{...}` object on its own, with field regexes as a last resort
    ObjectRecovery,
}

impl RecoveryStrategy {
    pub const ORDER: [RecoveryStrategy; 5] = [
        RecoveryStrategy::Direct,
        RecoveryStrategy::CodeBlock,
        RecoveryStrategy::BracketSlice,
        RecoveryStrategy::DelimiterRepair,
        RecoveryStrategy::ObjectRecovery,
    ];

    /// `None` when the strategy does not apply or recovers nothing usable
    fn apply(self, text: &str) -> Option<Vec<ScriptTurn>> {
        match self {
            RecoveryStrategy::Direct => turns_from_array(text),
            RecoveryStrategy::CodeBlock => extract_code_block(text).and_then(turns_from_array),
            RecoveryStrategy::BracketSlice => {
                slice_between(text, '[', ']').and_then(turns_from_array)
            }
            RecoveryStrategy::DelimiterRepair => {
                let source = extract_code_block(text).unwrap_or(text);
                let start = source.find('[')?;
                let candidate = match source.rfind(']') {
                    Some(end) if end > start => &source[start..=end],
                    _ => &source[start..],
                };
                turns_from_array(&repair_json(candidate))
            }
            RecoveryStrategy::ObjectRecovery => {
                let turns: Vec<ScriptTurn> = FLAT_OBJECT
                    .find_iter(text)
                    .filter_map(|m| turn_from_object_text(m.as_str()))
                    .collect();
                (!turns.is_empty()).then_some(turns)
            }
        }
    }
}

/// Parse a podcast script out of model output
///
/// Thinking sections are removed first, then each [`RecoveryStrategy`] is
/// tried in order. Items without string `role` and `content` are dropped.
/// A well-formed empty array is a valid (empty) script.
pub fn parse_script(text: &str) -> Result<Vec<ScriptTurn>, ScriptParseError> {
    let cleaned = strip_thinking_tokens(text);
    let cleaned = cleaned.trim();
    if cleaned.is_empty() {
        return Err(ScriptParseError::Empty);
    }

    for strategy in RecoveryStrategy::ORDER {
        if let Some(turns) = strategy.apply(cleaned) {
            tracing::debug!(?strategy, turns = turns.len(), "script parsed");
            return Ok(turns);
        }
    }

    Err(ScriptParseError::Unrecoverable {
        preview: cleaned.chars().take(200).collect(),
    })
}

fn turns_from_array(candidate: &str) -> Option<Vec<ScriptTurn>> {
    let items = match serde_json::from_str::<Value>(candidate.trim()).ok()? {
        Value::Array(items) => items,
        Value::Object(mut object) => match object.remove("script") {
            Some(Value::Array(items)) => items,
            _ => return None,
        },
        _ => return None,
    };
    if items.is_empty() {
        return Some(Vec::new());
    }

    let turns: Vec<ScriptTurn> = items.iter().filter_map(turn_from_value).collect();
    (!turns.is_empty()).then_some(turns)
}

fn turn_from_value(value: &Value) -> Option<ScriptTurn> {
    let role = value.get("role")?.as_str()?;
    let content = value.get("content")?.as_str()?;
    Some(ScriptTurn::new(role, content))
}

fn turn_from_object_text(object: &str) -> Option<ScriptTurn> {
    if let Ok(value) = serde_json::from_str::<Value>(&repair_json(object)) {
        if let Some(turn) = turn_from_value(&value) {
            return Some(turn);
        }
    }

    let role = ROLE_FIELD.captures(object)?;
    let content = CONTENT_FIELD.captures(object)?;
    Some(ScriptTurn::new(unescape(&role[1]), unescape(&content[1])))
}

fn unescape(raw: &str) -> String {
    serde_json::from_str::<String>(&format!("\"{}\"", raw)).unwrap_or_else(|_| raw.to_string())
}
