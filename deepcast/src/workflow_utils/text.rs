//! Cleanup of model output: `<think>` blocks and inline tool-call markup

use serde_json::Value;
use std::ops::Range;

const THINK_OPEN: &str = "<think>";
const THINK_CLOSE: &str = "</think>";
const TOOL_CALL_OPEN: &str = "[TOOL_CALL:";

/// Remove every complete `<think>...</think>` section
pub fn strip_thinking_tokens(text: &str) -> String {
    let mut text = text.to_string();
    while let (Some(start), Some(end)) = (text.find(THINK_OPEN), text.find(THINK_CLOSE)) {
        if end < start {
            // Stray closing tag before the opening one; drop it and keep going
            text.replace_range(end..end + THINK_CLOSE.len(), "");
            continue;
        }
        text.replace_range(start..end + THINK_CLOSE.len(), "");
    }
    text
}

/// A `[TOOL_CALL:<tool>:<json>]` expression found in model output
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallMarkup {
    pub tool: String,
    /// Raw parameter text between the tool name and the closing bracket
    pub raw_parameters: String,
    /// Parsed parameters, `None` when the body is not valid JSON
    pub parameters: Option<Value>,
    pub span: Range<usize>,
}

/// Locate every tool-call expression in `text`
///
/// JSON bodies are parsed with a streaming deserializer so brackets inside the
/// payload (e.g. a `tags` array) do not terminate the expression early.
pub fn find_tool_calls(text: &str) -> Vec<ToolCallMarkup> {
    let mut calls = Vec::new();
    let mut offset = 0;

    while let Some(found) = text[offset..].find(TOOL_CALL_OPEN) {
        let start = offset + found;
        let after_open = start + TOOL_CALL_OPEN.len();
        let Some(colon) = text[after_open..].find(':') else {
            break;
        };
        let tool = text[after_open..after_open + colon].trim();
        if tool.is_empty() || tool.contains(']') {
            offset = after_open;
            continue;
        }

        let body_start = after_open + colon + 1;
        let rest = &text[body_start..];
        let leading_ws = rest.len() - rest.trim_start().len();

        let mut parsed = serde_json::Deserializer::from_str(rest).into_iter::<Value>();
        let call = match parsed.next() {
            Some(Ok(value)) => {
                let body_end = body_start + parsed.byte_offset();
                let tail = &text[body_end..];
                let close = tail.len() - tail.trim_start().len();
                if tail[close..].starts_with(']') {
                    Some(ToolCallMarkup {
                        tool: tool.to_string(),
                        raw_parameters: text[body_start + leading_ws..body_end].to_string(),
                        parameters: Some(value),
                        span: start..body_end + close + 1,
                    })
                } else {
                    None
                }
            }
            _ => None,
        };

        let call = call.or_else(|| {
            // Not JSON: fall back to the first closing bracket
            rest.find(']').map(|end| ToolCallMarkup {
                tool: tool.to_string(),
                raw_parameters: rest[..end].trim().to_string(),
                parameters: None,
                span: start..body_start + end + 1,
            })
        });

        match call {
            Some(call) => {
                offset = call.span.end;
                calls.push(call);
            }
            None => break,
        }
    }

    calls
}

/// Remove tool-call markup from text
pub fn strip_tool_calls(text: &str) -> String {
    let calls = find_tool_calls(text);
    if calls.is_empty() {
        return text.to_string();
    }

    let mut cleaned = String::with_capacity(text.len());
    let mut cursor = 0;
    for call in calls {
        cleaned.push_str(&text[cursor..call.span.start]);
        cursor = call.span.end;
    }
    cleaned.push_str(&text[cursor..]);
    cleaned
}

/// Full cleanup applied to a task summary before it is stored
pub fn clean_summary(text: &str) -> String {
    strip_tool_calls(&strip_thinking_tokens(text)).trim().to_string()
}

/// Incremental `<think>` filter for streamed text
///
/// Visible text is released as soon as it is known not to be part of a
/// thinking section. An unterminated `<think>` holds back everything after it
/// until the closing tag arrives.
#[derive(Debug, Default)]
pub struct ThinkFilter {
    buffer: String,
    emit_index: usize,
}

impl ThinkFilter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a raw fragment and collect the newly visible segments
    pub fn push(&mut self, chunk: &str) -> Vec<String> {
        self.buffer.push_str(chunk);
        self.flush(false)
    }

    /// Release whatever visible text remains once the stream has ended
    pub fn finish(&mut self) -> Vec<String> {
        self.flush(true)
    }

    fn flush(&mut self, at_end: bool) -> Vec<String> {
        let mut segments = Vec::new();
        loop {
            let pending = &self.buffer[self.emit_index..];
            match pending.find(THINK_OPEN) {
                None => {
                    // Hold back a trailing partial "<think" unless the stream is over
                    let hold = if at_end { 0 } else { partial_prefix_len(pending, THINK_OPEN) };
                    let end = self.emit_index + pending.len() - hold;
                    if end > self.emit_index {
                        segments.push(self.buffer[self.emit_index..end].to_string());
                        self.emit_index = end;
                    }
                    break;
                }
                Some(rel_start) => {
                    let start = self.emit_index + rel_start;
                    if start > self.emit_index {
                        segments.push(self.buffer[self.emit_index..start].to_string());
                        self.emit_index = start;
                    }
                    match self.buffer[start..].find(THINK_CLOSE) {
                        Some(rel_end) => {
                            self.emit_index = start + rel_end + THINK_CLOSE.len();
                        }
                        None => break,
                    }
                }
            }
        }
        segments
    }
}

/// Length of the longest suffix of `text` that is a proper prefix of `tag`
fn partial_prefix_len(text: &str, tag: &str) -> usize {
    (1..tag.len())
        .rev()
        .find(|&len| text.ends_with(&tag[..len]))
        .unwrap_or(0)
}
