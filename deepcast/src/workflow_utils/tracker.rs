//! Append-only log of tool calls made by concurrent sub-agents
//!
//! Records are delivered exactly once: either pushed through the active
//! [`ToolEventSink::Push`] callback at record time, or collected by a later
//! [`ToolCallTracker::drain`].

use deepcast_sdk::{EventEnvelope, ProgressEvent};
use parking_lot::Mutex;
use regex::Regex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

static TASK_TAG: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"task_(\d+)").unwrap());
static TASK_TITLE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?:任务|[Tt]ask)\s*(\d+)").unwrap());
static NOTE_ID_LINE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*ID:\s*(\S[^\n]*)").unwrap());

/// Name of the note-taking tool
pub const NOTE_TOOL: &str = "note";

/// A tool call as reported by an agent, before the tracker assigns an id
#[derive(Debug, Clone)]
pub struct ToolCallInput {
    pub agent: String,
    pub tool: String,
    pub raw_parameters: String,
    pub parameters: Value,
    pub result: String,
}

/// One recorded tool call. Never mutated after creation.
#[derive(Debug, Clone, PartialEq)]
pub struct ToolCallRecord {
    pub id: u64,
    pub agent: String,
    pub tool: String,
    pub raw_parameters: String,
    pub parameters: Value,
    pub result: String,
    pub task_id: Option<u32>,
    pub note_id: Option<String>,
    pushed: bool,
}

impl ToolCallRecord {
    /// `action` field of the parameters, if any
    pub fn action(&self) -> Option<&str> {
        self.parameters.get("action").and_then(Value::as_str)
    }

    pub fn parameter_str(&self, key: &str) -> Option<&str> {
        self.parameters.get(key).and_then(Value::as_str)
    }
}

pub type ToolEventCallback = Arc<dyn Fn(EventEnvelope) + Send + Sync>;

/// Delivery strategy for recorded tool calls
#[derive(Clone, Default)]
pub enum ToolEventSink {
    /// Queue records until the next drain
    #[default]
    Buffered,
    /// Forward each record immediately; drains return nothing
    Push(ToolEventCallback),
}

impl ToolEventSink {
    pub fn push<F>(callback: F) -> Self
    where
        F: Fn(EventEnvelope) + Send + Sync + 'static,
    {
        ToolEventSink::Push(Arc::new(callback))
    }

    pub fn is_push(&self) -> bool {
        matches!(self, ToolEventSink::Push(_))
    }
}

impl std::fmt::Debug for ToolEventSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ToolEventSink::Buffered => f.write_str("Buffered"),
            ToolEventSink::Push(_) => f.write_str("Push"),
        }
    }
}

/// Receives note references correlated from tool calls
pub trait NoteAttachment {
    /// Record that `note_id` belongs to task `task_id`
    fn attach_note(&self, task_id: u32, note_id: &str, note_path: Option<String>);
}

#[derive(Default)]
struct TrackerInner {
    records: Vec<ToolCallRecord>,
    cursor: usize,
    sink: ToolEventSink,
}

pub struct ToolCallTracker {
    notes_workspace: Option<PathBuf>,
    inner: Mutex<TrackerInner>,
}

impl ToolCallTracker {
    pub fn new(notes_workspace: Option<PathBuf>) -> Self {
        Self {
            notes_workspace,
            inner: Mutex::new(TrackerInner::default()),
        }
    }

    pub fn notes_workspace(&self) -> Option<&Path> {
        self.notes_workspace.as_deref()
    }

    /// Append a record, forwarding it immediately when a push sink is active
    pub fn record(&self, input: ToolCallInput) -> u64 {
        let task_id = infer_task_id(&input.parameters);
        let note_id = if input.tool == NOTE_TOOL {
            input
                .parameters
                .get("note_id")
                .and_then(Value::as_str)
                .map(str::to_string)
                .or_else(|| extract_note_id(&input.result))
        } else {
            None
        };

        let (record, callback) = {
            let mut inner = self.inner.lock();
            let callback = match &inner.sink {
                ToolEventSink::Push(callback) => Some(Arc::clone(callback)),
                ToolEventSink::Buffered => None,
            };
            let record = ToolCallRecord {
                id: inner.records.len() as u64 + 1,
                agent: input.agent,
                tool: input.tool,
                raw_parameters: input.raw_parameters,
                parameters: input.parameters,
                result: input.result,
                task_id,
                note_id,
                pushed: callback.is_some(),
            };
            inner.records.push(record.clone());
            (record, callback)
        };

        tracing::info!(
            agent = %record.agent,
            tool = %record.tool,
            task_id = ?record.task_id,
            note_id = ?record.note_id,
            "tool call recorded"
        );

        if let Some(callback) = callback {
            callback(self.render(&record, None));
        }
        record.id
    }

    /// Take every record appended since the previous drain
    ///
    /// Note references found in the new records are attached to their tasks
    /// regardless of the sink. Records already pushed are never returned, and
    /// while a push sink is active the result is always empty.
    pub fn drain(&self, tasks: &dyn NoteAttachment, step: Option<usize>) -> Vec<EventEnvelope> {
        let (new_records, push_active) = {
            let mut inner = self.inner.lock();
            if inner.cursor >= inner.records.len() {
                return Vec::new();
            }
            let new_records = inner.records[inner.cursor..].to_vec();
            inner.cursor = inner.records.len();
            (new_records, inner.sink.is_push())
        };

        for record in &new_records {
            if let (Some(task_id), Some(note_id)) = (record.task_id, record.note_id.as_deref()) {
                if !note_id.is_empty() {
                    tasks.attach_note(task_id, note_id, self.note_path(note_id));
                }
            }
        }

        if push_active {
            return Vec::new();
        }

        new_records
            .iter()
            .filter(|record| !record.pushed)
            .map(|record| self.render(record, step))
            .collect()
    }

    /// Clear all records and the drain cursor
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        inner.records.clear();
        inner.cursor = 0;
    }

    /// Install a delivery strategy, returning the previous one
    pub fn set_event_sink(&self, sink: ToolEventSink) -> ToolEventSink {
        std::mem::replace(&mut self.inner.lock().sink, sink)
    }

    pub fn is_push(&self) -> bool {
        self.inner.lock().sink.is_push()
    }

    /// Snapshot of every record since the last reset
    pub fn history(&self) -> Vec<ToolCallRecord> {
        self.inner.lock().records.clone()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Most recent note written as a report, looked up through call history
    ///
    /// Matches create/update calls on the note tool whose `note_type` is
    /// `conclusion` or whose title starts with `title_prefix`.
    pub fn find_report_note_id(&self, title_prefix: &str) -> Option<String> {
        let records = self.history();
        records.iter().rev().find_map(|record| {
            if record.tool != NOTE_TOOL || !matches!(record.action(), Some("create" | "update")) {
                return None;
            }
            let is_conclusion = record.parameter_str("note_type") == Some("conclusion");
            let has_report_title = record
                .parameter_str("title")
                .is_some_and(|title| title.starts_with(title_prefix));
            if !is_conclusion && !has_report_title {
                return None;
            }
            record
                .parameter_str("note_id")
                .map(str::to_string)
                .or_else(|| extract_note_id(&record.result))
        })
    }

    pub fn note_path(&self, note_id: &str) -> Option<String> {
        self.notes_workspace
            .as_ref()
            .map(|dir| dir.join(format!("{}.md", note_id)).display().to_string())
    }

    fn render(&self, record: &ToolCallRecord, step: Option<usize>) -> EventEnvelope {
        let mut envelope = EventEnvelope::new(ProgressEvent::ToolCall {
            event_id: record.id,
            agent: record.agent.clone(),
            tool: record.tool.clone(),
            parameters: record.parameters.clone(),
            result: record.result.clone(),
            note_id: record.note_id.clone(),
            note_path: record.note_id.as_deref().and_then(|id| self.note_path(id)),
        });
        envelope.task_id = record.task_id;
        envelope.step = step;
        envelope
    }
}

/// Best-effort task id from tool parameters
///
/// Tries an explicit `task_id`, then a `task_<n>` tag, then a "Task n" title.
pub fn infer_task_id(parameters: &Value) -> Option<u32> {
    let object = parameters.as_object()?;

    if let Some(value) = object.get("task_id") {
        let parsed = match value {
            Value::Number(n) => n.as_u64().and_then(|n| u32::try_from(n).ok()),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        };
        if parsed.is_some() {
            return parsed;
        }
    }

    if let Some(Value::Array(tags)) = object.get("tags") {
        for tag in tags {
            let tag = match tag {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            if let Some(id) = capture_number(&TASK_TAG, &tag) {
                return Some(id);
            }
        }
    }

    object
        .get("title")
        .and_then(Value::as_str)
        .and_then(|title| capture_number(&TASK_TITLE, title))
}

/// Note id from a note tool response (`ID: <value>` line)
pub fn extract_note_id(response: &str) -> Option<String> {
    NOTE_ID_LINE
        .captures(response)
        .map(|caps| caps[1].trim().to_string())
        .filter(|id| !id.is_empty())
}

fn capture_number(pattern: &Regex, text: &str) -> Option<u32> {
    pattern
        .captures(text)
        .and_then(|caps| caps[1].parse().ok())
}
