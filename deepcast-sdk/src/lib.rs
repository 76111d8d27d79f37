//! Shared types for the deepcast research pipeline.
//!
//! The pipeline itself lives in the `deepcast` crate. This crate holds what a
//! collaborator or a transport needs to know about it: the task model, the
//! progress event schema and the collaborator traits.

pub mod collaborators;

pub use async_trait::async_trait;
pub use collaborators::{
    AudioGenerator, ContextBuilder, NoteStore, Planner, ProgressCallback, Reporter, Retriever,
    ScriptWriter, Summarizer, SummaryStream, Synthesizer,
};

use serde::{Deserialize, Serialize};
use std::fmt;

// ============================================================================
// Task model
// ============================================================================

/// Lifecycle of a planned task
///
/// `pending → in_progress → {completed | skipped | failed}`. Terminal states are final.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Skipped,
    Failed,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Skipped => "skipped",
            TaskStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Skipped | TaskStatus::Failed
        )
    }

    /// Whether the state machine allows moving from `self` to `next`
    pub fn can_transition_to(self, next: TaskStatus) -> bool {
        match (self, next) {
            (TaskStatus::Pending, TaskStatus::InProgress) => true,
            // A worker may die before it claims its task
            (TaskStatus::Pending, TaskStatus::Failed) => true,
            (TaskStatus::InProgress, next) => next.is_terminal(),
            _ => false,
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected status change on a [`PlannedTask`]
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("task {task_id}: illegal status transition {from} -> {to}")]
pub struct TransitionError {
    pub task_id: u32,
    pub from: TaskStatus,
    pub to: TaskStatus,
}

/// Planner output for a single sub-question, before an id is assigned
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskDraft {
    pub title: String,
    pub intent: String,
    pub query: String,
}

/// One unit of research work produced by the planning stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedTask {
    pub id: u32,
    pub title: String,
    pub intent: String,
    pub query: String,
    #[serde(default)]
    pub status: TaskStatus,
    #[serde(default)]
    pub summary: Option<String>,
    #[serde(default)]
    pub sources_summary: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub notices: Vec<String>,
    #[serde(default)]
    pub note_id: Option<String>,
    #[serde(default)]
    pub note_path: Option<String>,
    #[serde(default)]
    pub stream_token: Option<String>,
}

impl PlannedTask {
    pub fn new(
        id: u32,
        title: impl Into<String>,
        intent: impl Into<String>,
        query: impl Into<String>,
    ) -> Self {
        Self {
            id,
            title: title.into(),
            intent: intent.into(),
            query: query.into(),
            status: TaskStatus::Pending,
            summary: None,
            sources_summary: None,
            notices: Vec::new(),
            note_id: None,
            note_path: None,
            stream_token: None,
        }
    }

    pub fn from_draft(id: u32, draft: TaskDraft) -> Self {
        Self::new(id, draft.title, draft.intent, draft.query)
    }

    /// Move to `next`, refusing anything the lifecycle does not allow
    pub fn transition(&mut self, next: TaskStatus) -> Result<(), TransitionError> {
        if !self.status.can_transition_to(next) {
            return Err(TransitionError {
                task_id: self.id,
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }
}

/// One dialogue turn of the podcast script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScriptTurn {
    pub role: String,
    pub content: String,
}

impl ScriptTurn {
    pub fn new(role: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: role.into(),
            content: content.into(),
        }
    }
}

/// A single hit returned by the search backend
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchResult {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub raw_content: Option<String>,
}

/// Normalized response of the retrieval collaborator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchOutcome {
    pub results: Option<Vec<SearchResult>>,
    #[serde(default)]
    pub notices: Vec<String>,
    #[serde(default)]
    pub answer: Option<String>,
    pub backend: String,
}

impl SearchOutcome {
    pub fn has_results(&self) -> bool {
        self.results.as_ref().is_some_and(|r| !r.is_empty())
    }
}

/// Everything the summarizer needs to know about one task
#[derive(Debug, Clone)]
pub struct SummaryRequest {
    pub topic: String,
    pub task: PlannedTask,
    pub context: String,
}

/// Read-only copy of the run state handed to the reporter
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResearchSnapshot {
    pub topic: String,
    pub tasks: Vec<PlannedTask>,
    pub sources_gathered: Vec<String>,
    pub web_research_results: Vec<String>,
}

/// Per-item progress reported by the audio generator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AudioProgress {
    pub current: usize,
    pub total: usize,
    pub role: String,
    pub preview: String,
}

/// Note tool invocation, as written by a model inside `[TOOL_CALL:note:{...}]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum NoteRequest {
    Create {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<u32>,
        title: String,
        #[serde(default = "default_note_type")]
        note_type: String,
        #[serde(default)]
        tags: Vec<String>,
        #[serde(default)]
        content: String,
    },
    Update {
        note_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        task_id: Option<u32>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        title: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note_type: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tags: Option<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
    Read {
        note_id: String,
    },
}

fn default_note_type() -> String {
    "general".to_string()
}

impl NoteRequest {
    pub fn action(&self) -> &'static str {
        match self {
            NoteRequest::Create { .. } => "create",
            NoteRequest::Update { .. } => "update",
            NoteRequest::Read { .. } => "read",
        }
    }
}

// ============================================================================
// Progress events
// ============================================================================

/// Top-level stage announced by a `stage_change` event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    Report,
    Script,
    Audio,
    Synthesis,
}

/// Progress events produced by a research run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ProgressEvent {
    /// Free-form status line (run start, search notices)
    Status { message: String },
    /// Planned tasks, sent once before workers start
    TodoList { tasks: Vec<PlannedTask> },
    /// A task changed status
    TaskStatus {
        status: TaskStatus,
        title: String,
        intent: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        query: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        summary: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        sources_summary: Option<String>,
        #[serde(default)]
        note_id: Option<String>,
        #[serde(default)]
        note_path: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        detail: Option<String>,
    },
    /// Sources gathered for a task
    Sources {
        latest_sources: String,
        raw_context: String,
        backend: String,
        #[serde(default)]
        note_id: Option<String>,
        #[serde(default)]
        note_path: Option<String>,
    },
    /// Incremental summary text for a task
    TaskSummaryChunk {
        content: String,
        #[serde(default)]
        note_id: Option<String>,
    },
    /// A side-effecting tool call made by a sub-agent
    ToolCall {
        event_id: u64,
        agent: String,
        tool: String,
        parameters: serde_json::Value,
        result: String,
        #[serde(default)]
        note_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note_path: Option<String>,
    },
    /// The run entered a new top-level stage
    StageChange { stage: Stage, message: String },
    /// Human-readable progress line
    Log { message: String },
    FinalReport {
        report: String,
        #[serde(default)]
        note_id: Option<String>,
        #[serde(default)]
        note_path: Option<String>,
    },
    PodcastScript { script: Vec<ScriptTurn>, turns: usize },
    AudioStart { total: usize, message: String },
    AudioProgress {
        current: usize,
        total: usize,
        role: String,
        preview: String,
        message: String,
    },
    AudioGenerated { files: Vec<String>, count: usize },
    PodcastReady { file: String },
    ReportNote {
        note_id: String,
        title: String,
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        note_path: Option<String>,
    },
    Done,
    Error { detail: String },
}

impl ProgressEvent {
    pub fn status(message: impl Into<String>) -> Self {
        ProgressEvent::Status {
            message: message.into(),
        }
    }

    pub fn log(message: impl Into<String>) -> Self {
        ProgressEvent::Log {
            message: message.into(),
        }
    }

    pub fn stage(stage: Stage, message: impl Into<String>) -> Self {
        ProgressEvent::StageChange {
            stage,
            message: message.into(),
        }
    }

    /// The `type` tag this event carries on the wire
    pub fn kind(&self) -> &'static str {
        match self {
            ProgressEvent::Status { .. } => "status",
            ProgressEvent::TodoList { .. } => "todo_list",
            ProgressEvent::TaskStatus { .. } => "task_status",
            ProgressEvent::Sources { .. } => "sources",
            ProgressEvent::TaskSummaryChunk { .. } => "task_summary_chunk",
            ProgressEvent::ToolCall { .. } => "tool_call",
            ProgressEvent::StageChange { .. } => "stage_change",
            ProgressEvent::Log { .. } => "log",
            ProgressEvent::FinalReport { .. } => "final_report",
            ProgressEvent::PodcastScript { .. } => "podcast_script",
            ProgressEvent::AudioStart { .. } => "audio_start",
            ProgressEvent::AudioProgress { .. } => "audio_progress",
            ProgressEvent::AudioGenerated { .. } => "audio_generated",
            ProgressEvent::PodcastReady { .. } => "podcast_ready",
            ProgressEvent::ReportNote { .. } => "report_note",
            ProgressEvent::Done => "done",
            ProgressEvent::Error { .. } => "error",
        }
    }
}

/// Marker prefixing each event line written by [`EventEnvelope::emit`]
pub const EMIT_PREFIX: &str = "__DC_EVENT__:";

/// A progress event plus the positional fields shared by every event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    #[serde(flatten)]
    pub event: ProgressEvent,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub step: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stream_token: Option<String>,
}

impl From<ProgressEvent> for EventEnvelope {
    fn from(event: ProgressEvent) -> Self {
        Self::new(event)
    }
}

impl EventEnvelope {
    pub fn new(event: ProgressEvent) -> Self {
        Self {
            event,
            step: None,
            task_id: None,
            stream_token: None,
        }
    }

    pub fn with_step(mut self, step: usize) -> Self {
        self.step = Some(step);
        self
    }

    pub fn with_task_id(mut self, task_id: u32) -> Self {
        self.task_id = Some(task_id);
        self
    }

    pub fn with_stream_token(mut self, token: impl Into<String>) -> Self {
        self.stream_token = Some(token.into());
        self
    }

    pub fn kind(&self) -> &'static str {
        self.event.kind()
    }

    /// `done` and `error` end the stream
    pub fn is_terminal(&self) -> bool {
        matches!(self.event, ProgressEvent::Done | ProgressEvent::Error { .. })
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    /// Render as one server-sent-events frame
    pub fn to_sse(&self) -> serde_json::Result<String> {
        Ok(format!("data: {}\n\n", self.to_json()?))
    }

    /// Line written by [`EventEnvelope::emit`]
    pub fn emitted_line(&self) -> serde_json::Result<String> {
        Ok(format!("{}{}", EMIT_PREFIX, self.to_json()?))
    }

    /// Emit this event to stderr for a parent process to parse
    pub fn emit(&self) {
        if let Ok(line) = self.emitted_line() {
            use std::io::Write;
            eprintln!("{}", line);
            // Force flush stderr in async/concurrent contexts
            let _ = std::io::stderr().flush();
        }
    }

    /// Parse a line produced by [`EventEnvelope::emit`]
    pub fn parse_emitted(line: &str) -> Option<Self> {
        let json = line.trim_end().strip_prefix(EMIT_PREFIX)?;
        serde_json::from_str(json).ok()
    }
}

// ============================================================================
// Console Logging Macros
// ============================================================================
// Colored console output for the human-readable rendering of a run,
// complementing the JSON event stream.
// ============================================================================

/// Logs entry into a top-level stage.
///
/// # Example
/// ```
/// use deepcast_sdk::log_stage_console;
/// log_stage_console!("report", "Writing the research report");
/// ```
///
/// Outputs:
/// ```text
/// ═══ REPORT ═══
/// Writing the research report
/// ```
#[macro_export]
macro_rules! log_stage_console {
    ($stage:expr, $message:expr) => {
        println!(
            "\x1b[1;36m═══ {} ═══\x1b[0m",
            $stage.to_string().to_uppercase()
        );
        println!("\x1b[36m{}\x1b[0m", $message);
    };
}

/// Logs a task status change.
///
/// # Example
/// ```
/// use deepcast_sdk::log_task_console;
/// log_task_console!(2, "completed", "Market overview");
/// ```
///
/// Outputs:
/// ```text
/// [task 2] completed: Market overview
/// ```
#[macro_export]
macro_rules! log_task_console {
    ($task_id:expr, $status:expr, $title:expr) => {
        let status = $status.to_string();
        let color = match status.as_str() {
            "completed" => "32",
            "failed" => "31",
            "skipped" => "33",
            _ => "36",
        };
        println!(
            "\x1b[{}m[task {}] {}: {}\x1b[0m",
            color, $task_id, status, $title
        );
    };
}

/// Logs an informational message.
///
/// # Example
/// ```
/// use deepcast_sdk::log_info;
/// log_info!("Planning research tasks...");
/// ```
///
/// Outputs:
/// ```text
/// ℹ Planning research tasks...
/// ```
#[macro_export]
macro_rules! log_info {
    ($message:expr) => {
        println!("\x1b[36mℹ {}\x1b[0m", $message);
    };
    ($fmt:expr, $($arg:tt)*) => {
        println!("\x1b[36mℹ {}\x1b[0m", format!($fmt, $($arg)*));
    };
}

/// Logs a warning message.
///
/// # Example
/// ```
/// use deepcast_sdk::log_warning;
/// log_warning!("Script is empty");
/// ```
///
/// Outputs:
/// ```text
/// ⚠ Warning: Script is empty
/// ```
#[macro_export]
macro_rules! log_warning {
    ($message:expr) => {
        println!("\x1b[33m⚠ Warning: {}\x1b[0m", $message);
    };
    ($fmt:expr, $($arg:tt)*) => {
        println!("\x1b[33m⚠ Warning: {}\x1b[0m", format!($fmt, $($arg)*));
    };
}

/// Logs an error message.
#[macro_export]
macro_rules! log_error_console {
    ($message:expr) => {
        println!("\x1b[31m✗ Error: {}\x1b[0m", $message);
    };
}

/// Logs progress of an operation.
///
/// # Example
/// ```
/// use deepcast_sdk::log_progress;
/// log_progress!(3, 5, "audio segments");
/// ```
///
/// Outputs:
/// ```text
/// Progress: 3/5 audio segments
/// ```
#[macro_export]
macro_rules! log_progress {
    ($current:expr, $total:expr, $item_type:expr) => {
        println!(
            "\x1b[36mProgress: {}/{} {}\x1b[0m",
            $current, $total, $item_type
        );
    };
}

/// Logs that a file has been saved.
#[macro_export]
macro_rules! log_file_saved {
    ($path:expr) => {
        println!("\x1b[32m✓ Saved: {}\x1b[0m", $path);
    };
}
