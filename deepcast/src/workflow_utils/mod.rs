//! Workflow utilities for concurrent task execution and event plumbing
//!
//! This module provides the reusable building blocks of a research run:
//! - **channel**: Multi-producer event channel with per-task routing
//! - **batch**: One worker per task plus the completion barrier
//! - **task**: Worker boundary turning errors and panics into results
//! - **tracker**: Tool-call log with drain/push delivery
//! - **agent**: Chat model wrapper that executes inline note tool calls
//! - **json**: JSON extraction and script recovery
//! - **text**: `<think>` and tool-call markup cleanup

pub mod agent;
pub mod batch;
pub mod channel;
pub mod json;
pub mod task;
pub mod text;
pub mod tracker;

// Re-export commonly used types and functions
pub use agent::{AgentConfig, ToolAwareAgent};
pub use batch::{spawn_workers, TaskContext, WorkerBarrier};
pub use channel::{event_channel, ChannelMessage, EventReceiver, EventSender, TaskRoute};
pub use json::{extract_json_value, parse_script, ScriptParseError};
pub use task::execute_task;
pub use text::{clean_summary, strip_thinking_tokens, strip_tool_calls, ThinkFilter};
pub use tracker::{NoteAttachment, ToolCallInput, ToolCallRecord, ToolCallTracker, ToolEventSink};
