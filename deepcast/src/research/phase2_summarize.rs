//! Phase 2: Per-task summarization
//!
//! Each task's search context is summarized by the fast model. When notes
//! are enabled the prompt carries note guidance, so the model keeps one note
//! per task up to date through the note tool while it writes.

use crate::workflow_utils::agent::ToolAwareAgent;
use crate::workflow_utils::text::{clean_summary, ThinkFilter};
use anyhow::Result;
use async_trait::async_trait;
use deepcast_sdk::{PlannedTask, Summarizer, SummaryRequest, SummaryStream};
use futures::StreamExt;
use serde_json::json;

pub const SUMMARIZER_SYSTEM_PROMPT: &str = r#"You are a research analyst. Summarize the search context for one research task.

Write Markdown with:
- a short overview answering the task intent
- the key findings as bullet points, each tied to its source
- open questions or conflicting information, if any

Only use information from the context. Do not invent sources."#;

pub struct LlmSummarizer {
    agent: ToolAwareAgent,
    notes_enabled: bool,
    strip_thinking: bool,
}

impl LlmSummarizer {
    pub fn new(agent: ToolAwareAgent, notes_enabled: bool, strip_thinking: bool) -> Self {
        Self {
            agent,
            notes_enabled,
            strip_thinking,
        }
    }

    fn build_prompt(&self, request: &SummaryRequest) -> String {
        let task = &request.task;
        let mut prompt = format!(
            "Research topic: {}\nTask: {}\nTask intent: {}\nSearch query: {}\nTask context:\n{}\n",
            request.topic, task.title, task.intent, task.query, request.context
        );
        if self.notes_enabled {
            prompt.push_str(&note_guidance(task));
            prompt.push_str(
                "\nSync the note as described above first, then return a Markdown summary for the user.",
            );
        } else {
            prompt.push_str("\nReturn a Markdown summary for the user.");
        }
        prompt
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, request: &SummaryRequest) -> Result<String> {
        let response = self.agent.run(&self.build_prompt(request)).await?;
        Ok(clean_summary(&response))
    }

    async fn stream_summarize(&self, request: &SummaryRequest) -> Result<SummaryStream> {
        let mut fragments = self.agent.run_stream(&self.build_prompt(request));
        if !self.strip_thinking {
            return Ok(fragments);
        }

        let stream = async_stream::try_stream! {
            let mut filter = ThinkFilter::new();
            while let Some(fragment) = fragments.next().await {
                for visible in filter.push(&fragment?) {
                    yield visible;
                }
            }
            for visible in filter.finish() {
                yield visible;
            }
        };
        Ok(stream.boxed())
    }
}

/// Instructions for keeping the task's note in sync
///
/// Tasks without a note get a create template; tasks that already have one
/// are told to read it first and then update it in place.
pub fn note_guidance(task: &PlannedTask) -> String {
    let tags = json!(["deep_research", format!("task_{}", task.id)]);
    let title = format!("Task {}: {}", task.id, task.title);

    match task.note_id.as_deref() {
        Some(note_id) => {
            let read = json!({"action": "read", "note_id": note_id});
            let update = json!({
                "action": "update",
                "note_id": note_id,
                "task_id": task.id,
                "title": title,
                "note_type": "task_state",
                "tags": tags,
                "content": "<full updated content>",
            });
            format!(
                "Note guidance:\n\
                 - This task's note ID is {note_id}.\n\
                 - Before writing the summary, call [TOOL_CALL:note:{read}] to fetch the latest content.\n\
                 - After the analysis, update the note with these parameters (replace content with the real text):\n  {update}\n\
                 - The content must keep the existing findings and add this round's new ones; never use placeholder text.\n\
                 - Keep the tags as {tags} so other agents can find the note.\n\
                 - Output the user-facing summary only after the note is synced.\n"
            )
        }
        None => {
            let create = json!({
                "action": "create",
                "task_id": task.id,
                "title": title,
                "note_type": "task_state",
                "tags": tags,
                "content": "<task summary>",
            });
            format!(
                "Note guidance:\n\
                 - This task has no note yet.\n\
                 - Create one with [TOOL_CALL:note:{{...}}] using these parameters (replace content with the real findings):\n  {create}\n\
                 - The content must hold this task's actual findings; never use placeholder text.\n\
                 - Remember the returned note ID and reuse it for every later update.\n\
                 - Output the user-facing summary only after the note is synced.\n"
            )
        }
    }
}
