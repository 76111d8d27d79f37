//! Phase 3: Final report
//!
//! Merges every task's summary and sources into one structured Markdown
//! report. Task notes are listed so the model can read them back through the
//! note tool when a summary looks thin.

use crate::workflow_utils::agent::ToolAwareAgent;
use crate::workflow_utils::text::clean_summary;
use anyhow::Result;
use async_trait::async_trait;
use deepcast_sdk::{Reporter, ResearchSnapshot, TaskStatus};
use std::fmt::Write;

/// Title prefix of the note holding the final report
pub const REPORT_TITLE_PREFIX: &str = "Research report";

pub const REPORTER_SYSTEM_PROMPT: &str = r#"You are a senior research writer. Combine the task summaries into one structured research report in Markdown.

The report must contain:
1. Background overview
2. Core insights, each backed by task findings
3. Evidence and data, citing the listed sources
4. Risks and open challenges
5. Outlook and recommendations

Write for an informed general audience. Do not invent facts or sources."#;

pub struct LlmReporter {
    agent: ToolAwareAgent,
}

impl LlmReporter {
    pub fn new(agent: ToolAwareAgent) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl Reporter for LlmReporter {
    async fn generate_report(&self, snapshot: &ResearchSnapshot) -> Result<String> {
        let prompt = build_report_prompt(snapshot);
        let response = self.agent.run(&prompt).await?;
        let report = clean_summary(&response);
        tracing::info!(
            model = %self.agent.model_id(),
            chars = report.len(),
            "report generated"
        );
        Ok(report)
    }
}

/// Prompt listing every task with its status, summary and sources
pub fn build_report_prompt(snapshot: &ResearchSnapshot) -> String {
    let mut prompt = format!("Research topic: {}\n\n", snapshot.topic);

    for task in &snapshot.tasks {
        let _ = writeln!(prompt, "### Task {}: {}", task.id, task.title);
        let _ = writeln!(prompt, "- Intent: {}", task.intent);
        let _ = writeln!(prompt, "- Query: {}", task.query);
        let _ = writeln!(prompt, "- Status: {}", task.status.as_str());
        if let Some(note_id) = &task.note_id {
            let _ = writeln!(prompt, "- Note ID: {}", note_id);
        }
        match (&task.summary, task.status) {
            (Some(summary), _) => {
                let _ = writeln!(prompt, "- Summary:\n{}", summary.trim());
            }
            (None, TaskStatus::Skipped) => {
                let _ = writeln!(prompt, "- Summary: no search results were found");
            }
            (None, _) => {
                let _ = writeln!(prompt, "- Summary: not available");
            }
        }
        if let Some(sources) = task.sources_summary.as_deref().filter(|s| !s.is_empty()) {
            let _ = writeln!(prompt, "- Sources:\n{}", sources);
        }
        prompt.push('\n');
    }

    prompt.push_str(
        "Write the final report now. Tasks marked failed or skipped should be mentioned as gaps.",
    );
    prompt
}
