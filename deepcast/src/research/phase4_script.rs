//! Phase 4: Podcast script
//!
//! Rewrites the report as a two-person dialogue between a host (Xiayu) and a
//! guest (Liwa). Model output is parsed leniently; if nothing can be
//! recovered the script is empty and the audio stage produces no files.

use crate::workflow_utils::agent::ToolAwareAgent;
use crate::workflow_utils::json::parse_script;
use anyhow::Result;
use async_trait::async_trait;
use deepcast_sdk::{ScriptTurn, ScriptWriter};

pub const SCRIPT_SYSTEM_PROMPT: &str = r#"You are a podcast scriptwriter. Turn the research report into a lively, natural conversation between two speakers:
- Host (Xiayu): introduces the topic, asks sharp questions, summarizes
- Guest (Liwa): the expert who explains findings with examples

Rules:
- 10 to 20 turns, alternating speakers, starting and ending with the host
- Stay faithful to the report; do not add facts
- Keep each turn under 120 words so it reads well aloud

Answer with a JSON array only:
[{"role": "host", "content": "..."}, {"role": "guest", "content": "..."}]"#;

pub struct LlmScriptWriter {
    agent: ToolAwareAgent,
}

impl LlmScriptWriter {
    pub fn new(agent: ToolAwareAgent) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl ScriptWriter for LlmScriptWriter {
    async fn generate_script(&self, report: &str) -> Result<Vec<ScriptTurn>> {
        if report.trim().is_empty() {
            tracing::warn!("report is empty, no script generated");
            return Ok(Vec::new());
        }

        let prompt = format!(
            "Research report:\n\n{}\n\nWrite the podcast script for this report.",
            report.trim()
        );
        let response = self.agent.run(&prompt).await?;

        match parse_script(&response) {
            Ok(turns) => {
                tracing::info!(turns = turns.len(), "podcast script parsed");
                Ok(turns)
            }
            Err(e) => {
                tracing::error!(error = %e, "podcast script could not be parsed");
                Ok(Vec::new())
            }
        }
    }
}
