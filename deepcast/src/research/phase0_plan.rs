//! Phase 0: Task planning
//!
//! Breaks the research topic into a handful of sub-questions, each with a
//! title, an intent and a search query.
//!
//! The planner model may answer with a JSON object holding `tasks`, a bare
//! JSON array, or a `[TOOL_CALL:...]` expression wrapping the same payload.
//! Missing fields get defaults; an unparseable answer yields no tasks and the
//! pipeline falls back to a single overview task.

use crate::workflow_utils::agent::ToolAwareAgent;
use crate::workflow_utils::json::extract_json_value;
use crate::workflow_utils::text::{find_tool_calls, strip_thinking_tokens};
use anyhow::Result;
use async_trait::async_trait;
use chrono::Local;
use deepcast_sdk::{Planner, TaskDraft};
use serde_json::{Map, Value};

pub const PLANNER_SYSTEM_PROMPT: &str = r#"You are a research planning expert. Break the user's topic into 3 to 5 complementary research tasks that together cover it.

Each task needs:
- title: a short name for the task
- intent: what the task should find out and why it matters
- query: a web search query that will surface the needed information

Answer with JSON only, in this shape:
{"tasks": [{"title": "...", "intent": "...", "query": "..."}]}"#;

const DEFAULT_INTENT: &str = "Focus on the key questions of the topic";

pub struct LlmPlanner {
    agent: ToolAwareAgent,
}

impl LlmPlanner {
    pub fn new(agent: ToolAwareAgent) -> Self {
        Self { agent }
    }
}

#[async_trait]
impl Planner for LlmPlanner {
    async fn plan(&self, topic: &str) -> Result<Vec<TaskDraft>> {
        let prompt = format!(
            "Current date: {}\nResearch topic: {}\n\nPlan the research tasks for this topic.",
            Local::now().format("%Y-%m-%d"),
            topic
        );

        let response = self.agent.run(&prompt).await?;
        tracing::info!(
            model = %self.agent.model_id(),
            "planner raw output (truncated): {}",
            response.chars().take(500).collect::<String>()
        );

        let drafts = parse_plan(&response, topic);
        tracing::info!(
            tasks = drafts.len(),
            titles = ?drafts.iter().map(|d| d.title.as_str()).collect::<Vec<_>>(),
            "planner produced tasks"
        );
        Ok(drafts)
    }
}

/// Turn planner output into task drafts
pub fn parse_plan(response: &str, topic: &str) -> Vec<TaskDraft> {
    let text = strip_thinking_tokens(response);
    let text = text.trim();

    let mut items = match extract_json_value(text) {
        Some(Value::Object(object)) => task_objects(object.get("tasks")),
        Some(array @ Value::Array(_)) => task_objects(Some(&array)),
        _ => Vec::new(),
    };

    if items.is_empty() {
        if let Some(payload) = tool_payload(text) {
            items = task_objects(payload.get("tasks"));
        }
    }

    items
        .iter()
        .enumerate()
        .map(|(idx, item)| draft_from(item, idx + 1, topic))
        .collect()
}

fn task_objects(value: Option<&Value>) -> Vec<Map<String, Value>> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|item| item.as_object().cloned())
            .collect(),
        _ => Vec::new(),
    }
}

/// Parameters of the first tool-call expression, JSON or `key=value` pairs
fn tool_payload(text: &str) -> Option<Map<String, Value>> {
    let call = find_tool_calls(text).into_iter().next()?;
    if let Some(Value::Object(object)) = call.parameters {
        return Some(object);
    }

    let payload: Map<String, Value> = call
        .raw_parameters
        .split(',')
        .filter_map(|part| part.split_once('='))
        .map(|(key, value)| {
            let value = value.trim().trim_matches(|c| c == '"' || c == '\'');
            (key.trim().to_string(), Value::String(value.to_string()))
        })
        .collect();
    (!payload.is_empty()).then_some(payload)
}

fn draft_from(item: &Map<String, Value>, position: usize, topic: &str) -> TaskDraft {
    let field = |key: &str| {
        item.get(key)
            .and_then(|v| match v {
                Value::String(s) => Some(s.trim().to_string()),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .filter(|s| !s.is_empty())
    };

    TaskDraft {
        title: field("title").unwrap_or_else(|| format!("Task {}", position)),
        intent: field("intent").unwrap_or_else(|| DEFAULT_INTENT.to_string()),
        query: field("query").unwrap_or_else(|| topic.trim().to_string()),
    }
}
