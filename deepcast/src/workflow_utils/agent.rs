//! Tool-aware agent: a chat model that can call the note tool inline
//!
//! The model writes `[TOOL_CALL:note:{json}]` in its answer. Each call is
//! executed against the note store, recorded in the tracker, and its result
//! is fed back to the model for a follow-up round.

use crate::llm::{ChatMessage, ChatModel};
use crate::workflow_utils::text::{find_tool_calls, ToolCallMarkup};
use crate::workflow_utils::tracker::{ToolCallInput, ToolCallTracker, NOTE_TOOL};
use anyhow::Result;
use deepcast_sdk::{NoteRequest, NoteStore};
use futures::stream::BoxStream;
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;

const NOTE_TOOL_INSTRUCTIONS: &str = "\
## Available tools
- note: create, read and update research notes shared between agents.

Call a tool by writing `[TOOL_CALL:note:{...}]` with a JSON object containing
`action` (create | read | update) and the fields that action needs
(`note_id`, `task_id`, `title`, `note_type`, `tags`, `content`).
Tool results are returned to you in the next message.";

/// Configuration for a tool-aware agent
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Agent name (for logging and tool-call attribution)
    pub name: String,
    pub system_prompt: String,
    /// Maximum follow-up rounds after tool calls
    pub max_tool_rounds: usize,
}

impl AgentConfig {
    pub fn new(name: impl Into<String>, system_prompt: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            system_prompt: system_prompt.into(),
            max_tool_rounds: 3,
        }
    }
}

#[derive(Clone)]
pub struct ToolAwareAgent {
    config: Arc<AgentConfig>,
    llm: Arc<dyn ChatModel>,
    notes: Option<Arc<dyn NoteStore>>,
    tracker: Arc<ToolCallTracker>,
}

impl ToolAwareAgent {
    pub fn new(
        config: AgentConfig,
        llm: Arc<dyn ChatModel>,
        notes: Option<Arc<dyn NoteStore>>,
        tracker: Arc<ToolCallTracker>,
    ) -> Self {
        Self {
            config: Arc::new(config),
            llm,
            notes,
            tracker,
        }
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    pub fn model_id(&self) -> &str {
        self.llm.model_id()
    }

    fn initial_messages(&self, prompt: &str) -> Vec<ChatMessage> {
        let system = if self.notes.is_some() {
            format!("{}\n\n{}", self.config.system_prompt.trim(), NOTE_TOOL_INSTRUCTIONS)
        } else {
            self.config.system_prompt.trim().to_string()
        };
        vec![ChatMessage::system(system), ChatMessage::user(prompt)]
    }

    /// Run the prompt to completion, executing tool calls between rounds
    ///
    /// Returns the text of every round joined together, tool markup included.
    pub async fn run(&self, prompt: &str) -> Result<String> {
        let mut messages = self.initial_messages(prompt);
        let mut transcript = String::new();

        for round in 0..=self.config.max_tool_rounds {
            let response = self.llm.complete(&messages).await?;
            transcript.push_str(&response);

            let calls = if self.notes.is_some() {
                find_tool_calls(&response)
            } else {
                Vec::new()
            };
            if calls.is_empty() || round == self.config.max_tool_rounds {
                break;
            }

            let results = self.execute_calls(&calls).await;
            messages.push(ChatMessage::assistant(response));
            messages.push(ChatMessage::user(results));
            transcript.push('\n');
        }

        Ok(transcript)
    }

    /// Stream the prompt's answer, executing tool calls between rounds
    ///
    /// Fragments are yielded raw. Tool calls found in a finished round are
    /// executed (and recorded) before the next round starts streaming.
    pub fn run_stream(&self, prompt: &str) -> BoxStream<'static, Result<String>> {
        let agent = self.clone();
        let mut messages = self.initial_messages(prompt);

        let stream = async_stream::try_stream! {
            for round in 0..=agent.config.max_tool_rounds {
                let mut fragments = agent.llm.stream(&messages).await?;
                let mut response = String::new();
                while let Some(fragment) = fragments.next().await {
                    let fragment = fragment?;
                    response.push_str(&fragment);
                    yield fragment;
                }

                let calls = if agent.notes.is_some() {
                    find_tool_calls(&response)
                } else {
                    Vec::new()
                };
                if calls.is_empty() || round == agent.config.max_tool_rounds {
                    break;
                }

                let results = agent.execute_calls(&calls).await;
                messages.push(ChatMessage::assistant(response));
                messages.push(ChatMessage::user(results));
                yield "\n".to_string();
            }
        };
        stream.boxed()
    }

    /// Execute tool calls in order and render their results for the model
    async fn execute_calls(&self, calls: &[ToolCallMarkup]) -> String {
        let mut rendered = Vec::with_capacity(calls.len());
        for call in calls {
            let result = self.execute_call(call).await;
            rendered.push(format!("[TOOL_RESULT:{}]\n{}", call.tool, result));
        }
        rendered.join("\n\n")
    }

    async fn execute_call(&self, call: &ToolCallMarkup) -> String {
        let parameters = call.parameters.clone().unwrap_or(Value::Null);

        let result = match (&self.notes, call.tool.as_str()) {
            (Some(notes), NOTE_TOOL) => match serde_json::from_value::<NoteRequest>(parameters.clone()) {
                Ok(request) => match notes.execute(&request).await {
                    Ok(response) => response,
                    Err(e) => {
                        tracing::warn!(agent = %self.config.name, error = %e, "note tool failed");
                        format!("❌ {}", e)
                    }
                },
                Err(e) => format!("❌ invalid note parameters: {}", e),
            },
            (_, tool) => format!("❌ tool '{}' is not available", tool),
        };

        self.tracker.record(ToolCallInput {
            agent: self.config.name.clone(),
            tool: call.tool.clone(),
            raw_parameters: call.raw_parameters.clone(),
            parameters: if parameters.is_object() {
                parameters
            } else {
                Value::Object(Default::default())
            },
            result: result.clone(),
        });
        result
    }
}
