//! Single-task pipeline: retrieve, build context, summarize

use crate::research::types::ResearchState;
use crate::workflow_utils::batch::TaskContext;
use crate::workflow_utils::channel::EventSender;
use crate::workflow_utils::task::execute_task;
use crate::workflow_utils::text::clean_summary;
use crate::workflow_utils::tracker::ToolCallTracker;
use anyhow::Result;
use deepcast_sdk::{
    ContextBuilder, EventEnvelope, PlannedTask, ProgressEvent, Retriever, Summarizer,
    SummaryRequest, TaskStatus,
};
use futures::StreamExt;
use std::sync::Arc;

/// Summary stored when the model produced nothing usable
pub const EMPTY_SUMMARY_PLACEHOLDER: &str = "No information available";

/// How a task reports its progress
#[derive(Clone)]
pub enum Emission {
    /// Only the final state matters; no events are produced
    Buffered,
    /// Every step is published on the run's event channel
    Streaming(EventSender),
}

impl Emission {
    fn send(&self, task_id: u32, envelope: EventEnvelope) {
        if let Emission::Streaming(sender) = self {
            sender.send_for(task_id, envelope);
        }
    }
}

/// `task_status` event describing `task` as it is now
pub fn task_status_event(task: &PlannedTask, detail: Option<String>) -> ProgressEvent {
    ProgressEvent::TaskStatus {
        status: task.status,
        title: task.title.clone(),
        intent: task.intent.clone(),
        query: Some(task.query.clone()),
        summary: task.summary.clone(),
        sources_summary: task.sources_summary.clone(),
        note_id: task.note_id.clone(),
        note_path: task.note_path.clone(),
        detail,
    }
}

/// Runs one planned task against the run's collaborators
#[derive(Clone)]
pub struct TaskExecutor {
    pub topic: String,
    pub retriever: Arc<dyn Retriever>,
    pub context_builder: Arc<dyn ContextBuilder>,
    pub summarizer: Arc<dyn Summarizer>,
    pub tracker: Arc<ToolCallTracker>,
}

impl TaskExecutor {
    /// Drain the tracker, correlating note writes, and forward what comes out
    fn forward_tool_events(
        &self,
        state: &ResearchState,
        task_id: u32,
        step: Option<usize>,
        emission: &Emission,
    ) {
        for envelope in self.tracker.drain(state, step) {
            emission.send(task_id, envelope);
        }
    }

    fn emit_status(&self, task: &PlannedTask, step: Option<usize>, emission: &Emission) {
        let mut envelope = EventEnvelope::new(task_status_event(task, None));
        envelope.step = step;
        emission.send(task.id, envelope);
    }

    /// Execute the task and return its final state
    ///
    /// Retrieval and summarization errors propagate; the worker boundary in
    /// [`run_task_worker`] turns them into a `failed` status.
    pub async fn execute(
        &self,
        state: &ResearchState,
        task_id: u32,
        step: Option<usize>,
        emission: &Emission,
    ) -> Result<PlannedTask> {
        let task = state.transition(task_id, TaskStatus::InProgress)?;
        self.emit_status(&task, step, emission);

        let outcome = self.retriever.search(&task.query, state.loop_count()).await?;
        state.set_notices(task_id, outcome.notices.clone())?;

        self.forward_tool_events(state, task_id, step, emission);
        for notice in outcome.notices.iter().filter(|n| !n.trim().is_empty()) {
            let mut envelope = EventEnvelope::new(ProgressEvent::status(notice.clone()));
            envelope.step = step;
            emission.send(task_id, envelope);
        }

        let results = match outcome.results.as_deref() {
            Some(results) if !results.is_empty() => results,
            _ => {
                tracing::info!(task_id, backend = %outcome.backend, "no search results, skipping task");
                let task = state.transition(task_id, TaskStatus::Skipped)?;
                self.forward_tool_events(state, task_id, step, emission);
                self.emit_status(&task, step, emission);
                return Ok(task);
            }
        };

        let (sources_summary, context) = self
            .context_builder
            .prepare(results, outcome.answer.as_deref());
        state.set_sources_summary(task_id, sources_summary.clone())?;
        state.record_sources(sources_summary.clone(), context.clone());

        let summary_text = match emission {
            Emission::Streaming(_) => {
                self.forward_tool_events(state, task_id, step, emission);
                let task = state.task(task_id).unwrap_or(task);
                let mut envelope = EventEnvelope::new(ProgressEvent::Sources {
                    latest_sources: sources_summary,
                    raw_context: context.clone(),
                    backend: outcome.backend.clone(),
                    note_id: task.note_id.clone(),
                    note_path: task.note_path.clone(),
                });
                envelope.step = step;
                emission.send(task_id, envelope);

                let request = SummaryRequest {
                    topic: self.topic.clone(),
                    task,
                    context,
                };
                let mut chunks = self.summarizer.stream_summarize(&request).await?;
                self.forward_tool_events(state, task_id, step, emission);

                let mut collected = String::new();
                while let Some(chunk) = chunks.next().await {
                    let chunk = chunk?;
                    if !chunk.is_empty() {
                        collected.push_str(&chunk);
                        let note_id = state.task(task_id).and_then(|t| t.note_id);
                        let mut envelope = EventEnvelope::new(ProgressEvent::TaskSummaryChunk {
                            content: chunk,
                            note_id,
                        });
                        envelope.step = step;
                        emission.send(task_id, envelope);
                    }
                    self.forward_tool_events(state, task_id, step, emission);
                }
                collected
            }
            Emission::Buffered => {
                let request = SummaryRequest {
                    topic: self.topic.clone(),
                    task: state.task(task_id).unwrap_or(task),
                    context,
                };
                let text = self.summarizer.summarize(&request).await?;
                self.forward_tool_events(state, task_id, step, emission);
                text
            }
        };

        let mut summary = clean_summary(&summary_text);
        if summary.is_empty() {
            summary = EMPTY_SUMMARY_PLACEHOLDER.to_string();
        }

        let task = state.complete(task_id, summary)?;
        self.forward_tool_events(state, task_id, step, emission);
        self.emit_status(&task, step, emission);
        Ok(task)
    }
}

/// Worker body: run one task behind the failure boundary
///
/// Any error or panic from the executor marks the task `failed` and, when
/// streaming, publishes a `failed` status carrying the error text.
pub async fn run_task_worker(
    executor: Arc<TaskExecutor>,
    state: Arc<ResearchState>,
    ctx: TaskContext,
    emission: Emission,
) {
    let title = state
        .task(ctx.task_id)
        .map(|t| t.title)
        .unwrap_or_default();

    let outcome = execute_task(ctx, title, || {
        executor.execute(&state, ctx.task_id, Some(ctx.step), &emission)
    })
    .await;

    if let Err(e) = outcome {
        match state.fail(ctx.task_id) {
            Ok(Some(task)) => {
                let envelope = EventEnvelope::new(task_status_event(&task, Some(e.to_string())))
                    .with_step(ctx.step);
                emission.send(ctx.task_id, envelope);
            }
            Ok(None) => {
                tracing::warn!(task_id = ctx.task_id, error = %e, "task failed after reaching a terminal status");
            }
            Err(state_error) => {
                tracing::error!(task_id = ctx.task_id, error = %state_error, "could not mark task failed");
            }
        }
    }
}
