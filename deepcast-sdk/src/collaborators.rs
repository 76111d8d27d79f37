//! Collaborator interfaces consumed by the pipeline
//!
//! Every stage that talks to a model, a search backend, a TTS engine or the
//! filesystem is reached through one of these traits, so the orchestration
//! code can run against real services or test doubles alike.

use crate::{
    AudioProgress, NoteRequest, ResearchSnapshot, ScriptTurn, SearchOutcome, SearchResult,
    SummaryRequest, TaskDraft,
};
use anyhow::Result;
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Lazily produced summary fragments. Finite and not restartable.
pub type SummaryStream = BoxStream<'static, Result<String>>;

/// Invoked synchronously by the audio generator once per script item
pub type ProgressCallback = Arc<dyn Fn(AudioProgress) + Send + Sync>;

/// Breaks a topic into research sub-questions
#[async_trait]
pub trait Planner: Send + Sync {
    /// Plan the topic. An empty result is allowed; the pipeline then falls back
    /// to [`Planner::fallback_task`].
    async fn plan(&self, topic: &str) -> Result<Vec<TaskDraft>>;

    /// Minimal task used when planning yields nothing
    fn fallback_task(&self, topic: &str) -> TaskDraft {
        let topic = topic.trim();
        TaskDraft {
            title: "Background overview".to_string(),
            intent: "Collect the core background and latest developments of the topic"
                .to_string(),
            query: if topic.is_empty() {
                "Background overview".to_string()
            } else {
                format!("{} latest developments", topic)
            },
        }
    }
}

/// Search backend
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn search(&self, query: &str, loop_count: u32) -> Result<SearchOutcome>;
}

/// Turns raw search hits into `(sources_summary, context_text)`
pub trait ContextBuilder: Send + Sync {
    fn prepare(&self, results: &[SearchResult], answer: Option<&str>) -> (String, String);
}

/// Per-task summarization
#[async_trait]
pub trait Summarizer: Send + Sync {
    async fn summarize(&self, request: &SummaryRequest) -> Result<String>;

    async fn stream_summarize(&self, request: &SummaryRequest) -> Result<SummaryStream>;
}

#[async_trait]
pub trait Reporter: Send + Sync {
    /// Markdown report over every task of the run
    async fn generate_report(&self, snapshot: &ResearchSnapshot) -> Result<String>;
}

#[async_trait]
pub trait ScriptWriter: Send + Sync {
    /// Dialogue script for the report. Implementations recover what they can
    /// from malformed model output and return an empty script on total failure.
    async fn generate_script(&self, report: &str) -> Result<Vec<ScriptTurn>>;
}

#[async_trait]
pub trait AudioGenerator: Send + Sync {
    /// Synthesize one audio file per usable script turn, in order
    async fn generate(
        &self,
        script: &[ScriptTurn],
        run_id: &str,
        progress: Option<ProgressCallback>,
    ) -> Result<Vec<PathBuf>>;
}

#[async_trait]
pub trait Synthesizer: Send + Sync {
    /// Concatenate segments into the final episode. `None` when nothing usable
    /// was provided.
    async fn combine(&self, files: &[PathBuf], run_id: &str) -> Result<Option<PathBuf>>;
}

/// Optional note persistence capability
#[async_trait]
pub trait NoteStore: Send + Sync {
    /// Execute a note action and return the tool's response text
    async fn execute(&self, request: &NoteRequest) -> Result<String>;

    /// Directory holding `<note_id>.md` files, if notes live on disk
    fn workspace(&self) -> Option<&Path>;

    fn note_path(&self, note_id: &str) -> Option<PathBuf> {
        self.workspace().map(|dir| dir.join(format!("{}.md", note_id)))
    }
}
