//! Common test doubles for pipeline tests

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use deepcast::research::{Collaborators, ResearchPipeline};
use deepcast::workflow_utils::tracker::{ToolCallInput, ToolCallTracker};
use deepcast_sdk::{
    AudioGenerator, AudioProgress, ContextBuilder, EventEnvelope, NoteRequest, NoteStore,
    Planner, ProgressCallback, ProgressEvent, Reporter, ResearchSnapshot, Retriever, ScriptTurn,
    ScriptWriter, SearchOutcome, SearchResult, Summarizer, SummaryRequest, SummaryStream,
    Synthesizer, TaskDraft,
};
use futures::StreamExt;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub fn draft(title: &str, query: &str) -> TaskDraft {
    TaskDraft {
        title: title.to_string(),
        intent: format!("learn about {}", title),
        query: query.to_string(),
    }
}

/// Planner returning fixed drafts, or failing
pub struct StaticPlanner {
    pub drafts: Vec<TaskDraft>,
    pub fail: bool,
}

#[async_trait]
impl Planner for StaticPlanner {
    async fn plan(&self, _topic: &str) -> Result<Vec<TaskDraft>> {
        if self.fail {
            return Err(anyhow!("planner offline"));
        }
        Ok(self.drafts.clone())
    }
}

#[derive(Debug, Clone)]
pub enum SearchBehavior {
    Hits(usize),
    Empty,
    Fail,
}

/// Retriever whose behavior is chosen per query; unknown queries get two hits
#[derive(Default)]
pub struct MockRetriever {
    pub behaviors: HashMap<String, SearchBehavior>,
}

impl MockRetriever {
    pub fn with(mut self, query: &str, behavior: SearchBehavior) -> Self {
        self.behaviors.insert(query.to_string(), behavior);
        self
    }
}

#[async_trait]
impl Retriever for MockRetriever {
    async fn search(&self, query: &str, _loop_count: u32) -> Result<SearchOutcome> {
        let behavior = self
            .behaviors
            .get(query)
            .cloned()
            .unwrap_or(SearchBehavior::Hits(2));
        tokio::time::sleep(Duration::from_millis(2)).await;

        match behavior {
            SearchBehavior::Fail => Err(anyhow!("search backend down for {}", query)),
            SearchBehavior::Empty => Ok(SearchOutcome {
                results: Some(Vec::new()),
                notices: vec![format!("nothing found for {}", query)],
                answer: None,
                backend: "mock".to_string(),
            }),
            SearchBehavior::Hits(n) => Ok(SearchOutcome {
                results: Some(
                    (0..n)
                        .map(|i| SearchResult {
                            title: Some(format!("{} {}", query, i)),
                            url: Some(format!("https://example.com/{}/{}", query, i)),
                            content: Some(format!("content {}", i)),
                            raw_content: None,
                        })
                        .collect(),
                ),
                notices: Vec::new(),
                answer: None,
                backend: "mock".to_string(),
            }),
        }
    }
}

pub struct PlainContext;

impl ContextBuilder for PlainContext {
    fn prepare(&self, results: &[SearchResult], _answer: Option<&str>) -> (String, String) {
        let sources = results
            .iter()
            .filter_map(|r| r.url.clone())
            .collect::<Vec<_>>()
            .join("\n");
        (sources, format!("{} results", results.len()))
    }
}

/// Summarizer yielding `<task_id>-<n>` chunks with small delays
///
/// With a tracker, each task first records a note-create tool call tagged
/// with its task id, the way a tool-aware agent would.
pub struct ChunkSummarizer {
    pub chunks: usize,
    pub tracker: Option<Arc<ToolCallTracker>>,
}

impl ChunkSummarizer {
    fn record_note(&self, request: &SummaryRequest) {
        if let Some(tracker) = &self.tracker {
            let id = request.task.id;
            let parameters = json!({
                "action": "create",
                "task_id": id,
                "title": format!("Task {}: {}", id, request.task.title),
                "note_type": "task_state",
            });
            tracker.record(ToolCallInput {
                agent: "Task Summarizer".to_string(),
                tool: "note".to_string(),
                raw_parameters: parameters.to_string(),
                parameters,
                result: format!("✅ Note created\nID: note_{}", id),
            });
        }
    }
}

#[async_trait]
impl Summarizer for ChunkSummarizer {
    async fn summarize(&self, request: &SummaryRequest) -> Result<String> {
        self.record_note(request);
        Ok((0..self.chunks)
            .map(|i| format!("{}-{}", request.task.id, i))
            .collect::<Vec<_>>()
            .join(" "))
    }

    async fn stream_summarize(&self, request: &SummaryRequest) -> Result<SummaryStream> {
        self.record_note(request);
        let id = request.task.id;
        let chunks: Vec<String> = (0..self.chunks).map(|i| format!("{}-{} ", id, i)).collect();
        let stream = futures::stream::iter(chunks).then(|chunk| async move {
            tokio::time::sleep(Duration::from_millis(1)).await;
            Ok(chunk)
        });
        Ok(stream.boxed())
    }
}

pub struct FixedReporter {
    pub report: String,
    pub fail: bool,
    pub panic: bool,
}

#[async_trait]
impl Reporter for FixedReporter {
    async fn generate_report(&self, snapshot: &ResearchSnapshot) -> Result<String> {
        if self.panic {
            panic!("reporter crashed");
        }
        if self.fail {
            return Err(anyhow!("reporter offline"));
        }
        Ok(format!("{} ({} tasks)", self.report, snapshot.tasks.len()))
    }
}

pub struct FixedScript {
    pub turns: Vec<ScriptTurn>,
    pub fail: bool,
}

#[async_trait]
impl ScriptWriter for FixedScript {
    async fn generate_script(&self, _report: &str) -> Result<Vec<ScriptTurn>> {
        if self.fail {
            return Err(anyhow!("scriptwriter offline"));
        }
        Ok(self.turns.clone())
    }
}

/// Audio generator producing one (virtual) file per turn
///
/// When `fail` is set it reports the first turn and then errors out.
pub struct FakeAudio {
    pub fail: bool,
}

#[async_trait]
impl AudioGenerator for FakeAudio {
    async fn generate(
        &self,
        script: &[ScriptTurn],
        run_id: &str,
        progress: Option<ProgressCallback>,
    ) -> Result<Vec<PathBuf>> {
        let mut files = Vec::new();
        for (index, turn) in script.iter().enumerate() {
            if let Some(progress) = &progress {
                progress(AudioProgress {
                    current: index + 1,
                    total: script.len(),
                    role: turn.role.clone(),
                    preview: turn.content.clone(),
                });
            }
            if self.fail {
                return Err(anyhow!("tts offline"));
            }
            files.push(PathBuf::from(format!("{}_{:03}_{}.mp3", run_id, index, turn.role)));
        }
        Ok(files)
    }
}

/// Synthesizer that "combines" whenever it gets at least one file
pub struct FakeSynthesizer;

#[async_trait]
impl Synthesizer for FakeSynthesizer {
    async fn combine(&self, files: &[PathBuf], run_id: &str) -> Result<Option<PathBuf>> {
        Ok((!files.is_empty()).then(|| PathBuf::from(format!("podcast_{}.mp3", run_id))))
    }
}

/// In-memory note store
#[derive(Default)]
pub struct MemoryNotes {
    pub notes: Mutex<Vec<NoteRequest>>,
}

#[async_trait]
impl NoteStore for MemoryNotes {
    async fn execute(&self, request: &NoteRequest) -> Result<String> {
        let mut notes = self.notes.lock();
        notes.push(request.clone());
        Ok(match request {
            NoteRequest::Create { .. } => format!("✅ Note created\nID: note_mem_{}", notes.len()),
            NoteRequest::Update { note_id, .. } => format!("✅ Note updated\nID: {}", note_id),
            NoteRequest::Read { note_id } => format!("ID: {}", note_id),
        })
    }

    fn workspace(&self) -> Option<&Path> {
        None
    }
}

/// Note store whose every call fails
pub struct BrokenNotes;

#[async_trait]
impl NoteStore for BrokenNotes {
    async fn execute(&self, _request: &NoteRequest) -> Result<String> {
        Err(anyhow!("notes disk full"))
    }

    fn workspace(&self) -> Option<&Path> {
        None
    }
}

/// Knobs for [`build_pipeline`]
pub struct Setup {
    pub drafts: Vec<TaskDraft>,
    pub planner_fails: bool,
    pub retriever: MockRetriever,
    pub chunks: usize,
    pub record_notes: bool,
    pub reporter_fails: bool,
    pub reporter_panics: bool,
    pub script: Vec<ScriptTurn>,
    pub script_fails: bool,
    pub audio_fails: bool,
    pub notes: Option<Arc<MemoryNotes>>,
    pub notes_broken: bool,
}

impl Default for Setup {
    fn default() -> Self {
        Self {
            drafts: vec![draft("one", "q1"), draft("two", "q2"), draft("three", "q3")],
            planner_fails: false,
            retriever: MockRetriever::default(),
            chunks: 3,
            record_notes: false,
            reporter_fails: false,
            reporter_panics: false,
            script: vec![
                ScriptTurn::new("host", "Welcome"),
                ScriptTurn::new("guest", "Thanks"),
            ],
            script_fails: false,
            audio_fails: false,
            notes: None,
            notes_broken: false,
        }
    }
}

pub fn build_pipeline(setup: Setup) -> Arc<ResearchPipeline> {
    let tracker = Arc::new(ToolCallTracker::new(None));
    let collaborators = Collaborators {
        planner: Arc::new(StaticPlanner {
            drafts: setup.drafts,
            fail: setup.planner_fails,
        }),
        retriever: Arc::new(setup.retriever),
        context_builder: Arc::new(PlainContext),
        summarizer: Arc::new(ChunkSummarizer {
            chunks: setup.chunks,
            tracker: setup.record_notes.then(|| Arc::clone(&tracker)),
        }),
        reporter: Arc::new(FixedReporter {
            report: "REPORT".to_string(),
            fail: setup.reporter_fails,
            panic: setup.reporter_panics,
        }),
        script_writer: Arc::new(FixedScript {
            turns: setup.script,
            fail: setup.script_fails,
        }),
        audio_generator: Arc::new(FakeAudio {
            fail: setup.audio_fails,
        }),
        synthesizer: Arc::new(FakeSynthesizer),
        notes: if setup.notes_broken {
            Some(Arc::new(BrokenNotes) as Arc<dyn NoteStore>)
        } else {
            setup.notes.map(|notes| notes as Arc<dyn NoteStore>)
        },
    };
    Arc::new(ResearchPipeline::new(collaborators, tracker))
}

/// Run the streaming pipeline to completion and collect every event
pub async fn collect_events(pipeline: &Arc<ResearchPipeline>, topic: &str) -> Vec<EventEnvelope> {
    let stream = pipeline.run_stream(topic, CancellationToken::new());
    tokio::time::timeout(Duration::from_secs(10), stream.collect::<Vec<_>>())
        .await
        .expect("pipeline did not finish in time")
}

pub fn kinds(events: &[EventEnvelope]) -> Vec<&'static str> {
    events.iter().map(EventEnvelope::kind).collect()
}

/// Terminal `task_status` events as `(task_id, status)`
pub fn terminal_statuses(events: &[EventEnvelope]) -> Vec<(u32, String)> {
    events
        .iter()
        .filter_map(|e| match &e.event {
            ProgressEvent::TaskStatus { status, .. } if status.is_terminal() => {
                Some((e.task_id.unwrap_or_default(), status.as_str().to_string()))
            }
            _ => None,
        })
        .collect()
}
