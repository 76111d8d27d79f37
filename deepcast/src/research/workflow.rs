//! Workflow orchestration for a research run
//!
//! A run moves through fixed stages:
//!
//! ```text
//! plan → tasks (concurrent, barrier) → report → persist report → script
//!      → audio generation → synthesis → done
//! ```
//!
//! [`ResearchPipeline::run_stream`] yields every progress event as it happens;
//! [`ResearchPipeline::run`] executes the same stages silently and returns a
//! [`ResearchOutput`].
//!
//! Planning failures fall back to a single overview task and task failures
//! stay inside their worker. Only a failure of a sequential stage (report or
//! script) ends the stream early, with one `error` event.

use anyhow::{anyhow, Result};
use deepcast_sdk::{
    AudioGenerator, ContextBuilder, EventEnvelope, NoteRequest, NoteStore, PlannedTask, Planner,
    ProgressEvent, Reporter, Retriever, ScriptWriter, Stage, Summarizer, Synthesizer,
};
use futures::{FutureExt, Stream};
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use crate::llm::{ChatModel, LlmClient};
use crate::research::{
    audio_relay::{AudioRelay, RelayPoll},
    config::Configuration,
    executor::{run_task_worker, Emission, TaskExecutor},
    notes::FsNoteStore,
    phase0_plan::{LlmPlanner, PLANNER_SYSTEM_PROMPT},
    phase1_search::{SourceFormatter, TavilyRetriever},
    phase2_summarize::{LlmSummarizer, SUMMARIZER_SYSTEM_PROMPT},
    phase3_report::{LlmReporter, REPORTER_SYSTEM_PROMPT, REPORT_TITLE_PREFIX},
    phase4_script::{LlmScriptWriter, SCRIPT_SYSTEM_PROMPT},
    phase5_audio::{FfmpegSynthesizer, TtsAudioGenerator},
    types::{ResearchOutput, ResearchState},
};
use crate::workflow_utils::{
    agent::{AgentConfig, ToolAwareAgent},
    batch::spawn_workers,
    channel::{event_channel, TaskRoute},
    task::panic_message,
    tracker::{extract_note_id, ToolCallTracker, ToolEventSink},
};

/// Every external service a run talks to
#[derive(Clone)]
pub struct Collaborators {
    pub planner: Arc<dyn Planner>,
    pub retriever: Arc<dyn Retriever>,
    pub context_builder: Arc<dyn ContextBuilder>,
    pub summarizer: Arc<dyn Summarizer>,
    pub reporter: Arc<dyn Reporter>,
    pub script_writer: Arc<dyn ScriptWriter>,
    pub audio_generator: Arc<dyn AudioGenerator>,
    pub synthesizer: Arc<dyn Synthesizer>,
    /// Note persistence; `None` disables the report note
    pub notes: Option<Arc<dyn NoteStore>>,
}

/// Model names shown in progress logs
#[derive(Debug, Clone)]
pub struct ModelLabels {
    pub report: String,
    pub script: String,
}

impl Default for ModelLabels {
    fn default() -> Self {
        Self {
            report: "report model".to_string(),
            script: "script model".to_string(),
        }
    }
}

/// Restores buffered tool-event delivery when the streaming section ends,
/// including when the consumer drops the stream mid-run
struct SinkGuard<'a> {
    tracker: &'a ToolCallTracker,
}

impl Drop for SinkGuard<'_> {
    fn drop(&mut self) {
        self.tracker.set_event_sink(ToolEventSink::Buffered);
    }
}

/// Await a sequential stage, turning a panic inside it into an error
async fn contain_panic<T>(stage: &str, future: impl Future<Output = Result<T>>) -> Result<T> {
    match AssertUnwindSafe(future).catch_unwind().await {
        Ok(result) => result,
        Err(payload) => Err(anyhow!("{} panicked: {}", stage, panic_message(payload.as_ref()))),
    }
}

/// Outcome of one wait on the task barrier
enum BarrierStep {
    Event(EventEnvelope),
    Drained,
    Cancelled,
}

/// Runs research pipelines over a fixed set of collaborators
///
/// The tool-call tracker is shared with the collaborators' agents, so one
/// pipeline runs one research topic at a time.
pub struct ResearchPipeline {
    collaborators: Collaborators,
    tracker: Arc<ToolCallTracker>,
    models: ModelLabels,
}

impl ResearchPipeline {
    pub fn new(collaborators: Collaborators, tracker: Arc<ToolCallTracker>) -> Self {
        Self {
            collaborators,
            tracker,
            models: ModelLabels::default(),
        }
    }

    pub fn with_model_labels(mut self, models: ModelLabels) -> Self {
        self.models = models;
        self
    }

    /// Wire the concrete collaborators described by `config`
    pub fn from_config(config: &Configuration) -> Result<Self> {
        let notes_workspace = config.active_notes_workspace();
        let tracker = Arc::new(ToolCallTracker::new(notes_workspace.clone()));
        let notes: Option<Arc<dyn NoteStore>> = notes_workspace
            .map(|workspace| Arc::new(FsNoteStore::new(workspace)) as Arc<dyn NoteStore>);

        let model = |id: &str| -> Result<Arc<dyn ChatModel>> {
            let client = LlmClient::new(
                config.llm_base_url.clone(),
                config.llm_api_key.clone(),
                id,
                config.llm_timeout,
            )?;
            Ok(Arc::new(client))
        };
        let agent = |name: &str, prompt: &str, llm: Arc<dyn ChatModel>, with_notes: bool| {
            ToolAwareAgent::new(
                AgentConfig::new(name, prompt),
                llm,
                if with_notes { notes.clone() } else { None },
                Arc::clone(&tracker),
            )
        };

        let smart = model(&config.smart_llm_model)?;
        let fast = model(&config.fast_llm_model)?;
        let default = model(&config.llm_model_id)?;

        let collaborators = Collaborators {
            planner: Arc::new(LlmPlanner::new(agent(
                "Research Planner",
                PLANNER_SYSTEM_PROMPT,
                Arc::clone(&smart),
                false,
            ))),
            retriever: Arc::new(TavilyRetriever::new(
                config.tavily_api_key.clone(),
                config.max_results,
                config.fetch_full_page,
            )?),
            context_builder: Arc::new(SourceFormatter {
                fetch_full_page: config.fetch_full_page,
                ..Default::default()
            }),
            summarizer: Arc::new(LlmSummarizer::new(
                agent("Task Summarizer", SUMMARIZER_SYSTEM_PROMPT, fast, true),
                notes.is_some(),
                config.strip_thinking_tokens,
            )),
            reporter: Arc::new(LlmReporter::new(agent(
                "Report Writer",
                REPORTER_SYSTEM_PROMPT,
                smart,
                true,
            ))),
            script_writer: Arc::new(LlmScriptWriter::new(agent(
                "Script Writer",
                SCRIPT_SYSTEM_PROMPT,
                default,
                false,
            ))),
            audio_generator: Arc::new(TtsAudioGenerator::new(
                config.tts_base_url.clone(),
                config.tts_api_key.clone(),
                config.tts_model.clone(),
                config.audio_output_dir.clone(),
            )?),
            synthesizer: Arc::new(FfmpegSynthesizer::new(
                config.ffmpeg_path.clone(),
                config.audio_output_dir.clone(),
            )),
            notes: notes.clone(),
        };

        Ok(Self::new(collaborators, tracker).with_model_labels(ModelLabels {
            report: config.smart_llm_model.clone(),
            script: config.llm_model_id.clone(),
        }))
    }

    pub fn tracker(&self) -> &Arc<ToolCallTracker> {
        &self.tracker
    }

    /// Plan the topic and build the run state
    ///
    /// A planner error counts as an empty plan. Task ids are 1-based in plan
    /// order and each task's stream token is `task_<id>`.
    async fn prepare_state(&self, topic: &str) -> Arc<ResearchState> {
        let planner = &self.collaborators.planner;
        let drafts = match planner.plan(topic).await {
            Ok(drafts) => drafts,
            Err(e) => {
                tracing::warn!(error = %format!("{:#}", e), "planning failed, using fallback task");
                Vec::new()
            }
        };
        let drafts = if drafts.is_empty() {
            vec![planner.fallback_task(topic)]
        } else {
            drafts
        };

        let tasks: Vec<PlannedTask> = drafts
            .into_iter()
            .enumerate()
            .map(|(idx, draft)| {
                let mut task = PlannedTask::from_draft(idx as u32 + 1, draft);
                task.stream_token = Some(format!("task_{}", task.id));
                task
            })
            .collect();

        tracing::info!(topic, tasks = tasks.len(), "research plan ready");
        Arc::new(ResearchState::new(topic, tasks))
    }

    /// Step is the 1-based plan position, token the task's stream token
    fn routes(state: &ResearchState) -> HashMap<u32, TaskRoute> {
        state
            .tasks()
            .into_iter()
            .enumerate()
            .map(|(idx, task)| {
                let token = task
                    .stream_token
                    .unwrap_or_else(|| format!("task_{}", task.id));
                (task.id, TaskRoute { step: idx + 1, token })
            })
            .collect()
    }

    fn executor(&self, topic: &str) -> Arc<TaskExecutor> {
        Arc::new(TaskExecutor {
            topic: topic.to_string(),
            retriever: Arc::clone(&self.collaborators.retriever),
            context_builder: Arc::clone(&self.collaborators.context_builder),
            summarizer: Arc::clone(&self.collaborators.summarizer),
            tracker: Arc::clone(&self.tracker),
        })
    }

    /// Save the report as a note, updating the run's existing report note
    /// when one can be found
    ///
    /// Failures are logged and swallowed. Returns the `report_note` event on
    /// success.
    async fn persist_report(&self, state: &ResearchState, report: &str) -> Option<EventEnvelope> {
        let notes = self.collaborators.notes.as_ref()?;
        let content = report.trim();
        if content.is_empty() {
            return None;
        }

        let title = format!("{}: {}", REPORT_TITLE_PREFIX, state.topic().trim());
        let tags = vec!["deep_research".to_string(), "report".to_string()];

        let mut note_id = state
            .report_note()
            .0
            .or_else(|| self.tracker.find_report_note_id(REPORT_TITLE_PREFIX));

        if let Some(existing) = note_id.clone() {
            let update = NoteRequest::Update {
                note_id: existing.clone(),
                task_id: None,
                title: Some(title.clone()),
                note_type: Some("conclusion".to_string()),
                tags: Some(tags.clone()),
                content: Some(content.to_string()),
            };
            match notes.execute(&update).await {
                Ok(response) if !response.starts_with('❌') => {}
                Ok(response) => {
                    tracing::warn!(note_id = %existing, response = %response, "report note update rejected");
                    note_id = None;
                }
                Err(e) => {
                    tracing::warn!(note_id = %existing, error = %e, "report note update failed");
                    note_id = None;
                }
            }
        }

        if note_id.is_none() {
            let create = NoteRequest::Create {
                task_id: None,
                title: title.clone(),
                note_type: "conclusion".to_string(),
                tags,
                content: content.to_string(),
            };
            match notes.execute(&create).await {
                Ok(response) => note_id = extract_note_id(&response),
                Err(e) => {
                    tracing::warn!(error = %e, "report note could not be created");
                    return None;
                }
            }
        }

        let note_id = note_id?;
        let note_path = notes
            .note_path(&note_id)
            .map(|path| path.display().to_string());
        state.set_report_note(note_id.clone(), note_path.clone());
        tracing::info!(note_id = %note_id, "report note saved");

        Some(EventEnvelope::new(ProgressEvent::ReportNote {
            note_id,
            title,
            content: content.to_string(),
            note_path,
        }))
    }

    /// Run the pipeline, yielding progress events as they happen
    ///
    /// The stream ends after `done` or `error`. Cancelling `cancel` ends it
    /// at the next receive point without an `error` event; task workers
    /// already running finish in the background.
    pub fn run_stream(
        self: &Arc<Self>,
        topic: impl Into<String>,
        cancel: CancellationToken,
    ) -> impl Stream<Item = EventEnvelope> + Send + 'static {
        let pipeline = Arc::clone(self);
        let topic = topic.into();

        async_stream::stream! {
            let c = &pipeline.collaborators;
            pipeline.tracker.reset();
            pipeline.tracker.set_event_sink(ToolEventSink::Buffered);

            yield EventEnvelope::new(ProgressEvent::status("Initializing research run"));

            let state = pipeline.prepare_state(&topic).await;
            for envelope in pipeline.tracker.drain(state.as_ref(), Some(0)) {
                yield envelope;
            }

            yield EventEnvelope::new(ProgressEvent::TodoList { tasks: state.tasks() }).with_step(0);

            // Parallel tasks
            let routes = Self::routes(&state);
            let task_count = routes.len();
            let (sender, receiver) = event_channel(routes);

            let sink_guard = SinkGuard { tracker: &pipeline.tracker };
            let push_sender = sender.clone();
            pipeline.tracker.set_event_sink(ToolEventSink::push(move |envelope| push_sender.send(envelope)));

            let executor = pipeline.executor(&topic);
            let worker_state = Arc::clone(&state);
            let items: Vec<(u32, ())> = state.task_ids().into_iter().map(|id| (id, ())).collect();
            let mut barrier = spawn_workers(items, sender, receiver, move |(), ctx, tx| {
                run_task_worker(
                    Arc::clone(&executor),
                    Arc::clone(&worker_state),
                    ctx,
                    Emission::Streaming(tx),
                )
            });

            loop {
                let step = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => BarrierStep::Cancelled,
                    event = barrier.next() => match event {
                        Some(envelope) => BarrierStep::Event(envelope),
                        None => BarrierStep::Drained,
                    },
                };
                match step {
                    BarrierStep::Event(envelope) => yield envelope,
                    BarrierStep::Drained => break,
                    BarrierStep::Cancelled => {
                        tracing::info!(remaining = barrier.remaining(), "run cancelled while tasks were running");
                        return;
                    }
                }
            }
            drop(sink_guard);
            tracing::info!(tasks = task_count, "all research tasks finished");

            // Report
            if cancel.is_cancelled() {
                return;
            }
            yield EventEnvelope::new(ProgressEvent::stage(
                Stage::Report,
                "All research tasks finished, writing the research report...",
            ));
            yield EventEnvelope::new(ProgressEvent::log(format!(
                "🧠 Calling {} to write the report...",
                pipeline.models.report
            )));
            let snapshot = state.snapshot();
            let report = match contain_panic("report writer", c.reporter.generate_report(&snapshot)).await {
                Ok(report) => report,
                Err(e) => {
                    let detail = format!("Report generation failed: {:#}", e);
                    tracing::error!(error = %detail, "report stage failed");
                    yield EventEnvelope::new(ProgressEvent::Error { detail });
                    return;
                }
            };
            for envelope in pipeline.tracker.drain(state.as_ref(), Some(task_count + 1)) {
                yield envelope;
            }
            state.set_report(report.clone());
            yield EventEnvelope::new(ProgressEvent::log(format!(
                "✓ Report written, {} characters",
                report.chars().count()
            )));

            if let Some(note_event) = pipeline.persist_report(&state, &report).await {
                yield note_event;
            }
            let (note_id, note_path) = state.report_note();
            yield EventEnvelope::new(ProgressEvent::FinalReport {
                report: report.clone(),
                note_id,
                note_path,
            });

            // Script
            if cancel.is_cancelled() {
                return;
            }
            yield EventEnvelope::new(ProgressEvent::stage(
                Stage::Script,
                "Turning the research report into a two-person podcast script...",
            ));
            yield EventEnvelope::new(ProgressEvent::log(format!(
                "🧠 Calling {} to write the podcast script...",
                pipeline.models.script
            )));
            yield EventEnvelope::new(ProgressEvent::log(
                "Scriptwriter is drafting the dialogue between Host (Xiayu) and Guest (Liwa)...",
            ));
            let script = match contain_panic("script writer", c.script_writer.generate_script(&report)).await {
                Ok(script) => script,
                Err(e) => {
                    let detail = format!("Script generation failed: {:#}", e);
                    tracing::error!(error = %detail, "script stage failed");
                    yield EventEnvelope::new(ProgressEvent::Error { detail });
                    return;
                }
            };
            for envelope in pipeline.tracker.drain(state.as_ref(), None) {
                yield envelope;
            }
            state.set_script(script.clone());
            let turns = script.len();
            yield EventEnvelope::new(ProgressEvent::log(format!(
                "✓ Script ready, {} dialogue turns",
                turns
            )));
            if turns == 0 {
                yield EventEnvelope::new(ProgressEvent::log(
                    "⚠️ Warning: the script is empty, parsing may have failed; check the logs",
                ));
            }
            yield EventEnvelope::new(ProgressEvent::PodcastScript {
                script: script.clone(),
                turns,
            });

            // Audio
            if cancel.is_cancelled() {
                return;
            }
            yield EventEnvelope::new(ProgressEvent::stage(
                Stage::Audio,
                "Generating speech with the TTS engine...",
            ));
            let run_id = state.run_id();
            yield EventEnvelope::new(ProgressEvent::log(format!(
                "Preparing speech for {} dialogue turns...",
                turns
            )));
            yield EventEnvelope::new(ProgressEvent::AudioStart {
                total: turns,
                message: format!("Generating {} speech segments", turns),
            });

            let mut relay = AudioRelay::start(Arc::clone(&c.audio_generator), script, run_id.clone());
            loop {
                match relay.poll().await {
                    RelayPoll::Progress(progress) => {
                        let message = format!(
                            "[TTS {}/{}] Generating speech for {}: {}",
                            progress.current, progress.total, progress.role, progress.preview
                        );
                        let done_message = format!(
                            "[TTS {}/{}] ✓ {} speech generated",
                            progress.current, progress.total, progress.role
                        );
                        yield EventEnvelope::new(ProgressEvent::AudioProgress {
                            current: progress.current,
                            total: progress.total,
                            role: progress.role,
                            preview: progress.preview,
                            message,
                        });
                        yield EventEnvelope::new(ProgressEvent::log(done_message));
                    }
                    RelayPoll::Idle => {
                        if cancel.is_cancelled() {
                            tracing::info!("run cancelled during audio generation");
                            return;
                        }
                    }
                    RelayPoll::Finished => break,
                }
            }

            let outcome = relay.finish().await;
            if let Some(error) = &outcome.error {
                yield EventEnvelope::new(ProgressEvent::log(format!(
                    "⚠️ Audio generation failed: {}",
                    error
                )));
            }
            let count = outcome.files.len();
            yield EventEnvelope::new(ProgressEvent::log(format!(
                "Speech generation finished, {}/{} segments succeeded",
                count, turns
            )));
            yield EventEnvelope::new(ProgressEvent::AudioGenerated {
                files: outcome.files.iter().map(|path| path.display().to_string()).collect(),
                count,
            });

            // Synthesis
            if cancel.is_cancelled() {
                return;
            }
            yield EventEnvelope::new(ProgressEvent::stage(
                Stage::Synthesis,
                "Assembling the full podcast episode...",
            ));
            yield EventEnvelope::new(ProgressEvent::log("Joining all speech segments with FFmpeg..."));
            match c.synthesizer.combine(&outcome.files, &run_id).await {
                Ok(Some(path)) => {
                    yield EventEnvelope::new(ProgressEvent::PodcastReady {
                        file: path.display().to_string(),
                    });
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::error!(error = %format!("{:#}", e), "podcast synthesis failed");
                    yield EventEnvelope::new(ProgressEvent::log(format!(
                        "⚠️ Podcast synthesis failed: {}",
                        e
                    )));
                }
            }

            yield EventEnvelope::new(ProgressEvent::Done);
        }
    }

    /// Run the pipeline without streaming and return what it produced
    ///
    /// Tasks still run concurrently; their tool events are drained and
    /// discarded. Report and script failures are returned as errors.
    pub async fn run(&self, topic: &str) -> Result<ResearchOutput> {
        let c = &self.collaborators;
        self.tracker.reset();
        self.tracker.set_event_sink(ToolEventSink::Buffered);

        let state = self.prepare_state(topic).await;
        self.tracker.drain(state.as_ref(), None);

        let (sender, receiver) = event_channel(Self::routes(&state));
        let executor = self.executor(topic);
        let worker_state = Arc::clone(&state);
        let items: Vec<(u32, ())> = state.task_ids().into_iter().map(|id| (id, ())).collect();
        let mut barrier = spawn_workers(items, sender, receiver, move |(), ctx, _tx| {
            run_task_worker(
                Arc::clone(&executor),
                Arc::clone(&worker_state),
                ctx,
                Emission::Buffered,
            )
        });
        while barrier.next().await.is_some() {}
        self.tracker.drain(state.as_ref(), None);

        let snapshot = state.snapshot();
        let report = contain_panic("report writer", c.reporter.generate_report(&snapshot)).await?;
        self.tracker.drain(state.as_ref(), None);
        state.set_report(report.clone());
        self.persist_report(&state, &report).await;

        let script = contain_panic("script writer", c.script_writer.generate_script(&report)).await?;
        self.tracker.drain(state.as_ref(), None);
        state.set_script(script.clone());

        let run_id = state.run_id();
        let audio_files = match c.audio_generator.generate(&script, &run_id, None).await {
            Ok(files) => files,
            Err(e) => {
                tracing::error!(error = %format!("{:#}", e), "audio generation failed");
                Vec::new()
            }
        };

        let podcast_file: Option<PathBuf> = match c.synthesizer.combine(&audio_files, &run_id).await {
            Ok(path) => path,
            Err(e) => {
                tracing::error!(error = %format!("{:#}", e), "podcast synthesis failed");
                None
            }
        };

        let (report_note_id, report_note_path) = state.report_note();
        Ok(ResearchOutput {
            topic: topic.to_string(),
            report,
            tasks: state.tasks(),
            script,
            audio_files,
            podcast_file,
            report_note_id,
            report_note_path,
        })
    }
}
