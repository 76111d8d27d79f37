//! Shared run state for research workflows
//!
//! Tasks live in an arena of individually locked slots, indexed by task id.
//! The list-valued aggregates and the loop counter sit behind one separate
//! lock. Callers only get atomic operations, never the fields themselves.

use crate::workflow_utils::tracker::NoteAttachment;
use deepcast_sdk::{
    PlannedTask, ResearchSnapshot, ScriptTurn, TaskStatus, TransitionError,
};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StateError {
    #[error("unknown task id {0}")]
    UnknownTask(u32),
    #[error(transparent)]
    Transition(#[from] TransitionError),
}

#[derive(Debug, Default)]
struct Aggregate {
    web_research_results: Vec<String>,
    sources_gathered: Vec<String>,
    loop_count: u32,
    report: Option<String>,
    script: Vec<ScriptTurn>,
    report_note_id: Option<String>,
    report_note_path: Option<String>,
}

/// State of one research run, shared by every worker
#[derive(Debug)]
pub struct ResearchState {
    topic: String,
    tasks: Vec<Mutex<PlannedTask>>,
    index: HashMap<u32, usize>,
    aggregate: Mutex<Aggregate>,
}

impl ResearchState {
    pub fn new(topic: impl Into<String>, tasks: Vec<PlannedTask>) -> Self {
        let index = tasks
            .iter()
            .enumerate()
            .map(|(pos, task)| (task.id, pos))
            .collect();
        Self {
            topic: topic.into(),
            tasks: tasks.into_iter().map(Mutex::new).collect(),
            index,
            aggregate: Mutex::new(Aggregate::default()),
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Task ids in planning order
    pub fn task_ids(&self) -> Vec<u32> {
        self.tasks.iter().map(|slot| slot.lock().id).collect()
    }

    fn slot(&self, task_id: u32) -> Result<&Mutex<PlannedTask>, StateError> {
        self.index
            .get(&task_id)
            .map(|&pos| &self.tasks[pos])
            .ok_or(StateError::UnknownTask(task_id))
    }

    /// Copy of one task
    pub fn task(&self, task_id: u32) -> Option<PlannedTask> {
        self.slot(task_id).ok().map(|slot| slot.lock().clone())
    }

    /// Copy of every task in planning order
    pub fn tasks(&self) -> Vec<PlannedTask> {
        self.tasks.iter().map(|slot| slot.lock().clone()).collect()
    }

    /// Apply a status change and return the updated task
    pub fn transition(&self, task_id: u32, next: TaskStatus) -> Result<PlannedTask, StateError> {
        let mut task = self.slot(task_id)?.lock();
        task.transition(next)?;
        Ok(task.clone())
    }

    /// Attach the final summary and mark the task completed
    pub fn complete(&self, task_id: u32, summary: String) -> Result<PlannedTask, StateError> {
        let mut task = self.slot(task_id)?.lock();
        task.transition(TaskStatus::Completed)?;
        task.summary = Some(summary);
        Ok(task.clone())
    }

    /// Mark a task failed unless it already reached a terminal status
    ///
    /// Returns `None` when the task was already terminal.
    pub fn fail(&self, task_id: u32) -> Result<Option<PlannedTask>, StateError> {
        let mut task = self.slot(task_id)?.lock();
        if task.status.is_terminal() {
            return Ok(None);
        }
        task.transition(TaskStatus::Failed)?;
        Ok(Some(task.clone()))
    }

    pub fn set_notices(&self, task_id: u32, notices: Vec<String>) -> Result<(), StateError> {
        self.slot(task_id)?.lock().notices = notices;
        Ok(())
    }

    pub fn set_sources_summary(&self, task_id: u32, summary: String) -> Result<(), StateError> {
        self.slot(task_id)?.lock().sources_summary = Some(summary);
        Ok(())
    }

    /// Append one task's sources and context and bump the loop counter, atomically
    pub fn record_sources(&self, sources_summary: String, context: String) -> u32 {
        let mut aggregate = self.aggregate.lock();
        aggregate.sources_gathered.push(sources_summary);
        aggregate.web_research_results.push(context);
        aggregate.loop_count += 1;
        aggregate.loop_count
    }

    pub fn loop_count(&self) -> u32 {
        self.aggregate.lock().loop_count
    }

    pub fn set_report(&self, report: String) {
        self.aggregate.lock().report = Some(report);
    }

    pub fn report(&self) -> Option<String> {
        self.aggregate.lock().report.clone()
    }

    pub fn set_script(&self, script: Vec<ScriptTurn>) {
        self.aggregate.lock().script = script;
    }

    pub fn script(&self) -> Vec<ScriptTurn> {
        self.aggregate.lock().script.clone()
    }

    pub fn set_report_note(&self, note_id: String, note_path: Option<String>) {
        let mut aggregate = self.aggregate.lock();
        aggregate.report_note_id = Some(note_id);
        aggregate.report_note_path = note_path;
    }

    /// `(note_id, note_path)` of the persisted report, if any
    pub fn report_note(&self) -> (Option<String>, Option<String>) {
        let aggregate = self.aggregate.lock();
        (
            aggregate.report_note_id.clone(),
            aggregate.report_note_path.clone(),
        )
    }

    /// Identifier used to name the run's audio files
    pub fn run_id(&self) -> String {
        match self.aggregate.lock().report_note_id.as_deref() {
            Some(note_id) => format!("task_{}", note_id),
            None => "task_default".to_string(),
        }
    }

    /// Read-only copy handed to the reporter
    pub fn snapshot(&self) -> ResearchSnapshot {
        let tasks = self.tasks();
        let aggregate = self.aggregate.lock();
        ResearchSnapshot {
            topic: self.topic.clone(),
            tasks,
            sources_gathered: aggregate.sources_gathered.clone(),
            web_research_results: aggregate.web_research_results.clone(),
        }
    }
}

impl NoteAttachment for ResearchState {
    fn attach_note(&self, task_id: u32, note_id: &str, note_path: Option<String>) {
        let Ok(slot) = self.slot(task_id) else {
            return;
        };
        let mut task = slot.lock();
        if task.note_id.as_deref() != Some(note_id) {
            task.note_id = Some(note_id.to_string());
            if note_path.is_some() {
                task.note_path = note_path;
            }
        } else if task.note_path.is_none() {
            task.note_path = note_path;
        }
    }
}

/// Result of a buffered run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ResearchOutput {
    pub topic: String,
    pub report: String,
    pub tasks: Vec<PlannedTask>,
    pub script: Vec<ScriptTurn>,
    pub audio_files: Vec<PathBuf>,
    pub podcast_file: Option<PathBuf>,
    pub report_note_id: Option<String>,
    pub report_note_path: Option<String>,
}
