//! Filesystem note store
//!
//! Each note is a Markdown file `<note_id>.md` with YAML front matter:
//!
//! ```text
//! ---
//! id: note_20250101120000_1a2b3c4d
//! title: "Task 1: History"
//! note_type: task_state
//! tags: [deep_research, task_1]
//! ...
//! ---
//!
//! body
//! ```

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use deepcast_sdk::{NoteRequest, NoteStore};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::fs;

#[derive(Debug, Error)]
pub enum NoteError {
    #[error("note not found: {0}")]
    NotFound(String),
    #[error("invalid note id: {0}")]
    InvalidId(String),
    #[error("note file {path} holds note {found}")]
    IdMismatch { path: String, found: String },
    #[error("note {0} has no front matter")]
    MissingFrontMatter(String),
    #[error("invalid note front matter: {0}")]
    FrontMatter(#[from] serde_yaml::Error),
    #[error("note io error: {0}")]
    Io(#[from] std::io::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteMeta {
    pub id: String,
    pub title: String,
    pub note_type: String,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub task_id: Option<u32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Note {
    pub meta: NoteMeta,
    pub content: String,
}

impl Note {
    fn render(&self) -> Result<String, NoteError> {
        let front = serde_yaml::to_string(&self.meta)?;
        Ok(format!(
            "---\n{}---\n\n{}\n",
            front,
            self.content.trim_end()
        ))
    }

    fn parse(id: &str, text: &str) -> Result<Self, NoteError> {
        let rest = text
            .strip_prefix("---\n")
            .ok_or_else(|| NoteError::MissingFrontMatter(id.to_string()))?;
        let (front, body) = rest
            .split_once("\n---\n")
            .ok_or_else(|| NoteError::MissingFrontMatter(id.to_string()))?;
        let meta: NoteMeta = serde_yaml::from_str(front)?;
        Ok(Self {
            meta,
            content: body.trim().to_string(),
        })
    }
}

pub struct FsNoteStore {
    workspace: PathBuf,
}

impl FsNoteStore {
    pub fn new(workspace: impl Into<PathBuf>) -> Self {
        Self {
            workspace: workspace.into(),
        }
    }

    /// Path of a note file; ids must be plain `note_*` names inside the workspace
    fn path_for(&self, note_id: &str) -> Result<PathBuf, NoteError> {
        if !is_valid_note_id(note_id) {
            return Err(NoteError::InvalidId(note_id.to_string()));
        }
        Ok(self.workspace.join(format!("{}.md", note_id)))
    }

    fn new_id() -> String {
        let short = uuid::Uuid::new_v4().simple().to_string();
        format!("note_{}_{}", Utc::now().format("%Y%m%d%H%M%S"), &short[..8])
    }

    pub async fn load(&self, note_id: &str) -> Result<Note, NoteError> {
        let path = self.path_for(note_id)?;
        let text = match fs::read_to_string(&path).await {
            Ok(text) => text,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(NoteError::NotFound(note_id.to_string()))
            }
            Err(e) => return Err(e.into()),
        };
        let note = Note::parse(note_id, &text)?;
        if note.meta.id != note_id {
            return Err(NoteError::IdMismatch {
                path: path.display().to_string(),
                found: note.meta.id,
            });
        }
        Ok(note)
    }

    async fn save(&self, note: &Note) -> Result<PathBuf, NoteError> {
        fs::create_dir_all(&self.workspace).await?;
        let path = self.path_for(&note.meta.id)?;
        fs::write(&path, note.render()?).await?;
        Ok(path)
    }

    async fn apply(&self, request: &NoteRequest) -> Result<String, NoteError> {
        match request {
            NoteRequest::Create {
                task_id,
                title,
                note_type,
                tags,
                content,
            } => {
                let now = Utc::now();
                let note = Note {
                    meta: NoteMeta {
                        id: Self::new_id(),
                        title: title.clone(),
                        note_type: note_type.clone(),
                        tags: tags.clone(),
                        task_id: *task_id,
                        created_at: now,
                        updated_at: now,
                    },
                    content: content.clone(),
                };
                let path = self.save(&note).await?;
                tracing::info!(note_id = %note.meta.id, path = %path.display(), "note created");
                Ok(format!(
                    "✅ Note created\nID: {}\nTitle: {}",
                    note.meta.id, note.meta.title
                ))
            }
            NoteRequest::Update {
                note_id,
                task_id,
                title,
                note_type,
                tags,
                content,
            } => {
                let mut note = self.load(note_id).await?;
                if let Some(title) = title {
                    note.meta.title = title.clone();
                }
                if let Some(note_type) = note_type {
                    note.meta.note_type = note_type.clone();
                }
                if let Some(tags) = tags {
                    note.meta.tags = tags.clone();
                }
                if task_id.is_some() {
                    note.meta.task_id = *task_id;
                }
                if let Some(content) = content {
                    note.content = content.clone();
                }
                note.meta.updated_at = Utc::now();
                self.save(&note).await?;
                tracing::info!(note_id = %note_id, "note updated");
                Ok(format!("✅ Note updated\nID: {}", note_id))
            }
            NoteRequest::Read { note_id } => {
                let note = self.load(note_id).await?;
                Ok(format!(
                    "ID: {}\nTitle: {}\nType: {}\nTags: {}\nUpdated: {}\n\n{}",
                    note.meta.id,
                    note.meta.title,
                    note.meta.note_type,
                    note.meta.tags.join(", "),
                    note.meta.updated_at.to_rfc3339(),
                    note.content
                ))
            }
        }
    }
}

fn is_valid_note_id(note_id: &str) -> bool {
    note_id.starts_with("note_")
        && note_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[async_trait]
impl NoteStore for FsNoteStore {
    async fn execute(&self, request: &NoteRequest) -> Result<String> {
        Ok(self.apply(request).await?)
    }

    fn workspace(&self) -> Option<&Path> {
        Some(&self.workspace)
    }
}
