//! CLI argument parsing for a research run

use clap::{Parser, ValueEnum};
use std::path::PathBuf;

use crate::research::config::Configuration;

/// How the run reports its results
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum Mode {
    /// Print every progress event as it happens
    Stream,
    /// Run silently and print the final output as JSON
    Batch,
}

/// DeepCast CLI Arguments
#[derive(Parser, Debug, Clone)]
#[command(
    name = "deepcast",
    about = "Research a topic and turn the findings into a podcast episode"
)]
pub struct Args {
    /// Research topic
    pub topic: String,

    #[arg(long, value_enum, default_value_t = Mode::Stream)]
    pub mode: Mode,

    /// Human-readable console output instead of JSON lines (stream mode)
    #[arg(long)]
    pub pretty: bool,

    /// Also write each event to stderr as a `__DC_EVENT__:` line for a parent process
    #[arg(long)]
    pub emit_events: bool,

    /// Disable the note tool and the report note
    #[arg(long)]
    pub no_notes: bool,

    /// Directory for note files (overrides NOTES_WORKSPACE)
    #[arg(long)]
    pub notes_workspace: Option<PathBuf>,

    /// Directory for audio segments and the final episode (overrides AUDIO_OUTPUT_DIR)
    #[arg(long)]
    pub audio_dir: Option<PathBuf>,

    /// Model for planning and reporting (overrides SMART_LLM_MODEL)
    #[arg(long)]
    pub smart_model: Option<String>,

    /// Model for task summaries (overrides FAST_LLM_MODEL)
    #[arg(long)]
    pub fast_model: Option<String>,
}

impl Args {
    /// Apply the CLI overrides on top of `config`
    pub fn apply(&self, mut config: Configuration) -> Configuration {
        if self.no_notes {
            config.enable_notes = false;
        }
        if let Some(workspace) = &self.notes_workspace {
            config.notes_workspace = workspace.clone();
        }
        if let Some(dir) = &self.audio_dir {
            config.audio_output_dir = dir.clone();
        }
        if let Some(model) = &self.smart_model {
            config.smart_llm_model = model.clone();
        }
        if let Some(model) = &self.fast_model {
            config.fast_llm_model = model.clone();
        }
        config
    }
}
