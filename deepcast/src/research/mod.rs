//! Research-to-podcast pipeline
//!
//! This module turns a topic into a research report and a podcast episode.
//! Phases: planning, per-task search and summarization (run concurrently),
//! final report, dialogue script, speech generation and audio synthesis.
//!
//! [`workflow::ResearchPipeline`] sequences the phases; each phase talks to
//! its service through a `deepcast_sdk` collaborator trait.

pub mod audio_relay;
pub mod cli;
pub mod config;
pub mod executor;
pub mod notes;
pub mod phase0_plan;
pub mod phase1_search;
pub mod phase2_summarize;
pub mod phase3_report;
pub mod phase4_script;
pub mod phase5_audio;
pub mod types;
pub mod workflow;

// Re-export commonly used types
pub use config::Configuration;
pub use executor::{Emission, TaskExecutor, EMPTY_SUMMARY_PLACEHOLDER};
pub use types::{ResearchOutput, ResearchState, StateError};
pub use workflow::{Collaborators, ModelLabels, ResearchPipeline};
