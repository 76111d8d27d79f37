// OpenAI-compatible chat client
pub mod llm;

// Research-to-podcast pipeline
pub mod research;

// Worker pool, event channel and tool-call plumbing
pub mod workflow_utils;
