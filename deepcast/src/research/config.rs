//! Run configuration
//!
//! Values come from the environment (a `.env` file is loaded first), with
//! CLI flags applied on top by [`crate::research::cli`].

use std::path::PathBuf;
use std::time::Duration;

/// Configuration for a research run
///
/// # Examples
///
/// ```no_run
/// use deepcast::research::Configuration;
///
/// let config = Configuration {
///     enable_notes: false,
///     ..Configuration::from_env()
/// };
/// ```
#[derive(Debug, Clone)]
pub struct Configuration {
    /// Base URL of the OpenAI-compatible endpoint
    pub llm_base_url: String,
    pub llm_api_key: Option<String>,
    /// Default model, used for the script writer
    pub llm_model_id: String,
    /// Model for planning and reporting
    pub smart_llm_model: String,
    /// Model for task summaries
    pub fast_llm_model: String,
    pub llm_timeout: Duration,
    pub tavily_api_key: Option<String>,
    /// Ask the search backend for raw page content
    pub fetch_full_page: bool,
    pub max_results: usize,
    /// Hide `<think>` sections from streamed summary chunks
    pub strip_thinking_tokens: bool,
    pub enable_notes: bool,
    pub notes_workspace: PathBuf,
    pub tts_api_key: Option<String>,
    pub tts_base_url: String,
    pub tts_model: String,
    pub audio_output_dir: PathBuf,
    /// `ffmpeg` on `PATH` when unset
    pub ffmpeg_path: Option<PathBuf>,
}

impl Default for Configuration {
    fn default() -> Self {
        Self {
            llm_base_url: "https://api.openai.com/v1".to_string(),
            llm_api_key: None,
            llm_model_id: "ecnu-max".to_string(),
            smart_llm_model: "ecnu-reasoner".to_string(),
            fast_llm_model: "ecnu-max".to_string(),
            llm_timeout: Duration::from_secs(120),
            tavily_api_key: None,
            fetch_full_page: true,
            max_results: 5,
            strip_thinking_tokens: true,
            enable_notes: true,
            notes_workspace: PathBuf::from("output/notes"),
            tts_api_key: None,
            tts_base_url: "https://chat.ecnu.edu.cn/open/api/v1/audio/speech".to_string(),
            tts_model: "ecnu-tts".to_string(),
            audio_output_dir: PathBuf::from("output/audio"),
            ffmpeg_path: None,
        }
    }
}

impl Configuration {
    /// Load from the process environment, after reading `.env` if present
    pub fn from_env() -> Self {
        dotenv::dotenv().ok();
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build from an arbitrary key lookup; unset or empty keys keep defaults
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let defaults = Self::default();

        let llm_model_id = get("LLM_MODEL_ID").unwrap_or(defaults.llm_model_id);
        Self {
            llm_base_url: get("LLM_BASE_URL").unwrap_or(defaults.llm_base_url),
            llm_api_key: get("LLM_API_KEY"),
            smart_llm_model: get("SMART_LLM_MODEL").unwrap_or(defaults.smart_llm_model),
            fast_llm_model: get("FAST_LLM_MODEL").unwrap_or(defaults.fast_llm_model),
            llm_model_id,
            llm_timeout: get("LLM_TIMEOUT_SECS")
                .and_then(|v| v.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.llm_timeout),
            tavily_api_key: get("TAVILY_API_KEY"),
            fetch_full_page: get("FETCH_FULL_PAGE")
                .map(|v| parse_bool(&v))
                .unwrap_or(defaults.fetch_full_page),
            max_results: get("MAX_RESULTS")
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.max_results),
            strip_thinking_tokens: get("STRIP_THINKING_TOKENS")
                .map(|v| parse_bool(&v))
                .unwrap_or(defaults.strip_thinking_tokens),
            enable_notes: get("ENABLE_NOTES")
                .map(|v| parse_bool(&v))
                .unwrap_or(defaults.enable_notes),
            notes_workspace: get("NOTES_WORKSPACE")
                .map(PathBuf::from)
                .unwrap_or(defaults.notes_workspace),
            tts_api_key: get("TTS_API_KEY"),
            tts_base_url: get("TTS_BASE_URL").unwrap_or(defaults.tts_base_url),
            tts_model: get("TTS_MODEL").unwrap_or(defaults.tts_model),
            audio_output_dir: get("AUDIO_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.audio_output_dir),
            ffmpeg_path: get("FFMPEG_PATH").map(PathBuf::from),
        }
    }

    /// Notes workspace when notes are enabled
    pub fn active_notes_workspace(&self) -> Option<PathBuf> {
        self.enable_notes.then(|| self.notes_workspace.clone())
    }
}

/// `1`, `true`, `yes` and `on` (any case) are true; anything else is false
pub fn parse_bool(value: &str) -> bool {
    matches!(
        value.trim().to_ascii_lowercase().as_str(),
        "1" | "true" | "yes" | "on"
    )
}
