//! Phase 5: Audio generation and synthesis
//!
//! [`TtsAudioGenerator`] renders one MP3 per script turn through an
//! OpenAI-style speech endpoint. [`FfmpegSynthesizer`] joins the segments
//! into the final episode with ffmpeg's concat demuxer.

use anyhow::{Context, Result};
use async_trait::async_trait;
use deepcast_sdk::{AudioGenerator, AudioProgress, ProgressCallback, ScriptTurn, Synthesizer};
use reqwest::Client;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::process::Command;

const DEFAULT_VOICE: &str = "xiayu";
const PREVIEW_CHARS: usize = 30;

/// Voice for a speaker role: host → `xiayu`, guest → `liwa`
pub fn voice_for_role(role: &str) -> &'static str {
    let role = role.to_lowercase();
    if role.contains("host") || role.contains("xiayu") {
        "xiayu"
    } else if role.contains("guest") || role.contains("liwa") {
        "liwa"
    } else {
        DEFAULT_VOICE
    }
}

/// `<run_id>_<index:03>_<role>.mp3`
pub fn segment_file_name(run_id: &str, index: usize, role: &str) -> String {
    let role: String = role
        .chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect();
    format!("{}_{:03}_{}.mp3", run_id, index, role)
}

#[derive(Serialize)]
struct SpeechRequest<'a> {
    model: &'a str,
    input: &'a str,
    voice: &'a str,
    speed: f32,
}

pub struct TtsAudioGenerator {
    http: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    output_dir: PathBuf,
}

impl TtsAudioGenerator {
    pub fn new(
        endpoint: impl Into<String>,
        api_key: Option<String>,
        model: impl Into<String>,
        output_dir: impl Into<PathBuf>,
    ) -> Result<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("Failed to build TTS HTTP client")?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            api_key,
            model: model.into(),
            output_dir: output_dir.into(),
        })
    }

    async fn synthesize(&self, api_key: &str, text: &str, voice: &str, path: &Path) -> Result<()> {
        let response = self
            .http
            .post(&self.endpoint)
            .bearer_auth(api_key)
            .json(&SpeechRequest {
                model: &self.model,
                input: text,
                voice,
                speed: 1.0,
            })
            .send()
            .await
            .context("TTS request failed")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("TTS endpoint returned {}: {}", status, body);
        }

        let bytes = response.bytes().await.context("Failed to read TTS audio")?;
        fs::write(path, &bytes)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        Ok(())
    }
}

#[async_trait]
impl AudioGenerator for TtsAudioGenerator {
    async fn generate(
        &self,
        script: &[ScriptTurn],
        run_id: &str,
        progress: Option<ProgressCallback>,
    ) -> Result<Vec<PathBuf>> {
        let Some(api_key) = self.api_key.as_deref() else {
            tracing::warn!("TTS_API_KEY is not set, audio generation skipped");
            return Ok(Vec::new());
        };

        fs::create_dir_all(&self.output_dir)
            .await
            .with_context(|| format!("Failed to create {}", self.output_dir.display()))?;

        let total = script.len();
        let mut files = Vec::new();

        for (index, turn) in script.iter().enumerate() {
            if let Some(progress) = &progress {
                progress(AudioProgress {
                    current: index + 1,
                    total,
                    role: turn.role.clone(),
                    preview: turn.content.chars().take(PREVIEW_CHARS).collect(),
                });
            }

            if turn.role.trim().is_empty() || turn.content.trim().is_empty() {
                continue;
            }

            let path = self
                .output_dir
                .join(segment_file_name(run_id, index, &turn.role));
            if fs::try_exists(&path).await.unwrap_or(false) {
                tracing::debug!(path = %path.display(), "audio segment already exists");
                files.push(path);
                continue;
            }

            let voice = voice_for_role(&turn.role);
            match self.synthesize(api_key, &turn.content, voice, &path).await {
                Ok(()) => files.push(path),
                Err(e) => {
                    tracing::error!(index, role = %turn.role, error = %e, "audio segment failed");
                }
            }
        }

        tracing::info!(run_id, generated = files.len(), total, "audio generation finished");
        Ok(files)
    }
}

pub struct FfmpegSynthesizer {
    ffmpeg: PathBuf,
    output_dir: PathBuf,
}

impl FfmpegSynthesizer {
    pub fn new(ffmpeg: Option<PathBuf>, output_dir: impl Into<PathBuf>) -> Self {
        Self {
            ffmpeg: ffmpeg.unwrap_or_else(|| PathBuf::from("ffmpeg")),
            output_dir: output_dir.into(),
        }
    }
}

/// Concat demuxer list with one `file '<path>'` line per segment
fn concat_list(files: &[PathBuf]) -> String {
    files
        .iter()
        .map(|path| {
            let escaped = path.display().to_string().replace('\'', r"'\''");
            format!("file '{}'\n", escaped)
        })
        .collect()
}

#[async_trait]
impl Synthesizer for FfmpegSynthesizer {
    async fn combine(&self, files: &[PathBuf], run_id: &str) -> Result<Option<PathBuf>> {
        let mut segments = Vec::new();
        for path in files {
            if fs::try_exists(path).await.unwrap_or(false) {
                segments.push(std::path::absolute(path).unwrap_or_else(|_| path.clone()));
            } else {
                tracing::warn!(path = %path.display(), "audio segment not found, skipping");
            }
        }
        if segments.is_empty() {
            tracing::warn!(run_id, "no audio segments to combine");
            return Ok(None);
        }

        fs::create_dir_all(&self.output_dir)
            .await
            .with_context(|| format!("Failed to create {}", self.output_dir.display()))?;
        let list_path = self.output_dir.join(format!("concat_{}.txt", run_id));
        fs::write(&list_path, concat_list(&segments))
            .await
            .with_context(|| format!("Failed to write {}", list_path.display()))?;

        let output_path = self.output_dir.join(format!("podcast_{}.mp3", run_id));
        let output = Command::new(&self.ffmpeg)
            .arg("-y")
            .args(["-f", "concat", "-safe", "0", "-i"])
            .arg(&list_path)
            .args(["-c", "copy"])
            .arg(&output_path)
            .output()
            .await
            .with_context(|| format!("Failed to run {}", self.ffmpeg.display()))?;

        if let Err(e) = fs::remove_file(&list_path).await {
            tracing::debug!(error = %e, "could not remove concat list");
        }

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("ffmpeg exited with {}: {}", output.status, stderr.trim());
        }

        tracing::info!(path = %output_path.display(), segments = segments.len(), "podcast synthesized");
        Ok(Some(output_path))
    }
}
