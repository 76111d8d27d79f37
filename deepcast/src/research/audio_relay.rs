//! Bridges a background audio-generation task to the main event loop
//!
//! The generator's synchronous progress callback pushes onto a bounded
//! channel; the background task finishes by sending a [`RelayMessage::Finished`]
//! sentinel carrying its result.

use deepcast_sdk::{AudioGenerator, AudioProgress, ProgressCallback, ScriptTurn};
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;

/// How long a single poll waits before reporting [`RelayPoll::Idle`]
pub const POLL_INTERVAL: Duration = Duration::from_millis(100);
/// Bounded wait for the background task after its sentinel arrived
pub const JOIN_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug)]
pub enum RelayMessage {
    Progress(AudioProgress),
    Finished(Result<Vec<PathBuf>, String>),
}

/// Result of one poll of the relay
#[derive(Debug, PartialEq)]
pub enum RelayPoll {
    Progress(AudioProgress),
    /// Nothing arrived within [`POLL_INTERVAL`]
    Idle,
    /// The sentinel was observed; further polls keep returning this
    Finished,
}

/// What the audio stage produced
#[derive(Debug, Default, PartialEq)]
pub struct AudioOutcome {
    pub files: Vec<PathBuf>,
    pub error: Option<String>,
}

pub struct AudioRelay {
    receiver: mpsc::Receiver<RelayMessage>,
    handle: Option<JoinHandle<()>>,
    result: Option<Result<Vec<PathBuf>, String>>,
}

impl AudioRelay {
    /// Start generating audio for `script` in the background
    pub fn start(generator: Arc<dyn AudioGenerator>, script: Vec<ScriptTurn>, run_id: String) -> Self {
        let (sender, receiver) = mpsc::channel(script.len() + 1);

        let progress_sender = sender.clone();
        let callback: ProgressCallback = Arc::new(move |progress: AudioProgress| {
            if progress_sender
                .try_send(RelayMessage::Progress(progress))
                .is_err()
            {
                tracing::warn!("audio progress relay full or closed, dropping update");
            }
        });

        let handle = tokio::spawn(async move {
            let generation = generator.generate(&script, &run_id, Some(callback));
            let result = match AssertUnwindSafe(generation).catch_unwind().await {
                Ok(Ok(files)) => Ok(files),
                Ok(Err(e)) => Err(format!("{:#}", e)),
                Err(_) => Err("audio generation panicked".to_string()),
            };
            if let Err(e) = &result {
                tracing::error!(error = %e, "audio generation failed");
            }
            // Sentinel waits for room instead of being dropped
            let _ = sender.send(RelayMessage::Finished(result)).await;
        });

        Self {
            receiver,
            handle: Some(handle),
            result: None,
        }
    }

    /// Wait up to [`POLL_INTERVAL`] for the next message
    pub async fn poll(&mut self) -> RelayPoll {
        if self.result.is_some() {
            return RelayPoll::Finished;
        }
        match tokio::time::timeout(POLL_INTERVAL, self.receiver.recv()).await {
            Ok(Some(RelayMessage::Progress(progress))) => RelayPoll::Progress(progress),
            Ok(Some(RelayMessage::Finished(result))) => {
                self.result = Some(result);
                RelayPoll::Finished
            }
            Ok(None) => {
                self.result = Some(Err("audio worker exited without a result".to_string()));
                RelayPoll::Finished
            }
            Err(_) => RelayPoll::Idle,
        }
    }

    /// Join the background task with a bounded wait and return its result
    ///
    /// Progress updates still queued are discarded.
    pub async fn finish(mut self) -> AudioOutcome {
        if let Some(handle) = self.handle.take() {
            match tokio::time::timeout(JOIN_TIMEOUT, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!(error = %e, "audio task did not complete cleanly"),
                Err(_) => tracing::warn!("audio task still running after join timeout"),
            }
        }

        if self.result.is_none() {
            while let Ok(message) = self.receiver.try_recv() {
                if let RelayMessage::Finished(result) = message {
                    self.result = Some(result);
                }
            }
        }

        match self.result.take() {
            Some(Ok(files)) => AudioOutcome { files, error: None },
            Some(Err(error)) => AudioOutcome {
                files: Vec::new(),
                error: Some(error),
            },
            None => AudioOutcome {
                files: Vec::new(),
                error: Some("audio generation did not finish in time".to_string()),
            },
        }
    }
}
