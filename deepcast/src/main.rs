/*
┌─────────────────────────────────────────────────────────────────────────────┐
│                              DEEPCAST PIPELINE                               │
└─────────────────────────────────────────────────────────────────────────────┘

  PLAN
    ├─> Planner model splits the topic into 3-5 tasks
    └─> Empty or failed plan: one "Background overview" task

         ↓

  TASKS (one concurrent worker per task)
    ├─> Search (Tavily) → sources summary + context
    ├─> Summarize (streamed), syncing one note per task
    └─> completed | skipped (no results) | failed

         ↓

  REPORT → report note → SCRIPT (Host Xiayu / Guest Liwa)

         ↓

  AUDIO (TTS per turn, progress relayed live) → SYNTHESIS (ffmpeg) → done

EXAMPLE COMMANDS:

  # Stream JSON events
  deepcast "solid-state batteries"

  # Console output, notes disabled
  deepcast "solid-state batteries" --pretty --no-notes

  # Console output plus __DC_EVENT__ lines on stderr for a parent process
  deepcast "solid-state batteries" --pretty --emit-events

  # Run silently and print the final output
  deepcast "solid-state batteries" --mode batch

*/

use anyhow::Result;
use clap::Parser;
use deepcast::research::{
    cli::{Args, Mode},
    Configuration, ResearchPipeline,
};
use deepcast_sdk::{
    log_error_console, log_file_saved, log_info, log_progress, log_stage_console,
    log_task_console, log_warning, EventEnvelope, ProgressEvent,
};
use futures::StreamExt;
use std::io::Write;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("deepcast=info"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(std::io::stderr)
        .init();
}

/// Console rendering for `--pretty`
fn print_pretty(envelope: &EventEnvelope) {
    match &envelope.event {
        ProgressEvent::Status { message } => {
            log_info!(message);
        }
        ProgressEvent::TodoList { tasks } => {
            log_info!("Planned {} research tasks", tasks.len());
            for task in tasks {
                println!("  {}. {} ({})", task.id, task.title, task.query);
            }
        }
        ProgressEvent::TaskStatus { status, title, detail, .. } => {
            let task_id = envelope.task_id.unwrap_or_default();
            log_task_console!(task_id, status, title);
            if let Some(detail) = detail {
                log_warning!(detail);
            }
        }
        ProgressEvent::Sources { latest_sources, backend, .. } => {
            let task_id = envelope.task_id.unwrap_or_default();
            log_info!("[task {}] sources from {}:\n{}", task_id, backend, latest_sources);
        }
        ProgressEvent::TaskSummaryChunk { content, .. } => {
            print!("{}", content);
            let _ = std::io::stdout().flush();
        }
        ProgressEvent::ToolCall { agent, tool, note_id, .. } => {
            let note = note_id.as_deref().map(|id| format!(" ({})", id));
            log_info!("{} called {}{}", agent, tool, note.unwrap_or_default());
        }
        ProgressEvent::StageChange { stage, message } => {
            let stage = serde_json::to_value(stage)
                .ok()
                .and_then(|v| v.as_str().map(str::to_string))
                .unwrap_or_default();
            log_stage_console!(stage, message);
        }
        ProgressEvent::Log { message } => println!("{}", message),
        ProgressEvent::FinalReport { report, .. } => println!("\n{}\n", report),
        ProgressEvent::PodcastScript { script, .. } => {
            for turn in script {
                println!("{}: {}", turn.role, turn.content);
            }
        }
        ProgressEvent::AudioStart { message, .. } => {
            log_info!(message);
        }
        ProgressEvent::AudioProgress { current, total, .. } => {
            log_progress!(current, total, "speech segments");
        }
        ProgressEvent::AudioGenerated { count, .. } => {
            log_info!("{} audio segments generated", count);
        }
        ProgressEvent::PodcastReady { file } => {
            log_file_saved!(file);
        }
        ProgressEvent::ReportNote { note_id, note_path, .. } => {
            log_file_saved!(note_path.as_deref().unwrap_or(note_id.as_str()));
        }
        ProgressEvent::Done => {
            log_info!("Done");
        }
        ProgressEvent::Error { detail } => {
            log_error_console!(detail);
        }
    }
}

async fn run_stream(pipeline: Arc<ResearchPipeline>, args: &Args) -> Result<()> {
    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::info!("interrupt received, cancelling run");
            ctrl_c.cancel();
        }
    });

    let events = pipeline.run_stream(args.topic.clone(), cancel);
    tokio::pin!(events);

    let mut stdout = std::io::stdout();
    while let Some(envelope) = events.next().await {
        if args.emit_events {
            envelope.emit();
        }
        if args.pretty {
            print_pretty(&envelope);
        } else {
            writeln!(stdout, "{}", envelope.to_json()?)?;
            stdout.flush()?;
        }
        if envelope.is_terminal() {
            break;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = Args::parse();
    let config = args.apply(Configuration::from_env());
    let pipeline = Arc::new(ResearchPipeline::from_config(&config)?);

    match args.mode {
        Mode::Stream => run_stream(pipeline, &args).await,
        Mode::Batch => {
            let output = pipeline.run(&args.topic).await?;
            println!("{}", serde_json::to_string_pretty(&output)?);
            Ok(())
        }
    }
}
