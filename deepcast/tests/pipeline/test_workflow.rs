//! Tests for the full stage sequence

use super::common::{
    build_pipeline, collect_events, draft, kinds, terminal_statuses, MemoryNotes, MockRetriever,
    SearchBehavior, Setup,
};
use deepcast_sdk::{NoteRequest, ProgressEvent, Stage, TaskStatus};
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

fn stages(events: &[deepcast_sdk::EventEnvelope]) -> Vec<Stage> {
    events
        .iter()
        .filter_map(|e| match &e.event {
            ProgressEvent::StageChange { stage, .. } => Some(*stage),
            _ => None,
        })
        .collect()
}

fn position(kinds: &[&str], kind: &str) -> usize {
    kinds
        .iter()
        .position(|k| *k == kind)
        .unwrap_or_else(|| panic!("no {kind} event"))
}

#[tokio::test]
async fn test_stream_runs_every_stage_in_order() {
    let pipeline = build_pipeline(Setup::default());
    let events = collect_events(&pipeline, "batteries").await;
    let kinds = kinds(&events);

    assert_eq!(kinds.first(), Some(&"status"));
    assert_eq!(kinds.last(), Some(&"done"));
    assert_eq!(kinds.iter().filter(|k| **k == "done").count(), 1);
    assert!(!kinds.contains(&"error"));

    let todo = &events[position(&kinds, "todo_list")];
    assert_eq!(todo.step, Some(0));
    match &todo.event {
        ProgressEvent::TodoList { tasks } => {
            assert_eq!(tasks.len(), 3);
            assert_eq!(tasks[0].stream_token.as_deref(), Some("task_1"));
        }
        other => panic!("unexpected event: {:?}", other),
    }

    assert_eq!(
        stages(&events),
        vec![Stage::Report, Stage::Script, Stage::Audio, Stage::Synthesis]
    );

    // No task event after the barrier
    let report_stage = position(&kinds, "stage_change");
    assert!(events[report_stage..].iter().all(|e| e.task_id.is_none()));
    assert_eq!(terminal_statuses(&events[..report_stage]).len(), 3);

    assert!(position(&kinds, "final_report") < position(&kinds, "podcast_script"));
    assert!(position(&kinds, "audio_start") < position(&kinds, "audio_progress"));
    assert!(position(&kinds, "audio_generated") < position(&kinds, "podcast_ready"));

    let progress = kinds.iter().filter(|k| **k == "audio_progress").count();
    assert_eq!(progress, 2);
    match &events[position(&kinds, "audio_generated")].event {
        ProgressEvent::AudioGenerated { files, count } => {
            assert_eq!(*count, 2);
            assert!(files[0].starts_with("task_default_000"));
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_failed_task_still_reaches_done() {
    let pipeline = build_pipeline(Setup {
        retriever: MockRetriever::default().with("q2", SearchBehavior::Fail),
        ..Default::default()
    });
    let events = collect_events(&pipeline, "batteries").await;

    let mut terminal = terminal_statuses(&events);
    terminal.sort();
    assert_eq!(
        terminal,
        vec![
            (1, "completed".to_string()),
            (2, "failed".to_string()),
            (3, "completed".to_string()),
        ]
    );
    assert_eq!(kinds(&events).last(), Some(&"done"));
    assert!(!kinds(&events).contains(&"error"));
}

#[tokio::test]
async fn test_zero_turn_script_skips_podcast() {
    let pipeline = build_pipeline(Setup {
        script: Vec::new(),
        ..Default::default()
    });
    let events = collect_events(&pipeline, "batteries").await;
    let kinds = kinds(&events);

    match &events[position(&kinds, "audio_generated")].event {
        ProgressEvent::AudioGenerated { files, count } => {
            assert_eq!(*count, 0);
            assert!(files.is_empty());
        }
        other => panic!("unexpected event: {:?}", other),
    }
    assert!(!kinds.contains(&"podcast_ready"));
    assert!(!kinds.contains(&"audio_progress"));
    assert_eq!(kinds.last(), Some(&"done"));
    assert!(events.iter().any(|e| matches!(
        &e.event,
        ProgressEvent::Log { message } if message.contains("script is empty")
    )));
}

#[tokio::test]
async fn test_empty_plan_uses_fallback_task() {
    for planner_fails in [false, true] {
        let pipeline = build_pipeline(Setup {
            drafts: Vec::new(),
            planner_fails,
            ..Default::default()
        });
        let events = collect_events(&pipeline, "batteries").await;

        let tasks = events
            .iter()
            .find_map(|e| match &e.event {
                ProgressEvent::TodoList { tasks } => Some(tasks.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "Background overview");
        assert_eq!(tasks[0].query, "batteries latest developments");
        assert_eq!(kinds(&events).last(), Some(&"done"));
    }
}

#[tokio::test]
async fn test_report_failure_ends_with_single_error() {
    let pipeline = build_pipeline(Setup {
        reporter_fails: true,
        ..Default::default()
    });
    let events = collect_events(&pipeline, "batteries").await;
    let kinds = kinds(&events);

    assert_eq!(kinds.last(), Some(&"error"));
    assert_eq!(kinds.iter().filter(|k| **k == "error").count(), 1);
    assert!(!kinds.contains(&"done"));
    assert!(!kinds.contains(&"final_report"));
    match &events.last().unwrap().event {
        ProgressEvent::Error { detail } => assert!(detail.contains("reporter offline")),
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_tool_events_are_pushed_live_and_notes_attached() {
    let pipeline = build_pipeline(Setup {
        record_notes: true,
        ..Default::default()
    });
    let events = collect_events(&pipeline, "batteries").await;

    let tool_calls: Vec<_> = events
        .iter()
        .filter(|e| e.kind() == "tool_call")
        .collect();
    assert_eq!(tool_calls.len(), 3);
    for call in &tool_calls {
        let task_id = call.task_id.expect("tool call without task");
        assert_eq!(call.stream_token.as_deref(), Some(format!("task_{task_id}").as_str()));
    }

    // Each task's completion carries the note its summarizer created
    for event in &events {
        if let ProgressEvent::TaskStatus {
            status: TaskStatus::Completed,
            note_id,
            ..
        } = &event.event
        {
            let task_id = event.task_id.unwrap();
            assert_eq!(note_id.as_deref(), Some(format!("note_{task_id}").as_str()));
        }
    }

    // The push sink is gone once the run is over
    assert!(!pipeline.tracker().is_push());
}

#[tokio::test]
async fn test_report_note_is_persisted_and_names_the_run() {
    let notes = Arc::new(MemoryNotes::default());
    let pipeline = build_pipeline(Setup {
        notes: Some(Arc::clone(&notes)),
        ..Default::default()
    });
    let events = collect_events(&pipeline, "batteries").await;
    let kinds = kinds(&events);

    let note_at = position(&kinds, "report_note");
    assert!(note_at < position(&kinds, "final_report"));
    match &events[note_at].event {
        ProgressEvent::ReportNote { note_id, title, .. } => {
            assert_eq!(note_id, "note_mem_1");
            assert_eq!(title, "Research report: batteries");
        }
        other => panic!("unexpected event: {:?}", other),
    }
    match &events[position(&kinds, "podcast_ready")].event {
        ProgressEvent::PodcastReady { file } => assert_eq!(file, "podcast_task_note_mem_1.mp3"),
        other => panic!("unexpected event: {:?}", other),
    }

    let stored = notes.notes.lock();
    assert_eq!(stored.len(), 1);
    assert!(matches!(
        &stored[0],
        NoteRequest::Create { note_type, .. } if note_type == "conclusion"
    ));
}

#[tokio::test]
async fn test_cancellation_ends_stream_without_error() {
    let pipeline = build_pipeline(Setup {
        drafts: vec![draft("slow", "q1")],
        chunks: 200,
        ..Default::default()
    });
    let cancel = CancellationToken::new();
    let stream = pipeline.run_stream("batteries", cancel.clone());
    tokio::pin!(stream);

    let mut seen = Vec::new();
    while let Some(event) = stream.next().await {
        let is_chunk = event.kind() == "task_summary_chunk";
        seen.push(event);
        if is_chunk {
            cancel.cancel();
        }
    }

    let kinds = kinds(&seen);
    assert!(!kinds.contains(&"error"));
    assert!(!kinds.contains(&"done"));
    assert!(!kinds.contains(&"final_report"));

    // The abandoned worker keeps running; the tracker is back to buffered
    assert!(!pipeline.tracker().is_push());
    tokio::time::sleep(Duration::from_millis(10)).await;
}

#[tokio::test]
async fn test_buffered_run_returns_output() {
    let notes = Arc::new(MemoryNotes::default());
    let pipeline = build_pipeline(Setup {
        retriever: MockRetriever::default().with("q3", SearchBehavior::Empty),
        notes: Some(notes),
        ..Default::default()
    });

    let output = pipeline.run("batteries").await.unwrap();

    assert_eq!(output.topic, "batteries");
    assert_eq!(output.report, "REPORT (3 tasks)");
    let statuses: Vec<TaskStatus> = output.tasks.iter().map(|t| t.status).collect();
    assert_eq!(
        statuses,
        vec![TaskStatus::Completed, TaskStatus::Completed, TaskStatus::Skipped]
    );
    assert_eq!(output.tasks[0].summary.as_deref(), Some("1-0 1-1 1-2"));
    assert_eq!(output.script.len(), 2);
    assert_eq!(output.audio_files.len(), 2);
    assert_eq!(output.report_note_id.as_deref(), Some("note_mem_1"));
    assert_eq!(
        output.podcast_file.map(|p| p.display().to_string()),
        Some("podcast_task_note_mem_1.mp3".to_string())
    );
}

#[tokio::test]
async fn test_buffered_run_propagates_report_failure() {
    let pipeline = build_pipeline(Setup {
        reporter_fails: true,
        ..Default::default()
    });
    let err = pipeline.run("batteries").await.unwrap_err();
    assert!(err.to_string().contains("reporter offline"));
}

#[tokio::test]
async fn test_script_failure_ends_with_single_error() {
    let pipeline = build_pipeline(Setup {
        script_fails: true,
        ..Default::default()
    });
    let events = collect_events(&pipeline, "batteries").await;
    let kinds = kinds(&events);

    assert_eq!(kinds.last(), Some(&"error"));
    assert_eq!(kinds.iter().filter(|k| **k == "error").count(), 1);
    assert!(kinds.contains(&"final_report"));
    assert!(!kinds.contains(&"podcast_script"));
    assert!(!kinds.contains(&"audio_start"));
    assert!(!kinds.contains(&"done"));
    match &events.last().unwrap().event {
        ProgressEvent::Error { detail } => {
            assert!(detail.starts_with("Script generation failed"));
            assert!(detail.contains("scriptwriter offline"));
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_reporter_panic_becomes_error_event() {
    let pipeline = build_pipeline(Setup {
        reporter_panics: true,
        ..Default::default()
    });
    let events = collect_events(&pipeline, "batteries").await;
    let kinds = kinds(&events);

    assert_eq!(kinds.last(), Some(&"error"));
    assert_eq!(kinds.iter().filter(|k| **k == "error").count(), 1);
    match &events.last().unwrap().event {
        ProgressEvent::Error { detail } => {
            assert!(detail.contains("report writer panicked: reporter crashed"))
        }
        other => panic!("unexpected event: {:?}", other),
    }

    let err = pipeline.run("batteries").await.unwrap_err();
    assert!(err.to_string().contains("report writer panicked"));
}

#[tokio::test]
async fn test_audio_failure_is_logged_and_run_completes() {
    let pipeline = build_pipeline(Setup {
        audio_fails: true,
        ..Default::default()
    });
    let events = collect_events(&pipeline, "batteries").await;
    let kinds = kinds(&events);

    let failures: Vec<&String> = events
        .iter()
        .filter_map(|e| match &e.event {
            ProgressEvent::Log { message } if message.contains("Audio generation failed") => {
                Some(message)
            }
            _ => None,
        })
        .collect();
    assert_eq!(failures.len(), 1);
    assert!(failures[0].contains("tts offline"));

    match &events[position(&kinds, "audio_generated")].event {
        ProgressEvent::AudioGenerated { files, count } => {
            assert_eq!(*count, 0);
            assert!(files.is_empty());
        }
        other => panic!("unexpected event: {:?}", other),
    }
    assert!(!kinds.contains(&"podcast_ready"));
    assert!(!kinds.contains(&"error"));
    assert_eq!(kinds.last(), Some(&"done"));
}

#[tokio::test]
async fn test_note_store_failure_is_swallowed() {
    let pipeline = build_pipeline(Setup {
        notes_broken: true,
        ..Default::default()
    });
    let events = collect_events(&pipeline, "batteries").await;
    let kinds = kinds(&events);

    assert!(!kinds.contains(&"report_note"));
    assert!(!kinds.contains(&"error"));
    assert_eq!(kinds.last(), Some(&"done"));
    match &events[position(&kinds, "final_report")].event {
        ProgressEvent::FinalReport { note_id, .. } => assert!(note_id.is_none()),
        other => panic!("unexpected event: {:?}", other),
    }
    // Without a report note the run keeps its default id
    match &events[position(&kinds, "podcast_ready")].event {
        ProgressEvent::PodcastReady { file } => assert_eq!(file, "podcast_task_default.mp3"),
        other => panic!("unexpected event: {:?}", other),
    }
}
