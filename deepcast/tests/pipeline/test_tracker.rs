//! Tests for tool-call delivery: drain vs push

use deepcast::research::ResearchState;
use deepcast::workflow_utils::channel::{event_channel, ChannelMessage, TaskRoute};
use deepcast::workflow_utils::tracker::{ToolCallInput, ToolCallTracker, ToolEventSink};
use deepcast_sdk::{EventEnvelope, PlannedTask, ProgressEvent};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

fn note_call(parameters: Value, result: &str) -> ToolCallInput {
    ToolCallInput {
        agent: "Task Summarizer".to_string(),
        tool: "note".to_string(),
        raw_parameters: parameters.to_string(),
        parameters,
        result: result.to_string(),
    }
}

fn state() -> ResearchState {
    ResearchState::new(
        "topic",
        vec![
            PlannedTask::new(1, "one", "i", "q1"),
            PlannedTask::new(2, "two", "i", "q2"),
        ],
    )
}

#[test]
fn test_drain_returns_each_record_once() {
    let tracker = ToolCallTracker::new(None);
    let state = state();

    assert!(tracker.drain(&state, None).is_empty());
    assert!(tracker.drain(&state, None).is_empty());

    for i in 0..4 {
        tracker.record(note_call(json!({"action": "read", "note_id": format!("n{i}")}), "ok"));
    }
    let first = tracker.drain(&state, Some(3));
    assert_eq!(first.len(), 4);
    assert!(first.iter().all(|e| e.step == Some(3)));
    assert!(tracker.drain(&state, Some(3)).is_empty());

    tracker.record(note_call(json!({"action": "read", "note_id": "n9"}), "ok"));
    assert_eq!(tracker.drain(&state, None).len(), 1);
    assert_eq!(tracker.len(), 5);
}

#[test]
fn test_event_ids_are_sequential() {
    let tracker = ToolCallTracker::new(None);
    let ids: Vec<u64> = (0..3)
        .map(|_| tracker.record(note_call(json!({}), "ok")))
        .collect();
    assert_eq!(ids, vec![1, 2, 3]);
}

#[test]
fn test_push_sink_never_duplicates_into_drain() {
    let tracker = ToolCallTracker::new(None);
    let state = state();
    let pushed: Arc<Mutex<Vec<EventEnvelope>>> = Arc::default();
    let sink = Arc::clone(&pushed);
    tracker.set_event_sink(ToolEventSink::push(move |e| sink.lock().push(e)));

    tracker.record(note_call(json!({"action": "create", "task_id": 1}), "✅\nID: note_a"));
    tracker.record(note_call(json!({"action": "create", "tags": ["task_2"]}), "✅\nID: note_b"));

    assert_eq!(pushed.lock().len(), 2);
    assert!(tracker.drain(&state, None).is_empty());

    // Switching back to buffered does not resurrect pushed records
    tracker.set_event_sink(ToolEventSink::Buffered);
    assert!(tracker.drain(&state, None).is_empty());

    tracker.record(note_call(json!({"action": "read", "note_id": "note_a"}), "ok"));
    assert_eq!(pushed.lock().len(), 2);
    assert_eq!(tracker.drain(&state, None).len(), 1);
}

#[test]
fn test_drain_attaches_notes_even_while_pushing() {
    let tracker = ToolCallTracker::new(Some(PathBuf::from("notes")));
    let state = state();
    tracker.set_event_sink(ToolEventSink::push(|_| {}));

    tracker.record(note_call(
        json!({"action": "create", "title": "Task 2: two"}),
        "✅ Note created\nID: note_two",
    ));
    assert!(tracker.drain(&state, None).is_empty());

    let task = state.task(2).unwrap();
    assert_eq!(task.note_id.as_deref(), Some("note_two"));
    assert_eq!(
        task.note_path.map(PathBuf::from),
        Some(PathBuf::from("notes").join("note_two.md"))
    );
    assert!(state.task(1).unwrap().note_id.is_none());
}

#[test]
fn test_rendered_tool_call_payload() {
    let tracker = ToolCallTracker::new(Some(PathBuf::from("ws")));
    let state = state();
    tracker.record(note_call(
        json!({"action": "update", "task_id": "1", "note_id": "note_x"}),
        "✅ Note updated\nID: note_x",
    ));

    let events = tracker.drain(&state, Some(1));
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].task_id, Some(1));
    match &events[0].event {
        ProgressEvent::ToolCall {
            event_id,
            tool,
            note_id,
            note_path,
            ..
        } => {
            assert_eq!(*event_id, 1);
            assert_eq!(tool, "note");
            assert_eq!(note_id.as_deref(), Some("note_x"));
            assert!(note_path.as_deref().is_some_and(|p| p.ends_with("note_x.md")));
        }
        other => panic!("unexpected event: {:?}", other),
    }
}

#[tokio::test]
async fn test_pushed_events_are_routed_to_their_task() {
    let tracker = ToolCallTracker::new(None);
    let routes = HashMap::from([(
        2,
        TaskRoute {
            step: 2,
            token: "task_2".to_string(),
        },
    )]);
    let (sender, mut receiver) = event_channel(routes);
    tracker.set_event_sink(ToolEventSink::push(move |e| sender.send(e)));

    tracker.record(note_call(json!({"action": "create", "task_id": 2}), "ID: n"));
    tracker.set_event_sink(ToolEventSink::Buffered);

    match receiver.recv().await {
        Some(ChannelMessage::Event(envelope)) => {
            assert_eq!(envelope.kind(), "tool_call");
            assert_eq!(envelope.task_id, Some(2));
            assert_eq!(envelope.step, Some(2));
            assert_eq!(envelope.stream_token.as_deref(), Some("task_2"));
        }
        other => panic!("unexpected message: {:?}", other),
    }
}
