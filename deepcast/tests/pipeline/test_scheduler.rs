//! Tests for the worker pool and the per-task executor

use super::common::{ChunkSummarizer, MockRetriever, PlainContext, SearchBehavior};
use deepcast::research::executor::{run_task_worker, Emission, TaskExecutor};
use deepcast::research::{ResearchState, EMPTY_SUMMARY_PLACEHOLDER};
use deepcast::workflow_utils::batch::spawn_workers;
use deepcast::workflow_utils::channel::{event_channel, TaskRoute};
use deepcast::workflow_utils::tracker::ToolCallTracker;
use deepcast_sdk::{EventEnvelope, PlannedTask, ProgressEvent, TaskStatus};
use std::collections::HashMap;
use std::sync::Arc;

fn tasks(n: u32) -> Vec<PlannedTask> {
    (1..=n)
        .map(|id| PlannedTask::new(id, format!("task {id}"), "intent", format!("q{id}")))
        .collect()
}

fn routes(state: &ResearchState) -> HashMap<u32, TaskRoute> {
    state
        .task_ids()
        .into_iter()
        .enumerate()
        .map(|(idx, id)| {
            (
                id,
                TaskRoute {
                    step: idx + 1,
                    token: format!("task_{id}"),
                },
            )
        })
        .collect()
}

fn executor(retriever: MockRetriever, chunks: usize) -> Arc<TaskExecutor> {
    Arc::new(TaskExecutor {
        topic: "topic".to_string(),
        retriever: Arc::new(retriever),
        context_builder: Arc::new(PlainContext),
        summarizer: Arc::new(ChunkSummarizer {
            chunks,
            tracker: None,
        }),
        tracker: Arc::new(ToolCallTracker::new(None)),
    })
}

/// Run every task of `state` through the worker pool in streaming mode
async fn run_streaming(state: Arc<ResearchState>, executor: Arc<TaskExecutor>) -> Vec<EventEnvelope> {
    let (sender, receiver) = event_channel(routes(&state));
    let items: Vec<(u32, ())> = state.task_ids().into_iter().map(|id| (id, ())).collect();
    let worker_state = Arc::clone(&state);
    let mut barrier = spawn_workers(items, sender, receiver, move |(), ctx, tx| {
        run_task_worker(
            Arc::clone(&executor),
            Arc::clone(&worker_state),
            ctx,
            Emission::Streaming(tx),
        )
    });

    let mut events = Vec::new();
    while let Some(event) = barrier.next().await {
        events.push(event);
    }
    assert_eq!(barrier.remaining(), 0);
    events
}

fn statuses_for(events: &[EventEnvelope], task_id: u32) -> Vec<TaskStatus> {
    events
        .iter()
        .filter(|e| e.task_id == Some(task_id))
        .filter_map(|e| match &e.event {
            ProgressEvent::TaskStatus { status, .. } => Some(*status),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_every_task_reaches_exactly_one_terminal_status() {
    let state = Arc::new(ResearchState::new("topic", tasks(5)));
    let events = run_streaming(Arc::clone(&state), executor(MockRetriever::default(), 2)).await;

    for id in 1..=5 {
        assert_eq!(
            statuses_for(&events, id),
            vec![TaskStatus::InProgress, TaskStatus::Completed],
            "task {id}"
        );
        assert_eq!(state.task(id).unwrap().status, TaskStatus::Completed);
    }
    assert_eq!(state.loop_count(), 5);
}

#[tokio::test]
async fn test_chunks_group_by_stream_token_in_order() {
    let state = Arc::new(ResearchState::new("topic", tasks(3)));
    let events = run_streaming(Arc::clone(&state), executor(MockRetriever::default(), 4)).await;

    let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
    for event in &events {
        if let ProgressEvent::TaskSummaryChunk { content, .. } = &event.event {
            let token = event.stream_token.clone().expect("chunk without stream token");
            grouped.entry(token).or_default().push(content.clone());
        }
    }

    assert_eq!(grouped.len(), 3);
    for id in 1..=3u32 {
        let expected: Vec<String> = (0..4).map(|i| format!("{id}-{i} ")).collect();
        assert_eq!(grouped[&format!("task_{id}")], expected);
        assert_eq!(
            state.task(id).unwrap().summary.as_deref(),
            Some(format!("{id}-0 {id}-1 {id}-2 {id}-3").as_str())
        );
    }

    // Every task event carries its plan position
    for event in events.iter().filter(|e| e.task_id.is_some()) {
        assert_eq!(event.step, Some(event.task_id.unwrap() as usize));
    }
}

#[tokio::test]
async fn test_empty_retrieval_skips_without_chunks() {
    let state = Arc::new(ResearchState::new("topic", tasks(2)));
    let retriever = MockRetriever::default().with("q2", SearchBehavior::Empty);
    let events = run_streaming(Arc::clone(&state), executor(retriever, 3)).await;

    assert_eq!(
        statuses_for(&events, 2),
        vec![TaskStatus::InProgress, TaskStatus::Skipped]
    );
    assert!(!events.iter().any(|e| e.task_id == Some(2)
        && matches!(e.event, ProgressEvent::TaskSummaryChunk { .. } | ProgressEvent::Sources { .. })));
    assert!(events.iter().any(|e| e.task_id == Some(2)
        && matches!(&e.event, ProgressEvent::Status { message } if message == "nothing found for q2")));
    assert_eq!(state.task(2).unwrap().status, TaskStatus::Skipped);
    assert_eq!(state.task(1).unwrap().status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_failing_task_does_not_affect_others() {
    let state = Arc::new(ResearchState::new("topic", tasks(3)));
    let retriever = MockRetriever::default().with("q2", SearchBehavior::Fail);
    let events = run_streaming(Arc::clone(&state), executor(retriever, 2)).await;

    assert_eq!(
        statuses_for(&events, 2),
        vec![TaskStatus::InProgress, TaskStatus::Failed]
    );
    let detail = events.iter().find_map(|e| match &e.event {
        ProgressEvent::TaskStatus {
            status: TaskStatus::Failed,
            detail,
            ..
        } => detail.clone(),
        _ => None,
    });
    assert!(detail.unwrap().contains("search backend down for q2"));

    assert_eq!(state.task(1).unwrap().status, TaskStatus::Completed);
    assert_eq!(state.task(3).unwrap().status, TaskStatus::Completed);
}

#[tokio::test]
async fn test_empty_summary_gets_placeholder() {
    let state = Arc::new(ResearchState::new("topic", tasks(1)));
    let events = run_streaming(Arc::clone(&state), executor(MockRetriever::default(), 0)).await;

    let task = state.task(1).unwrap();
    assert_eq!(task.status, TaskStatus::Completed);
    assert_eq!(task.summary.as_deref(), Some(EMPTY_SUMMARY_PLACEHOLDER));
    assert!(!events
        .iter()
        .any(|e| matches!(e.event, ProgressEvent::TaskSummaryChunk { .. })));
}

#[tokio::test]
async fn test_buffered_emission_produces_no_events() {
    let state = Arc::new(ResearchState::new("topic", tasks(2)));
    let executor = executor(MockRetriever::default(), 2);

    for id in state.task_ids() {
        let task = executor
            .execute(&state, id, None, &Emission::Buffered)
            .await
            .unwrap();
        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.summary.as_deref(), Some(format!("{id}-0 {id}-1").as_str()));
    }
}
