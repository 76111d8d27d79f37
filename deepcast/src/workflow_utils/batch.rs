//! Worker pool: one concurrent worker per planned task, joined by a barrier

use crate::workflow_utils::channel::{ChannelMessage, EventReceiver, EventSender};
use deepcast_sdk::EventEnvelope;
use futures::Future;
use std::sync::Arc;

/// Context provided to each worker
#[derive(Debug, Clone, Copy)]
pub struct TaskContext {
    /// Id of the task the worker is bound to
    pub task_id: u32,
    /// Position of the task in the run (1-indexed)
    pub step: usize,
    /// Total number of workers in this run
    pub total_tasks: usize,
}

/// Sends the worker's completion sentinel when dropped
///
/// Dropping also happens while unwinding, so a worker that panics still
/// signals completion exactly once.
struct DoneGuard {
    sender: EventSender,
    task_id: u32,
}

impl Drop for DoneGuard {
    fn drop(&mut self) {
        self.sender.worker_done(self.task_id);
    }
}

/// Spawn one worker per item
///
/// # Arguments
/// - `items`: `(task_id, item)` pairs in planning order
/// - `sender`: Channel the workers publish into
/// - `worker`: Async function run for each item, receives (item, context, sender)
///
/// # Returns
/// A [`WorkerBarrier`] yielding the workers' events until all of them have
/// finished. Workers never wait on each other.
///
/// # Example
/// ```rust,ignore
/// let mut barrier = spawn_workers(tasks, sender, |task, ctx, tx| async move {
///     tx.send_for(ctx.task_id, EventEnvelope::new(ProgressEvent::log(task.title)));
/// });
/// while let Some(event) = barrier.next().await {
///     println!("{}", event.to_json()?);
/// }
/// ```
pub fn spawn_workers<T, F, Fut>(
    items: Vec<(u32, T)>,
    sender: EventSender,
    receiver: EventReceiver,
    worker: F,
) -> WorkerBarrier
where
    T: Send + 'static,
    F: Fn(T, TaskContext, EventSender) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    let total = items.len();
    let worker = Arc::new(worker);

    for (idx, (task_id, item)) in items.into_iter().enumerate() {
        let worker = worker.clone();
        let sender = sender.clone();
        let step = sender.route(task_id).map(|r| r.step).unwrap_or(idx + 1);

        let ctx = TaskContext {
            task_id,
            step,
            total_tasks: total,
        };

        tokio::spawn(async move {
            let _done = DoneGuard {
                sender: sender.clone(),
                task_id,
            };
            worker(item, ctx, sender).await;
        });
    }

    WorkerBarrier {
        receiver,
        remaining: total,
    }
}

/// Consumer side of the worker pool
///
/// Yields events until every worker's sentinel has been seen, then sweeps
/// the channel once without blocking to pick up anything that was enqueued
/// after the last sentinel.
pub struct WorkerBarrier {
    receiver: EventReceiver,
    remaining: usize,
}

impl WorkerBarrier {
    pub async fn next(&mut self) -> Option<EventEnvelope> {
        while self.remaining > 0 {
            match self.receiver.recv().await {
                Some(ChannelMessage::Event(event)) => return Some(event),
                Some(ChannelMessage::WorkerDone { task_id }) => {
                    self.remaining -= 1;
                    tracing::debug!(task_id, remaining = self.remaining, "worker finished");
                }
                None => self.remaining = 0,
            }
        }

        while let Some(message) = self.receiver.try_recv() {
            if let ChannelMessage::Event(event) = message {
                return Some(event);
            }
        }
        None
    }

    /// Workers that have not signalled completion yet
    pub fn remaining(&self) -> usize {
        self.remaining
    }
}
