//! Multi-producer event channel shared by all task workers
//!
//! Workers and the tool-call sink push [`EventEnvelope`]s through cloned
//! [`EventSender`]s. Events addressed to a task are stamped with that task's
//! step and stream token on the way in, so the consumer never has to look
//! them up.

use deepcast_sdk::EventEnvelope;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;

/// Position of a task in the run as seen by the transport layer
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskRoute {
    pub step: usize,
    pub token: String,
}

/// What travels through the channel
#[derive(Debug, Clone)]
pub enum ChannelMessage {
    Event(EventEnvelope),
    /// Sentinel sent exactly once per worker; never forwarded to callers
    WorkerDone { task_id: u32 },
}

#[derive(Clone)]
pub struct EventSender {
    tx: mpsc::UnboundedSender<ChannelMessage>,
    routes: Arc<HashMap<u32, TaskRoute>>,
}

pub struct EventReceiver {
    rx: mpsc::UnboundedReceiver<ChannelMessage>,
}

/// Create a channel whose sender stamps events using `routes`
pub fn event_channel(routes: HashMap<u32, TaskRoute>) -> (EventSender, EventReceiver) {
    let (tx, rx) = mpsc::unbounded_channel();
    (
        EventSender {
            tx,
            routes: Arc::new(routes),
        },
        EventReceiver { rx },
    )
}

impl EventSender {
    /// Enqueue an event, filling in the route of its `task_id` if known
    ///
    /// The route's step only applies when the event carries none; the stream
    /// token always comes from the route.
    pub fn send(&self, mut envelope: EventEnvelope) {
        if let Some(route) = envelope.task_id.and_then(|id| self.routes.get(&id)) {
            if envelope.step.is_none() {
                envelope.step = Some(route.step);
            }
            envelope.stream_token = Some(route.token.clone());
        }
        self.push(ChannelMessage::Event(envelope));
    }

    /// Enqueue an event on behalf of `task_id`, overriding any task id it carries
    pub fn send_for(&self, task_id: u32, mut envelope: EventEnvelope) {
        envelope.task_id = Some(task_id);
        self.send(envelope);
    }

    /// Signal that the worker bound to `task_id` has finished
    pub fn worker_done(&self, task_id: u32) {
        self.push(ChannelMessage::WorkerDone { task_id });
    }

    pub fn route(&self, task_id: u32) -> Option<&TaskRoute> {
        self.routes.get(&task_id)
    }

    fn push(&self, message: ChannelMessage) {
        if self.tx.send(message).is_err() {
            // Consumer went away (cancelled run); workers keep going silently
            tracing::debug!("event channel closed, dropping message");
        }
    }
}

impl EventReceiver {
    /// Wait for the next message; `None` once every sender is gone
    pub async fn recv(&mut self) -> Option<ChannelMessage> {
        self.rx.recv().await
    }

    /// Non-blocking read used for the final sweep
    pub fn try_recv(&mut self) -> Option<ChannelMessage> {
        self.rx.try_recv().ok()
    }
}
