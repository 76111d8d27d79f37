//! Worker boundary: runs one task body and contains its failures

use crate::workflow_utils::batch::TaskContext;
use anyhow::{anyhow, Result};
use futures::FutureExt;
use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;

/// Execute a single task with automatic logging
///
/// Both an `Err` and a panic inside `executor` come back as `Err`, so the
/// caller can turn either into a `failed` status without the failure
/// escaping the worker.
///
/// # Example
/// ```rust,ignore
/// let outcome = execute_task(ctx, "Market overview", || async {
///     executor.run(&task).await
/// })
/// .await;
/// ```
pub async fn execute_task<F, Fut, R>(
    ctx: TaskContext,
    description: impl Into<String>,
    executor: F,
) -> Result<R>
where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<R>>,
{
    let description = description.into();

    tracing::info!(
        task_id = ctx.task_id,
        step = ctx.step,
        total = ctx.total_tasks,
        "task started: {}",
        description
    );

    match AssertUnwindSafe(executor()).catch_unwind().await {
        Ok(Ok(result)) => {
            tracing::info!(task_id = ctx.task_id, "task finished: {}", description);
            Ok(result)
        }
        Ok(Err(e)) => {
            tracing::error!(task_id = ctx.task_id, error = %e, "task failed: {}", description);
            Err(e)
        }
        Err(payload) => {
            let message = panic_message(payload.as_ref());
            tracing::error!(task_id = ctx.task_id, panic = %message, "task panicked: {}", description);
            Err(anyhow!("task panicked: {}", message))
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
