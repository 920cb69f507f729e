//! Periodic status poll of every active task.

use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use super::{PollSample, Reconciler};
use crate::provider::TaskProvider;
use crate::task::TaskStatus;

/// Poll every non-terminal task each `interval` until the handle is aborted.
///
/// Tasks are sampled concurrently; a tick finishes before the next starts.
pub fn spawn_poller(
    reconciler: Reconciler,
    provider: Arc<dyn TaskProvider>,
    interval: Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        tracing::info!("Polling active tasks every {:?}", interval);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            poll_once(&reconciler, provider.as_ref()).await;
        }
    })
}

/// One poll tick over all active tasks.
pub async fn poll_once(reconciler: &Reconciler, provider: &dyn TaskProvider) {
    let ids = reconciler.registry().active_ids();
    if ids.is_empty() {
        return;
    }
    join_all(ids.iter().map(|id| poll_task(reconciler, provider, id))).await;
}

async fn poll_task(reconciler: &Reconciler, provider: &dyn TaskProvider, task_id: &str) {
    // Status may have moved since the id list was taken.
    match reconciler.registry().get(task_id).map(|r| r.status) {
        None => return,
        Some(status) if status.is_terminal() || status == TaskStatus::Finalizing => return,
        Some(_) => {}
    }

    let task = match provider.get_task(task_id).await {
        Ok(task) => task,
        Err(e) => {
            tracing::warn!(task_id = %task_id, "Failed to poll task: {}", e);
            return;
        }
    };
    tracing::debug!(task_id = %task_id, status = %task.status(), "Polled task");

    let logs = if task.is_completed() || task.is_failed() {
        None
    } else {
        match provider.get_task_logs(task_id).await {
            Ok(logs) => Some(logs),
            Err(e) => {
                tracing::warn!(task_id = %task_id, "Failed to poll logs: {}", e);
                None
            }
        }
    };

    if let Err(e) = reconciler
        .on_poll_sample(task_id, PollSample { task, logs })
        .await
    {
        tracing::warn!(task_id = %task_id, "Failed to apply poll sample: {}", e);
    }
}
