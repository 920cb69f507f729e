//! Server-sent event stream of one task.

use std::convert::Infallible;
use std::sync::Arc;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::sse::{Event, Sse},
};
use futures::stream::Stream;

use super::routes::AppState;
use crate::fanout::{Frame, ObserverId};
use crate::service::TaskService;

/// Deregisters the subscriber when the response stream is dropped, which is
/// how a client disconnect surfaces.
struct SubscriptionGuard {
    service: TaskService,
    task_id: String,
    observer: ObserverId,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        tracing::debug!(task_id = %self.task_id, observer = %self.observer, "Stream closed");
        self.service.unsubscribe(&self.task_id, self.observer);
    }
}

fn to_event(frame: &Frame) -> Event {
    if frame.is_heartbeat() {
        Event::default().comment("keep-alive")
    } else {
        Event::default().data(&*frame.payload)
    }
}

/// `GET /api/tasks/:id/stream`
pub async fn stream_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, (StatusCode, String)> {
    match state.service.ensure_live(&id).await {
        Ok(true) => {}
        Ok(false) => return Err((StatusCode::NOT_FOUND, format!("Task {} not found", id))),
        Err(e) => {
            tracing::error!(task_id = %id, "Failed to load task: {:#}", e);
            return Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()));
        }
    }

    let subscription = state
        .service
        .subscribe(&id)
        .map_err(|e| (StatusCode::NOT_FOUND, e.to_string()))?;
    tracing::info!(task_id = %id, "Client connected to stream");

    let guard = SubscriptionGuard {
        service: state.service.clone(),
        task_id: subscription.task_id,
        observer: subscription.observer,
    };
    let mut frames = subscription.frames;

    let stream = async_stream::stream! {
        let _guard = guard;
        while let Some(frame) = frames.recv().await {
            yield Ok(to_event(&frame));
        }
    };

    Ok(Sse::new(stream))
}
