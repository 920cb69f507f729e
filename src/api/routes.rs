//! HTTP route handlers.

use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::config::Config;
use crate::provider::{BrowserUseClient, TaskProvider};
use crate::service::{SubmitError, TaskService};
use crate::store::{DurableTask, MemoryTaskStore, SqliteTaskStore, TaskSink};

use super::stream::stream_task;
use super::types::*;
use super::webhook::browser_use_webhook;

const DEFAULT_LIST_LIMIT: usize = 50;
const MAX_LIST_LIMIT: usize = 200;

/// Shared application state.
pub struct AppState {
    pub service: TaskService,
    /// Expected value of the webhook secret header; `None` disables the check.
    pub webhook_secret: Option<String>,
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/tasks", post(create_task).get(list_tasks))
        .route("/api/tasks/:id", get(get_task))
        .route("/api/tasks/:id/stream", get(stream_task))
        .route("/api/webhooks/browser-use", post(browser_use_webhook))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the HTTP server.
pub async fn serve(config: Config) -> anyhow::Result<()> {
    let provider: Arc<dyn TaskProvider> = Arc::new(BrowserUseClient::new(
        config.api_key.clone(),
        config.provider_base_url.as_deref(),
    )?);

    let sink: Arc<dyn TaskSink> = match &config.database_path {
        Some(path) => {
            tracing::info!("Storing tasks in {}", path.display());
            Arc::new(SqliteTaskStore::open(path)?)
        }
        None => {
            tracing::info!("DATABASE_PATH not set, task records are kept in memory only");
            Arc::new(MemoryTaskStore::new())
        }
    };

    let service = TaskService::new(
        provider,
        sink,
        config.registry.clone(),
        config.public_webhook_url.clone(),
    );
    let background = service.start_background(config.poll_interval);

    let state = Arc::new(AppState {
        service,
        webhook_secret: config.webhook_secret.clone(),
    });
    let app = router(state);

    let addr = config.bind_addr();
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    background.shutdown();
    Ok(())
}

/// Wait for SIGINT or SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

/// `GET /api/health`
async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    let registry = state.service.registry();
    Json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        tracked_tasks: registry.len(),
        active_tasks: registry.active_ids().len(),
    })
}

/// `POST /api/tasks`
async fn create_task(
    State(state): State<Arc<AppState>>,
    Json(req): Json<CreateTaskRequest>,
) -> Result<Json<CreateTaskResponse>, (StatusCode, String)> {
    match state.service.submit(&req.task_prompt).await {
        Ok(record) => Ok(Json(CreateTaskResponse {
            task_id: record.id,
            status: record.status,
        })),
        Err(SubmitError::EmptyPrompt) => {
            Err((StatusCode::BAD_REQUEST, SubmitError::EmptyPrompt.to_string()))
        }
        Err(e) => {
            tracing::error!("Error creating task: {}", e);
            Err((StatusCode::BAD_GATEWAY, e.to_string()))
        }
    }
}

/// `GET /api/tasks`
async fn list_tasks(
    State(state): State<Arc<AppState>>,
    Query(params): Query<ListTasksQuery>,
) -> Result<Json<Vec<DurableTask>>, (StatusCode, String)> {
    let limit = params.limit.unwrap_or(DEFAULT_LIST_LIMIT).clamp(1, MAX_LIST_LIMIT);
    state
        .service
        .list_recent(limit)
        .await
        .map(Json)
        .map_err(|e| (StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
}

/// `GET /api/tasks/:id`
async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<TaskResponse>, (StatusCode, String)> {
    match state.service.lookup(&id).await {
        Ok(Some(found)) => Ok(Json(found.into())),
        Ok(None) => Err((StatusCode::NOT_FOUND, format!("Task {} not found", id))),
        Err(e) => Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string())),
    }
}
