//! Job control plane (§6 `task_status`, `task_cancel`, `task_subscribe`):
//! polling and SSE access to the Job Controller (C9).

use super::AppState;
use crate::ApiResult;
use airwave_common::events::JobProgress;
use axum::{
    extract::{Path, State},
    response::sse::{Event, Sse},
    routing::{get, post},
    Json, Router,
};
use std::convert::Infallible;
use uuid::Uuid;

/// GET /jobs/:task_id — `task_status` (§6): latest known progress,
/// whether or not a subscriber is currently listening.
pub async fn task_status(State(state): State<AppState>, Path(task_id): Path<Uuid>) -> ApiResult<Json<JobProgress>> {
    Ok(Json(state.jobs.status(task_id)?))
}

/// POST /jobs/:task_id/cancel — `task_cancel` (§6): cooperative,
/// idempotent cancellation.
pub async fn task_cancel(State(state): State<AppState>, Path(task_id): Path<Uuid>) -> ApiResult<Json<serde_json::Value>> {
    state.jobs.cancel(task_id)?;
    Ok(Json(serde_json::json!({"task_id": task_id, "cancel_requested": true})))
}

/// GET /jobs/:task_id/subscribe — `task_subscribe` (§6): an SSE stream of
/// this job's progress, filtered out of the process-wide event bus and
/// terminating at this job's own terminal event.
pub async fn task_subscribe(
    State(state): State<AppState>,
    Path(task_id): Path<Uuid>,
) -> Sse<impl futures::Stream<Item = Result<Event, Infallible>>> {
    let mut rx = state.jobs.subscribe();
    let stream = async_stream::stream! {
        loop {
            match rx.recv().await {
                Ok(progress) if progress.task_id == task_id => {
                    let is_terminal = progress.is_terminal();
                    let payload = serde_json::to_string(&progress).unwrap_or_else(|_| "{}".to_string());
                    yield Ok(Event::default().event("progress").data(payload));
                    if is_terminal {
                        break;
                    }
                }
                Ok(_) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(
        axum::response::sse::KeepAlive::new()
            .interval(std::time::Duration::from_secs(15))
            .text("heartbeat"),
    )
}

pub fn job_routes() -> Router<AppState> {
    Router::new()
        .route("/jobs/:task_id", get(task_status))
        .route("/jobs/:task_id/cancel", post(task_cancel))
        .route("/jobs/:task_id/subscribe", get(task_subscribe))
}
