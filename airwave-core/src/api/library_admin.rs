//! Library admin (§6 `scan`, `merge_artists`, `merge_works`): filesystem
//! scanning and manual KB cleanup.

use super::AppState;
use crate::library;
use crate::scanner;
use crate::{ApiError, ApiResult};
use axum::{
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

#[derive(Debug, Deserialize)]
pub struct ScanRequest {
    pub root: String,
}

#[derive(Debug, Serialize)]
pub struct ScanStartedResponse {
    pub task_id: String,
}

/// POST /library/scan — `scan(root)` (§6): kick off a scan job over the
/// given filesystem root, returning immediately with a task id pollable
/// via `task_status`/`task_subscribe`.
pub async fn scan(State(state): State<AppState>, Json(request): Json<ScanRequest>) -> ApiResult<Json<ScanStartedResponse>> {
    let root = PathBuf::from(&request.root);
    if !root.exists() {
        return Err(ApiError::Validation(format!("scan root not found: {}", request.root)));
    }

    let pool = state.db.clone();
    let vector = state.vector.clone();
    let tuning = state.config.snapshot();

    let task_id = state.jobs.spawn(1, move |handle| async move {
        scanner::scan(&pool, vector.as_ref(), &handle, &root, tuning.work_fuzzy_threshold, tuning.work_fuzzy_max_works)
            .await
            .map(|_summary| ())
    });

    Ok(Json(ScanStartedResponse { task_id: task_id.to_string() }))
}

#[derive(Debug, Deserialize)]
pub struct MergeRequest {
    pub source_id: i64,
    pub target_id: i64,
}

/// POST /library/artists/merge — `merge_artists` (§6).
pub async fn merge_artists(State(state): State<AppState>, Json(request): Json<MergeRequest>) -> ApiResult<Json<serde_json::Value>> {
    library::merge_artists(&state.db, request.source_id, request.target_id).await?;
    Ok(Json(serde_json::json!({"source_id": request.source_id, "target_id": request.target_id, "merged": true})))
}

/// POST /library/works/merge — `merge_works` (§6).
pub async fn merge_works(State(state): State<AppState>, Json(request): Json<MergeRequest>) -> ApiResult<Json<serde_json::Value>> {
    library::merge_works(&state.db, request.source_id, request.target_id).await?;
    Ok(Json(serde_json::json!({"source_id": request.source_id, "target_id": request.target_id, "merged": true})))
}

#[derive(Debug, Serialize)]
pub struct ArtistResponse {
    pub id: i64,
    pub name: String,
}

/// GET /library/artists/:id — convenience lookup backing the merge UI.
pub async fn get_artist(State(state): State<AppState>, Path(id): Path<i64>) -> ApiResult<Json<ArtistResponse>> {
    let artist = library::get_artist(&state.db, id).await?;
    Ok(Json(ArtistResponse { id: artist.id, name: artist.name }))
}

pub fn library_admin_routes() -> Router<AppState> {
    Router::new()
        .route("/library/scan", post(scan))
        .route("/library/artists/merge", post(merge_artists))
        .route("/library/works/merge", post(merge_works))
        .route("/library/artists/:id", axum::routing::get(get_artist))
}
