//! Verification queue (§6 `queue_list`, `link`, `promote`, `skip`,
//! `alias`, `bulk_link`, `undo`): the human-in-the-loop surface over the
//! Discovery Queue (C7) and Identity Bridge (C6).

use super::AppState;
use crate::bridge;
use crate::discovery::{self, QueueFilter, QueueItem};
use crate::{ApiError, ApiResult};
use axum::{
    extract::{Path, Query, State},
    routing::{get, post},
    Json, Router,
};
use chrono::Duration;
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct QueueListQuery {
    #[serde(default)]
    pub filter: Option<String>,
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
}

fn default_limit() -> i64 {
    50
}

fn parse_filter(filter: Option<&str>) -> ApiResult<QueueFilter> {
    match filter.unwrap_or("all") {
        "all" => Ok(QueueFilter::All),
        "matched" => Ok(QueueFilter::Matched),
        "unmatched" => Ok(QueueFilter::Unmatched),
        other => Err(ApiError::Validation(format!("unknown filter '{other}'"))),
    }
}

#[derive(Debug, Serialize)]
pub struct QueueItemResponse {
    pub signature: String,
    pub raw_artist: String,
    pub raw_title: String,
    pub count: i64,
    pub suggested_work_id: Option<i64>,
    pub best_artist_sim: Option<f64>,
    pub best_title_sim: Option<f64>,
    pub cooldown_until: Option<String>,
}

impl From<QueueItem> for QueueItemResponse {
    fn from(item: QueueItem) -> Self {
        QueueItemResponse {
            signature: item.signature,
            raw_artist: item.raw_artist,
            raw_title: item.raw_title,
            count: item.count,
            suggested_work_id: item.suggested_work_id,
            best_artist_sim: item.best_scores.map(|(a, _)| a),
            best_title_sim: item.best_scores.map(|(_, t)| t),
            cooldown_until: item.cooldown_until,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct AuditEntryResponse {
    pub id: i64,
    pub created_at: String,
    pub action: String,
    pub signature: Option<String>,
}

impl From<bridge::AuditEntry> for AuditEntryResponse {
    fn from(entry: bridge::AuditEntry) -> Self {
        AuditEntryResponse { id: entry.id, created_at: entry.created_at, action: entry.action, signature: entry.signature }
    }
}

/// GET /verification/queue — `queue_list` (§6).
pub async fn queue_list(
    State(state): State<AppState>,
    Query(query): Query<QueueListQuery>,
) -> ApiResult<Json<Vec<QueueItemResponse>>> {
    let filter = parse_filter(query.filter.as_deref())?;
    let items = discovery::queue_list(&state.db, filter, query.limit, query.offset).await?;
    Ok(Json(items.into_iter().map(QueueItemResponse::from).collect()))
}

#[derive(Debug, Serialize)]
pub struct ArtistCandidateResponse {
    pub raw_artist: String,
    pub count: i64,
}

/// GET /verification/artist-queue — the decoupled artist-linking queue
/// (§4.7, §6).
pub async fn artist_queue(
    State(state): State<AppState>,
    Query(query): Query<QueueListQuery>,
) -> ApiResult<Json<Vec<ArtistCandidateResponse>>> {
    let filter = parse_filter(query.filter.as_deref())?;
    let candidates = discovery::list_artist_candidates(&state.db, filter, query.limit, query.offset).await?;
    Ok(Json(candidates.into_iter().map(|(raw_artist, count)| ArtistCandidateResponse { raw_artist, count }).collect()))
}

#[derive(Debug, Deserialize)]
pub struct LinkRequest {
    pub signature: String,
    pub reference_artist: String,
    pub reference_title: String,
    pub work_id: i64,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

fn default_confidence() -> f64 {
    1.0
}

/// POST /verification/link — `link` (§6): verify a Discovery Queue item
/// against a Work, writing an Identity Bridge entry and backfilling.
pub async fn link(State(state): State<AppState>, Json(request): Json<LinkRequest>) -> ApiResult<Json<AuditEntryResponse>> {
    let entry = bridge::link(
        &state.db,
        &request.signature,
        &request.reference_artist,
        &request.reference_title,
        request.work_id,
        request.confidence,
    )
    .await?;
    Ok(Json(entry.into()))
}

#[derive(Debug, Deserialize)]
pub struct PromoteRequest {
    pub signature: String,
    pub reference_artist: String,
    pub reference_title: String,
    pub work_id: i64,
    pub recording_id: i64,
    #[serde(default = "default_confidence")]
    pub confidence: f64,
}

/// POST /verification/promote — `promote` (§6): `link` plus marking the
/// chosen Recording verified.
pub async fn promote(State(state): State<AppState>, Json(request): Json<PromoteRequest>) -> ApiResult<Json<AuditEntryResponse>> {
    let entry = bridge::promote(
        &state.db,
        &request.signature,
        &request.reference_artist,
        &request.reference_title,
        request.work_id,
        request.recording_id,
        request.confidence,
    )
    .await?;
    Ok(Json(entry.into()))
}

#[derive(Debug, Deserialize)]
pub struct SkipRequest {
    pub signature: String,
    #[serde(default = "default_cooldown_days")]
    pub cooldown_days: i64,
}

fn default_cooldown_days() -> i64 {
    7
}

/// POST /verification/skip — `skip` (§6): cool the queue item down
/// without a match.
pub async fn skip(State(state): State<AppState>, Json(request): Json<SkipRequest>) -> ApiResult<Json<AuditEntryResponse>> {
    let entry = discovery::skip(&state.db, &request.signature, Duration::days(request.cooldown_days)).await?;
    Ok(Json(entry.into()))
}

#[derive(Debug, Deserialize)]
pub struct AliasRequest {
    pub raw_name: String,
    pub resolved_name: String,
}

/// POST /verification/alias — `alias` (§6): record a verified
/// artist-name alias.
pub async fn alias(State(state): State<AppState>, Json(request): Json<AliasRequest>) -> ApiResult<Json<AuditEntryResponse>> {
    let entry = discovery::alias(&state.db, &request.raw_name, &request.resolved_name).await?;
    Ok(Json(entry.into()))
}

#[derive(Debug, Deserialize)]
pub struct BulkLinkPair {
    pub signature: String,
    pub reference_artist: String,
    pub reference_title: String,
    pub work_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct BulkLinkRequest {
    pub pairs: Vec<BulkLinkPair>,
}

/// POST /verification/bulk-link — `bulk_link` (§6): link many
/// signatures to the same or different Works as one undoable unit.
pub async fn bulk_link(State(state): State<AppState>, Json(request): Json<BulkLinkRequest>) -> ApiResult<Json<AuditEntryResponse>> {
    let pairs: Vec<(String, String, String, i64)> = request
        .pairs
        .into_iter()
        .map(|p| (p.signature, p.reference_artist, p.reference_title, p.work_id))
        .collect();
    let entry = discovery::bulk_link(&state.db, &pairs).await?;
    Ok(Json(entry.into()))
}

/// POST /verification/undo/:audit_id — `undo` (§6): reverse any prior
/// verification action, including a composite `bulk_link`.
pub async fn undo(State(state): State<AppState>, Path(audit_id): Path<i64>) -> ApiResult<Json<serde_json::Value>> {
    discovery::undo(&state.db, audit_id).await?;
    Ok(Json(serde_json::json!({"audit_id": audit_id, "undone": true})))
}

pub fn verification_routes() -> Router<AppState> {
    Router::new()
        .route("/verification/queue", get(queue_list))
        .route("/verification/artist-queue", get(artist_queue))
        .route("/verification/link", post(link))
        .route("/verification/promote", post(promote))
        .route("/verification/skip", post(skip))
        .route("/verification/alias", post(alias))
        .route("/verification/bulk-link", post(bulk_link))
        .route("/verification/undo/:audit_id", post(undo))
}
