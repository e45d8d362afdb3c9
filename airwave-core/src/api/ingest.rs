//! Ingestion (§6 `submit_logs`): insert raw broadcast-log rows and drive
//! them through the Matcher, either auto-linking or queuing for
//! discovery.
//!
//! Grounded on `wkmp-ai`'s `import_workflow.rs` "start, then orchestrate
//! several services per item" handler shape, generalized from an audio
//! import session to a batch of broadcast-log rows.

use super::AppState;
use crate::discovery;
use crate::library;
use crate::matcher::{self, MatchCategory, MatchQuery};
use crate::normalize;
use crate::ApiResult;
use axum::{extract::State, routing::post, Json, Router};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct LogEntry {
    pub played_at: String,
    pub raw_artist: String,
    pub raw_title: String,
}

#[derive(Debug, Deserialize)]
pub struct SubmitLogsRequest {
    pub station_id: i64,
    pub logs: Vec<LogEntry>,
}

#[derive(Debug, Serialize)]
pub struct SubmitLogsResponse {
    pub n_inserted: usize,
    pub n_auto_linked: usize,
    pub n_queued: usize,
}

/// POST /logs — `submit_logs(station_id, [(played_at, raw_artist,
/// raw_title)])` (§6). Inserts every row, matches the whole batch in one
/// `match_batch` call, then either auto-links (`identity_bridge`/`exact`/
/// `variant` at `AutoLink`) or enqueues the signature for discovery
/// (`review`/`reject`).
pub async fn submit_logs(
    State(state): State<AppState>,
    Json(request): Json<SubmitLogsRequest>,
) -> ApiResult<Json<SubmitLogsResponse>> {
    if request.logs.is_empty() {
        return Ok(Json(SubmitLogsResponse { n_inserted: 0, n_auto_linked: 0, n_queued: 0 }));
    }

    library::get_station(&state.db, request.station_id).await?;

    let mut log_ids = Vec::with_capacity(request.logs.len());
    let mut queries = Vec::with_capacity(request.logs.len());
    for entry in &request.logs {
        let resolved_artist =
            discovery::resolve_alias(&state.db, &entry.raw_artist).await?.unwrap_or_else(|| entry.raw_artist.clone());
        let signature = normalize::signature(&resolved_artist, &entry.raw_title);

        let log = library::insert_broadcast_log(
            &state.db,
            request.station_id,
            &entry.played_at,
            &entry.raw_artist,
            &entry.raw_title,
            &signature,
        )
        .await?;
        log_ids.push(log.id);
        queries.push(MatchQuery { raw_artist: entry.raw_artist.clone(), raw_title: entry.raw_title.clone() });
    }

    let thresholds = state.config.thresholds();
    let tuning = state.config.snapshot();
    let matches = matcher::match_batch(&state.db, state.vector.as_ref(), &thresholds, tuning.vector_topk, &queries).await?;

    let mut n_auto_linked = 0;
    let mut n_queued = 0;
    for ((log_id, query), m) in log_ids.iter().zip(queries.iter()).zip(matches.iter()) {
        match m.category {
            MatchCategory::AutoLink | MatchCategory::IdentityBridge => {
                if let Some(work_id) = m.work_id {
                    library::set_broadcast_log_work(&state.db, *log_id, work_id, &m.reason).await?;
                    n_auto_linked += 1;
                }
            }
            MatchCategory::Review | MatchCategory::Reject | MatchCategory::NoMatch => {
                discovery::upsert_on_unmatched(
                    &state.db,
                    &m.signature,
                    &query.raw_artist,
                    &query.raw_title,
                    m.work_id,
                    Some((m.scores.artist_sim, m.scores.title_sim)),
                )
                .await?;
                n_queued += 1;
            }
        }
    }

    Ok(Json(SubmitLogsResponse { n_inserted: request.logs.len(), n_auto_linked, n_queued }))
}

pub fn ingest_routes() -> Router<AppState> {
    Router::new().route("/logs", post(submit_logs))
}
