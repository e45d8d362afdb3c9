//! Resolution (§6 `resolve`): pick a concrete Recording for a Work given
//! station/format context, via the cached Resolver (C8).

use super::AppState;
use crate::ApiResult;
use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

#[derive(Debug, Deserialize)]
pub struct ResolveQuery {
    pub work_id: i64,
    pub station_id: Option<i64>,
    pub format_code: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct ResolveResponse {
    pub work_id: i64,
    pub recording_id: Option<i64>,
}

/// GET /resolve — `resolve(work_id, station_id, format_code)` (§6).
pub async fn resolve(State(state): State<AppState>, Query(query): Query<ResolveQuery>) -> ApiResult<Json<ResolveResponse>> {
    let recording_id = state
        .resolver_cache
        .resolve(&state.db, query.work_id, query.station_id, query.format_code.as_deref())
        .await?;
    Ok(Json(ResolveResponse { work_id: query.work_id, recording_id }))
}

pub fn resolution_routes() -> Router<AppState> {
    Router::new().route("/resolve", get(resolve))
}
