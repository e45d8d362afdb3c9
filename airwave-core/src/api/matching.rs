//! Matching control plane (§6 `get_thresholds`, `set_thresholds`,
//! `match_samples`, `match_impact`): tune and preview the Matcher (C5)
//! without mutating anything.

use super::AppState;
use crate::config::ThresholdConfig;
use crate::library;
use crate::matcher::{self, Match, MatchCategory, MatchQuery, QualityFlag};
use crate::ApiResult;
use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use serde::{Deserialize, Serialize};

/// GET /matching/thresholds — `get_thresholds` (§6).
pub async fn get_thresholds(State(state): State<AppState>) -> Json<ThresholdConfig> {
    Json(state.config.thresholds())
}

/// POST /matching/thresholds — `set_thresholds` (§6): validates, applies
/// to the live snapshot immediately, and persists so the setting survives
/// a restart.
pub async fn set_thresholds(State(state): State<AppState>, Json(thresholds): Json<ThresholdConfig>) -> ApiResult<Json<ThresholdConfig>> {
    state.config.set_thresholds(thresholds)?;
    crate::config::persist_thresholds(&state.db, &thresholds).await?;
    Ok(Json(thresholds))
}

#[derive(Debug, Deserialize)]
pub struct SampleQuery {
    #[serde(default = "default_sample_size")]
    pub limit: i64,
    /// Optional candidate-threshold override (§6 "`thresholds?`"); all four
    /// fields must be supplied together or the live snapshot is used.
    pub artist_auto: Option<f64>,
    pub artist_review: Option<f64>,
    pub title_auto: Option<f64>,
    pub title_review: Option<f64>,
}

impl SampleQuery {
    fn thresholds_override(&self) -> Option<ThresholdConfig> {
        Some(ThresholdConfig {
            artist_auto: self.artist_auto?,
            artist_review: self.artist_review?,
            title_auto: self.title_auto?,
            title_review: self.title_review?,
        })
    }
}

fn default_sample_size() -> i64 {
    50
}

#[derive(Debug, Serialize)]
pub struct SampleMatch {
    pub raw_artist: String,
    pub raw_title: String,
    pub category: String,
    pub reason: String,
    pub artist_sim: f64,
    pub title_sim: f64,
    pub work_id: Option<i64>,
    pub quality_flags: Vec<QualityFlag>,
}

fn category_name(category: MatchCategory) -> &'static str {
    match category {
        MatchCategory::AutoLink => "auto_link",
        MatchCategory::Review => "review",
        MatchCategory::Reject => "reject",
        MatchCategory::IdentityBridge => "identity_bridge",
        MatchCategory::NoMatch => "no_match",
    }
}

/// How many extra rows to draw per requested sample slot before
/// stratifying by category. `auto_link`/`identity_bridge` logs already
/// carry a `work_id` and make up most of the table, while a fresh
/// `reject` or borderline `review` outcome is comparatively rare, so the
/// raw pool has to be oversampled for every bucket to have a chance of
/// filling.
const STRATIFICATION_OVERSAMPLE: i64 = 8;

/// Round-robins `limit` picks across the populated category buckets so no
/// single common category (typically `auto_link`) crowds out the rest,
/// per spec.md's "stratified examples across {auto_link, review, reject,
/// identity_bridge}".
fn stratify(matches: Vec<(MatchQuery, Match)>, limit: usize) -> Vec<(MatchQuery, Match)> {
    let mut buckets: Vec<Vec<(MatchQuery, Match)>> = vec![Vec::new(); 5];
    for (q, m) in matches {
        let bucket = match m.category {
            MatchCategory::AutoLink => 0,
            MatchCategory::Review => 1,
            MatchCategory::Reject => 2,
            MatchCategory::IdentityBridge => 3,
            MatchCategory::NoMatch => 4,
        };
        buckets[bucket].push((q, m));
    }

    let mut picked = Vec::with_capacity(limit);
    'fill: loop {
        let mut took_any = false;
        for bucket in &mut buckets {
            if picked.len() >= limit {
                break 'fill;
            }
            if let Some(item) = bucket.pop() {
                picked.push(item);
                took_any = true;
            }
        }
        if !took_any {
            break;
        }
    }
    picked
}

/// GET /matching/samples — `match_samples` (§6): re-run the Matcher over
/// a random sample of real BroadcastLogs (matched and unmatched alike, so
/// every category can be represented) under either the live thresholds or
/// a candidate override, read-only.
pub async fn match_samples(State(state): State<AppState>, Query(query): Query<SampleQuery>) -> ApiResult<Json<Vec<SampleMatch>>> {
    let thresholds = match query.thresholds_override() {
        Some(candidate) => {
            candidate.validate()?;
            candidate
        }
        None => state.config.thresholds(),
    };

    let oversampled = query.limit.saturating_mul(STRATIFICATION_OVERSAMPLE);
    let logs = library::sample_broadcast_logs(&state.db, oversampled).await?;
    let queries: Vec<MatchQuery> =
        logs.iter().map(|l| MatchQuery { raw_artist: l.raw_artist.clone(), raw_title: l.raw_title.clone() }).collect();

    let tuning = state.config.snapshot();
    let matches = matcher::match_batch(&state.db, state.vector.as_ref(), &thresholds, tuning.vector_topk, &queries).await?;

    let paired: Vec<(MatchQuery, Match)> = queries.into_iter().zip(matches).collect();
    let picked = stratify(paired, query.limit.max(0) as usize);

    let mut out = Vec::with_capacity(picked.len());
    for (q, m) in picked {
        let matched_title = match m.recording_id {
            Some(recording_id) => library::get_recording(&state.db, recording_id).await.map(|r| r.title).unwrap_or_default(),
            None => String::new(),
        };
        let quality_flags = matcher::quality_flags(&q.raw_title, &matched_title, &m.scores, &thresholds);
        out.push(SampleMatch {
            raw_artist: q.raw_artist,
            raw_title: q.raw_title,
            category: category_name(m.category).to_string(),
            reason: m.reason,
            artist_sim: m.scores.artist_sim,
            title_sim: m.scores.title_sim,
            work_id: m.work_id,
            quality_flags,
        });
    }

    Ok(Json(out))
}

#[derive(Debug, Deserialize)]
pub struct ImpactQuery {
    #[serde(default = "default_sample_size")]
    pub limit: i64,
    pub artist_auto: f64,
    pub artist_review: f64,
    pub title_auto: f64,
    pub title_review: f64,
}

#[derive(Debug, Serialize)]
pub struct ImpactResponse {
    pub sample_size: usize,
    pub n_auto_link: usize,
    pub n_review: usize,
    pub n_reject: usize,
}

/// GET /matching/impact — `match_impact` (§6): project how many of the
/// same sample would auto-link/review/reject under *candidate*
/// thresholds, without touching the live snapshot.
pub async fn match_impact(State(state): State<AppState>, Query(query): Query<ImpactQuery>) -> ApiResult<Json<ImpactResponse>> {
    let candidate = ThresholdConfig {
        artist_auto: query.artist_auto,
        artist_review: query.artist_review,
        title_auto: query.title_auto,
        title_review: query.title_review,
    };
    candidate.validate()?;

    let logs = library::sample_unmatched_broadcast_logs(&state.db, query.limit).await?;
    let queries: Vec<MatchQuery> =
        logs.iter().map(|l| MatchQuery { raw_artist: l.raw_artist.clone(), raw_title: l.raw_title.clone() }).collect();

    let tuning = state.config.snapshot();
    let matches = matcher::match_batch(&state.db, state.vector.as_ref(), &candidate, tuning.vector_topk, &queries).await?;

    let mut n_auto_link = 0;
    let mut n_review = 0;
    let mut n_reject = 0;
    for m in &matches {
        match m.category {
            MatchCategory::AutoLink | MatchCategory::IdentityBridge => n_auto_link += 1,
            MatchCategory::Review => n_review += 1,
            MatchCategory::Reject | MatchCategory::NoMatch => n_reject += 1,
        }
    }

    Ok(Json(ImpactResponse { sample_size: matches.len(), n_auto_link, n_review, n_reject }))
}

pub fn matching_routes() -> Router<AppState> {
    Router::new()
        .route("/matching/thresholds", get(get_thresholds).post(set_thresholds))
        .route("/matching/samples", get(match_samples))
        .route("/matching/impact", get(match_impact))
}
