//! Integration tests for the `airwave-core` HTTP adapter (§6), grounded on
//! `wkmp-ai`'s `tests/api_integration_tests.rs` (router-level `oneshot`
//! requests over an in-memory database).

use airwave_core::api::{build_router, AppState};
use airwave_core::config::{ConfigHandle, MatchTuning};
use airwave_core::jobs::JobController;
use airwave_core::resolver::ResolverCache;
use airwave_core::vector::SqliteVectorIndex;
use airwave_core::{bridge, discovery, library, resolver, vector};
use airwave_common::events::EventBus;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use sqlx::SqlitePool;
use std::sync::Arc;
use std::time::Duration;
use tower::util::ServiceExt;

async fn test_app() -> (axum::Router, SqlitePool) {
    let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
    library::schema::sync_all(&pool).await.unwrap();
    bridge::sync_schema(&pool).await.unwrap();
    discovery::sync_schema(&pool).await.unwrap();
    resolver::sync_schema(&pool).await.unwrap();
    vector::sync_schema(&pool).await.unwrap();

    let state = AppState {
        db: pool.clone(),
        vector: Arc::new(SqliteVectorIndex::new(pool.clone())),
        jobs: JobController::new(EventBus::new(16)),
        config: ConfigHandle::new(MatchTuning::default()),
        resolver_cache: Arc::new(ResolverCache::new(Duration::from_secs(30))),
    };
    (build_router(state), pool)
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn post(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

#[tokio::test]
async fn health_reports_ok() {
    let (app, _pool) = test_app().await;

    let response = app.oneshot(Request::builder().uri("/health").body(Body::empty()).unwrap()).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["status"], "ok");
    assert_eq!(json["module"], "airwave-core");
}

#[tokio::test]
async fn submit_logs_auto_links_exact_match_against_the_library() {
    let (app, pool) = test_app().await;

    let artist = library::upsert_artist(&pool, "Talking Heads").await.unwrap();
    let work = library::upsert_work(&pool, "Once in a Lifetime", artist.id, 0.85, 500).await.unwrap();
    library::upsert_recording(&pool, work.id, "Once in a Lifetime", "Original", None, None).await.unwrap();
    let station = library::upsert_station(&pool, "KEXP", Some("alternative")).await.unwrap();

    let request = post(
        "/logs",
        json!({
            "station_id": station.id,
            "logs": [{
                "played_at": "2026-07-31T12:00:00Z",
                "raw_artist": "Talking Heads",
                "raw_title": "Once in a Lifetime",
            }],
        }),
    );

    let response = app.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let json = body_json(response).await;
    assert_eq!(json["n_inserted"], 1);
    assert_eq!(json["n_auto_linked"], 1);
    assert_eq!(json["n_queued"], 0);
}

#[tokio::test]
async fn submit_logs_queues_unmatched_plays_for_review() {
    let (app, pool) = test_app().await;
    let station = library::upsert_station(&pool, "WXYZ", None).await.unwrap();

    let request = post(
        "/logs",
        json!({
            "station_id": station.id,
            "logs": [{
                "played_at": "2026-07-31T12:00:00Z",
                "raw_artist": "Unknown Artist",
                "raw_title": "Unreleased Song",
            }],
        }),
    );

    let response = app.oneshot(request).await.unwrap();
    let json = body_json(response).await;
    assert_eq!(json["n_inserted"], 1);
    assert_eq!(json["n_auto_linked"], 0);
    assert_eq!(json["n_queued"], 1);
}

#[tokio::test]
async fn get_and_set_thresholds_round_trip_through_the_live_snapshot() {
    let (app, _pool) = test_app().await;

    let get_response = app
        .clone()
        .oneshot(Request::builder().uri("/matching/thresholds").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(get_response.status(), StatusCode::OK);
    let before = body_json(get_response).await;
    assert_eq!(before["artist_auto"], 0.85);

    let set_response = app
        .clone()
        .oneshot(post(
            "/matching/thresholds",
            json!({"artist_auto": 0.9, "artist_review": 0.6, "title_auto": 0.9, "title_review": 0.6}),
        ))
        .await
        .unwrap();
    assert_eq!(set_response.status(), StatusCode::OK);

    let get_again = app
        .oneshot(Request::builder().uri("/matching/thresholds").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let after = body_json(get_again).await;
    assert_eq!(after["artist_auto"], 0.9);
}

#[tokio::test]
async fn set_thresholds_rejects_an_inverted_review_auto_pair() {
    let (app, _pool) = test_app().await;

    let response = app
        .oneshot(post(
            "/matching/thresholds",
            json!({"artist_auto": 0.5, "artist_review": 0.9, "title_auto": 0.8, "title_review": 0.7}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn verification_queue_lists_an_unmatched_play_then_link_resolves_it() {
    let (app, pool) = test_app().await;
    let artist = library::upsert_artist(&pool, "Radiohead").await.unwrap();
    let work = library::upsert_work(&pool, "Creep", artist.id, 0.85, 500).await.unwrap();

    discovery::upsert_on_unmatched(&pool, "sig-creep", "Radiohead", "Creep (Live)", None, Some((0.9, 0.6))).await.unwrap();

    let queue_response = app
        .clone()
        .oneshot(Request::builder().uri("/verification/queue?filter=unmatched").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(queue_response.status(), StatusCode::OK);
    let queue = body_json(queue_response).await;
    assert_eq!(queue.as_array().unwrap().len(), 1);
    assert_eq!(queue[0]["signature"], "sig-creep");

    let link_response = app
        .oneshot(post(
            "/verification/link",
            json!({
                "signature": "sig-creep",
                "reference_artist": "Radiohead",
                "reference_title": "Creep",
                "work_id": work.id,
            }),
        ))
        .await
        .unwrap();
    assert_eq!(link_response.status(), StatusCode::OK);
}

#[tokio::test]
async fn job_status_reports_unknown_task_as_not_found() {
    let (app, _pool) = test_app().await;
    let random_id = uuid::Uuid::new_v4();

    let response = app
        .oneshot(Request::builder().uri(format!("/jobs/{random_id}")).body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn library_scan_rejects_a_missing_root_directory() {
    let (app, _pool) = test_app().await;

    let response = app.oneshot(post("/library/scan", json!({"root": "/no/such/path/airwave-test"}))).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}
