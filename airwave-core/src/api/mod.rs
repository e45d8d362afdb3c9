//! HTTP surface for the Airwave reconciliation engine (§6 External
//! Interfaces).
//!
//! Grounded on `wkmp-ai`'s `api/mod.rs` (one submodule per concern, each
//! exporting a `Router<AppState>` merged in `main.rs`'s `build_router`) and
//! its `AppState`/`ApiError` shapes. Every handler here is a thin adapter:
//! the reconciliation logic itself lives in `bridge`, `discovery`,
//! `matcher`, `library`, `resolver`, `scanner`.

pub mod health;
pub mod ingest;
pub mod jobs;
pub mod library_admin;
pub mod matching;
pub mod resolution;
pub mod verification;

use crate::config::ConfigHandle;
use crate::jobs::JobController;
use crate::resolver::ResolverCache;
use crate::vector::SqliteVectorIndex;
use axum::Router;
use sqlx::SqlitePool;
use std::sync::Arc;

/// Application state shared across every handler, grounded on `wkmp-ai`'s
/// `AppState` (`db` + `event_bus`), extended with the reconciliation
/// engine's process-wide singletons (§9 "global tuning state").
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub vector: Arc<SqliteVectorIndex>,
    pub jobs: JobController,
    pub config: ConfigHandle,
    pub resolver_cache: Arc<ResolverCache>,
}

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(health::health_routes())
        .merge(ingest::ingest_routes())
        .merge(library_admin::library_admin_routes())
        .merge(matching::matching_routes())
        .merge(verification::verification_routes())
        .merge(resolution::resolution_routes())
        .merge(jobs::job_routes())
        .with_state(state)
}
