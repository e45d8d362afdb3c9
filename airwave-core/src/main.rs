//! airwave - radio broadcast-log identity-reconciliation engine
//!
//! Grounded on `wkmp-ai`'s `main.rs` (tracing setup, `AppState`, router
//! assembly, `axum::serve`), extended with this crate's tiered
//! configuration (§9 "global tuning state") and the schema-sync fan-out
//! every reconciliation table needs at startup.

use airwave_common::db::init_database_pool;
use airwave_common::events::EventBus;
use airwave_core::api::{self, AppState};
use airwave_core::config::{self, ConfigHandle, ThresholdConfig, TomlTuning};
use airwave_core::resolver::ResolverCache;
use airwave_core::vector::SqliteVectorIndex;
use airwave_core::{bridge, discovery, jobs::JobController, library, resolver, vector};
use anyhow::Result;
use clap::Parser;
use serde::Deserialize;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

/// Command-line overrides, highest-priority tier ahead of environment,
/// TOML file, and compiled defaults (§9 config precedence).
#[derive(Debug, Parser)]
#[command(name = "airwave", version, about = "Radio broadcast-log identity-reconciliation engine")]
struct Cli {
    /// Path to airwave.toml; defaults to the OS config directory.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Path to the SQLite database file.
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Address to bind the HTTP API to.
    #[arg(long)]
    bind: Option<String>,
}

/// Shape of `airwave.toml`. Thresholds are included so operators can seed
/// an initial value, but the database tier wins once `set_thresholds` has
/// persisted one (§6).
#[derive(Debug, Default, Deserialize)]
struct FileConfig {
    db_path: Option<String>,
    bind: Option<String>,
    #[serde(flatten)]
    thresholds: ThresholdsTable,
    #[serde(flatten)]
    tuning: TomlTuning,
}

#[derive(Debug, Default, Deserialize)]
struct ThresholdsTable {
    artist_auto: Option<f64>,
    artist_review: Option<f64>,
    title_auto: Option<f64>,
    title_review: Option<f64>,
}

const DEFAULT_BIND: &str = "127.0.0.1:5740";

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();

    info!("Starting airwave reconciliation engine");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    let config_path = cli.config.or_else(airwave_common::config::default_config_path);
    let file_config: FileConfig = config_path
        .as_deref()
        .map(airwave_common::config::load_toml_config)
        .transpose()?
        .flatten()
        .unwrap_or_default();

    let db_path = cli
        .db_path
        .or_else(|| file_config.db_path.clone().map(PathBuf::from))
        .unwrap_or_else(|| airwave_common::config::default_data_dir().join("airwave.db"));
    info!("Database: {}", db_path.display());

    let bind = cli.bind.or_else(|| file_config.bind.clone()).unwrap_or_else(|| DEFAULT_BIND.to_string());

    let db = init_database_pool(&db_path).await?;
    info!("Database connection established");

    library::schema::sync_all(&db).await?;
    bridge::sync_schema(&db).await?;
    discovery::sync_schema(&db).await?;
    resolver::sync_schema(&db).await?;
    vector::sync_schema(&db).await?;
    info!("Schema sync complete");

    let toml_thresholds = {
        let t = &file_config.thresholds;
        match (t.artist_auto, t.artist_review, t.title_auto, t.title_review) {
            (Some(artist_auto), Some(artist_review), Some(title_auto), Some(title_review)) => {
                Some(ThresholdConfig { artist_auto, artist_review, title_auto, title_review })
            }
            _ => None,
        }
    };
    let thresholds = config::load_thresholds(&db, toml_thresholds).await?;
    let mut tuning = config::resolve_tuning(&file_config.tuning);
    tuning.thresholds = thresholds;
    let config_handle = ConfigHandle::new(tuning);
    info!(?tuning, "Matching configuration loaded");

    let event_bus = EventBus::new(100);
    let jobs = JobController::new(event_bus);
    let vector_index = Arc::new(SqliteVectorIndex::new(db.clone()));
    let resolver_cache = Arc::new(ResolverCache::new(Duration::from_secs(5)));

    let state = AppState { db, vector: vector_index, jobs, config: config_handle, resolver_cache };
    let app = api::build_router(state);

    let listener = tokio::net::TcpListener::bind(&bind).await?;
    info!("Listening on http://{bind}");
    info!("Health check: http://{bind}/health");

    axum::serve(listener, app).await?;

    Ok(())
}
