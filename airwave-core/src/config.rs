//! Tunable matching/scan configuration (§6 Configuration table)
//!
//! Grounded on `wkmp-ai`'s tiered `resolve_acoustid_api_key` (database →
//! environment → TOML → compiled default) and on spec.md §9's "global
//! tuning state ... single process-wide configuration snapshot loaded at
//! startup and swappable atomically; all callers read by value from the
//! current snapshot to avoid torn reads during tuning". The snapshot is an
//! `Arc<RwLock<MatchTuning>>`; `snapshot()` clones the current value so a
//! `match_batch` call never observes a write in progress.

use airwave_common::config::{resolve_f64, resolve_usize};
use airwave_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use std::sync::{Arc, RwLock};

/// Three-range thresholds for the matcher (C5).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ThresholdConfig {
    pub artist_auto: f64,
    pub artist_review: f64,
    pub title_auto: f64,
    pub title_review: f64,
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            artist_auto: 0.85,
            artist_review: 0.70,
            title_auto: 0.80,
            title_review: 0.70,
        }
    }
}

impl ThresholdConfig {
    /// `0 <= review <= auto <= 1` for both artist and title (§6).
    pub fn validate(&self) -> Result<()> {
        let in_range_and_ordered = |review: f64, auto: f64| {
            (0.0..=1.0).contains(&review) && (0.0..=1.0).contains(&auto) && review <= auto
        };
        if !in_range_and_ordered(self.artist_review, self.artist_auto) {
            return Err(Error::InvalidInput(format!(
                "artist thresholds must satisfy 0 <= review <= auto <= 1, got review={}, auto={}",
                self.artist_review, self.artist_auto
            )));
        }
        if !in_range_and_ordered(self.title_review, self.title_auto) {
            return Err(Error::InvalidInput(format!(
                "title thresholds must satisfy 0 <= review <= auto <= 1, got review={}, auto={}",
                self.title_review, self.title_auto
            )));
        }
        Ok(())
    }
}

/// Full set of live-tunable parameters (§6 config table).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct MatchTuning {
    pub thresholds: ThresholdConfig,
    pub work_fuzzy_threshold: f64,
    pub work_fuzzy_max_works: usize,
    pub vector_topk: usize,
    pub discovery_batch_size: usize,
    pub scan_workers: usize,
    pub job_retain_audit_days: i64,
}

impl Default for MatchTuning {
    fn default() -> Self {
        Self {
            thresholds: ThresholdConfig::default(),
            work_fuzzy_threshold: 0.85,
            work_fuzzy_max_works: 500,
            vector_topk: 5,
            discovery_batch_size: 500,
            scan_workers: num_cpus(),
            job_retain_audit_days: 30,
        }
    }
}

fn num_cpus() -> usize {
    std::thread::available_parallelism().map(|n| n.get()).unwrap_or(4)
}

/// TOML-file shape for the tiers that don't have a DB override.
#[derive(Debug, Default, Deserialize)]
pub struct TomlTuning {
    pub work_fuzzy_threshold: Option<f64>,
    pub work_fuzzy_max_works: Option<usize>,
    pub vector_topk: Option<usize>,
    pub discovery_batch_size: Option<usize>,
    pub scan_workers: Option<usize>,
    pub job_retain_audit_days: Option<i64>,
}

/// Process-wide swappable configuration snapshot.
#[derive(Clone)]
pub struct ConfigHandle(Arc<RwLock<MatchTuning>>);

impl ConfigHandle {
    pub fn new(initial: MatchTuning) -> Self {
        Self(Arc::new(RwLock::new(initial)))
    }

    /// Read the current value by clone, so a long-running batch never
    /// observes a torn update mid-read.
    pub fn snapshot(&self) -> MatchTuning {
        *self.0.read().expect("config lock poisoned")
    }

    pub fn thresholds(&self) -> ThresholdConfig {
        self.snapshot().thresholds
    }

    pub fn set_thresholds(&self, thresholds: ThresholdConfig) -> Result<()> {
        thresholds.validate()?;
        self.0.write().expect("config lock poisoned").thresholds = thresholds;
        Ok(())
    }

    pub fn set_tuning(&self, tuning: MatchTuning) -> Result<()> {
        tuning.thresholds.validate()?;
        *self.0.write().expect("config lock poisoned") = tuning;
        Ok(())
    }
}

const SETTING_ARTIST_AUTO: &str = "match_artist_auto";
const SETTING_ARTIST_REVIEW: &str = "match_artist_review";
const SETTING_TITLE_AUTO: &str = "match_title_auto";
const SETTING_TITLE_REVIEW: &str = "match_title_review";

/// Load thresholds with DB → ENV → TOML → default priority, the same tier
/// order `wkmp-ai` uses for its AcoustID API key (the only setting in the
/// §6 table the spec requires to survive a `set_thresholds` call across
/// restarts).
pub async fn load_thresholds(pool: &SqlitePool, toml: Option<ThresholdConfig>) -> Result<ThresholdConfig> {
    let db_value = load_thresholds_from_db(pool).await?;

    let artist_auto = db_value
        .map(|t| t.artist_auto)
        .unwrap_or_else(|| resolve_f64("AIRWAVE_MATCH_ARTIST_AUTO", toml.map(|t| t.artist_auto), ThresholdConfig::default().artist_auto));
    let artist_review = db_value
        .map(|t| t.artist_review)
        .unwrap_or_else(|| resolve_f64("AIRWAVE_MATCH_ARTIST_REVIEW", toml.map(|t| t.artist_review), ThresholdConfig::default().artist_review));
    let title_auto = db_value
        .map(|t| t.title_auto)
        .unwrap_or_else(|| resolve_f64("AIRWAVE_MATCH_TITLE_AUTO", toml.map(|t| t.title_auto), ThresholdConfig::default().title_auto));
    let title_review = db_value
        .map(|t| t.title_review)
        .unwrap_or_else(|| resolve_f64("AIRWAVE_MATCH_TITLE_REVIEW", toml.map(|t| t.title_review), ThresholdConfig::default().title_review));

    let thresholds = ThresholdConfig {
        artist_auto,
        artist_review,
        title_auto,
        title_review,
    };
    thresholds.validate()?;
    Ok(thresholds)
}

async fn load_thresholds_from_db(pool: &SqlitePool) -> Result<Option<ThresholdConfig>> {
    let rows: Vec<(String, String)> =
        sqlx::query_as("SELECT key, value FROM app_settings WHERE key IN (?, ?, ?, ?)")
            .bind(SETTING_ARTIST_AUTO)
            .bind(SETTING_ARTIST_REVIEW)
            .bind(SETTING_TITLE_AUTO)
            .bind(SETTING_TITLE_REVIEW)
            .fetch_all(pool)
            .await?;

    if rows.is_empty() {
        return Ok(None);
    }

    let get = |key: &str| -> Option<f64> {
        rows.iter()
            .find(|(k, _)| k == key)
            .and_then(|(_, v)| v.parse().ok())
    };

    match (
        get(SETTING_ARTIST_AUTO),
        get(SETTING_ARTIST_REVIEW),
        get(SETTING_TITLE_AUTO),
        get(SETTING_TITLE_REVIEW),
    ) {
        (Some(artist_auto), Some(artist_review), Some(title_auto), Some(title_review)) => {
            Ok(Some(ThresholdConfig {
                artist_auto,
                artist_review,
                title_auto,
                title_review,
            }))
        }
        _ => Ok(None),
    }
}

/// Persist thresholds to the database tier so `set_thresholds` survives a
/// restart.
pub async fn persist_thresholds(pool: &SqlitePool, thresholds: &ThresholdConfig) -> Result<()> {
    thresholds.validate()?;
    let pairs = [
        (SETTING_ARTIST_AUTO, thresholds.artist_auto),
        (SETTING_ARTIST_REVIEW, thresholds.artist_review),
        (SETTING_TITLE_AUTO, thresholds.title_auto),
        (SETTING_TITLE_REVIEW, thresholds.title_review),
    ];
    for (key, value) in pairs {
        sqlx::query(
            r#"
            INSERT INTO app_settings (key, value, updated_at)
            VALUES (?, ?, CURRENT_TIMESTAMP)
            ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = CURRENT_TIMESTAMP
            "#,
        )
        .bind(key)
        .bind(value.to_string())
        .execute(pool)
        .await?;
    }
    Ok(())
}

/// Resolve the non-threshold tuning knobs (ENV → TOML → default; these are
/// process-level sizing knobs, not operator-editable via the control
/// plane, so they carry no DB tier).
pub fn resolve_tuning(toml: &TomlTuning) -> MatchTuning {
    let defaults = MatchTuning::default();
    MatchTuning {
        thresholds: defaults.thresholds,
        work_fuzzy_threshold: resolve_f64(
            "AIRWAVE_WORK_FUZZY_THRESHOLD",
            toml.work_fuzzy_threshold,
            defaults.work_fuzzy_threshold,
        ),
        work_fuzzy_max_works: resolve_usize(
            "AIRWAVE_WORK_FUZZY_MAX_WORKS",
            toml.work_fuzzy_max_works,
            defaults.work_fuzzy_max_works,
        ),
        vector_topk: resolve_usize("AIRWAVE_VECTOR_TOPK", toml.vector_topk, defaults.vector_topk),
        discovery_batch_size: resolve_usize(
            "AIRWAVE_DISCOVERY_BATCH_SIZE",
            toml.discovery_batch_size,
            defaults.discovery_batch_size,
        ),
        scan_workers: resolve_usize("AIRWAVE_SCAN_WORKERS", toml.scan_workers, defaults.scan_workers),
        job_retain_audit_days: resolve_usize(
            "AIRWAVE_JOB_RETAIN_AUDIT_DAYS",
            toml.job_retain_audit_days.map(|n| n as usize),
            defaults.job_retain_audit_days as usize,
        ) as i64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_thresholds_are_valid() {
        ThresholdConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_review_above_auto() {
        let bad = ThresholdConfig {
            artist_auto: 0.5,
            artist_review: 0.6,
            ..ThresholdConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn config_handle_snapshot_is_independent_of_later_writes() {
        let handle = ConfigHandle::new(MatchTuning::default());
        let before = handle.snapshot();
        handle
            .set_thresholds(ThresholdConfig {
                artist_auto: 0.99,
                ..ThresholdConfig::default()
            })
            .unwrap();
        assert_eq!(before.thresholds.artist_auto, 0.85);
        assert_eq!(handle.snapshot().thresholds.artist_auto, 0.99);
    }

    #[tokio::test]
    async fn thresholds_round_trip_through_db() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sqlx::query(
            "CREATE TABLE app_settings (key TEXT PRIMARY KEY, value TEXT NOT NULL, updated_at TIMESTAMP)",
        )
        .execute(&pool)
        .await
        .unwrap();

        let custom = ThresholdConfig {
            artist_auto: 0.9,
            artist_review: 0.6,
            title_auto: 0.85,
            title_review: 0.65,
        };
        persist_thresholds(&pool, &custom).await.unwrap();

        let loaded = load_thresholds(&pool, None).await.unwrap();
        assert_eq!(loaded, custom);
    }
}
