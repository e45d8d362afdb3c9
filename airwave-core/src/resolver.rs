//! Resolver (C8): chooses a concrete Recording (and so, a File) for a
//! Work given station/format context (§4.8). A pure function of the KB
//! snapshot, cached with a short TTL.
//!
//! Grounded on `wkmp-ai`'s `db/schema.rs` table-sync pattern for the
//! three policy tables, and on the per-entity repository query style used
//! throughout `library/mod.rs`.

use airwave_common::db::schema_sync::{ColumnDefinition, SchemaSync, TableSchema};
use airwave_common::Result;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

pub struct StationPreferencesTableSchema;

impl TableSchema for StationPreferencesTableSchema {
    fn table_name() -> &'static str {
        "station_preferences"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("station_id", "INTEGER").not_null(),
            ColumnDefinition::new("work_id", "INTEGER").not_null(),
            ColumnDefinition::new("recording_id", "INTEGER").not_null(),
            ColumnDefinition::new("priority", "INTEGER").not_null(),
        ]
    }

    fn validate_schema(_pool: &SqlitePool) -> Result<()> {
        Ok(())
    }
}

pub struct FormatPreferencesTableSchema;

impl TableSchema for FormatPreferencesTableSchema {
    fn table_name() -> &'static str {
        "format_preferences"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("format_code", "TEXT").not_null(),
            ColumnDefinition::new("work_id", "INTEGER").not_null(),
            ColumnDefinition::new("recording_id", "INTEGER").not_null(),
            ColumnDefinition::new("exclude_tags", "TEXT"),
        ]
    }

    fn validate_schema(_pool: &SqlitePool) -> Result<()> {
        Ok(())
    }
}

pub struct WorkDefaultRecordingsTableSchema;

impl TableSchema for WorkDefaultRecordingsTableSchema {
    fn table_name() -> &'static str {
        "work_default_recordings"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("work_id", "INTEGER").primary_key(),
            ColumnDefinition::new("recording_id", "INTEGER").not_null(),
        ]
    }

    fn validate_schema(_pool: &SqlitePool) -> Result<()> {
        Ok(())
    }
}

pub async fn sync_schema(pool: &SqlitePool) -> Result<()> {
    SchemaSync::sync_table::<StationPreferencesTableSchema>(pool).await?;
    SchemaSync::sync_table::<FormatPreferencesTableSchema>(pool).await?;
    SchemaSync::sync_table::<WorkDefaultRecordingsTableSchema>(pool).await?;
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_station_pref ON station_preferences(station_id, work_id, priority)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS idx_format_pref ON format_preferences(format_code, work_id)")
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn set_station_preference(
    pool: &SqlitePool,
    station_id: i64,
    work_id: i64,
    recording_id: i64,
    priority: i64,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO station_preferences (station_id, work_id, recording_id, priority) VALUES (?, ?, ?, ?) \
         ON CONFLICT(station_id, work_id, priority) DO UPDATE SET recording_id = excluded.recording_id",
    )
    .bind(station_id)
    .bind(work_id)
    .bind(recording_id)
    .bind(priority)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn set_format_preference(
    pool: &SqlitePool,
    format_code: &str,
    work_id: i64,
    recording_id: i64,
    exclude_tags: Option<&str>,
) -> Result<()> {
    sqlx::query(
        "INSERT INTO format_preferences (format_code, work_id, recording_id, exclude_tags) VALUES (?, ?, ?, ?) \
         ON CONFLICT(format_code, work_id) DO UPDATE SET \
           recording_id = excluded.recording_id, exclude_tags = excluded.exclude_tags",
    )
    .bind(format_code)
    .bind(work_id)
    .bind(recording_id)
    .bind(exclude_tags)
    .execute(pool)
    .await?;
    Ok(())
}

pub async fn set_work_default_recording(pool: &SqlitePool, work_id: i64, recording_id: i64) -> Result<()> {
    sqlx::query(
        "INSERT INTO work_default_recordings (work_id, recording_id) VALUES (?, ?) \
         ON CONFLICT(work_id) DO UPDATE SET recording_id = excluded.recording_id",
    )
    .bind(work_id)
    .bind(recording_id)
    .execute(pool)
    .await?;
    Ok(())
}

async fn has_file(pool: &SqlitePool, recording_id: i64) -> Result<bool> {
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM library_files WHERE recording_id = ?")
        .bind(recording_id)
        .fetch_one(pool)
        .await?;
    Ok(count > 0)
}

fn tags_intersect(version_type: &str, exclude_tags: &str) -> bool {
    let excluded: Vec<&str> = exclude_tags.split(',').map(|s| s.trim()).collect();
    version_type.split(" / ").any(|tag| excluded.iter().any(|e| e.eq_ignore_ascii_case(tag)))
}

/// Pure resolution over the current KB state, uncached. §4.8 priority
/// order: Station > Format > Default > Any, skipping fileless Recordings
/// at each level.
pub async fn resolve_uncached(
    pool: &SqlitePool,
    work_id: i64,
    station_id: Option<i64>,
    format_code: Option<&str>,
) -> Result<Option<i64>> {
    if let Some(station_id) = station_id {
        let rows = sqlx::query(
            "SELECT recording_id FROM station_preferences WHERE station_id = ? AND work_id = ? ORDER BY priority ASC",
        )
        .bind(station_id)
        .bind(work_id)
        .fetch_all(pool)
        .await?;
        for row in rows {
            let recording_id: i64 = row.get("recording_id");
            if has_file(pool, recording_id).await? {
                return Ok(Some(recording_id));
            }
        }
    }

    if let Some(format_code) = format_code {
        let row = sqlx::query(
            "SELECT recording_id, exclude_tags FROM format_preferences WHERE format_code = ? AND work_id = ?",
        )
        .bind(format_code)
        .bind(work_id)
        .fetch_optional(pool)
        .await?;
        if let Some(row) = row {
            let recording_id: i64 = row.get("recording_id");
            let exclude_tags: Option<String> = row.get("exclude_tags");
            let version_type: Option<String> =
                sqlx::query_scalar("SELECT version_type FROM recordings WHERE id = ?")
                    .bind(recording_id)
                    .fetch_optional(pool)
                    .await?;
            let excluded = match (&exclude_tags, &version_type) {
                (Some(ex), Some(vt)) => tags_intersect(vt, ex),
                _ => false,
            };
            if !excluded && has_file(pool, recording_id).await? {
                return Ok(Some(recording_id));
            }
        }
    }

    let default_recording: Option<i64> =
        sqlx::query_scalar("SELECT recording_id FROM work_default_recordings WHERE work_id = ?")
            .bind(work_id)
            .fetch_optional(pool)
            .await?;
    if let Some(recording_id) = default_recording {
        if has_file(pool, recording_id).await? {
            return Ok(Some(recording_id));
        }
    }

    let any: Option<i64> = sqlx::query_scalar(
        "SELECT r.id FROM recordings r JOIN library_files f ON f.recording_id = r.id \
         WHERE r.work_id = ? ORDER BY r.id ASC LIMIT 1",
    )
    .bind(work_id)
    .fetch_optional(pool)
    .await?;
    Ok(any)
}

type CacheKey = (i64, Option<i64>, Option<String>);

/// Short-TTL cache keyed by `(work_id, station_id, format_code)`,
/// invalidated wholesale on any file or preference write (§4.8).
pub struct ResolverCache {
    ttl: Duration,
    entries: Mutex<HashMap<CacheKey, (Instant, Option<i64>)>>,
}

impl ResolverCache {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, entries: Mutex::new(HashMap::new()) }
    }

    pub async fn resolve(
        &self,
        pool: &SqlitePool,
        work_id: i64,
        station_id: Option<i64>,
        format_code: Option<&str>,
    ) -> Result<Option<i64>> {
        let key = (work_id, station_id, format_code.map(|s| s.to_string()));
        if let Some((inserted_at, value)) = self.entries.lock().unwrap().get(&key) {
            if inserted_at.elapsed() < self.ttl {
                return Ok(*value);
            }
        }

        let value = resolve_uncached(pool, work_id, station_id, format_code).await?;
        self.entries.lock().unwrap().insert(key, (Instant::now(), value));
        Ok(value)
    }

    pub fn invalidate_all(&self) {
        self.entries.lock().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        library::schema::sync_all(&pool).await.unwrap();
        sync_schema(&pool).await.unwrap();
        pool
    }

    async fn make_work_with_recording(pool: &SqlitePool, has_file: bool) -> (i64, i64) {
        let artist = library::upsert_artist(pool, "Artist").await.unwrap();
        let work = library::upsert_work(pool, "song", artist.id, 0.85, 500).await.unwrap();
        let recording = library::upsert_recording(pool, work.id, "song", "Original", None, None).await.unwrap();
        if has_file {
            library::upsert_file(pool, recording.id, "/music/a.flac", "hash", 1, "2024-01-01").await.unwrap();
        }
        (work.id, recording.id)
    }

    #[tokio::test]
    async fn falls_back_to_any_recording_with_file() {
        let pool = test_pool().await;
        let (work_id, recording_id) = make_work_with_recording(&pool, true).await;
        let resolved = resolve_uncached(&pool, work_id, None, None).await.unwrap();
        assert_eq!(resolved, Some(recording_id));
    }

    #[tokio::test]
    async fn returns_none_when_no_recording_has_a_file() {
        let pool = test_pool().await;
        let (work_id, _recording_id) = make_work_with_recording(&pool, false).await;
        let resolved = resolve_uncached(&pool, work_id, None, None).await.unwrap();
        assert_eq!(resolved, None);
    }

    #[tokio::test]
    async fn station_preference_wins_over_default() {
        let pool = test_pool().await;
        let artist = library::upsert_artist(&pool, "Artist").await.unwrap();
        let work = library::upsert_work(&pool, "song", artist.id, 0.85, 500).await.unwrap();
        let default_rec = library::upsert_recording(&pool, work.id, "song", "Original", None, None).await.unwrap();
        library::upsert_file(&pool, default_rec.id, "/music/default.flac", "h1", 1, "2024-01-01").await.unwrap();
        let preferred_rec = library::upsert_recording(&pool, work.id, "song", "Live", None, None).await.unwrap();
        library::upsert_file(&pool, preferred_rec.id, "/music/live.flac", "h2", 1, "2024-01-01").await.unwrap();

        set_work_default_recording(&pool, work.id, default_rec.id).await.unwrap();
        set_station_preference(&pool, 1, work.id, preferred_rec.id, 0).await.unwrap();

        let resolved = resolve_uncached(&pool, work.id, Some(1), None).await.unwrap();
        assert_eq!(resolved, Some(preferred_rec.id));
    }

    #[tokio::test]
    async fn cache_returns_stale_value_within_ttl() {
        let pool = test_pool().await;
        let (work_id, recording_id) = make_work_with_recording(&pool, true).await;
        let cache = ResolverCache::new(Duration::from_secs(60));
        let first = cache.resolve(&pool, work_id, None, None).await.unwrap();
        assert_eq!(first, Some(recording_id));

        let file_id: i64 = sqlx::query_scalar("SELECT id FROM library_files WHERE recording_id = ?")
            .bind(recording_id)
            .fetch_one(&pool)
            .await
            .unwrap();
        library::delete_file(&pool, file_id).await.unwrap();
        let second = cache.resolve(&pool, work_id, None, None).await.unwrap();
        assert_eq!(second, Some(recording_id));

        cache.invalidate_all();
        let third = cache.resolve(&pool, work_id, None, None).await.unwrap();
        assert_eq!(third, None);
    }
}
