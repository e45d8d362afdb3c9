//! Library KB (C2): persists artists/works/recordings/files, enforces
//! invariants, supplies exact and fuzzy work lookup.
//!
//! Grounded on `wkmp-ai`'s `db/artists.rs`/`db/works.rs` upsert style
//! (insert, fall back to a re-select on conflict) and its centralized
//! `db/schema.rs` sync-at-startup pattern.

pub mod schema;

use crate::normalize::{clean_artist, parts_differ};
use airwave_common::{Error, Result};
use chrono::Utc;
use sqlx::{FromRow, Row, SqlitePool};

fn now_iso() -> String {
    Utc::now().to_rfc3339()
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Artist {
    pub id: i64,
    pub name: String,
    pub display_name: Option<String>,
    pub external_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Work {
    pub id: i64,
    pub title: String,
    pub primary_artist_id: i64,
    pub is_instrumental: bool,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Recording {
    pub id: i64,
    pub work_id: i64,
    pub title: String,
    pub version_type: String,
    pub duration_ms: Option<i64>,
    pub external_id: Option<String>,
    pub is_verified: bool,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct LibraryFile {
    pub id: i64,
    pub recording_id: i64,
    pub path: String,
    pub content_hash: String,
    pub size: i64,
    pub mtime: String,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct Station {
    pub id: i64,
    pub name: String,
    pub format_code: Option<String>,
}

#[derive(Debug, Clone, PartialEq, FromRow)]
pub struct BroadcastLog {
    pub id: i64,
    pub station_id: i64,
    pub played_at: String,
    pub raw_artist: String,
    pub raw_title: String,
    pub signature: String,
    pub work_id: Option<i64>,
    pub match_reason: Option<String>,
}

/// Longest-common-subsequence-based similarity ratio in `[0, 1]`, used by
/// `upsert_work`'s fuzzy grouping step (the matcher's own string-ratio
/// scoring uses `strsim::normalized_levenshtein` instead, per §4.5).
pub fn lcs_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() && b.is_empty() {
        return 1.0;
    }
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }
    let mut dp = vec![vec![0u32; b.len() + 1]; a.len() + 1];
    for i in 1..=a.len() {
        for j in 1..=b.len() {
            dp[i][j] = if a[i - 1] == b[j - 1] {
                dp[i - 1][j - 1] + 1
            } else {
                dp[i - 1][j].max(dp[i][j - 1])
            };
        }
    }
    let lcs_len = dp[a.len()][b.len()] as f64;
    (2.0 * lcs_len) / (a.len() + b.len()) as f64
}

// ---------------------------------------------------------------------------
// Artist
// ---------------------------------------------------------------------------

async fn find_artist_by_name(pool: &SqlitePool, name: &str) -> Result<Option<Artist>> {
    Ok(
        sqlx::query_as::<_, Artist>("SELECT id, name, display_name, external_id FROM artists WHERE name = ?")
            .bind(name)
            .fetch_optional(pool)
            .await?,
    )
}

/// All artists, used by the Matcher (§4.5 strategy 3) to score every
/// candidate artist against a query's normalized artist once per batch.
pub async fn list_all_artists(pool: &SqlitePool) -> Result<Vec<Artist>> {
    Ok(sqlx::query_as::<_, Artist>("SELECT id, name, display_name, external_id FROM artists").fetch_all(pool).await?)
}

/// Every `(Recording, Work)` whose Work's primary artist is `artist_id`,
/// for the Matcher's per-artist candidate scan.
pub async fn list_recordings_for_artist(pool: &SqlitePool, artist_id: i64) -> Result<Vec<(Recording, Work)>> {
    let rows = sqlx::query(
        "SELECT r.id AS r_id, r.work_id AS r_work_id, r.title AS r_title, r.version_type AS r_version_type, \
                r.duration_ms AS r_duration_ms, r.external_id AS r_external_id, r.is_verified AS r_is_verified, \
                w.id AS w_id, w.title AS w_title, w.primary_artist_id AS w_primary_artist_id, \
                w.is_instrumental AS w_is_instrumental \
         FROM recordings r JOIN works w ON w.id = r.work_id WHERE w.primary_artist_id = ?",
    )
    .bind(artist_id)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(|row| {
            (
                Recording {
                    id: row.get("r_id"),
                    work_id: row.get("r_work_id"),
                    title: row.get("r_title"),
                    version_type: row.get("r_version_type"),
                    duration_ms: row.get("r_duration_ms"),
                    external_id: row.get("r_external_id"),
                    is_verified: row.get::<i64, _>("r_is_verified") != 0,
                },
                Work {
                    id: row.get("w_id"),
                    title: row.get("w_title"),
                    primary_artist_id: row.get("w_primary_artist_id"),
                    is_instrumental: row.get::<i64, _>("w_is_instrumental") != 0,
                },
            )
        })
        .collect())
}

pub async fn get_artist(pool: &SqlitePool, id: i64) -> Result<Artist> {
    sqlx::query_as::<_, Artist>("SELECT id, name, display_name, external_id FROM artists WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("artist {id}")))
}

/// Exact-match by normalized name; create if absent. Races are resolved by
/// a unique-key retry: on insert conflict, re-select.
pub async fn upsert_artist(pool: &SqlitePool, raw_name: &str) -> Result<Artist> {
    let name = clean_artist(raw_name);
    if let Some(existing) = find_artist_by_name(pool, &name).await? {
        return Ok(existing);
    }
    let inserted = sqlx::query("INSERT INTO artists (name, created_at) VALUES (?, ?)")
        .bind(&name)
        .bind(now_iso())
        .execute(pool)
        .await;
    match inserted {
        Ok(result) => Ok(Artist {
            id: result.last_insert_rowid(),
            name,
            display_name: None,
            external_id: None,
        }),
        Err(_) => find_artist_by_name(pool, &name)
            .await?
            .ok_or_else(|| Error::Internal(format!("artist upsert race unresolved for '{name}'"))),
    }
}

/// Retarget `Work.artist_id` and `WorkArtist.artist_id` from `source` to
/// `target`, dropping duplicate associations, then delete the source
/// Artist. Single transaction.
pub async fn merge_artists(pool: &SqlitePool, source_id: i64, target_id: i64) -> Result<()> {
    if source_id == target_id {
        return Err(Error::InvalidInput("cannot merge an artist into itself".to_string()));
    }
    let mut tx = pool.begin().await?;

    sqlx::query("UPDATE works SET primary_artist_id = ? WHERE primary_artist_id = ?")
        .bind(target_id)
        .bind(source_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        "DELETE FROM work_artists \
         WHERE artist_id = ? AND work_id IN (SELECT work_id FROM work_artists WHERE artist_id = ?)",
    )
    .bind(source_id)
    .bind(target_id)
    .execute(&mut *tx)
    .await?;

    sqlx::query("UPDATE work_artists SET artist_id = ? WHERE artist_id = ?")
        .bind(target_id)
        .bind(source_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query("DELETE FROM artists WHERE id = ?").bind(source_id).execute(&mut *tx).await?;

    tx.commit().await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Work
// ---------------------------------------------------------------------------

async fn find_work_exact(pool: &SqlitePool, title: &str, artist_id: i64) -> Result<Option<Work>> {
    Ok(sqlx::query_as::<_, Work>(
        "SELECT id, title, primary_artist_id, is_instrumental FROM works WHERE title = ? AND primary_artist_id = ?",
    )
    .bind(title)
    .bind(artist_id)
    .fetch_optional(pool)
    .await?)
}

pub async fn get_work(pool: &SqlitePool, id: i64) -> Result<Work> {
    sqlx::query_as::<_, Work>("SELECT id, title, primary_artist_id, is_instrumental FROM works WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("work {id}")))
}

async fn count_works_for_artist(pool: &SqlitePool, artist_id: i64) -> Result<usize> {
    let row = sqlx::query("SELECT COUNT(*) AS n FROM works WHERE primary_artist_id = ?")
        .bind(artist_id)
        .fetch_one(pool)
        .await?;
    Ok(row.get::<i64, _>("n") as usize)
}

async fn list_works_for_artist(pool: &SqlitePool, artist_id: i64) -> Result<Vec<Work>> {
    Ok(sqlx::query_as::<_, Work>(
        "SELECT id, title, primary_artist_id, is_instrumental FROM works WHERE primary_artist_id = ?",
    )
    .bind(artist_id)
    .fetch_all(pool)
    .await?)
}

/// Find-or-create a Work for `(title, artist_id)`.
///
/// 1. Exact match on `(title, artist_id)`, additionally requiring
///    `¬parts_differ` against the stored title.
/// 2. If the artist has at most `max_fuzzy_works` works, fuzzy-match by
///    LCS ratio, early-terminating above 0.95 and accepting the best
///    match at or above `fuzzy_threshold` (again gated by `¬parts_differ`).
/// 3. Otherwise insert a new Work, re-selecting on a unique-key race.
///
/// `title` must already be the normalized work title (the caller — the
/// Scanner — runs `extract_version` first and passes only the
/// version-stripped title here).
pub async fn upsert_work(
    pool: &SqlitePool,
    title: &str,
    artist_id: i64,
    fuzzy_threshold: f64,
    max_fuzzy_works: usize,
) -> Result<Work> {
    if let Some(existing) = find_work_exact(pool, title, artist_id).await? {
        if !parts_differ(title, &existing.title) {
            return Ok(existing);
        }
    }

    let work_count = count_works_for_artist(pool, artist_id).await?;
    if work_count <= max_fuzzy_works {
        let candidates = list_works_for_artist(pool, artist_id).await?;
        let mut best: Option<(Work, f64)> = None;
        for candidate in candidates {
            if parts_differ(title, &candidate.title) {
                continue;
            }
            let ratio = lcs_ratio(title, &candidate.title);
            if ratio > 0.95 {
                return Ok(candidate);
            }
            if ratio >= fuzzy_threshold && best.as_ref().is_none_or(|(_, b)| ratio > *b) {
                best = Some((candidate, ratio));
            }
        }
        if let Some((work, _)) = best {
            return Ok(work);
        }
    }

    let inserted = sqlx::query(
        "INSERT INTO works (title, primary_artist_id, is_instrumental, created_at) VALUES (?, ?, 0, ?)",
    )
    .bind(title)
    .bind(artist_id)
    .bind(now_iso())
    .execute(pool)
    .await;

    match inserted {
        Ok(result) => Ok(Work {
            id: result.last_insert_rowid(),
            title: title.to_string(),
            primary_artist_id: artist_id,
            is_instrumental: false,
        }),
        Err(_) => find_work_exact(pool, title, artist_id)
            .await?
            .ok_or_else(|| Error::Internal(format!("work upsert race unresolved for '{title}'"))),
    }
}

/// `split_artists` the raw artist string, then upsert and associate each
/// secondary artist (everything after the primary) via `WorkArtist`,
/// preserving the raw string's split order.
pub async fn link_multi_artists(pool: &SqlitePool, work_id: i64, raw_artist_string: &str) -> Result<()> {
    let names = crate::normalize::split_artists(raw_artist_string);
    for (position, name) in names.iter().enumerate().skip(1) {
        let artist = upsert_artist(pool, name).await?;
        sqlx::query(
            "INSERT INTO work_artists (work_id, artist_id, position) VALUES (?, ?, ?) \
             ON CONFLICT(work_id, artist_id) DO UPDATE SET position = excluded.position",
        )
        .bind(work_id)
        .bind(artist.id)
        .bind(position as i64)
        .execute(pool)
        .await?;
    }
    Ok(())
}

/// Retarget Recordings and BroadcastLogs from `source` to `target`, then
/// delete the source Work. Single transaction.
pub async fn merge_works(pool: &SqlitePool, source_id: i64, target_id: i64) -> Result<()> {
    if source_id == target_id {
        return Err(Error::InvalidInput("cannot merge a work into itself".to_string()));
    }
    let mut tx = pool.begin().await?;

    sqlx::query("UPDATE recordings SET work_id = ? WHERE work_id = ?")
        .bind(target_id)
        .bind(source_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query("UPDATE broadcast_logs SET work_id = ? WHERE work_id = ?")
        .bind(target_id)
        .bind(source_id)
        .execute(&mut *tx)
        .await?;

    sqlx::query("DELETE FROM works WHERE id = ?").bind(source_id).execute(&mut *tx).await?;

    tx.commit().await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Recording
// ---------------------------------------------------------------------------

/// Find-or-update a Recording; unique on `(work_id, title, version_type)`.
pub async fn upsert_recording(
    pool: &SqlitePool,
    work_id: i64,
    title: &str,
    version_type: &str,
    duration_ms: Option<i64>,
    external_id: Option<&str>,
) -> Result<Recording> {
    let row = sqlx::query(
        "INSERT INTO recordings (work_id, title, version_type, duration_ms, external_id, is_verified, created_at) \
         VALUES (?, ?, ?, ?, ?, 0, ?) \
         ON CONFLICT(work_id, title, version_type) DO UPDATE SET \
           duration_ms = COALESCE(excluded.duration_ms, recordings.duration_ms), \
           external_id = COALESCE(excluded.external_id, recordings.external_id) \
         RETURNING id, work_id, title, version_type, duration_ms, external_id, is_verified",
    )
    .bind(work_id)
    .bind(title)
    .bind(version_type)
    .bind(duration_ms)
    .bind(external_id)
    .bind(now_iso())
    .fetch_one(pool)
    .await?;

    Ok(Recording {
        id: row.get("id"),
        work_id: row.get("work_id"),
        title: row.get("title"),
        version_type: row.get("version_type"),
        duration_ms: row.get("duration_ms"),
        external_id: row.get("external_id"),
        is_verified: row.get::<i64, _>("is_verified") != 0,
    })
}

pub async fn get_recording(pool: &SqlitePool, id: i64) -> Result<Recording> {
    sqlx::query_as::<_, Recording>(
        "SELECT id, work_id, title, version_type, duration_ms, external_id, is_verified FROM recordings WHERE id = ?",
    )
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| Error::NotFound(format!("recording {id}")))
}

pub async fn set_recording_verified(pool: &SqlitePool, recording_id: i64, verified: bool) -> Result<()> {
    sqlx::query("UPDATE recordings SET is_verified = ? WHERE id = ?")
        .bind(verified)
        .bind(recording_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Exact match for the Matcher's strategy 2: `(normalized_artist,
/// normalized_title)` joined Artist → Work → Recording, preferring
/// `version_type = 'Original'` and `is_verified`.
pub async fn find_recording_exact(
    pool: &SqlitePool,
    normalized_artist: &str,
    normalized_title: &str,
) -> Result<Option<(Recording, Work)>> {
    let row = sqlx::query(
        "SELECT r.id AS r_id, r.work_id AS r_work_id, r.title AS r_title, r.version_type AS r_version_type, \
                r.duration_ms AS r_duration_ms, r.external_id AS r_external_id, r.is_verified AS r_is_verified, \
                w.id AS w_id, w.title AS w_title, w.primary_artist_id AS w_primary_artist_id, \
                w.is_instrumental AS w_is_instrumental \
         FROM recordings r \
         JOIN works w ON w.id = r.work_id \
         JOIN artists a ON a.id = w.primary_artist_id \
         WHERE a.name = ? AND w.title = ? \
         ORDER BY (r.version_type = 'Original') DESC, r.is_verified DESC, r.id ASC \
         LIMIT 1",
    )
    .bind(normalized_artist)
    .bind(normalized_title)
    .fetch_optional(pool)
    .await?;

    Ok(row.map(|row| {
        (
            Recording {
                id: row.get("r_id"),
                work_id: row.get("r_work_id"),
                title: row.get("r_title"),
                version_type: row.get("r_version_type"),
                duration_ms: row.get("r_duration_ms"),
                external_id: row.get("r_external_id"),
                is_verified: row.get::<i64, _>("r_is_verified") != 0,
            },
            Work {
                id: row.get("w_id"),
                title: row.get("w_title"),
                primary_artist_id: row.get("w_primary_artist_id"),
                is_instrumental: row.get::<i64, _>("w_is_instrumental") != 0,
            },
        )
    }))
}

// ---------------------------------------------------------------------------
// LibraryFile
// ---------------------------------------------------------------------------

/// Find-or-update a LibraryFile; unique on `path`.
pub async fn upsert_file(
    pool: &SqlitePool,
    recording_id: i64,
    path: &str,
    content_hash: &str,
    size: i64,
    mtime: &str,
) -> Result<LibraryFile> {
    let row = sqlx::query(
        "INSERT INTO library_files (recording_id, path, content_hash, size, mtime, created_at) \
         VALUES (?, ?, ?, ?, ?, ?) \
         ON CONFLICT(path) DO UPDATE SET \
           content_hash = excluded.content_hash, size = excluded.size, mtime = excluded.mtime \
         RETURNING id, recording_id, path, content_hash, size, mtime",
    )
    .bind(recording_id)
    .bind(path)
    .bind(content_hash)
    .bind(size)
    .bind(mtime)
    .bind(now_iso())
    .fetch_one(pool)
    .await?;

    Ok(LibraryFile {
        id: row.get("id"),
        recording_id: row.get("recording_id"),
        path: row.get("path"),
        content_hash: row.get("content_hash"),
        size: row.get("size"),
        mtime: row.get("mtime"),
    })
}

/// Find a file by content hash, used by the Scanner to detect moves: a
/// missing path whose hash matches an existing file is a move, not a
/// deletion plus a new file.
pub async fn find_file_by_hash(pool: &SqlitePool, content_hash: &str) -> Result<Option<LibraryFile>> {
    Ok(sqlx::query_as::<_, LibraryFile>(
        "SELECT id, recording_id, path, content_hash, size, mtime FROM library_files WHERE content_hash = ? LIMIT 1",
    )
    .bind(content_hash)
    .fetch_optional(pool)
    .await?)
}

pub async fn move_file(pool: &SqlitePool, file_id: i64, new_path: &str, mtime: &str) -> Result<()> {
    sqlx::query("UPDATE library_files SET path = ?, mtime = ? WHERE id = ?")
        .bind(new_path)
        .bind(mtime)
        .bind(file_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn delete_file(pool: &SqlitePool, file_id: i64) -> Result<()> {
    sqlx::query("DELETE FROM library_files WHERE id = ?").bind(file_id).execute(pool).await?;
    Ok(())
}

pub async fn list_all_paths(pool: &SqlitePool) -> Result<Vec<(i64, String, String)>> {
    let rows = sqlx::query("SELECT id, path, content_hash FROM library_files")
        .fetch_all(pool)
        .await?;
    Ok(rows.into_iter().map(|r| (r.get("id"), r.get("path"), r.get("content_hash"))).collect())
}

// ---------------------------------------------------------------------------
// Station / BroadcastLog
// ---------------------------------------------------------------------------

pub async fn get_station(pool: &SqlitePool, id: i64) -> Result<Station> {
    sqlx::query_as::<_, Station>("SELECT id, name, format_code FROM stations WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("station {id}")))
}

pub async fn upsert_station(pool: &SqlitePool, name: &str, format_code: Option<&str>) -> Result<Station> {
    let row = sqlx::query(
        "INSERT INTO stations (name, format_code) VALUES (?, ?) \
         ON CONFLICT(name) DO UPDATE SET format_code = COALESCE(excluded.format_code, stations.format_code) \
         RETURNING id, name, format_code",
    )
    .bind(name)
    .bind(format_code)
    .fetch_one(pool)
    .await?;
    Ok(Station { id: row.get("id"), name: row.get("name"), format_code: row.get("format_code") })
}

/// Insert a new, unresolved BroadcastLog row (`work_id` NULL).
pub async fn insert_broadcast_log(
    pool: &SqlitePool,
    station_id: i64,
    played_at: &str,
    raw_artist: &str,
    raw_title: &str,
    signature: &str,
) -> Result<BroadcastLog> {
    let row = sqlx::query(
        "INSERT INTO broadcast_logs (station_id, played_at, raw_artist, raw_title, signature) \
         VALUES (?, ?, ?, ?, ?) \
         RETURNING id, station_id, played_at, raw_artist, raw_title, signature, work_id, match_reason",
    )
    .bind(station_id)
    .bind(played_at)
    .bind(raw_artist)
    .bind(raw_title)
    .bind(signature)
    .fetch_one(pool)
    .await?;

    Ok(BroadcastLog {
        id: row.get("id"),
        station_id: row.get("station_id"),
        played_at: row.get("played_at"),
        raw_artist: row.get("raw_artist"),
        raw_title: row.get("raw_title"),
        signature: row.get("signature"),
        work_id: row.get("work_id"),
        match_reason: row.get("match_reason"),
    })
}

/// Set `work_id`/`match_reason` on a BroadcastLog. NULL → set exactly
/// once: a second setter for the same log is a no-op when it agrees and a
/// rejected write when it disagrees.
pub async fn set_broadcast_log_work(
    pool: &SqlitePool,
    log_id: i64,
    work_id: i64,
    match_reason: &str,
) -> Result<()> {
    let existing: Option<Option<i64>> = sqlx::query_scalar("SELECT work_id FROM broadcast_logs WHERE id = ?")
        .bind(log_id)
        .fetch_optional(pool)
        .await?;

    match existing.flatten() {
        None => {
            sqlx::query("UPDATE broadcast_logs SET work_id = ?, match_reason = ? WHERE id = ? AND work_id IS NULL")
                .bind(work_id)
                .bind(match_reason)
                .bind(log_id)
                .execute(pool)
                .await?;
            Ok(())
        }
        Some(current) if current == work_id => Ok(()),
        Some(current) => Err(Error::InvalidInput(format!(
            "broadcast log {log_id} already resolved to work {current}, rejecting write of work {work_id}"
        ))),
    }
}

/// Back-fill all unresolved BroadcastLogs sharing `signature`, used by the
/// Identity Bridge (§4.6) after a verified link.
pub async fn backfill_broadcast_logs_by_signature(
    pool: &SqlitePool,
    signature: &str,
    work_id: i64,
) -> Result<u64> {
    let result = sqlx::query(
        "UPDATE broadcast_logs SET work_id = ?, match_reason = 'identity_bridge' \
         WHERE signature = ? AND work_id IS NULL",
    )
    .bind(work_id)
    .bind(signature)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Random sample of unresolved BroadcastLogs, used by the Matching control
/// plane's `match_impact` (§6) to project per-category counts from a
/// random sample of unmatched logs without mutating anything.
pub async fn sample_unmatched_broadcast_logs(pool: &SqlitePool, limit: i64) -> Result<Vec<BroadcastLog>> {
    Ok(sqlx::query_as::<_, BroadcastLog>(
        "SELECT id, station_id, played_at, raw_artist, raw_title, signature, work_id, match_reason \
         FROM broadcast_logs WHERE work_id IS NULL ORDER BY RANDOM() LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?)
}

/// Random sample drawn from *all* BroadcastLogs regardless of resolution
/// state, used by `match_samples` (§6) so a fresh re-run of the Matcher can
/// turn up examples across every category — matched logs can still land in
/// `review`/`reject` under candidate thresholds, and only re-running against
/// the full table (not just the unmatched pool) can ever surface
/// `auto_link`/`identity_bridge` examples.
pub async fn sample_broadcast_logs(pool: &SqlitePool, limit: i64) -> Result<Vec<BroadcastLog>> {
    Ok(sqlx::query_as::<_, BroadcastLog>(
        "SELECT id, station_id, played_at, raw_artist, raw_title, signature, work_id, match_reason \
         FROM broadcast_logs ORDER BY RANDOM() LIMIT ?",
    )
    .bind(limit)
    .fetch_all(pool)
    .await?)
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        schema::sync_all(&pool).await.unwrap();
        pool
    }

    #[test]
    fn lcs_ratio_of_identical_strings_is_one() {
        assert_eq!(lcs_ratio("hello world", "hello world"), 1.0);
    }

    #[test]
    fn lcs_ratio_of_empty_strings_is_one() {
        assert_eq!(lcs_ratio("", ""), 1.0);
    }

    #[tokio::test]
    async fn upsert_artist_is_idempotent() {
        let pool = test_pool().await;
        let a = upsert_artist(&pool, "The Beatles").await.unwrap();
        let b = upsert_artist(&pool, "The Beatles").await.unwrap();
        assert_eq!(a.id, b.id);
    }

    #[tokio::test]
    async fn upsert_work_exact_match_reuses_existing() {
        let pool = test_pool().await;
        let artist = upsert_artist(&pool, "Artist").await.unwrap();
        let first = upsert_work(&pool, "song title", artist.id, 0.85, 500).await.unwrap();
        let second = upsert_work(&pool, "song title", artist.id, 0.85, 500).await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn upsert_work_fuzzy_groups_near_duplicates() {
        let pool = test_pool().await;
        let artist = upsert_artist(&pool, "Artist").await.unwrap();
        let first = upsert_work(&pool, "the long and winding road", artist.id, 0.85, 500).await.unwrap();
        let second = upsert_work(&pool, "the long and winding raod", artist.id, 0.85, 500).await.unwrap();
        assert_eq!(first.id, second.id);
    }

    #[tokio::test]
    async fn upsert_work_blocks_grouping_when_parts_differ() {
        let pool = test_pool().await;
        let artist = upsert_artist(&pool, "Artist").await.unwrap();
        let first = upsert_work(&pool, "epic part 1", artist.id, 0.85, 500).await.unwrap();
        let second = upsert_work(&pool, "epic part 2", artist.id, 0.85, 500).await.unwrap();
        assert_ne!(first.id, second.id);
    }

    #[tokio::test]
    async fn upsert_file_moves_path_on_conflict() {
        let pool = test_pool().await;
        let artist = upsert_artist(&pool, "Artist").await.unwrap();
        let work = upsert_work(&pool, "song", artist.id, 0.85, 500).await.unwrap();
        let recording = upsert_recording(&pool, work.id, "song", "Original", None, None).await.unwrap();
        let first = upsert_file(&pool, recording.id, "/music/a.flac", "hash1", 100, "2024-01-01").await.unwrap();
        let second = upsert_file(&pool, recording.id, "/music/a.flac", "hash2", 200, "2024-01-02").await.unwrap();
        assert_eq!(first.id, second.id);
        assert_eq!(second.content_hash, "hash2");
    }

    #[tokio::test]
    async fn set_broadcast_log_work_rejects_disagreeing_second_write() {
        let pool = test_pool().await;
        upsert_station(&pool, "Station", None).await.unwrap();
        let log = insert_broadcast_log(&pool, 1, "2024-01-01T00:00:00Z", "Artist", "Song", "sig1").await.unwrap();
        set_broadcast_log_work(&pool, log.id, 10, "exact").await.unwrap();
        assert!(set_broadcast_log_work(&pool, log.id, 99, "exact").await.is_err());
        set_broadcast_log_work(&pool, log.id, 10, "exact").await.unwrap();
    }

    #[tokio::test]
    async fn merge_works_retargets_recordings_and_logs() {
        let pool = test_pool().await;
        let artist = upsert_artist(&pool, "Artist").await.unwrap();
        let source = upsert_work(&pool, "song a", artist.id, 0.85, 500).await.unwrap();
        let target = upsert_work(&pool, "song b", artist.id, 0.85, 500).await.unwrap();
        let recording = upsert_recording(&pool, source.id, "song a", "Original", None, None).await.unwrap();

        merge_works(&pool, source.id, target.id).await.unwrap();

        let moved = get_recording(&pool, recording.id).await.unwrap();
        assert_eq!(moved.work_id, target.id);
        assert!(get_work(&pool, source.id).await.is_err());
    }
}
