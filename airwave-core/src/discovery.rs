//! Discovery Queue (C7): aggregates unmatched/low-confidence plays by
//! signature and drives human verification (§4.7).
//!
//! Grounded on `wkmp-ai`'s upsert-with-`ON CONFLICT` style for the queue
//! row, and on `bridge.rs`'s audit-log pattern for undoable operator
//! actions.

use crate::bridge::{self, AuditEntry};
use airwave_common::db::schema_sync::{ColumnDefinition, SchemaSync, TableSchema};
use airwave_common::{Error, Result};
use chrono::{Duration, Utc};
use serde_json::json;
use sqlx::{Row, SqlitePool};

pub struct DiscoveryQueueTableSchema;

impl TableSchema for DiscoveryQueueTableSchema {
    fn table_name() -> &'static str {
        "discovery_queue"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("signature", "TEXT").primary_key(),
            ColumnDefinition::new("raw_artist", "TEXT").not_null(),
            ColumnDefinition::new("raw_title", "TEXT").not_null(),
            ColumnDefinition::new("count", "INTEGER").not_null().default("1"),
            ColumnDefinition::new("suggested_work_id", "INTEGER"),
            ColumnDefinition::new("best_scores", "TEXT"),
            ColumnDefinition::new("cooldown_until", "TEXT"),
        ]
    }

    fn validate_schema(_pool: &SqlitePool) -> Result<()> {
        Ok(())
    }
}

pub async fn sync_schema(pool: &SqlitePool) -> Result<()> {
    SchemaSync::sync_table::<DiscoveryQueueTableSchema>(pool).await
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueueItem {
    pub signature: String,
    pub raw_artist: String,
    pub raw_title: String,
    pub count: i64,
    pub suggested_work_id: Option<i64>,
    pub best_scores: Option<(f64, f64)>,
    pub cooldown_until: Option<String>,
}

fn parse_scores(raw: Option<String>) -> Option<(f64, f64)> {
    let raw = raw?;
    let v: serde_json::Value = serde_json::from_str(&raw).ok()?;
    Some((v.get("artist_sim")?.as_f64()?, v.get("title_sim")?.as_f64()?))
}

fn row_to_item(row: sqlx::sqlite::SqliteRow) -> QueueItem {
    QueueItem {
        signature: row.get("signature"),
        raw_artist: row.get("raw_artist"),
        raw_title: row.get("raw_title"),
        count: row.get("count"),
        suggested_work_id: row.get("suggested_work_id"),
        best_scores: parse_scores(row.get("best_scores")),
        cooldown_until: row.get("cooldown_until"),
    }
}

/// Upsert the queue keyed by `signature` on ingestion of a new
/// `review`/`reject` match (§4.7): bump `count`, and refresh the
/// suggestion only if strictly better than the one on file. A no-op while
/// the item is within its skip cool-down.
pub async fn upsert_on_unmatched(
    pool: &SqlitePool,
    signature: &str,
    raw_artist: &str,
    raw_title: &str,
    suggested_work_id: Option<i64>,
    scores: Option<(f64, f64)>,
) -> Result<()> {
    let existing = sqlx::query(
        "SELECT signature, raw_artist, raw_title, count, suggested_work_id, best_scores, cooldown_until \
         FROM discovery_queue WHERE signature = ?",
    )
    .bind(signature)
    .fetch_optional(pool)
    .await?
    .map(row_to_item);

    if let Some(item) = &existing {
        if let Some(cooldown) = &item.cooldown_until {
            if let Ok(until) = chrono::DateTime::parse_from_rfc3339(cooldown) {
                if Utc::now() < until {
                    return Ok(());
                }
            }
        }
    }

    let new_min = scores.map(|(a, t)| a.min(t));
    let should_refresh = match (&existing, new_min) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(item), Some(new_min)) => {
            let current_min = item.best_scores.map(|(a, t)| a.min(t)).unwrap_or(f64::MIN);
            new_min > current_min
        }
    };

    let count = existing.as_ref().map(|i| i.count + 1).unwrap_or(1);
    let best_scores_json = if should_refresh {
        scores.map(|(a, t)| json!({"artist_sim": a, "title_sim": t}).to_string())
    } else {
        existing.as_ref().and_then(|i| i.best_scores.map(|(a, t)| json!({"artist_sim": a, "title_sim": t}).to_string()))
    };
    let suggested = if should_refresh { suggested_work_id } else { existing.as_ref().and_then(|i| i.suggested_work_id) };

    sqlx::query(
        "INSERT INTO discovery_queue (signature, raw_artist, raw_title, count, suggested_work_id, best_scores, cooldown_until) \
         VALUES (?, ?, ?, ?, ?, ?, NULL) \
         ON CONFLICT(signature) DO UPDATE SET \
           count = ?, suggested_work_id = ?, best_scores = ?, cooldown_until = NULL",
    )
    .bind(signature)
    .bind(raw_artist)
    .bind(raw_title)
    .bind(count)
    .bind(suggested)
    .bind(&best_scores_json)
    .bind(count)
    .bind(suggested)
    .bind(&best_scores_json)
    .execute(pool)
    .await?;

    Ok(())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueFilter {
    All,
    Matched,
    Unmatched,
}

/// List the song-matching discovery queue (always unmatched by
/// construction; `filter` narrows on whether a suggestion exists).
pub async fn queue_list(pool: &SqlitePool, filter: QueueFilter, limit: i64, offset: i64) -> Result<Vec<QueueItem>> {
    let sql = match filter {
        QueueFilter::All => {
            "SELECT signature, raw_artist, raw_title, count, suggested_work_id, best_scores, cooldown_until \
             FROM discovery_queue ORDER BY count DESC LIMIT ? OFFSET ?"
        }
        QueueFilter::Matched => {
            "SELECT signature, raw_artist, raw_title, count, suggested_work_id, best_scores, cooldown_until \
             FROM discovery_queue WHERE suggested_work_id IS NOT NULL ORDER BY count DESC LIMIT ? OFFSET ?"
        }
        QueueFilter::Unmatched => {
            "SELECT signature, raw_artist, raw_title, count, suggested_work_id, best_scores, cooldown_until \
             FROM discovery_queue WHERE suggested_work_id IS NULL ORDER BY count DESC LIMIT ? OFFSET ?"
        }
    };
    let rows = sqlx::query(sql).bind(limit).bind(offset).fetch_all(pool).await?;
    Ok(rows.into_iter().map(row_to_item).collect())
}

/// The artist-linking queue (§4.7, decoupled from song matching): raw
/// artist strings across all BroadcastLogs, filtered by whether the log
/// itself carries a resolved `work_id`.
pub async fn list_artist_candidates(
    pool: &SqlitePool,
    filter: QueueFilter,
    limit: i64,
    offset: i64,
) -> Result<Vec<(String, i64)>> {
    let where_clause = match filter {
        QueueFilter::All => "",
        QueueFilter::Matched => "WHERE work_id IS NOT NULL",
        QueueFilter::Unmatched => "WHERE work_id IS NULL",
    };
    let sql = format!(
        "SELECT raw_artist, COUNT(*) AS n FROM broadcast_logs {where_clause} \
         GROUP BY raw_artist ORDER BY n DESC LIMIT ? OFFSET ?"
    );
    let rows = sqlx::query(&sql).bind(limit).bind(offset).fetch_all(pool).await?;
    Ok(rows.into_iter().map(|row| (row.get("raw_artist"), row.get("n"))).collect())
}

/// Mark a queue item with a cool-down; it will not resurface for new
/// plays until the cool-down expires.
pub async fn skip(pool: &SqlitePool, signature: &str, cooldown: Duration) -> Result<AuditEntry> {
    let until = (Utc::now() + cooldown).to_rfc3339();
    let result = sqlx::query("UPDATE discovery_queue SET cooldown_until = ? WHERE signature = ?")
        .bind(&until)
        .bind(signature)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("discovery queue item for signature '{signature}'")));
    }

    let row = sqlx::query(
        "INSERT INTO audit_log (created_at, action, signature, payload, undone) VALUES (?, 'skip', ?, ?, 0) RETURNING id",
    )
    .bind(Utc::now().to_rfc3339())
    .bind(signature)
    .bind(json!({"cooldown_until": until}).to_string())
    .fetch_one(pool)
    .await?;

    Ok(AuditEntry {
        id: row.get("id"),
        created_at: Utc::now().to_rfc3339(),
        action: "skip".to_string(),
        signature: Some(signature.to_string()),
        payload: json!({"cooldown_until": until}),
        undone: false,
    })
}

/// Insert/update an ArtistAlias. The caller (Job Controller) is
/// responsible for scheduling the rematch job this action implies (§4.7,
/// §4.9) — this function only records the alias and its audit entry.
pub async fn alias(pool: &SqlitePool, raw_name: &str, resolved_name: &str) -> Result<AuditEntry> {
    let prior: Option<(String, i64)> =
        sqlx::query_as("SELECT resolved_name, is_verified FROM artist_aliases WHERE raw_name = ?")
            .bind(raw_name)
            .fetch_optional(pool)
            .await?;

    sqlx::query(
        "INSERT INTO artist_aliases (raw_name, resolved_name, is_verified) VALUES (?, ?, 1) \
         ON CONFLICT(raw_name) DO UPDATE SET resolved_name = excluded.resolved_name, is_verified = 1",
    )
    .bind(raw_name)
    .bind(resolved_name)
    .execute(pool)
    .await?;

    let payload = json!({
        "raw_name": raw_name,
        "resolved_name": resolved_name,
        "prior_resolved_name": prior.as_ref().map(|(r, _)| r.clone()),
    });

    let row = sqlx::query(
        "INSERT INTO audit_log (created_at, action, signature, payload, undone) VALUES (?, 'alias', NULL, ?, 0) RETURNING id",
    )
    .bind(Utc::now().to_rfc3339())
    .bind(payload.to_string())
    .fetch_one(pool)
    .await?;

    Ok(AuditEntry {
        id: row.get("id"),
        created_at: Utc::now().to_rfc3339(),
        action: "alias".to_string(),
        signature: None,
        payload,
        undone: false,
    })
}

/// Look up the resolved form of a raw artist name, if an alias exists.
pub async fn resolve_alias(pool: &SqlitePool, raw_name: &str) -> Result<Option<String>> {
    Ok(sqlx::query_scalar("SELECT resolved_name FROM artist_aliases WHERE raw_name = ?")
        .bind(raw_name)
        .fetch_optional(pool)
        .await?)
}

/// Apply `link` to every `(signature, work_id)` pair in one audited
/// operation.
pub async fn bulk_link(
    pool: &SqlitePool,
    pairs: &[(String, String, String, i64)],
) -> Result<AuditEntry> {
    let mut child_ids = Vec::with_capacity(pairs.len());
    for (signature, reference_artist, reference_title, work_id) in pairs {
        let entry = bridge::link(pool, signature, reference_artist, reference_title, *work_id, 1.0).await?;
        child_ids.push(entry.id);
    }

    let payload = json!({"child_audit_ids": child_ids});
    let row = sqlx::query(
        "INSERT INTO audit_log (created_at, action, signature, payload, undone) VALUES (?, 'bulk_link', NULL, ?, 0) RETURNING id",
    )
    .bind(Utc::now().to_rfc3339())
    .bind(payload.to_string())
    .fetch_one(pool)
    .await?;

    Ok(AuditEntry {
        id: row.get("id"),
        created_at: Utc::now().to_rfc3339(),
        action: "bulk_link".to_string(),
        signature: None,
        payload,
        undone: false,
    })
}

/// Undo any audit entry, including composite `bulk_link` entries (which
/// fan out to undoing each child `link`).
pub async fn undo(pool: &SqlitePool, audit_id: i64) -> Result<()> {
    let row = sqlx::query("SELECT action, payload, undone FROM audit_log WHERE id = ?")
        .bind(audit_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("audit entry {audit_id}")))?;

    if row.get::<i64, _>("undone") != 0 {
        return Err(Error::InvalidInput(format!("audit entry {audit_id} already undone")));
    }

    let action: String = row.get("action");
    if action == "bulk_link" {
        let payload: serde_json::Value = serde_json::from_str(&row.get::<String, _>("payload"))
            .map_err(|e| Error::Internal(format!("corrupt audit payload: {e}")))?;
        if let Some(ids) = payload.get("child_audit_ids").and_then(|v| v.as_array()) {
            for id in ids {
                if let Some(id) = id.as_i64() {
                    bridge::undo(pool, id).await?;
                }
            }
        }
        sqlx::query("UPDATE audit_log SET undone = 1 WHERE id = ?").bind(audit_id).execute(pool).await?;
        Ok(())
    } else {
        bridge::undo(pool, audit_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        library::schema::sync_all(&pool).await.unwrap();
        bridge::sync_schema(&pool).await.unwrap();
        sync_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn upsert_on_unmatched_increments_count_and_refreshes_best() {
        let pool = test_pool().await;
        upsert_on_unmatched(&pool, "sig1", "Artist", "Title", Some(1), Some((0.5, 0.5))).await.unwrap();
        upsert_on_unmatched(&pool, "sig1", "Artist", "Title", Some(2), Some((0.8, 0.8))).await.unwrap();
        upsert_on_unmatched(&pool, "sig1", "Artist", "Title", Some(3), Some((0.1, 0.1))).await.unwrap();

        let items = queue_list(&pool, QueueFilter::All, 10, 0).await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].count, 3);
        assert_eq!(items[0].suggested_work_id, Some(2));
    }

    #[tokio::test]
    async fn skip_suppresses_resurfacing_until_cooldown() {
        let pool = test_pool().await;
        upsert_on_unmatched(&pool, "sig1", "Artist", "Title", None, None).await.unwrap();
        skip(&pool, "sig1", Duration::hours(1)).await.unwrap();
        upsert_on_unmatched(&pool, "sig1", "Artist", "Title", None, None).await.unwrap();

        let items = queue_list(&pool, QueueFilter::All, 10, 0).await.unwrap();
        assert_eq!(items[0].count, 1);
    }

    #[tokio::test]
    async fn bulk_link_applies_all_and_undo_reverses_all() {
        let pool = test_pool().await;
        let artist = library::upsert_artist(&pool, "Artist").await.unwrap();
        let work_a = library::upsert_work(&pool, "song a", artist.id, 0.85, 500).await.unwrap();
        let work_b = library::upsert_work(&pool, "song b", artist.id, 0.85, 500).await.unwrap();

        let entry = bulk_link(
            &pool,
            &[
                ("sig-a".to_string(), "Artist".to_string(), "Song A".to_string(), work_a.id),
                ("sig-b".to_string(), "Artist".to_string(), "Song B".to_string(), work_b.id),
            ],
        )
        .await
        .unwrap();

        assert!(bridge::lookup_active(&pool, "sig-a").await.unwrap().is_some());
        assert!(bridge::lookup_active(&pool, "sig-b").await.unwrap().is_some());

        undo(&pool, entry.id).await.unwrap();

        assert!(bridge::lookup_active(&pool, "sig-a").await.unwrap().is_none());
        assert!(bridge::lookup_active(&pool, "sig-b").await.unwrap().is_none());
    }
}
