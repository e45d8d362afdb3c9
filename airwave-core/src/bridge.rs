//! Identity Bridge (C6): the verified `signature → work_id` store, and the
//! audit log that makes every verification action undoable within a
//! retention window (§4.6, §4.7).
//!
//! Grounded on `wkmp-ai`'s `db/schema.rs` table-sync pattern for the two
//! tables here, and on its transactional upsert style (insert, fall back
//! to update within one `tx`) for `link`.

use crate::library;
use airwave_common::db::schema_sync::{ColumnDefinition, SchemaSync, TableSchema};
use airwave_common::{Error, Result};
use chrono::Utc;
use serde_json::{json, Value};
use sqlx::{Row, SqlitePool};

pub struct IdentityBridgeTableSchema;

impl TableSchema for IdentityBridgeTableSchema {
    fn table_name() -> &'static str {
        "identity_bridge"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("signature", "TEXT").primary_key(),
            ColumnDefinition::new("reference_artist", "TEXT").not_null(),
            ColumnDefinition::new("reference_title", "TEXT").not_null(),
            ColumnDefinition::new("work_id", "INTEGER").not_null(),
            ColumnDefinition::new("confidence", "REAL").not_null(),
            ColumnDefinition::new("is_revoked", "INTEGER").not_null().default("0"),
        ]
    }

    fn validate_schema(_pool: &SqlitePool) -> Result<()> {
        Ok(())
    }
}

pub struct AuditLogTableSchema;

impl TableSchema for AuditLogTableSchema {
    fn table_name() -> &'static str {
        "audit_log"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("id", "INTEGER").primary_key(),
            ColumnDefinition::new("created_at", "TEXT").not_null(),
            ColumnDefinition::new("action", "TEXT").not_null(),
            ColumnDefinition::new("signature", "TEXT"),
            ColumnDefinition::new("payload", "TEXT").not_null(),
            ColumnDefinition::new("undone", "INTEGER").not_null().default("0"),
        ]
    }

    fn validate_schema(_pool: &SqlitePool) -> Result<()> {
        Ok(())
    }
}

pub async fn sync_schema(pool: &SqlitePool) -> Result<()> {
    SchemaSync::sync_table::<IdentityBridgeTableSchema>(pool).await?;
    SchemaSync::sync_table::<AuditLogTableSchema>(pool).await
}

#[derive(Debug, Clone, PartialEq)]
pub struct BridgeEntry {
    pub signature: String,
    pub reference_artist: String,
    pub reference_title: String,
    pub work_id: i64,
    pub confidence: f64,
    pub is_revoked: bool,
}

#[derive(Debug, Clone)]
pub struct AuditEntry {
    pub id: i64,
    pub created_at: String,
    pub action: String,
    pub signature: Option<String>,
    pub payload: Value,
    pub undone: bool,
}

async fn fetch_bridge(pool: &SqlitePool, signature: &str) -> Result<Option<BridgeEntry>> {
    let row = sqlx::query(
        "SELECT signature, reference_artist, reference_title, work_id, confidence, is_revoked \
         FROM identity_bridge WHERE signature = ?",
    )
    .bind(signature)
    .fetch_optional(pool)
    .await?;
    Ok(row.map(|row| BridgeEntry {
        signature: row.get("signature"),
        reference_artist: row.get("reference_artist"),
        reference_title: row.get("reference_title"),
        work_id: row.get("work_id"),
        confidence: row.get("confidence"),
        is_revoked: row.get::<i64, _>("is_revoked") != 0,
    }))
}

pub async fn lookup_active(pool: &SqlitePool, signature: &str) -> Result<Option<BridgeEntry>> {
    Ok(fetch_bridge(pool, signature).await?.filter(|b| !b.is_revoked))
}

/// Batched lookup for the matcher's first strategy (§4.5 step 1): one
/// query for the whole batch, non-revoked rows only.
pub async fn lookup_active_batch(pool: &SqlitePool, signatures: &[String]) -> Result<Vec<BridgeEntry>> {
    if signatures.is_empty() {
        return Ok(Vec::new());
    }
    let placeholders = signatures.iter().map(|_| "?").collect::<Vec<_>>().join(",");
    let sql = format!(
        "SELECT signature, reference_artist, reference_title, work_id, confidence, is_revoked \
         FROM identity_bridge WHERE is_revoked = 0 AND signature IN ({placeholders})"
    );
    let mut query = sqlx::query(&sql);
    for sig in signatures {
        query = query.bind(sig);
    }
    let rows = query.fetch_all(pool).await?;
    Ok(rows
        .into_iter()
        .map(|row| BridgeEntry {
            signature: row.get("signature"),
            reference_artist: row.get("reference_artist"),
            reference_title: row.get("reference_title"),
            work_id: row.get("work_id"),
            confidence: row.get("confidence"),
            is_revoked: false,
        })
        .collect())
}

async fn record_audit(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    action: &str,
    signature: Option<&str>,
    payload: Value,
) -> Result<i64> {
    let row = sqlx::query(
        "INSERT INTO audit_log (created_at, action, signature, payload, undone) VALUES (?, ?, ?, ?, 0) \
         RETURNING id",
    )
    .bind(Utc::now().to_rfc3339())
    .bind(action)
    .bind(signature)
    .bind(payload.to_string())
    .fetch_one(&mut **tx)
    .await?;
    Ok(row.get("id"))
}

/// On operator confirmation of `(signature, work_id)` (§4.6):
/// 1. Insert or update the Bridge row (idempotent on `signature`).
/// 2. Back-fill BroadcastLogs sharing the signature with NULL `work_id`.
/// 3. Delete the corresponding DiscoveryQueueItem.
/// 4. Write an AuditEntry sufficient to undo.
///
/// Idempotent: linking the same `(signature, work_id)` twice is a no-op
/// after the first success.
pub async fn link(
    pool: &SqlitePool,
    signature: &str,
    reference_artist: &str,
    reference_title: &str,
    work_id: i64,
    confidence: f64,
) -> Result<AuditEntry> {
    let mut tx = pool.begin().await?;

    let prior = sqlx::query(
        "SELECT signature, reference_artist, reference_title, work_id, confidence, is_revoked \
         FROM identity_bridge WHERE signature = ?",
    )
    .bind(signature)
    .fetch_optional(&mut *tx)
    .await?
    .map(|row| BridgeEntry {
        signature: row.get("signature"),
        reference_artist: row.get("reference_artist"),
        reference_title: row.get("reference_title"),
        work_id: row.get("work_id"),
        confidence: row.get("confidence"),
        is_revoked: row.get::<i64, _>("is_revoked") != 0,
    });

    if let Some(existing) = &prior {
        if existing.work_id == work_id && !existing.is_revoked {
            let audit = record_audit(
                &mut tx,
                "link_noop",
                Some(signature),
                json!({"work_id": work_id, "already_linked": true}),
            )
            .await?;
            tx.commit().await?;
            return Ok(AuditEntry {
                id: audit,
                created_at: Utc::now().to_rfc3339(),
                action: "link_noop".to_string(),
                signature: Some(signature.to_string()),
                payload: json!({"work_id": work_id, "already_linked": true}),
                undone: false,
            });
        }
    }

    sqlx::query(
        "INSERT INTO identity_bridge (signature, reference_artist, reference_title, work_id, confidence, is_revoked) \
         VALUES (?, ?, ?, ?, ?, 0) \
         ON CONFLICT(signature) DO UPDATE SET \
           reference_artist = excluded.reference_artist, reference_title = excluded.reference_title, \
           work_id = excluded.work_id, confidence = excluded.confidence, is_revoked = 0",
    )
    .bind(signature)
    .bind(reference_artist)
    .bind(reference_title)
    .bind(work_id)
    .bind(confidence)
    .execute(&mut *tx)
    .await?;

    let backfilled_ids: Vec<i64> = sqlx::query_scalar(
        "SELECT id FROM broadcast_logs WHERE signature = ? AND work_id IS NULL",
    )
    .bind(signature)
    .fetch_all(&mut *tx)
    .await?;

    sqlx::query(
        "UPDATE broadcast_logs SET work_id = ?, match_reason = 'identity_bridge' \
         WHERE signature = ? AND work_id IS NULL",
    )
    .bind(work_id)
    .bind(signature)
    .execute(&mut *tx)
    .await?;

    let prior_queue = sqlx::query(
        "SELECT signature, raw_artist, raw_title, count, suggested_work_id, best_scores, cooldown_until \
         FROM discovery_queue WHERE signature = ?",
    )
    .bind(signature)
    .fetch_optional(&mut *tx)
    .await?;

    sqlx::query("DELETE FROM discovery_queue WHERE signature = ?")
        .bind(signature)
        .execute(&mut *tx)
        .await?;

    let prior_queue_json = prior_queue.map(|row| {
        json!({
            "signature": row.get::<String, _>("signature"),
            "raw_artist": row.get::<String, _>("raw_artist"),
            "raw_title": row.get::<String, _>("raw_title"),
            "count": row.get::<i64, _>("count"),
            "suggested_work_id": row.get::<Option<i64>, _>("suggested_work_id"),
            "best_scores": row.get::<Option<String>, _>("best_scores"),
            "cooldown_until": row.get::<Option<String>, _>("cooldown_until"),
        })
    });

    let payload = json!({
        "work_id": work_id,
        "reference_artist": reference_artist,
        "reference_title": reference_title,
        "confidence": confidence,
        "prior_bridge": prior.map(|b| json!({
            "reference_artist": b.reference_artist,
            "reference_title": b.reference_title,
            "work_id": b.work_id,
            "confidence": b.confidence,
            "is_revoked": b.is_revoked,
        })),
        "prior_queue_item": prior_queue_json,
        "backfilled_log_ids": backfilled_ids,
    });

    let audit_id = record_audit(&mut tx, "link", Some(signature), payload.clone()).await?;
    tx.commit().await?;

    Ok(AuditEntry {
        id: audit_id,
        created_at: Utc::now().to_rfc3339(),
        action: "link".to_string(),
        signature: Some(signature.to_string()),
        payload,
        undone: false,
    })
}

/// Link plus flip the chosen Recording's `is_verified` (§4.7 Promote).
pub async fn promote(
    pool: &SqlitePool,
    signature: &str,
    reference_artist: &str,
    reference_title: &str,
    work_id: i64,
    recording_id: i64,
    confidence: f64,
) -> Result<AuditEntry> {
    let recording = library::get_recording(pool, recording_id).await?;
    let link_audit = link(pool, signature, reference_artist, reference_title, work_id, confidence).await?;
    library::set_recording_verified(pool, recording_id, true).await?;

    let mut payload = link_audit.payload.clone();
    payload["recording_id"] = json!(recording_id);
    payload["prior_recording_verified"] = json!(recording.is_verified);

    sqlx::query("UPDATE audit_log SET action = 'promote', payload = ? WHERE id = ?")
        .bind(payload.to_string())
        .bind(link_audit.id)
        .execute(pool)
        .await?;

    Ok(AuditEntry { action: "promote".to_string(), payload, ..link_audit })
}

pub async fn revoke(pool: &SqlitePool, signature: &str) -> Result<()> {
    let result = sqlx::query("UPDATE identity_bridge SET is_revoked = 1 WHERE signature = ?")
        .bind(signature)
        .execute(pool)
        .await?;
    if result.rows_affected() == 0 {
        return Err(Error::NotFound(format!("identity bridge entry for signature '{signature}'")));
    }
    Ok(())
}

/// Reverse the effect of `audit_id` (`link`/`promote`/`skip`/`alias`).
/// Errors if the entry is already undone.
pub async fn undo(pool: &SqlitePool, audit_id: i64) -> Result<()> {
    let row = sqlx::query("SELECT action, signature, payload, undone FROM audit_log WHERE id = ?")
        .bind(audit_id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::NotFound(format!("audit entry {audit_id}")))?;

    if row.get::<i64, _>("undone") != 0 {
        return Err(Error::InvalidInput(format!("audit entry {audit_id} already undone")));
    }

    let action: String = row.get("action");
    let signature: Option<String> = row.get("signature");
    let payload: Value = serde_json::from_str(&row.get::<String, _>("payload"))
        .map_err(|e| Error::Internal(format!("corrupt audit payload: {e}")))?;

    match action.as_str() {
        "link" | "promote" => {
            let signature = signature.ok_or_else(|| Error::Internal("link audit missing signature".to_string()))?;
            let mut tx = pool.begin().await?;

            if let Some(prior) = payload.get("prior_bridge").filter(|v| !v.is_null()) {
                sqlx::query(
                    "UPDATE identity_bridge SET reference_artist = ?, reference_title = ?, work_id = ?, \
                     confidence = ?, is_revoked = ? WHERE signature = ?",
                )
                .bind(prior["reference_artist"].as_str().unwrap_or_default())
                .bind(prior["reference_title"].as_str().unwrap_or_default())
                .bind(prior["work_id"].as_i64().unwrap_or_default())
                .bind(prior["confidence"].as_f64().unwrap_or_default())
                .bind(prior["is_revoked"].as_bool().unwrap_or_default())
                .bind(&signature)
                .execute(&mut *tx)
                .await?;
            } else {
                sqlx::query("DELETE FROM identity_bridge WHERE signature = ?")
                    .bind(&signature)
                    .execute(&mut *tx)
                    .await?;
            }

            if let Some(ids) = payload.get("backfilled_log_ids").and_then(|v| v.as_array()) {
                for id in ids {
                    if let Some(id) = id.as_i64() {
                        sqlx::query("UPDATE broadcast_logs SET work_id = NULL, match_reason = NULL WHERE id = ?")
                            .bind(id)
                            .execute(&mut *tx)
                            .await?;
                    }
                }
            }

            if let Some(queue) = payload.get("prior_queue_item").filter(|v| !v.is_null()) {
                sqlx::query(
                    "INSERT INTO discovery_queue (signature, raw_artist, raw_title, count, suggested_work_id, \
                     best_scores, cooldown_until) VALUES (?, ?, ?, ?, ?, ?, ?) \
                     ON CONFLICT(signature) DO NOTHING",
                )
                .bind(queue["signature"].as_str().unwrap_or_default())
                .bind(queue["raw_artist"].as_str().unwrap_or_default())
                .bind(queue["raw_title"].as_str().unwrap_or_default())
                .bind(queue["count"].as_i64().unwrap_or_default())
                .bind(queue["suggested_work_id"].as_i64())
                .bind(queue["best_scores"].as_str())
                .bind(queue["cooldown_until"].as_str())
                .execute(&mut *tx)
                .await?;
            }

            if action == "promote" {
                if let (Some(recording_id), Some(prior_verified)) = (
                    payload.get("recording_id").and_then(|v| v.as_i64()),
                    payload.get("prior_recording_verified").and_then(|v| v.as_bool()),
                ) {
                    sqlx::query("UPDATE recordings SET is_verified = ? WHERE id = ?")
                        .bind(prior_verified)
                        .bind(recording_id)
                        .execute(&mut *tx)
                        .await?;
                }
            }

            tx.commit().await?;
        }
        "skip" => {
            let signature = signature.ok_or_else(|| Error::Internal("skip audit missing signature".to_string()))?;
            sqlx::query("UPDATE discovery_queue SET cooldown_until = NULL WHERE signature = ?")
                .bind(&signature)
                .execute(pool)
                .await?;
        }
        "alias" => {
            if let Some(raw_name) = payload.get("raw_name").and_then(|v| v.as_str()) {
                sqlx::query("DELETE FROM artist_aliases WHERE raw_name = ?")
                    .bind(raw_name)
                    .execute(pool)
                    .await?;
            }
        }
        other => return Err(Error::InvalidInput(format!("action '{other}' is not undoable"))),
    }

    sqlx::query("UPDATE audit_log SET undone = 1 WHERE id = ?")
        .bind(audit_id)
        .execute(pool)
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library;

    async fn test_pool() -> SqlitePool {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        library::schema::sync_all(&pool).await.unwrap();
        sync_schema(&pool).await.unwrap();
        crate::discovery::sync_schema(&pool).await.unwrap();
        pool
    }

    #[tokio::test]
    async fn link_backfills_matching_logs_and_deletes_queue_item() {
        let pool = test_pool().await;
        let artist = library::upsert_artist(&pool, "The Beatles").await.unwrap();
        let work = library::upsert_work(&pool, "hey jude", artist.id, 0.85, 500).await.unwrap();
        library::upsert_station(&pool, "WKRP", None).await.unwrap();

        let sig = crate::normalize::signature("The Beatles", "Hey Jude");
        let log = library::insert_broadcast_log(&pool, 1, "2024-01-01T00:00:00Z", "BEATLES", "HEY JUDE", &sig)
            .await
            .unwrap();
        crate::discovery::upsert_on_unmatched(&pool, &sig, "BEATLES", "HEY JUDE", None, None).await.unwrap();

        let audit = link(&pool, &sig, "BEATLES", "HEY JUDE", work.id, 1.0).await.unwrap();
        assert_eq!(audit.action, "link");

        let updated = library::get_recording(&pool, library::upsert_recording(&pool, work.id, "hey jude", "Original", None, None).await.unwrap().id).await.unwrap();
        let _ = updated;

        let row: Option<i64> = sqlx::query_scalar("SELECT work_id FROM broadcast_logs WHERE id = ?")
            .bind(log.id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row, Some(work.id));

        let queue_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM discovery_queue WHERE signature = ?")
            .bind(&sig)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(queue_count, 0);
    }

    #[tokio::test]
    async fn link_twice_is_idempotent() {
        let pool = test_pool().await;
        let artist = library::upsert_artist(&pool, "Artist").await.unwrap();
        let work = library::upsert_work(&pool, "song", artist.id, 0.85, 500).await.unwrap();
        let sig = crate::normalize::signature("Artist", "Song");

        link(&pool, &sig, "Artist", "Song", work.id, 1.0).await.unwrap();
        let second = link(&pool, &sig, "Artist", "Song", work.id, 1.0).await.unwrap();
        assert_eq!(second.action, "link_noop");
    }

    #[tokio::test]
    async fn undo_after_link_restores_pre_link_state() {
        let pool = test_pool().await;
        let artist = library::upsert_artist(&pool, "Artist").await.unwrap();
        let work = library::upsert_work(&pool, "song", artist.id, 0.85, 500).await.unwrap();
        library::upsert_station(&pool, "Station", None).await.unwrap();
        let sig = crate::normalize::signature("Artist", "Song");

        let log = library::insert_broadcast_log(&pool, 1, "2024-01-01T00:00:00Z", "Artist", "Song", &sig)
            .await
            .unwrap();
        crate::discovery::upsert_on_unmatched(&pool, &sig, "Artist", "Song", None, None).await.unwrap();

        let audit = link(&pool, &sig, "Artist", "Song", work.id, 1.0).await.unwrap();
        undo(&pool, audit.id).await.unwrap();

        let row: Option<i64> = sqlx::query_scalar("SELECT work_id FROM broadcast_logs WHERE id = ?")
            .bind(log.id)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(row, None);

        assert!(lookup_active(&pool, &sig).await.unwrap().is_none());

        let queue_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM discovery_queue WHERE signature = ?")
            .bind(&sig)
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(queue_count, 1);
    }
}
