//! Vector Index (C4): cosine-similarity search over short
//! `"artist - title"` strings, keyed by recording id.
//!
//! The index is derived state (§4.4) — it can always be rebuilt from the
//! Library KB — so a brute-force SQLite-backed implementation is
//! sufficient; there is no production requirement for an external ANN
//! service. Embedding is a fixed-width character-trigram hash projection
//! (no network call, no model weights), giving a stable, dependency-free
//! vector for short strings. Grounded on `wkmp-ai`'s `db/schema.rs`
//! `TableSchema`/`SchemaSync` pattern for the backing table and on its
//! per-entity repository style for the query methods.

use airwave_common::db::schema_sync::{ColumnDefinition, SchemaSync, TableSchema};
use airwave_common::Result;
use sqlx::{Row, SqlitePool};
use std::collections::HashMap;

/// Dimensionality of the hashed trigram embedding.
const DIMS: usize = 64;

/// Project `text` onto a fixed-width vector by hashing overlapping
/// character trigrams into `DIMS` buckets, sign-weighted to approximate a
/// random projection. Deterministic, pure, no I/O.
pub fn embed(text: &str) -> [f32; DIMS] {
    let mut v = [0f32; DIMS];
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return v;
    }
    let windows: Vec<&[char]> = if chars.len() < 3 {
        vec![&chars[..]]
    } else {
        chars.windows(3).collect()
    };
    for window in &windows {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        use std::hash::{Hash, Hasher};
        window.hash(&mut hasher);
        let h = hasher.finish();
        let bucket = (h as usize) % DIMS;
        let sign = if (h >> 63) & 1 == 0 { 1.0 } else { -1.0 };
        v[bucket] += sign;
    }
    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    v
}

fn cosine_distance(a: &[f32; DIMS], b: &[f32; DIMS]) -> f64 {
    let dot: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    (1.0 - dot as f64).clamp(0.0, 2.0)
}

fn encode(v: &[f32; DIMS]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn decode(bytes: &[u8]) -> [f32; DIMS] {
    let mut v = [0f32; DIMS];
    for (i, chunk) in bytes.chunks_exact(4).take(DIMS).enumerate() {
        v[i] = f32::from_le_bytes(chunk.try_into().unwrap());
    }
    v
}

/// Capability set a vector backend must satisfy (§9 "duck-typed ...
/// vector clients").
pub trait VectorIndex {
    async fn upsert(&self, recording_id: i64, text: &str) -> Result<()>;
    async fn delete(&self, recording_id: i64) -> Result<()>;
    /// One ranked candidate list per query, ascending distance, truncated
    /// to `top_k`.
    async fn search_batch(&self, queries: &[String], top_k: usize) -> Result<Vec<Vec<(i64, f64)>>>;
}

pub struct VectorEntriesTableSchema;

impl TableSchema for VectorEntriesTableSchema {
    fn table_name() -> &'static str {
        "vector_entries"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("recording_id", "INTEGER").primary_key(),
            ColumnDefinition::new("text", "TEXT").not_null(),
            ColumnDefinition::new("embedding", "BLOB").not_null(),
        ]
    }

    fn validate_schema(_pool: &SqlitePool) -> Result<()> {
        Ok(())
    }
}

pub async fn sync_schema(pool: &SqlitePool) -> Result<()> {
    SchemaSync::sync_table::<VectorEntriesTableSchema>(pool).await
}

/// Brute-force, single-writer SQLite-backed index. Reads load the whole
/// table into memory per search batch; fine at the library scale this
/// engine targets (tens of thousands of recordings), and trivially
/// rebuildable (§4.4) if it ever needs to be swapped for an ANN backend.
pub struct SqliteVectorIndex {
    pool: SqlitePool,
}

impl SqliteVectorIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

impl VectorIndex for SqliteVectorIndex {
    async fn upsert(&self, recording_id: i64, text: &str) -> Result<()> {
        let embedding = encode(&embed(text));
        sqlx::query(
            "INSERT INTO vector_entries (recording_id, text, embedding) VALUES (?, ?, ?) \
             ON CONFLICT(recording_id) DO UPDATE SET text = excluded.text, embedding = excluded.embedding",
        )
        .bind(recording_id)
        .bind(text)
        .bind(embedding)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, recording_id: i64) -> Result<()> {
        sqlx::query("DELETE FROM vector_entries WHERE recording_id = ?")
            .bind(recording_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn search_batch(&self, queries: &[String], top_k: usize) -> Result<Vec<Vec<(i64, f64)>>> {
        let rows = sqlx::query("SELECT recording_id, embedding FROM vector_entries")
            .fetch_all(&self.pool)
            .await?;
        let corpus: Vec<(i64, [f32; DIMS])> = rows
            .into_iter()
            .map(|row| (row.get("recording_id"), decode(row.get::<Vec<u8>, _>("embedding").as_slice())))
            .collect();

        Ok(queries
            .iter()
            .map(|query| {
                let query_vec = embed(query);
                let mut scored: Vec<(i64, f64)> = corpus
                    .iter()
                    .map(|(id, vec)| (*id, cosine_distance(&query_vec, vec)))
                    .collect();
                scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
                scored.truncate(top_k);
                scored
            })
            .collect())
    }
}

/// Test double that never matches anything; used where a `VectorIndex` is
/// required but the test is exercising code paths before strategy 4.
pub struct NullVectorIndex;

impl VectorIndex for NullVectorIndex {
    async fn upsert(&self, _recording_id: i64, _text: &str) -> Result<()> {
        Ok(())
    }

    async fn delete(&self, _recording_id: i64) -> Result<()> {
        Ok(())
    }

    async fn search_batch(&self, queries: &[String], _top_k: usize) -> Result<Vec<Vec<(i64, f64)>>> {
        Ok(vec![Vec::new(); queries.len()])
    }
}

/// In-memory index for unit tests that don't want a pool.
#[derive(Default)]
pub struct InMemoryVectorIndex {
    entries: std::sync::Mutex<HashMap<i64, [f32; DIMS]>>,
}

impl InMemoryVectorIndex {
    pub fn new() -> Self {
        Self::default()
    }
}

impl VectorIndex for InMemoryVectorIndex {
    async fn upsert(&self, recording_id: i64, text: &str) -> Result<()> {
        self.entries.lock().unwrap().insert(recording_id, embed(text));
        Ok(())
    }

    async fn delete(&self, recording_id: i64) -> Result<()> {
        self.entries.lock().unwrap().remove(&recording_id);
        Ok(())
    }

    async fn search_batch(&self, queries: &[String], top_k: usize) -> Result<Vec<Vec<(i64, f64)>>> {
        let entries = self.entries.lock().unwrap();
        Ok(queries
            .iter()
            .map(|query| {
                let query_vec = embed(query);
                let mut scored: Vec<(i64, f64)> =
                    entries.iter().map(|(id, vec)| (*id, cosine_distance(&query_vec, vec))).collect();
                scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap());
                scored.truncate(top_k);
                scored
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn embed_is_deterministic() {
        assert_eq!(embed("artist - title"), embed("artist - title"));
    }

    #[test]
    fn identical_text_has_zero_distance() {
        let v = embed("the beatles - hey jude");
        assert!(cosine_distance(&v, &v) < 1e-6);
    }

    #[tokio::test]
    async fn in_memory_search_batch_ranks_closest_first() {
        let index = InMemoryVectorIndex::new();
        index.upsert(1, "the beatles - hey jude").await.unwrap();
        index.upsert(2, "the rolling stones - paint it black").await.unwrap();

        let results = index
            .search_batch(&["the beatles - hey jude".to_string()], 5)
            .await
            .unwrap();
        assert_eq!(results[0][0].0, 1);
    }

    #[tokio::test]
    async fn sqlite_index_round_trips_through_schema() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        sync_schema(&pool).await.unwrap();
        let index = SqliteVectorIndex::new(pool);
        index.upsert(42, "artist - title").await.unwrap();
        let results = index.search_batch(&["artist - title".to_string()], 1).await.unwrap();
        assert_eq!(results[0][0].0, 42);
        index.delete(42).await.unwrap();
        let results = index.search_batch(&["artist - title".to_string()], 1).await.unwrap();
        assert!(results[0].is_empty());
    }

    #[tokio::test]
    async fn null_index_never_matches() {
        let index = NullVectorIndex;
        let results = index.search_batch(&["anything".to_string()], 5).await.unwrap();
        assert!(results[0].is_empty());
    }
}
