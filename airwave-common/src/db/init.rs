//! Database connection bootstrap
//!
//! Opens (creating if absent) the SQLite database backing the library
//! knowledge base, enables WAL journaling and foreign keys, and ensures a
//! `schema_version` bookkeeping table exists. Domain table creation and
//! column sync is the caller's responsibility (`airwave_core::library::schema`)
//! via `schema_sync::SchemaSync`, keeping this crate free of domain
//! knowledge.

use crate::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Open a SQLite connection pool at `db_path`, creating the file and its
/// parent directory if needed.
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePool::connect(&db_url).await?;

    sqlx::query("PRAGMA foreign_keys = ON").execute(&pool).await?;
    sqlx::query("PRAGMA journal_mode = WAL").execute(&pool).await?;

    create_schema_version_table(&pool).await?;

    Ok(pool)
}

async fn create_schema_version_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            applied_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn init_creates_schema_version_table() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("airwave.db");

        let pool = init_database_pool(&db_path).await.unwrap();

        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS(SELECT 1 FROM sqlite_master WHERE type='table' AND name='schema_version')",
        )
        .fetch_one(&pool)
        .await
        .unwrap();

        assert!(exists);
    }
}
