//! Declarative table definitions for the Library KB (C2), synced at startup
//! via `airwave_common::db::schema_sync::SchemaSync` the same way `wkmp-ai`
//! syncs its `passages`/`files` tables.

use airwave_common::db::schema_sync::{ColumnDefinition, SchemaSync, TableSchema};
use airwave_common::Result;
use sqlx::SqlitePool;

pub struct ArtistsTableSchema;

impl TableSchema for ArtistsTableSchema {
    fn table_name() -> &'static str {
        "artists"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("id", "INTEGER").primary_key(),
            ColumnDefinition::new("name", "TEXT").not_null().unique(),
            ColumnDefinition::new("display_name", "TEXT"),
            ColumnDefinition::new("external_id", "TEXT"),
            ColumnDefinition::new("created_at", "TEXT").not_null(),
        ]
    }

    fn validate_schema(_pool: &SqlitePool) -> Result<()> {
        Ok(())
    }
}

pub struct WorksTableSchema;

impl TableSchema for WorksTableSchema {
    fn table_name() -> &'static str {
        "works"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("id", "INTEGER").primary_key(),
            ColumnDefinition::new("title", "TEXT").not_null(),
            ColumnDefinition::new("primary_artist_id", "INTEGER").not_null(),
            ColumnDefinition::new("is_instrumental", "INTEGER").not_null().default("0"),
            ColumnDefinition::new("created_at", "TEXT").not_null(),
        ]
    }

    fn validate_schema(_pool: &SqlitePool) -> Result<()> {
        Ok(())
    }
}

pub struct WorkArtistsTableSchema;

impl TableSchema for WorkArtistsTableSchema {
    fn table_name() -> &'static str {
        "work_artists"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("work_id", "INTEGER").not_null(),
            ColumnDefinition::new("artist_id", "INTEGER").not_null(),
            ColumnDefinition::new("position", "INTEGER").not_null(),
        ]
    }

    fn validate_schema(_pool: &SqlitePool) -> Result<()> {
        Ok(())
    }
}

pub struct RecordingsTableSchema;

impl TableSchema for RecordingsTableSchema {
    fn table_name() -> &'static str {
        "recordings"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("id", "INTEGER").primary_key(),
            ColumnDefinition::new("work_id", "INTEGER").not_null(),
            ColumnDefinition::new("title", "TEXT").not_null(),
            ColumnDefinition::new("version_type", "TEXT").not_null().default("'Original'"),
            ColumnDefinition::new("duration_ms", "INTEGER"),
            ColumnDefinition::new("external_id", "TEXT"),
            ColumnDefinition::new("is_verified", "INTEGER").not_null().default("0"),
            ColumnDefinition::new("created_at", "TEXT").not_null(),
        ]
    }

    fn validate_schema(_pool: &SqlitePool) -> Result<()> {
        Ok(())
    }
}

pub struct LibraryFilesTableSchema;

impl TableSchema for LibraryFilesTableSchema {
    fn table_name() -> &'static str {
        "library_files"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("id", "INTEGER").primary_key(),
            ColumnDefinition::new("recording_id", "INTEGER").not_null(),
            ColumnDefinition::new("path", "TEXT").not_null().unique(),
            ColumnDefinition::new("content_hash", "TEXT").not_null(),
            ColumnDefinition::new("size", "INTEGER").not_null(),
            ColumnDefinition::new("mtime", "TEXT").not_null(),
            ColumnDefinition::new("created_at", "TEXT").not_null(),
        ]
    }

    fn validate_schema(_pool: &SqlitePool) -> Result<()> {
        Ok(())
    }
}

pub struct StationsTableSchema;

impl TableSchema for StationsTableSchema {
    fn table_name() -> &'static str {
        "stations"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("id", "INTEGER").primary_key(),
            ColumnDefinition::new("name", "TEXT").not_null().unique(),
            ColumnDefinition::new("format_code", "TEXT"),
        ]
    }

    fn validate_schema(_pool: &SqlitePool) -> Result<()> {
        Ok(())
    }
}

pub struct BroadcastLogsTableSchema;

impl TableSchema for BroadcastLogsTableSchema {
    fn table_name() -> &'static str {
        "broadcast_logs"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("id", "INTEGER").primary_key(),
            ColumnDefinition::new("station_id", "INTEGER").not_null(),
            ColumnDefinition::new("played_at", "TEXT").not_null(),
            ColumnDefinition::new("raw_artist", "TEXT").not_null(),
            ColumnDefinition::new("raw_title", "TEXT").not_null(),
            ColumnDefinition::new("signature", "TEXT").not_null(),
            ColumnDefinition::new("work_id", "INTEGER"),
            ColumnDefinition::new("match_reason", "TEXT"),
        ]
    }

    fn validate_schema(_pool: &SqlitePool) -> Result<()> {
        Ok(())
    }
}

pub struct ArtistAliasesTableSchema;

impl TableSchema for ArtistAliasesTableSchema {
    fn table_name() -> &'static str {
        "artist_aliases"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("raw_name", "TEXT").primary_key(),
            ColumnDefinition::new("resolved_name", "TEXT").not_null(),
            ColumnDefinition::new("is_verified", "INTEGER").not_null().default("0"),
        ]
    }

    fn validate_schema(_pool: &SqlitePool) -> Result<()> {
        Ok(())
    }
}

pub struct AppSettingsTableSchema;

impl TableSchema for AppSettingsTableSchema {
    fn table_name() -> &'static str {
        "app_settings"
    }

    fn expected_columns() -> Vec<ColumnDefinition> {
        vec![
            ColumnDefinition::new("key", "TEXT").primary_key(),
            ColumnDefinition::new("value", "TEXT").not_null(),
            ColumnDefinition::new("updated_at", "TIMESTAMP"),
        ]
    }

    fn validate_schema(_pool: &SqlitePool) -> Result<()> {
        Ok(())
    }
}

/// Sync every Library KB table. Called once at startup after the generic
/// `schema_version` bootstrap in `airwave-common`.
pub async fn sync_all(pool: &SqlitePool) -> Result<()> {
    SchemaSync::sync_table::<AppSettingsTableSchema>(pool).await?;
    SchemaSync::sync_table::<ArtistsTableSchema>(pool).await?;
    SchemaSync::sync_table::<WorksTableSchema>(pool).await?;
    SchemaSync::sync_table::<WorkArtistsTableSchema>(pool).await?;
    SchemaSync::sync_table::<RecordingsTableSchema>(pool).await?;
    SchemaSync::sync_table::<LibraryFilesTableSchema>(pool).await?;
    SchemaSync::sync_table::<StationsTableSchema>(pool).await?;
    SchemaSync::sync_table::<BroadcastLogsTableSchema>(pool).await?;
    SchemaSync::sync_table::<ArtistAliasesTableSchema>(pool).await?;

    sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS idx_works_title_artist ON works(title, primary_artist_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE UNIQUE INDEX IF NOT EXISTS idx_recordings_title_version ON recordings(work_id, title, version_type)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE UNIQUE INDEX IF NOT EXISTS idx_work_artists_pair ON work_artists(work_id, artist_id)")
        .execute(pool)
        .await?;

    Ok(())
}
