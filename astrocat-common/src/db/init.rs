//! Database initialization
//!
//! Opens (or creates) the catalog database and brings the schema up to
//! date. All statements are idempotent so repeated runs against an
//! existing catalog are safe.

use crate::Result;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::path::Path;
use tracing::info;

/// Initialize database connection and create tables if needed
pub async fn init_database(db_path: &Path) -> Result<SqlitePool> {
    let newly_created = !db_path.exists();

    // Create parent directory if it doesn't exist
    if let Some(parent) = db_path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }

    // The indexer is a single sequential worker; a small pool is plenty.
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    let pool = SqlitePoolOptions::new()
        .max_connections(5)
        .min_connections(1)
        .connect(&db_url)
        .await?;

    if newly_created {
        info!("Initialized new catalog database: {}", db_path.display());
    } else {
        info!("Opened existing catalog database: {}", db_path.display());
    }

    configure_connection(&pool).await?;

    create_files_table(&pool).await?;
    create_folder_stretch_settings_table(&pool).await?;

    Ok(pool)
}

/// Apply connection-level pragmas
pub async fn configure_connection(pool: &SqlitePool) -> Result<()> {
    sqlx::query("PRAGMA foreign_keys = ON").execute(pool).await?;

    // WAL keeps readers unblocked while the indexer holds its write
    // transaction open between batch commits.
    sqlx::query("PRAGMA journal_mode = WAL").execute(pool).await?;

    sqlx::query("PRAGMA busy_timeout = 5000").execute(pool).await?;

    Ok(())
}

/// Create the files table
///
/// One row per catalog entry, keyed by the path relative to the catalog
/// root. `deleted_at` is NULL for active entries; the duplicate counters
/// are denormalized and recomputed whenever a hash's active set changes.
pub async fn create_files_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS files (
            path TEXT PRIMARY KEY,
            file_hash TEXT NOT NULL,
            name TEXT NOT NULL,
            mtime REAL,
            file_size INTEGER,
            object TEXT,
            date_obs TEXT,
            exptime REAL,
            filter TEXT,
            imgtype TEXT,
            xbinning INTEGER,
            ybinning INTEGER,
            egain REAL,
            "offset" REAL,
            xpixsz REAL,
            ypixsz REAL,
            instrume TEXT,
            set_temp REAL,
            ccd_temp REAL,
            telescop TEXT,
            focallen REAL,
            focratio REAL,
            ra REAL,
            "dec" REAL,
            centalt REAL,
            centaz REAL,
            airmass REAL,
            pierside TEXT,
            siteelev REAL,
            sitelat REAL,
            sitelong REAL,
            focpos INTEGER,
            thumbnail BLOB,
            deleted_at INTEGER,
            is_hidden INTEGER NOT NULL DEFAULT 0,
            total_duplicate_count INTEGER NOT NULL DEFAULT 0,
            visible_duplicate_count INTEGER NOT NULL DEFAULT 0,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            CHECK (file_size IS NULL OR file_size >= 0),
            CHECK (is_hidden IN (0, 1))
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_hash ON files(file_hash)")
        .execute(pool)
        .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_files_deleted_at ON files(deleted_at)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Create the folder_stretch_settings table
///
/// Administered externally (web UI); the indexer only reads it when
/// resolving the stretch configuration for a folder.
pub async fn create_folder_stretch_settings_table(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS folder_stretch_settings (
            folder_path TEXT PRIMARY KEY,
            apply_to_subfolders INTEGER NOT NULL DEFAULT 1,
            stretch_type TEXT NOT NULL DEFAULT 'linear',
            linear_low_percent REAL NOT NULL DEFAULT 0.5,
            linear_high_percent REAL NOT NULL DEFAULT 99.5,
            stf_shadow_clip REAL NOT NULL DEFAULT 0.0,
            stf_highlight_clip REAL NOT NULL DEFAULT 0.0,
            stf_midtones_balance REAL NOT NULL DEFAULT 0.5,
            stf_strength REAL NOT NULL DEFAULT 1.0,
            created_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            updated_at TIMESTAMP NOT NULL DEFAULT CURRENT_TIMESTAMP,
            CHECK (apply_to_subfolders IN (0, 1)),
            CHECK (stretch_type IN ('linear', 'pixinsight_stf'))
        )
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
