//! Catalog reconciliation
//!
//! One run walks the catalog root, brings the database in line with what
//! is on disk, and maintains the entry lifecycle: unchanged files are
//! skipped on mtime+size, new and changed files are hashed, decoded and
//! upserted, vanished files are soft-deleted, and expired soft-deleted
//! rows are purged.
//!
//! Processing is sequential over one pooled connection. Writes are
//! grouped into explicit transactions committed every `COMMIT_BATCH`
//! processed files, so an interrupted run loses at most one batch.

use crate::{dedup, decode, hasher, lifecycle, metadata, scanner::FileScanner, settings, thumbnail};
use astrocat_common::db::FileState;
use astrocat_common::{Error, Result};
use sqlx::{Row, SqliteConnection, SqlitePool};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;
use tracing::{debug, error, info, warn};

const COMMIT_BATCH: usize = 50;

/// Knobs for one reconciliation run
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Catalog root on disk; stored paths are relative to it
    pub root: PathBuf,
    /// Reprocess every file regardless of mtime/size
    pub force: bool,
    /// Thumbnail bounding box in pixels; 0 disables thumbnails
    pub thumb_size: u32,
    /// Skip the soft-delete and purge sweeps
    pub skip_cleanup: bool,
    /// Days a soft-deleted entry survives before purging; <= 0 disables
    pub retention_days: i64,
}

/// Outcome counters for one run
#[derive(Debug, Default, Clone, Copy)]
pub struct RunSummary {
    pub scanned: usize,
    pub processed: usize,
    pub skipped: usize,
    pub failed: usize,
    pub soft_deleted: u64,
    pub purged: u64,
    pub duration: std::time::Duration,
}

/// Drives one full reconciliation pass over the catalog root
pub struct Reconciler {
    pool: SqlitePool,
    options: RunOptions,
}

impl Reconciler {
    pub fn new(pool: SqlitePool, options: RunOptions) -> Self {
        Self { pool, options }
    }

    /// Run scan, process, and (unless disabled) the cleanup sweeps
    pub async fn run(&self) -> Result<RunSummary> {
        let started = std::time::Instant::now();
        let mut summary = RunSummary::default();

        let disk_paths = FileScanner::new()
            .scan(&self.options.root)
            .map_err(|e| Error::Config(e.to_string()))?;
        summary.scanned = disk_paths.len();
        info!(count = summary.scanned, root = %self.options.root.display(), "Scan complete");

        let mut conn = self.pool.acquire().await?;
        let prior = load_prior_states(&mut conn).await?;

        let mut seen_rel_paths: HashSet<String> = HashSet::with_capacity(disk_paths.len());
        let mut in_batch = 0usize;

        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
        for path in &disk_paths {
            let Ok(stripped) = path.strip_prefix(&self.options.root) else {
                warn!(path = %path.display(), "Scanned path outside catalog root");
                continue;
            };
            let rel = stripped.to_string_lossy().into_owned();
            seen_rel_paths.insert(rel.clone());

            let fs_meta = match std::fs::metadata(path) {
                Ok(m) => m,
                Err(e) => {
                    warn!(path = %rel, error = %e, "File vanished during run");
                    summary.failed += 1;
                    continue;
                }
            };
            let mtime = fs_meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
                .map(|d| d.as_secs_f64())
                .unwrap_or(0.0);
            let size = fs_meta.len() as i64;

            if !self.options.force && should_skip(prior.get(&rel), mtime, size) {
                summary.skipped += 1;
                continue;
            }

            match self
                .process_file(&mut conn, path, &rel, mtime, size, prior.get(&rel))
                .await
            {
                Ok(()) => {
                    summary.processed += 1;
                    in_batch += 1;
                    if in_batch >= COMMIT_BATCH {
                        sqlx::query("COMMIT").execute(&mut *conn).await?;
                        sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;
                        in_batch = 0;
                        debug!(processed = summary.processed, "Batch committed");
                    }
                }
                Err(e) => {
                    error!(path = %rel, error = %e, "Processing failed");
                    summary.failed += 1;
                }
            }
        }
        sqlx::query("COMMIT").execute(&mut *conn).await?;

        if !self.options.skip_cleanup {
            let missing: Vec<String> = prior
                .values()
                .filter(|s| s.is_active())
                .map(|s| s.path.clone())
                .filter(|p| !seen_rel_paths.contains(p))
                .collect();
            summary.soft_deleted = lifecycle::soft_delete_missing(&mut conn, &missing).await?;
            summary.purged =
                lifecycle::purge_expired(&mut conn, self.options.retention_days).await?;
        }

        summary.duration = started.elapsed();
        info!(
            scanned = summary.scanned,
            processed = summary.processed,
            skipped = summary.skipped,
            failed = summary.failed,
            soft_deleted = summary.soft_deleted,
            purged = summary.purged,
            elapsed = ?summary.duration,
            "Reconciliation complete"
        );
        Ok(summary)
    }

    /// Hash, decode, and upsert one file, then refresh the duplicate
    /// groups it touches
    async fn process_file(
        &self,
        conn: &mut SqliteConnection,
        path: &Path,
        rel: &str,
        mtime: f64,
        size: i64,
        prior: Option<&FileState>,
    ) -> Result<()> {
        let file_hash = hasher::calculate_hash(path).await?;

        let decoded = {
            let path = path.to_path_buf();
            tokio::task::spawn_blocking(move || decode::decode_image(&path))
                .await
                .map_err(|e| Error::Internal(format!("decode task panicked: {}", e)))??
        };

        let meta = metadata::extract(decoded.header.as_ref(), rel);

        let thumb = match &decoded.pixels {
            Some(pixels) if self.options.thumb_size > 0 => {
                let folder = Path::new(rel)
                    .parent()
                    .map(|p| p.to_string_lossy().into_owned())
                    .unwrap_or_default();
                let stretch = settings::resolve_stretch_settings(conn, &folder).await;
                thumbnail::render_thumbnail(pixels, &stretch, self.options.thumb_size)
            }
            _ => None,
        };

        let name = Path::new(rel)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| rel.to_string());

        upsert_file(conn, rel, &name, &file_hash, mtime, size, &meta, thumb).await?;

        // Accounting is bookkeeping on an already-upserted row; a failed
        // recompute leaves stale counts but the file still counts as
        // processed
        if let Err(e) = dedup::recompute_duplicate_counts(conn, &file_hash).await {
            warn!(path = %rel, hash = %file_hash, error = %e, "Duplicate count update failed");
        }
        if let Some(prior) = prior {
            if prior.file_hash != file_hash {
                if let Err(e) = dedup::recompute_duplicate_counts(conn, &prior.file_hash).await {
                    warn!(path = %rel, hash = %prior.file_hash, error = %e, "Duplicate count update failed");
                }
            }
        }

        debug!(path = %rel, hash = %file_hash, "Cataloged");
        Ok(())
    }
}

/// Unchanged-file check: active prior entry with matching whole-second
/// mtime and exact size
fn should_skip(prior: Option<&FileState>, mtime: f64, size: i64) -> bool {
    match prior {
        Some(state) if state.is_active() => {
            state.mtime.map(|m| m as i64) == Some(mtime as i64) && state.file_size == Some(size)
        }
        _ => false,
    }
}

/// Load the skip-decision fields for every row in the catalog
async fn load_prior_states(
    conn: &mut SqliteConnection,
) -> Result<HashMap<String, FileState>> {
    let rows = sqlx::query("SELECT path, file_hash, mtime, file_size, deleted_at FROM files")
        .fetch_all(&mut *conn)
        .await?;

    let mut states = HashMap::with_capacity(rows.len());
    for row in rows {
        let state = FileState {
            path: row.try_get("path")?,
            file_hash: row.try_get("file_hash")?,
            mtime: row.try_get("mtime")?,
            file_size: row.try_get("file_size")?,
            deleted_at: row.try_get("deleted_at")?,
        };
        states.insert(state.path.clone(), state);
    }
    Ok(states)
}

/// Insert or refresh one catalog row
///
/// On conflict the row is revived (`deleted_at` cleared) and all
/// observational fields replaced. The stored thumbnail is kept when this
/// run produced none, and `is_hidden` is never touched here.
#[allow(clippy::too_many_arguments)]
async fn upsert_file(
    conn: &mut SqliteConnection,
    rel: &str,
    name: &str,
    file_hash: &str,
    mtime: f64,
    size: i64,
    meta: &metadata::ImageMetadata,
    thumbnail: Option<Vec<u8>>,
) -> Result<()> {
    let date_obs = meta
        .date_obs
        .map(|d| d.format("%Y-%m-%dT%H:%M:%S%.f").to_string());

    sqlx::query(
        r#"
        INSERT INTO files (
            path, file_hash, name, mtime, file_size,
            object, date_obs, exptime, filter, imgtype,
            xbinning, ybinning, egain, "offset", xpixsz, ypixsz,
            instrume, set_temp, ccd_temp, telescop, focallen, focratio,
            ra, "dec", centalt, centaz, airmass, pierside,
            siteelev, sitelat, sitelong, focpos,
            thumbnail, deleted_at
        ) VALUES (
            ?, ?, ?, ?, ?,
            ?, ?, ?, ?, ?,
            ?, ?, ?, ?, ?, ?,
            ?, ?, ?, ?, ?, ?,
            ?, ?, ?, ?, ?, ?,
            ?, ?, ?, ?,
            ?, NULL
        )
        ON CONFLICT(path) DO UPDATE SET
            file_hash = excluded.file_hash,
            name = excluded.name,
            mtime = excluded.mtime,
            file_size = excluded.file_size,
            object = excluded.object,
            date_obs = excluded.date_obs,
            exptime = excluded.exptime,
            filter = excluded.filter,
            imgtype = excluded.imgtype,
            xbinning = excluded.xbinning,
            ybinning = excluded.ybinning,
            egain = excluded.egain,
            "offset" = excluded."offset",
            xpixsz = excluded.xpixsz,
            ypixsz = excluded.ypixsz,
            instrume = excluded.instrume,
            set_temp = excluded.set_temp,
            ccd_temp = excluded.ccd_temp,
            telescop = excluded.telescop,
            focallen = excluded.focallen,
            focratio = excluded.focratio,
            ra = excluded.ra,
            "dec" = excluded."dec",
            centalt = excluded.centalt,
            centaz = excluded.centaz,
            airmass = excluded.airmass,
            pierside = excluded.pierside,
            siteelev = excluded.siteelev,
            sitelat = excluded.sitelat,
            sitelong = excluded.sitelong,
            focpos = excluded.focpos,
            thumbnail = COALESCE(excluded.thumbnail, files.thumbnail),
            deleted_at = NULL,
            updated_at = CURRENT_TIMESTAMP
        "#,
    )
    .bind(rel)
    .bind(file_hash)
    .bind(name)
    .bind(mtime)
    .bind(size)
    .bind(&meta.object)
    .bind(date_obs)
    .bind(meta.exptime)
    .bind(&meta.filter)
    .bind(&meta.imgtype)
    .bind(meta.xbinning)
    .bind(meta.ybinning)
    .bind(meta.egain)
    .bind(meta.offset)
    .bind(meta.xpixsz)
    .bind(meta.ypixsz)
    .bind(&meta.instrume)
    .bind(meta.set_temp)
    .bind(meta.ccd_temp)
    .bind(&meta.telescop)
    .bind(meta.focallen)
    .bind(meta.focratio)
    .bind(meta.ra)
    .bind(meta.dec)
    .bind(meta.centalt)
    .bind(meta.centaz)
    .bind(meta.airmass)
    .bind(&meta.pierside)
    .bind(meta.siteelev)
    .bind(meta.sitelat)
    .bind(meta.sitelong)
    .bind(meta.focpos)
    .bind(thumbnail)
    .execute(&mut *conn)
    .await?;

    Ok(())
}
