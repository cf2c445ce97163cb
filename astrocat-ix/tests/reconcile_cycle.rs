//! End-to-end reconciliation tests
//!
//! Each test builds a small tree of synthetic FITS files in a temp
//! directory, runs the reconciler against a fresh file-backed catalog,
//! and checks the database state it leaves behind.

use astrocat_ix::{Reconciler, RunOptions, RunSummary};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use tempfile::TempDir;

const BLOCK_SIZE: usize = 2880;
const CARD_SIZE: usize = 80;

fn card(text: &str) -> [u8; CARD_SIZE] {
    let mut out = [b' '; CARD_SIZE];
    out[..text.len()].copy_from_slice(text.as_bytes());
    out
}

/// Minimal single-HDU FITS image: 4x4 float32 gradient scaled by `seed`
fn fits_bytes(object: &str, exptime: f64, seed: f32) -> Vec<u8> {
    let cards = [
        "SIMPLE  =                    T".to_string(),
        "BITPIX  =                  -32".to_string(),
        "NAXIS   =                    2".to_string(),
        "NAXIS1  =                    4".to_string(),
        "NAXIS2  =                    4".to_string(),
        format!("OBJECT  = '{}'", object),
        format!("EXPTIME = {:>20}", exptime),
        "IMAGETYP= 'Light   '".to_string(),
        "FILTER  = 'Ha      '".to_string(),
        "DATE-OBS= '2024-03-01T21:00:00'".to_string(),
    ];

    let mut bytes = Vec::new();
    for c in &cards {
        bytes.extend_from_slice(&card(c));
    }
    bytes.extend_from_slice(&card("END"));
    while bytes.len() % BLOCK_SIZE != 0 {
        bytes.push(b' ');
    }
    for i in 0..16 {
        bytes.extend_from_slice(&(i as f32 * seed).to_be_bytes());
    }
    while bytes.len() % BLOCK_SIZE != 0 {
        bytes.push(0);
    }
    bytes
}

fn write_fits(root: &Path, rel: &str, object: &str, exptime: f64, seed: f32) {
    let path = root.join(rel);
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).unwrap();
    }
    std::fs::write(path, fits_bytes(object, exptime, seed)).unwrap();
}

struct Harness {
    root: TempDir,
    pool: SqlitePool,
    _db_dir: TempDir,
}

impl Harness {
    async fn new() -> Self {
        let root = TempDir::new().unwrap();
        let db_dir = TempDir::new().unwrap();
        let pool = astrocat_common::db::init_database(&db_dir.path().join("catalog.db"))
            .await
            .unwrap();
        Self {
            root,
            pool,
            _db_dir: db_dir,
        }
    }

    fn options(&self) -> RunOptions {
        RunOptions {
            root: self.root.path().to_path_buf(),
            force: false,
            thumb_size: 64,
            skip_cleanup: false,
            retention_days: 30,
        }
    }

    async fn run(&self) -> RunSummary {
        self.run_with(self.options()).await
    }

    async fn run_with(&self, options: RunOptions) -> RunSummary {
        Reconciler::new(self.pool.clone(), options)
            .run()
            .await
            .unwrap()
    }
}

#[tokio::test]
async fn test_first_run_catalogs_everything() {
    let h = Harness::new().await;
    write_fits(h.root.path(), "lights/m42_001.fits", "M 42", 120.0, 1.0);
    write_fits(h.root.path(), "lights/m42_002.fits", "M 42", 120.0, 2.0);
    write_fits(h.root.path(), "darks/dark_001.fits", "", 120.0, 0.0);

    let summary = h.run().await;
    assert_eq!(summary.scanned, 3);
    assert_eq!(summary.processed, 3);
    assert_eq!(summary.skipped, 0);
    assert_eq!(summary.failed, 0);

    let row = sqlx::query(
        "SELECT name, object, exptime, imgtype, filter, date_obs, thumbnail, deleted_at \
         FROM files WHERE path = 'lights/m42_001.fits'",
    )
    .fetch_one(&h.pool)
    .await
    .unwrap();
    assert_eq!(row.get::<String, _>("name"), "m42_001.fits");
    assert_eq!(row.get::<String, _>("object"), "M 42");
    assert_eq!(row.get::<f64, _>("exptime"), 120.0);
    assert_eq!(row.get::<String, _>("imgtype"), "LIGHT");
    assert_eq!(row.get::<String, _>("filter"), "Ha");
    assert!(row
        .get::<String, _>("date_obs")
        .starts_with("2024-03-01T21:00:00"));
    assert!(row.get::<Option<i64>, _>("deleted_at").is_none());

    // Thumbnail is a PNG
    let thumb: Vec<u8> = row.get("thumbnail");
    assert_eq!(&thumb[..4], &[0x89, b'P', b'N', b'G']);

    // Empty OBJECT reads as Unknown
    let object: String =
        sqlx::query_scalar("SELECT object FROM files WHERE path = 'darks/dark_001.fits'")
            .fetch_one(&h.pool)
            .await
            .unwrap();
    assert_eq!(object, "Unknown");
}

#[tokio::test]
async fn test_second_run_skips_unchanged_files() {
    let h = Harness::new().await;
    write_fits(h.root.path(), "a.fits", "M 1", 60.0, 1.0);
    write_fits(h.root.path(), "b.fits", "M 1", 60.0, 2.0);

    h.run().await;
    let summary = h.run().await;
    assert_eq!(summary.processed, 0);
    assert_eq!(summary.skipped, 2);
}

#[tokio::test]
async fn test_force_reprocesses_unchanged_files() {
    let h = Harness::new().await;
    write_fits(h.root.path(), "a.fits", "M 1", 60.0, 1.0);
    h.run().await;

    let mut options = h.options();
    options.force = true;
    let summary = h.run_with(options).await;
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.skipped, 0);
}

#[tokio::test]
async fn test_changed_file_is_reprocessed() {
    let h = Harness::new().await;
    write_fits(h.root.path(), "a.fits", "M 1", 60.0, 1.0);
    h.run().await;

    let old_hash: String = sqlx::query_scalar("SELECT file_hash FROM files WHERE path = 'a.fits'")
        .fetch_one(&h.pool)
        .await
        .unwrap();

    // Same size, new content, mtime pushed clear of the stored second
    write_fits(h.root.path(), "a.fits", "M 1", 60.0, 3.0);
    let f = std::fs::OpenOptions::new()
        .write(true)
        .open(h.root.path().join("a.fits"))
        .unwrap();
    f.set_modified(std::time::SystemTime::now() + std::time::Duration::from_secs(10))
        .unwrap();

    let summary = h.run().await;
    assert_eq!(summary.processed, 1);

    let new_hash: String = sqlx::query_scalar("SELECT file_hash FROM files WHERE path = 'a.fits'")
        .fetch_one(&h.pool)
        .await
        .unwrap();
    assert_ne!(old_hash, new_hash);
}

#[tokio::test]
async fn test_duplicate_counts_across_folders() {
    let h = Harness::new().await;
    // Identical content in two places, distinct content in a third
    write_fits(h.root.path(), "a/same.fits", "M 42", 120.0, 1.0);
    write_fits(h.root.path(), "b/same.fits", "M 42", 120.0, 1.0);
    write_fits(h.root.path(), "c/other.fits", "M 42", 120.0, 2.0);

    h.run().await;

    let (total, visible): (i64, i64) = sqlx::query_as(
        "SELECT total_duplicate_count, visible_duplicate_count \
         FROM files WHERE path = 'a/same.fits'",
    )
    .fetch_one(&h.pool)
    .await
    .unwrap();
    assert_eq!((total, visible), (2, 2));

    let (total, visible): (i64, i64) = sqlx::query_as(
        "SELECT total_duplicate_count, visible_duplicate_count \
         FROM files WHERE path = 'c/other.fits'",
    )
    .fetch_one(&h.pool)
    .await
    .unwrap();
    assert_eq!((total, visible), (1, 1));
}

#[tokio::test]
async fn test_vanished_file_is_soft_deleted_and_revived() {
    let h = Harness::new().await;
    write_fits(h.root.path(), "keep.fits", "M 1", 60.0, 1.0);
    write_fits(h.root.path(), "gone.fits", "M 1", 60.0, 2.0);
    h.run().await;

    std::fs::remove_file(h.root.path().join("gone.fits")).unwrap();
    let summary = h.run().await;
    assert_eq!(summary.soft_deleted, 1);

    let deleted_at: Option<i64> =
        sqlx::query_scalar("SELECT deleted_at FROM files WHERE path = 'gone.fits'")
            .fetch_one(&h.pool)
            .await
            .unwrap();
    assert!(deleted_at.is_some());

    // The file comes back: row revived, marker cleared
    write_fits(h.root.path(), "gone.fits", "M 1", 60.0, 2.0);
    let summary = h.run().await;
    assert_eq!(summary.processed, 1);

    let deleted_at: Option<i64> =
        sqlx::query_scalar("SELECT deleted_at FROM files WHERE path = 'gone.fits'")
            .fetch_one(&h.pool)
            .await
            .unwrap();
    assert!(deleted_at.is_none());
}

#[tokio::test]
async fn test_expired_soft_deleted_rows_are_purged() {
    let h = Harness::new().await;
    write_fits(h.root.path(), "keep.fits", "M 1", 60.0, 1.0);
    write_fits(h.root.path(), "gone.fits", "M 1", 60.0, 2.0);
    h.run().await;

    std::fs::remove_file(h.root.path().join("gone.fits")).unwrap();
    h.run().await;

    // Age the marker past the retention window
    let old = chrono::Utc::now().timestamp() - 90 * 86_400;
    sqlx::query("UPDATE files SET deleted_at = ? WHERE path = 'gone.fits'")
        .bind(old)
        .execute(&h.pool)
        .await
        .unwrap();

    let summary = h.run().await;
    assert_eq!(summary.purged, 1);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files")
        .fetch_one(&h.pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_skip_cleanup_leaves_vanished_files_active() {
    let h = Harness::new().await;
    write_fits(h.root.path(), "gone.fits", "M 1", 60.0, 1.0);
    h.run().await;

    std::fs::remove_file(h.root.path().join("gone.fits")).unwrap();
    let mut options = h.options();
    options.skip_cleanup = true;
    let summary = h.run_with(options).await;
    assert_eq!(summary.soft_deleted, 0);

    let deleted_at: Option<i64> =
        sqlx::query_scalar("SELECT deleted_at FROM files WHERE path = 'gone.fits'")
            .fetch_one(&h.pool)
            .await
            .unwrap();
    assert!(deleted_at.is_none());
}

#[tokio::test]
async fn test_unreadable_image_counts_as_failure() {
    let h = Harness::new().await;
    write_fits(h.root.path(), "good.fits", "M 1", 60.0, 1.0);
    std::fs::write(h.root.path().join("junk.fits"), b"not a fits file").unwrap();

    let summary = h.run().await;
    assert_eq!(summary.scanned, 2);
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.failed, 1);

    // The bad file never gets a row
    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files")
        .fetch_one(&h.pool)
        .await
        .unwrap();
    assert_eq!(count, 1);
}

#[tokio::test]
async fn test_accounting_failure_does_not_fail_the_file() {
    let h = Harness::new().await;
    write_fits(h.root.path(), "a.fits", "M 1", 60.0, 1.0);

    // Make every duplicate-count update blow up; the upsert itself never
    // touches these columns
    sqlx::query(
        "CREATE TRIGGER no_counts BEFORE UPDATE OF total_duplicate_count ON files \
         BEGIN SELECT RAISE(ABORT, 'counts unavailable'); END",
    )
    .execute(&h.pool)
    .await
    .unwrap();

    let summary = h.run().await;
    assert_eq!(summary.processed, 1);
    assert_eq!(summary.failed, 0);

    // The row is cataloged, counts just stayed at their defaults
    let (hash, total): (String, i64) =
        sqlx::query_as("SELECT file_hash, total_duplicate_count FROM files WHERE path = 'a.fits'")
            .fetch_one(&h.pool)
            .await
            .unwrap();
    assert!(!hash.is_empty());
    assert_eq!(total, 0);
}

#[tokio::test]
async fn test_hidden_flag_survives_reprocessing() {
    let h = Harness::new().await;
    write_fits(h.root.path(), "a.fits", "M 1", 60.0, 1.0);
    h.run().await;

    sqlx::query("UPDATE files SET is_hidden = 1 WHERE path = 'a.fits'")
        .execute(&h.pool)
        .await
        .unwrap();

    let mut options = h.options();
    options.force = true;
    h.run_with(options).await;

    let is_hidden: i64 = sqlx::query_scalar("SELECT is_hidden FROM files WHERE path = 'a.fits'")
        .fetch_one(&h.pool)
        .await
        .unwrap();
    assert_eq!(is_hidden, 1);
}
