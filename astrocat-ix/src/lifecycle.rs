//! Catalog entry lifecycle
//!
//! Entries leave the catalog in two stages. A file that disappears from
//! disk is soft-deleted: its row survives with `deleted_at` set, so a
//! restored file picks its metadata and thumbnail back up without
//! reprocessing. Soft-deleted rows past the retention window are purged
//! for good.

use crate::dedup;
use chrono::Utc;
use sqlx::{QueryBuilder, Row, SqliteConnection};
use tracing::{debug, info};

/// SQLite bind-parameter headroom caps how many paths one statement can
/// carry
const BATCH_SIZE: usize = 500;

/// Soft-delete catalog entries whose paths are no longer present on disk
///
/// `missing_paths` is the set difference between active rows and the
/// scan result, relative to the catalog root. Each affected duplicate
/// group has its counts recomputed afterwards. The whole sweep runs as
/// one transaction; the marks and the recomputes become visible
/// together or not at all. Returns the number of rows marked.
pub async fn soft_delete_missing(
    conn: &mut SqliteConnection,
    missing_paths: &[String],
) -> Result<u64, sqlx::Error> {
    if missing_paths.is_empty() {
        return Ok(0);
    }

    sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

    let now = Utc::now().timestamp();
    let mut marked = 0u64;
    let mut touched_hashes: Vec<String> = Vec::new();

    for batch in missing_paths.chunks(BATCH_SIZE) {
        let mut select = QueryBuilder::new(
            "SELECT DISTINCT file_hash FROM files WHERE deleted_at IS NULL AND path IN (",
        );
        let mut sep = select.separated(", ");
        for path in batch {
            sep.push_bind(path);
        }
        select.push(")");

        for row in select.build().fetch_all(&mut *conn).await? {
            let hash: String = row.try_get(0)?;
            if !touched_hashes.contains(&hash) {
                touched_hashes.push(hash);
            }
        }

        let mut update =
            QueryBuilder::new("UPDATE files SET deleted_at = ");
        update.push_bind(now);
        update.push(" WHERE deleted_at IS NULL AND path IN (");
        let mut sep = update.separated(", ");
        for path in batch {
            sep.push_bind(path);
        }
        update.push(")");

        marked += update.build().execute(&mut *conn).await?.rows_affected();
    }

    dedup::recompute_many(conn, &touched_hashes).await;

    sqlx::query("COMMIT").execute(&mut *conn).await?;

    if marked > 0 {
        info!(count = marked, "Soft-deleted entries missing from disk");
    }
    Ok(marked)
}

/// Permanently remove soft-deleted entries older than the retention
/// window
///
/// `retention_days` of zero or less disables purging. Counts are
/// recomputed for the groups the purged rows belonged to, covering the
/// surviving members. Deletes and recomputes commit as one transaction.
/// Returns the number of rows removed.
pub async fn purge_expired(
    conn: &mut SqliteConnection,
    retention_days: i64,
) -> Result<u64, sqlx::Error> {
    if retention_days <= 0 {
        debug!("Purging disabled, retention window not set");
        return Ok(0);
    }

    sqlx::query("BEGIN IMMEDIATE").execute(&mut *conn).await?;

    let cutoff = Utc::now().timestamp() - retention_days * 86_400;

    let rows = sqlx::query(
        "SELECT DISTINCT file_hash FROM files WHERE deleted_at IS NOT NULL AND deleted_at < ?",
    )
    .bind(cutoff)
    .fetch_all(&mut *conn)
    .await?;
    let touched_hashes: Vec<String> = rows
        .iter()
        .map(|r| r.try_get(0))
        .collect::<Result<_, _>>()?;

    let purged = sqlx::query("DELETE FROM files WHERE deleted_at IS NOT NULL AND deleted_at < ?")
        .bind(cutoff)
        .execute(&mut *conn)
        .await?
        .rows_affected();

    dedup::recompute_many(conn, &touched_hashes).await;

    sqlx::query("COMMIT").execute(&mut *conn).await?;

    if purged > 0 {
        info!(count = purged, retention_days, "Purged expired entries");
    }
    Ok(purged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use sqlx::sqlite::SqlitePoolOptions;
    use sqlx::SqlitePool;

    async fn setup_pool() -> SqlitePool {
        // Single connection so the in-memory database is shared
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect(":memory:")
            .await
            .unwrap();
        astrocat_common::db::create_files_table(&pool).await.unwrap();
        pool
    }

    async fn insert_file(pool: &SqlitePool, path: &str, hash: &str, deleted_at: Option<i64>) {
        sqlx::query(
            "INSERT INTO files (path, file_hash, name, deleted_at) VALUES (?, ?, ?, ?)",
        )
        .bind(path)
        .bind(hash)
        .bind(path.rsplit('/').next().unwrap())
        .bind(deleted_at)
        .execute(pool)
        .await
        .unwrap();
    }

    async fn deleted_at(pool: &SqlitePool, path: &str) -> Option<i64> {
        sqlx::query_scalar("SELECT deleted_at FROM files WHERE path = ?")
            .bind(path)
            .fetch_one(pool)
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_soft_delete_marks_only_listed_active_rows() {
        let pool = setup_pool().await;
        insert_file(&pool, "gone.fits", "aaaa", None).await;
        insert_file(&pool, "kept.fits", "bbbb", None).await;
        insert_file(&pool, "already.fits", "cccc", Some(100)).await;

        let mut conn = pool.acquire().await.unwrap();
        let marked = soft_delete_missing(
            &mut conn,
            &["gone.fits".to_string(), "already.fits".to_string()],
        )
        .await
        .unwrap();
        drop(conn);

        assert_eq!(marked, 1);
        assert!(deleted_at(&pool, "gone.fits").await.is_some());
        assert!(deleted_at(&pool, "kept.fits").await.is_none());
        // Timestamp of an already-deleted row is preserved
        assert_eq!(deleted_at(&pool, "already.fits").await, Some(100));
    }

    #[tokio::test]
    async fn test_soft_delete_updates_survivor_counts() {
        let pool = setup_pool().await;
        insert_file(&pool, "a.fits", "aaaa", None).await;
        insert_file(&pool, "b.fits", "aaaa", None).await;

        let mut conn = pool.acquire().await.unwrap();
        dedup::recompute_duplicate_counts(&mut conn, "aaaa")
            .await
            .unwrap();
        soft_delete_missing(&mut conn, &["b.fits".to_string()])
            .await
            .unwrap();
        drop(conn);

        let total: i64 =
            sqlx::query_scalar("SELECT total_duplicate_count FROM files WHERE path = 'a.fits'")
                .fetch_one(&pool)
                .await
                .unwrap();
        assert_eq!(total, 1);
    }

    #[tokio::test]
    async fn test_soft_delete_batches_large_path_sets() {
        let pool = setup_pool().await;
        let mut paths = Vec::new();
        for i in 0..(BATCH_SIZE + 10) {
            let path = format!("frame{:04}.fits", i);
            insert_file(&pool, &path, &format!("h{:04}", i), None).await;
            paths.push(path);
        }

        let mut conn = pool.acquire().await.unwrap();
        let marked = soft_delete_missing(&mut conn, &paths).await.unwrap();
        assert_eq!(marked, (BATCH_SIZE + 10) as u64);
    }

    #[tokio::test]
    async fn test_purge_retention_boundary() {
        let pool = setup_pool().await;
        let now = Utc::now().timestamp();
        // One day either side of the 30-day window
        insert_file(&pool, "old.fits", "aaaa", Some(now - 31 * 86_400)).await;
        insert_file(&pool, "recent.fits", "bbbb", Some(now - 29 * 86_400)).await;
        insert_file(&pool, "active.fits", "cccc", None).await;

        let mut conn = pool.acquire().await.unwrap();
        let purged = purge_expired(&mut conn, 30).await.unwrap();
        drop(conn);

        assert_eq!(purged, 1);
        let remaining: Vec<String> = sqlx::query_scalar("SELECT path FROM files ORDER BY path")
            .fetch_all(&pool)
            .await
            .unwrap();
        assert_eq!(remaining, vec!["active.fits", "recent.fits"]);
    }

    #[tokio::test]
    async fn test_sweeps_commit_their_own_transactions() {
        // File-backed database so a second connection observes only
        // committed state
        let dir = tempfile::tempdir().unwrap();
        let pool = astrocat_common::db::init_database(&dir.path().join("catalog.db"))
            .await
            .unwrap();
        insert_file(&pool, "a.fits", "aaaa", None).await;
        insert_file(&pool, "b.fits", "aaaa", None).await;

        let mut writer = pool.acquire().await.unwrap();
        dedup::recompute_duplicate_counts(&mut writer, "aaaa")
            .await
            .unwrap();
        soft_delete_missing(&mut writer, &["b.fits".to_string()])
            .await
            .unwrap();

        // The sweep committed internally: no transaction left open
        assert!(sqlx::query("ROLLBACK").execute(&mut *writer).await.is_err());

        // Mark and recompute are durable together from another connection
        let mut reader = pool.acquire().await.unwrap();
        let (deleted, total): (Option<i64>, i64) = sqlx::query_as(
            "SELECT deleted_at, total_duplicate_count FROM files WHERE path = 'b.fits'",
        )
        .fetch_one(&mut *reader)
        .await
        .unwrap();
        assert!(deleted.is_some());
        let total_survivor: i64 =
            sqlx::query_scalar("SELECT total_duplicate_count FROM files WHERE path = 'a.fits'")
                .fetch_one(&mut *reader)
                .await
                .unwrap();
        assert_eq!(total_survivor, 1);
        // The deleted row keeps its pre-sweep counts
        assert_eq!(total, 2);

        // Purge sweep likewise leaves no dangling transaction
        sqlx::query("UPDATE files SET deleted_at = 1 WHERE path = 'b.fits'")
            .execute(&mut *writer)
            .await
            .unwrap();
        purge_expired(&mut writer, 30).await.unwrap();
        assert!(sqlx::query("ROLLBACK").execute(&mut *writer).await.is_err());

        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM files")
            .fetch_one(&mut *reader)
            .await
            .unwrap();
        assert_eq!(count, 1);
        drop(writer);
        drop(reader);
        pool.close().await;
    }

    #[tokio::test]
    async fn test_purge_disabled_by_nonpositive_retention() {
        let pool = setup_pool().await;
        let now = Utc::now().timestamp();
        insert_file(&pool, "old.fits", "aaaa", Some(now - 400 * 86_400)).await;

        let mut conn = pool.acquire().await.unwrap();
        assert_eq!(purge_expired(&mut conn, 0).await.unwrap(), 0);
        assert_eq!(purge_expired(&mut conn, -3).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_purge_refreshes_surviving_group_counts() {
        let pool = setup_pool().await;
        let now = Utc::now().timestamp();
        insert_file(&pool, "live.fits", "aaaa", None).await;
        insert_file(&pool, "dead.fits", "aaaa", Some(now - 90 * 86_400)).await;
        sqlx::query("UPDATE files SET total_duplicate_count = 9, visible_duplicate_count = 9")
            .execute(&pool)
            .await
            .unwrap();

        let mut conn = pool.acquire().await.unwrap();
        purge_expired(&mut conn, 30).await.unwrap();
        drop(conn);

        let (total, visible): (i64, i64) = sqlx::query_as(
            "SELECT total_duplicate_count, visible_duplicate_count FROM files WHERE path = 'live.fits'",
        )
        .fetch_one(&pool)
        .await
        .unwrap();
        assert_eq!((total, visible), (1, 1));
    }
}
