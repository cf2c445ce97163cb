//! Duplicate accounting
//!
//! Every active catalog row with the same content hash is a member of
//! one duplicate group. Each member carries the group's sizes
//! denormalized: `total_duplicate_count` counts active members,
//! `visible_duplicate_count` counts active members that are not hidden.
//! Counts are recomputed from scratch per hash after any mutation that
//! can change group membership.

use sqlx::SqliteConnection;
use tracing::warn;

/// Recompute and store both duplicate counts for one content hash
///
/// Soft-deleted rows neither contribute to the counts nor receive them;
/// their stored counts are stale by design and refreshed if the row is
/// ever restored. An empty hash set is a no-op.
pub async fn recompute_duplicate_counts(
    conn: &mut SqliteConnection,
    file_hash: &str,
) -> Result<(), sqlx::Error> {
    if file_hash.is_empty() {
        return Ok(());
    }

    let (total, visible): (i64, i64) = sqlx::query_as(
        "SELECT COUNT(*), \
                COALESCE(SUM(CASE WHEN is_hidden = 0 THEN 1 ELSE 0 END), 0) \
         FROM files WHERE file_hash = ? AND deleted_at IS NULL",
    )
    .bind(file_hash)
    .fetch_one(&mut *conn)
    .await?;

    sqlx::query(
        "UPDATE files SET total_duplicate_count = ?, visible_duplicate_count = ? \
         WHERE file_hash = ? AND deleted_at IS NULL",
    )
    .bind(total)
    .bind(visible)
    .bind(file_hash)
    .execute(&mut *conn)
    .await?;

    Ok(())
}

/// Recompute counts for a batch of hashes, logging failures per hash
///
/// Count maintenance is bookkeeping on top of an already-committed
/// mutation; a failed recompute leaves stale counts but must not abort
/// the run.
pub async fn recompute_many(conn: &mut SqliteConnection, hashes: &[String]) {
    for hash in hashes {
        if let Err(e) = recompute_duplicate_counts(conn, hash).await {
            warn!(hash = %hash, error = %e, "Duplicate count update failed");
        }
    }
}
