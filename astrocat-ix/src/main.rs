//! astrocat-ix - Astro image catalog indexer
//!
//! Walks a directory tree of FITS/XISF images and reconciles a SQLite
//! catalog against it: metadata extraction, content-hash duplicate
//! accounting, thumbnail rendering, and the soft-delete/purge lifecycle
//! for files that leave the tree.

use anyhow::{bail, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

use astrocat_ix::{Reconciler, RunOptions};

#[derive(Parser, Debug)]
#[command(name = "astrocat-ix", version, about = "Astro image catalog indexer")]
struct Args {
    /// Catalog root directory to index
    root: PathBuf,

    /// Path to the catalog database
    #[arg(long, env = "ASTROCAT_DB_PATH", default_value = "astrocat.db")]
    db_path: PathBuf,

    /// Reprocess every file regardless of mtime/size
    #[arg(long)]
    force: bool,

    /// Thumbnail bounding box in pixels (0 disables thumbnails)
    #[arg(long, env = "ASTROCAT_THUMB_SIZE", default_value_t = 300)]
    thumb_size: u32,

    /// Skip the soft-delete and purge sweeps
    #[arg(long)]
    skip_cleanup: bool,

    /// Days a soft-deleted entry survives before purging (0 disables)
    #[arg(long, env = "ASTROCAT_RETENTION_DAYS", default_value_t = 30)]
    retention_days: i64,

    /// Enable debug logging
    #[arg(long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let default_filter = if args.debug { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter)),
        )
        .init();

    info!("astrocat-ix {}", env!("CARGO_PKG_VERSION"));

    if !args.root.is_dir() {
        bail!("Catalog root is not a directory: {}", args.root.display());
    }

    let pool = astrocat_common::db::init_database(&args.db_path).await?;

    let reconciler = Reconciler::new(
        pool.clone(),
        RunOptions {
            root: args.root,
            force: args.force,
            thumb_size: args.thumb_size,
            skip_cleanup: args.skip_cleanup,
            retention_days: args.retention_days,
        },
    );

    let result = reconciler.run().await;
    pool.close().await;

    let summary = result?;
    info!(
        "Done in {:.1?}: {} scanned, {} processed, {} skipped, {} failed, {} soft-deleted, {} purged",
        summary.duration,
        summary.scanned,
        summary.processed,
        summary.skipped,
        summary.failed,
        summary.soft_deleted,
        summary.purged
    );

    Ok(())
}
