//! astrocat-ix library interface
//!
//! Exposes the indexing pipeline for integration testing:
//! scan -> hash -> decode -> stretch/thumbnail -> upsert, followed by
//! the soft-delete and purge sweeps with duplicate accounting.

pub mod decode;
pub mod dedup;
pub mod hasher;
pub mod header;
pub mod lifecycle;
pub mod metadata;
pub mod reconcile;
pub mod scanner;
pub mod settings;
pub mod stretch;
pub mod thumbnail;

pub use reconcile::{Reconciler, RunOptions, RunSummary};
