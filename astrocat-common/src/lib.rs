//! # Astrocat Common Library
//!
//! Shared code for the astrocat indexer:
//! - Database initialization and schema
//! - Catalog and stretch-settings models
//! - Common error types

pub mod db;
pub mod error;

pub use error::{Error, Result};
