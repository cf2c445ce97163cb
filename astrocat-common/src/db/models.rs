//! Database models

use serde::{Deserialize, Serialize};

/// Prior catalog state for one path, loaded at the start of a run.
///
/// Only the fields needed for the skip/process decision are carried;
/// the observational attributes stay in the database.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileState {
    pub path: String,
    pub file_hash: String,
    /// Filesystem mtime in float seconds, compared as whole seconds
    pub mtime: Option<f64>,
    pub file_size: Option<i64>,
    /// Epoch seconds of the soft delete, NULL for active entries
    pub deleted_at: Option<i64>,
}

impl FileState {
    /// An entry is active unless it carries a soft-delete marker
    pub fn is_active(&self) -> bool {
        self.deleted_at.is_none()
    }
}

/// Tone-mapping algorithm selectable per folder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StretchType {
    Linear,
    PixinsightStf,
}

impl StretchType {
    pub fn as_str(&self) -> &'static str {
        match self {
            StretchType::Linear => "linear",
            StretchType::PixinsightStf => "pixinsight_stf",
        }
    }

    /// Parse the stored type name; unknown values fall back to linear
    pub fn from_db(s: &str) -> Self {
        match s {
            "pixinsight_stf" => StretchType::PixinsightStf,
            _ => StretchType::Linear,
        }
    }
}

/// Per-folder stretch configuration
///
/// `Default` is the documented fallback used when no stored settings
/// match a folder or the lookup fails: linear stretch with 0.5/99.5
/// percentiles, inherited by subfolders.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StretchSettings {
    pub stretch_type: StretchType,
    pub apply_to_subfolders: bool,
    pub linear_low_percent: f64,
    pub linear_high_percent: f64,
    pub stf_shadow_clip: f64,
    pub stf_highlight_clip: f64,
    pub stf_midtones_balance: f64,
    pub stf_strength: f64,
}

impl Default for StretchSettings {
    fn default() -> Self {
        Self {
            stretch_type: StretchType::Linear,
            apply_to_subfolders: true,
            linear_low_percent: 0.5,
            linear_high_percent: 99.5,
            stf_shadow_clip: 0.0,
            stf_highlight_clip: 0.0,
            stf_midtones_balance: 0.5,
            stf_strength: 1.0,
        }
    }
}
