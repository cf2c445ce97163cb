//! Per-folder stretch settings resolution
//!
//! Settings rows are administered externally, keyed by absolute folder
//! path within the catalog ("/" is the root). A folder inherits the most
//! specific ancestor whose row either matches it exactly or is flagged
//! `apply_to_subfolders`. Resolution never blocks the pipeline: a failed
//! or empty lookup yields the documented default.

use astrocat_common::db::{StretchSettings, StretchType};
use sqlx::{QueryBuilder, Row, SqliteConnection};
use tracing::warn;

/// Ancestor candidate paths for a folder, most specific first, root last
///
/// `folder_path` is the path of the folder relative to the catalog root;
/// empty means the root itself.
pub fn candidate_paths(folder_path: &str) -> Vec<String> {
    let trimmed = folder_path.trim_matches('/');
    let mut paths = vec!["/".to_string()];

    if !trimmed.is_empty() {
        let mut current = String::new();
        for part in trimmed.split('/') {
            current.push('/');
            current.push_str(part);
            paths.insert(0, current.clone());
        }
    }

    paths
}

/// Canonical absolute form of a relative folder path
fn absolute(folder_path: &str) -> String {
    let trimmed = folder_path.trim_matches('/');
    if trimmed.is_empty() {
        "/".to_string()
    } else {
        format!("/{}", trimmed)
    }
}

/// Resolve the effective stretch settings for a folder
///
/// Selects, among stored rows on the ancestor chain, the longest path
/// that either equals the folder exactly or propagates to subfolders.
/// Store failures degrade to the default rather than failing the run.
pub async fn resolve_stretch_settings(
    conn: &mut SqliteConnection,
    folder_path: &str,
) -> StretchSettings {
    let candidates = candidate_paths(folder_path);
    let exact = absolute(folder_path);

    let mut qb = QueryBuilder::new(
        "SELECT stretch_type, apply_to_subfolders, linear_low_percent, linear_high_percent, \
         stf_shadow_clip, stf_highlight_clip, stf_midtones_balance, stf_strength \
         FROM folder_stretch_settings WHERE folder_path IN (",
    );
    let mut sep = qb.separated(", ");
    for path in &candidates {
        sep.push_bind(path);
    }
    qb.push(") AND (apply_to_subfolders = 1 OR folder_path = ");
    qb.push_bind(&exact);
    qb.push(") ORDER BY LENGTH(folder_path) DESC LIMIT 1");

    let row = match qb.build().fetch_optional(conn).await {
        Ok(row) => row,
        Err(e) => {
            warn!(folder = %exact, error = %e, "Stretch settings lookup failed, using defaults");
            return StretchSettings::default();
        }
    };

    let Some(row) = row else {
        return StretchSettings::default();
    };

    match settings_from_row(&row) {
        Ok(settings) => settings,
        Err(e) => {
            warn!(folder = %exact, error = %e, "Malformed stretch settings row, using defaults");
            StretchSettings::default()
        }
    }
}

fn settings_from_row(row: &sqlx::sqlite::SqliteRow) -> Result<StretchSettings, sqlx::Error> {
    Ok(StretchSettings {
        stretch_type: StretchType::from_db(&row.try_get::<String, _>("stretch_type")?),
        apply_to_subfolders: row.try_get::<i64, _>("apply_to_subfolders")? != 0,
        linear_low_percent: row.try_get("linear_low_percent")?,
        linear_high_percent: row.try_get("linear_high_percent")?,
        stf_shadow_clip: row.try_get("stf_shadow_clip")?,
        stf_highlight_clip: row.try_get("stf_highlight_clip")?,
        stf_midtones_balance: row.try_get("stf_midtones_balance")?,
        stf_strength: row.try_get("stf_strength")?,
    })
}
