//! Header normalization
//!
//! FITS and XISF containers expose keywords in two shapes: a flat
//! key -> scalar card set, and a key -> list-of-keyword-objects map where
//! the first entry's `value` holds the scalar. `HeaderView` presents one
//! typed accessor over both; each decoder hands back the implementation
//! matching its source format.
//!
//! Coercion is deliberately forgiving: an absent key, an empty value, or
//! a value that does not parse as the requested type all read as `None`
//! so one malformed card never fails a whole file.

use chrono::{NaiveDate, NaiveDateTime};
use std::collections::HashMap;

/// Typed, default-tolerant access to image header keywords
pub trait HeaderView {
    /// Raw scalar for a key; `None` when absent or empty
    fn first(&self, key: &str) -> Option<&str>;

    fn get_str(&self, key: &str) -> Option<String> {
        self.first(key).map(|s| s.to_string())
    }

    fn get_f64(&self, key: &str) -> Option<f64> {
        self.first(key)?.trim().parse().ok()
    }

    fn get_i64(&self, key: &str) -> Option<i64> {
        self.first(key)?.trim().parse().ok()
    }

    /// Case-insensitive "true"/"false"; anything else reads as absent
    fn get_bool(&self, key: &str) -> Option<bool> {
        self.first(key)?.trim().to_ascii_lowercase().parse().ok()
    }
}

/// Flat card set produced by the FITS decoder
#[derive(Debug, Default, Clone)]
pub struct FitsHeader {
    cards: HashMap<String, String>,
}

impl FitsHeader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.cards.insert(key.into(), value.into());
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}

impl HeaderView for FitsHeader {
    fn first(&self, key: &str) -> Option<&str> {
        self.cards
            .get(key)
            .map(|v| v.as_str())
            .filter(|v| !v.is_empty())
    }
}

/// One FITS-keyword entry carried in an XISF header
#[derive(Debug, Clone)]
pub struct XisfKeyword {
    pub value: String,
    pub comment: Option<String>,
}

/// Keyword list map produced by the XISF decoder
///
/// XISF keeps every repetition of a keyword; the first occurrence is the
/// authoritative scalar, matching the container's own convention.
#[derive(Debug, Default, Clone)]
pub struct XisfHeader {
    keywords: HashMap<String, Vec<XisfKeyword>>,
}

impl XisfHeader {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, key: impl Into<String>, keyword: XisfKeyword) {
        self.keywords.entry(key.into()).or_default().push(keyword);
    }
}

impl HeaderView for XisfHeader {
    fn first(&self, key: &str) -> Option<&str> {
        self.keywords
            .get(key)?
            .first()
            .map(|k| k.value.as_str())
            .filter(|v| !v.is_empty())
    }
}

/// Parse a DATE-OBS style timestamp
///
/// Slash-delimited dates are normalized to dashes first; the format
/// (date-only vs date-time) is detected from the 'T' separator. Returns
/// `None` for anything unparsable; callers decide whether to log.
pub fn parse_date_obs(raw: &str) -> Option<NaiveDateTime> {
    let normalized = raw.trim().replace('/', "-");
    if normalized.is_empty() {
        return None;
    }

    if normalized.contains('T') {
        NaiveDateTime::parse_from_str(&normalized, "%Y-%m-%dT%H:%M:%S%.f").ok()
    } else {
        NaiveDate::parse_from_str(&normalized, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
    }
}
