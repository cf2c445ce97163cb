//! Observational metadata extraction
//!
//! Pulls the typed attribute set (target, exposure, optics, pointing,
//! site geometry) out of a normalized header. Every field is
//! independently optional; a missing or malformed keyword never fails
//! the file.

use crate::header::{parse_date_obs, HeaderView};
use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

/// Extracted observational metadata for one image
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ImageMetadata {
    /// Target name, "Unknown" when the header does not say
    pub object: String,
    /// Observation timestamp
    pub date_obs: Option<NaiveDateTime>,
    /// Exposure time in seconds
    pub exptime: f64,
    /// Filter name, empty when unfiltered or unrecorded
    pub filter: String,
    /// Frame type (LIGHT, DARK, FLAT, BIAS, ...), uppercased
    pub imgtype: String,
    pub xbinning: Option<i64>,
    pub ybinning: Option<i64>,
    pub egain: Option<f64>,
    pub offset: Option<f64>,
    pub xpixsz: Option<f64>,
    pub ypixsz: Option<f64>,
    pub instrume: Option<String>,
    pub set_temp: Option<f64>,
    pub ccd_temp: Option<f64>,
    pub telescop: Option<String>,
    pub focallen: Option<f64>,
    pub focratio: Option<f64>,
    pub ra: Option<f64>,
    pub dec: Option<f64>,
    pub centalt: Option<f64>,
    pub centaz: Option<f64>,
    pub airmass: Option<f64>,
    pub pierside: Option<String>,
    pub siteelev: Option<f64>,
    pub sitelat: Option<f64>,
    pub sitelong: Option<f64>,
    pub focpos: Option<i64>,
}

/// Extract the attribute set from a header
///
/// `rel_path` is only used to give unparsable-date warnings a subject.
pub fn extract(header: &dyn HeaderView, rel_path: &str) -> ImageMetadata {
    let date_obs = match header.get_str("DATE-OBS") {
        Some(raw) => {
            let parsed = parse_date_obs(&raw);
            if parsed.is_none() {
                tracing::warn!(path = %rel_path, value = %raw, "Unparsable DATE-OBS");
            }
            parsed
        }
        None => None,
    };

    // FOCPOS and FOCUSPOS are the same quantity under two vendor spellings
    let focpos = header.get_i64("FOCPOS").or_else(|| header.get_i64("FOCUSPOS"));

    ImageMetadata {
        object: header
            .get_str("OBJECT")
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .unwrap_or_else(|| "Unknown".to_string()),
        date_obs,
        exptime: header.get_f64("EXPTIME").unwrap_or(0.0),
        filter: header.get_str("FILTER").unwrap_or_default(),
        imgtype: header
            .get_str("IMAGETYP")
            .map(|s| s.to_uppercase())
            .unwrap_or_else(|| "UNKNOWN".to_string()),
        xbinning: header.get_i64("XBINNING"),
        ybinning: header.get_i64("YBINNING"),
        egain: header.get_f64("EGAIN"),
        offset: header.get_f64("OFFSET"),
        xpixsz: header.get_f64("XPIXSZ"),
        ypixsz: header.get_f64("YPIXSZ"),
        instrume: header.get_str("INSTRUME"),
        set_temp: header.get_f64("SET-TEMP"),
        ccd_temp: header.get_f64("CCD-TEMP"),
        telescop: header.get_str("TELESCOP"),
        focallen: header.get_f64("FOCALLEN"),
        focratio: header.get_f64("FOCRATIO"),
        ra: header.get_f64("RA"),
        dec: header.get_f64("DEC"),
        centalt: header.get_f64("CENTALT"),
        centaz: header.get_f64("CENTAZ"),
        airmass: header.get_f64("AIRMASS"),
        pierside: header.get_str("PIERSIDE"),
        siteelev: header.get_f64("SITEELEV"),
        sitelat: header.get_f64("SITELAT"),
        sitelong: header.get_f64("SITELONG"),
        focpos,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::FitsHeader;

    #[test]
    fn test_extract_typical_light_frame() {
        let mut h = FitsHeader::new();
        h.insert("OBJECT", "  M42  ");
        h.insert("DATE-OBS", "2024-01-15T22:30:05");
        h.insert("EXPTIME", "120.0");
        h.insert("FILTER", "Ha");
        h.insert("IMAGETYP", "Light");
        h.insert("XBINNING", "1");
        h.insert("CCD-TEMP", "-10.2");
        h.insert("RA", "83.822");

        let m = extract(&h, "lights/m42_001.fits");
        assert_eq!(m.object, "M42");
        assert_eq!(m.exptime, 120.0);
        assert_eq!(m.filter, "Ha");
        assert_eq!(m.imgtype, "LIGHT");
        assert_eq!(m.xbinning, Some(1));
        assert_eq!(m.ccd_temp, Some(-10.2));
        assert_eq!(m.ra, Some(83.822));
        assert!(m.date_obs.is_some());
    }

    #[test]
    fn test_extract_defaults_for_bare_header() {
        let h = FitsHeader::new();
        let m = extract(&h, "misc/unknown.fits");
        assert_eq!(m.object, "Unknown");
        assert_eq!(m.exptime, 0.0);
        assert_eq!(m.filter, "");
        assert_eq!(m.imgtype, "UNKNOWN");
        assert!(m.date_obs.is_none());
        assert!(m.focpos.is_none());
    }

    #[test]
    fn test_focuspos_fallback() {
        let mut h = FitsHeader::new();
        h.insert("FOCUSPOS", "18250");
        let m = extract(&h, "f.fits");
        assert_eq!(m.focpos, Some(18250));

        // FOCPOS wins when both are present
        h.insert("FOCPOS", "18000");
        let m = extract(&h, "f.fits");
        assert_eq!(m.focpos, Some(18000));
    }

    #[test]
    fn test_unparsable_date_reads_as_absent() {
        let mut h = FitsHeader::new();
        h.insert("DATE-OBS", "last tuesday");
        let m = extract(&h, "f.fits");
        assert!(m.date_obs.is_none());
    }
}
