//! Tone-mapping ("stretch") transforms
//!
//! Pure numeric transforms from raw pixel values to a display-ready
//! [0, 1] range. Degenerate inputs (zero dynamic range, invalid clip
//! bounds) return an all-zero array of the same length; they are
//! expected outcomes, not errors, so no branch here can fail.

use astrocat_common::db::{StretchSettings, StretchType};

/// Apply the configured stretch variant
pub fn apply(data: &[f32], settings: &StretchSettings) -> Vec<f32> {
    match settings.stretch_type {
        StretchType::Linear => linear_stretch(
            data,
            settings.linear_low_percent,
            settings.linear_high_percent,
        ),
        StretchType::PixinsightStf => stf_stretch(
            data,
            settings.stf_shadow_clip,
            settings.stf_highlight_clip,
            settings.stf_midtones_balance,
            settings.stf_strength,
        ),
    }
}

/// Linear stretch with percentile clipping
///
/// NaN and infinite samples are excluded before the percentile
/// computation. When the high percentile does not exceed the low one
/// (flat frames, single-valued data) the result is all zeros.
pub fn linear_stretch(data: &[f32], low_percent: f64, high_percent: f64) -> Vec<f32> {
    let finite = finite_sorted(data);
    if finite.is_empty() {
        return vec![0.0; data.len()];
    }

    let p_low = percentile(&finite, low_percent);
    let p_high = percentile(&finite, high_percent);
    if p_high <= p_low {
        return vec![0.0; data.len()];
    }

    let range = p_high - p_low;
    data.iter()
        .map(|&x| {
            if x.is_finite() {
                ((x - p_low) / range).clamp(0.0, 1.0)
            } else {
                0.0
            }
        })
        .collect()
}

/// PixInsight-style screen transfer function stretch
///
/// Stages: min-max normalization, shadow/highlight clip, midtone gamma,
/// strength blend. Invalid clip bounds and zero dynamic range return all
/// zeros; non-finite parameters or outputs fall back to the default
/// linear stretch, so the function is total.
pub fn stf_stretch(
    data: &[f32],
    shadow_clip: f64,
    highlight_clip: f64,
    midtones_balance: f64,
    strength: f64,
) -> Vec<f32> {
    let params_ok = shadow_clip.is_finite()
        && highlight_clip.is_finite()
        && midtones_balance.is_finite()
        && strength.is_finite();
    if !params_ok {
        return linear_fallback(data);
    }

    let finite = finite_sorted(data);
    let (Some(&data_min), Some(&data_max)) = (finite.first(), finite.last()) else {
        return vec![0.0; data.len()];
    };
    if data_max <= data_min {
        return vec![0.0; data.len()];
    }

    let range = (data_max - data_min) as f64;
    let normalized: Vec<f64> = data
        .iter()
        .map(|&x| {
            if x.is_finite() {
                (x - data_min) as f64 / range
            } else {
                0.0
            }
        })
        .collect();

    let mut stretched = normalized.clone();

    // Shadow/highlight clipping
    if shadow_clip > 0.0 || highlight_clip > 0.0 {
        let shadow_val = shadow_clip;
        let highlight_val = 1.0 - highlight_clip;
        if highlight_val <= shadow_val {
            // Invalid clip bounds
            return vec![0.0; data.len()];
        }
        let clip_range = highlight_val - shadow_val;
        for v in &mut stretched {
            *v = ((*v - shadow_val) / clip_range).clamp(0.0, 1.0);
        }
    }

    // Midtone transfer: balance below 0.5 darkens (gamma > 1), above
    // lightens (gamma < 1)
    if midtones_balance != 0.5 {
        let gamma = if midtones_balance < 0.5 {
            1.0 + 9.0 * (0.5 - midtones_balance)
        } else {
            1.0 / (1.0 + 9.0 * (midtones_balance - 0.5))
        };
        for v in &mut stretched {
            *v = v.powf(gamma);
        }
    }

    // Strength: below 1.0 blends with the plain normalized data, above
    // 1.0 pushes harder with an extra power curve
    if strength != 1.0 {
        if strength < 1.0 {
            for (v, orig) in stretched.iter_mut().zip(normalized.iter()) {
                *v = strength * *v + (1.0 - strength) * orig;
            }
        } else {
            for v in &mut stretched {
                *v = v.powf(1.0 / strength);
            }
        }
    }

    if stretched.iter().any(|v| !v.is_finite()) {
        return linear_fallback(data);
    }

    stretched.into_iter().map(|v| v as f32).collect()
}

/// Fallback used when the STF pipeline cannot produce a finite result
fn linear_fallback(data: &[f32]) -> Vec<f32> {
    linear_stretch(data, 0.5, 99.5)
}

/// Sorted finite samples, the basis for percentile and min/max queries
fn finite_sorted(data: &[f32]) -> Vec<f32> {
    let mut finite: Vec<f32> = data.iter().copied().filter(|x| x.is_finite()).collect();
    finite.sort_by(|a, b| a.partial_cmp(b).unwrap());
    finite
}

/// Percentile with linear interpolation over pre-sorted samples
fn percentile(sorted: &[f32], p: f64) -> f32 {
    debug_assert!(!sorted.is_empty());
    let p = p.clamp(0.0, 100.0);
    let rank = p / 100.0 * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return sorted[lo];
    }
    let frac = (rank - lo as f64) as f32;
    sorted[lo] + (sorted[hi] - sorted[lo]) * frac
}
