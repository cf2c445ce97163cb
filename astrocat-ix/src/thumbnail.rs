//! Thumbnail rendering
//!
//! Turns a raw pixel buffer into a bounded-size PNG preview: scrub
//! non-finite values, apply the folder's stretch, quantize to 8 bits,
//! fit within a square bounding box without upscaling. Returns `None`
//! on any failure; a missing thumbnail never fails cataloging.

use crate::decode::PixelBuffer;
use crate::stretch;
use astrocat_common::db::StretchSettings;
use image::imageops::FilterType;
use image::{GrayImage, ImageFormat};
use std::io::Cursor;
use tracing::debug;

/// Render a PNG preview bounded by `box_size` on both sides
pub fn render_thumbnail(
    pixels: &PixelBuffer,
    settings: &StretchSettings,
    box_size: u32,
) -> Option<Vec<u8>> {
    if box_size == 0 {
        return None;
    }

    let Some((height, width, plane)) = pixels.first_plane() else {
        debug!(shape = ?pixels.shape, "Pixel data not reducible to a 2-D plane");
        return None;
    };
    if width > u32::MAX as usize || height > u32::MAX as usize {
        return None;
    }

    // Invalid samples read as zero so they cannot poison the stretch
    let scrubbed: Vec<f32> = plane
        .iter()
        .map(|&v| if v.is_finite() { v } else { 0.0 })
        .collect();

    let stretched = stretch::apply(&scrubbed, settings);

    let quantized: Vec<u8> = stretched
        .iter()
        .map(|&v| (v * 255.0).clamp(0.0, 255.0) as u8)
        .collect();

    let img = GrayImage::from_raw(width as u32, height as u32, quantized)?;
    let img = fit_within(img, box_size);

    let mut buf = Vec::new();
    if let Err(e) = img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png) {
        debug!(error = %e, "PNG encode failed");
        return None;
    }

    Some(buf)
}

/// Scale down to fit a square box, preserving aspect ratio; images
/// already inside the box are kept at native size
fn fit_within(img: GrayImage, box_size: u32) -> GrayImage {
    let (w, h) = img.dimensions();
    if w <= box_size && h <= box_size {
        return img;
    }

    let scale = (box_size as f64 / w as f64).min(box_size as f64 / h as f64);
    let new_w = ((w as f64 * scale).round() as u32).max(1);
    let new_h = ((h as f64 * scale).round() as u32).max(1);
    image::imageops::resize(&img, new_w, new_h, FilterType::Triangle)
}
