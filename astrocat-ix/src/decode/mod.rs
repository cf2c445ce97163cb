//! Image container decoding
//!
//! Reads the two supported containers (FITS and XISF) into a common
//! shape: a normalized header plus an optional raw pixel buffer. Pixel
//! values are carried as `f32` without rescaling; the stretch engine owns
//! normalization.

mod fits;
mod xisf;

pub use fits::read_fits;
pub use xisf::read_xisf;

use crate::header::HeaderView;
use std::path::Path;
use thiserror::Error;

/// Errors raised while decoding an image container
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Container structure violates the format
    #[error("Malformed file: {0}")]
    Malformed(String),

    /// Valid container using a feature this reader does not handle
    #[error("Unsupported: {0}")]
    Unsupported(String),
}

impl From<DecodeError> for astrocat_common::Error {
    fn from(e: DecodeError) -> Self {
        astrocat_common::Error::Decode(e.to_string())
    }
}

/// Raw pixel array with its dimensions, outermost axis first
#[derive(Debug, Clone)]
pub struct PixelBuffer {
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl PixelBuffer {
    /// Reduce to the single 2-D plane used for thumbnailing
    ///
    /// Singleton dimensions are squeezed away. A remaining leading
    /// dimension smaller than 5 is treated as channels/planes and only
    /// the first plane is kept. Anything that does not end up exactly
    /// two-dimensional is rejected.
    pub fn first_plane(&self) -> Option<(usize, usize, &[f32])> {
        let mut shape: Vec<usize> = self.shape.iter().copied().filter(|&d| d != 1).collect();

        if shape.len() > 2 && shape[0] < 5 {
            shape.remove(0);
        }

        if shape.len() != 2 {
            return None;
        }

        let (height, width) = (shape[0], shape[1]);
        let plane_len = height.checked_mul(width)?;
        if plane_len == 0 || self.data.len() < plane_len {
            return None;
        }

        // Plane 0 occupies the first height*width samples in row-major
        // order regardless of how many planes follow
        Some((height, width, &self.data[..plane_len]))
    }
}

/// Decoded image: normalized header plus optional pixel data
///
/// Header-only files (no data unit) are legal; they are cataloged
/// without a thumbnail.
pub struct DecodedImage {
    pub header: Box<dyn HeaderView + Send>,
    pub pixels: Option<PixelBuffer>,
}

impl std::fmt::Debug for DecodedImage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DecodedImage")
            .field("header", &"<dyn HeaderView>")
            .field("pixels", &self.pixels.as_ref().map(|_| "<PixelBuffer>"))
            .finish()
    }
}

/// Decode a file, dispatching on its extension
pub fn decode_image(path: &Path) -> Result<DecodedImage, DecodeError> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_lowercase())
        .unwrap_or_default();

    match ext.as_str() {
        "fits" | "fit" => read_fits(path),
        "xisf" => read_xisf(path),
        other => Err(DecodeError::Unsupported(format!(
            "unrecognized extension: {:?}",
            other
        ))),
    }
}
