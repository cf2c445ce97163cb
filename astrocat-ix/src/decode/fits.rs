//! Minimal FITS reader
//!
//! Reads the primary HDU of a FITS file: 2880-byte header blocks of
//! 80-character cards, followed by a big-endian data array described by
//! BITPIX/NAXISn. Integer data is mapped to physical values through
//! BZERO/BSCALE. Extensions beyond the primary HDU are ignored.

use super::{DecodeError, DecodedImage, PixelBuffer};
use crate::header::{FitsHeader, HeaderView};
use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

const BLOCK_SIZE: usize = 2880;
const CARD_SIZE: usize = 80;

/// Read header and primary data array from a FITS file
pub fn read_fits(path: &Path) -> Result<DecodedImage, DecodeError> {
    let file_len = std::fs::metadata(path)?.len();
    let mut reader = BufReader::new(File::open(path)?);

    let (header, header_len) = read_header(&mut reader)?;

    let bitpix = header
        .get_i64("BITPIX")
        .ok_or_else(|| DecodeError::Malformed("missing BITPIX".to_string()))?;
    let naxis = header.get_i64("NAXIS").unwrap_or(0);

    let pixels = if naxis > 0 {
        let mut axes = Vec::with_capacity(naxis as usize);
        for i in 1..=naxis {
            let len = header
                .get_i64(&format!("NAXIS{}", i))
                .ok_or_else(|| DecodeError::Malformed(format!("missing NAXIS{}", i)))?;
            if len < 0 {
                return Err(DecodeError::Malformed(format!("negative NAXIS{}", i)));
            }
            axes.push(len as usize);
        }
        let available = file_len.saturating_sub(header_len);
        Some(read_data(&mut reader, &header, bitpix, &axes, available)?)
    } else {
        None
    };

    Ok(DecodedImage {
        header: Box::new(header),
        pixels,
    })
}

/// Parse header blocks, returning the cards and the byte count consumed
fn read_header(reader: &mut impl Read) -> Result<(FitsHeader, u64), DecodeError> {
    let mut header = FitsHeader::new();
    let mut block = [0u8; BLOCK_SIZE];
    let mut first = true;
    let mut consumed = 0u64;

    loop {
        reader
            .read_exact(&mut block)
            .map_err(|_| DecodeError::Malformed("truncated header".to_string()))?;
        consumed += BLOCK_SIZE as u64;

        if first {
            if !block.starts_with(b"SIMPLE") {
                return Err(DecodeError::Malformed("missing SIMPLE card".to_string()));
            }
            first = false;
        }

        for card in block.chunks(CARD_SIZE) {
            let keyword = String::from_utf8_lossy(&card[..8]).trim_end().to_string();
            if keyword == "END" {
                return Ok((header, consumed));
            }
            if keyword.is_empty() || keyword == "COMMENT" || keyword == "HISTORY" {
                continue;
            }
            // Value cards carry "= " at columns 9-10
            if card[8] == b'=' {
                let value = parse_card_value(&card[10..]);
                if !value.is_empty() {
                    header.insert(keyword, value);
                }
            }
        }
    }
}

/// Extract the value field of a card, stripping quotes and the inline
/// comment
fn parse_card_value(field: &[u8]) -> String {
    let text = String::from_utf8_lossy(field);
    let trimmed = text.trim_start();

    if let Some(rest) = trimmed.strip_prefix('\'') {
        // Quoted string; '' escapes a literal quote
        let mut out = String::new();
        let mut chars = rest.chars().peekable();
        while let Some(c) = chars.next() {
            if c == '\'' {
                if chars.peek() == Some(&'\'') {
                    out.push('\'');
                    chars.next();
                } else {
                    break;
                }
            } else {
                out.push(c);
            }
        }
        out.trim_end().to_string()
    } else {
        trimmed
            .split('/')
            .next()
            .unwrap_or_default()
            .trim()
            .to_string()
    }
}

fn read_data(
    reader: &mut impl Read,
    header: &FitsHeader,
    bitpix: i64,
    axes: &[usize],
    available: u64,
) -> Result<PixelBuffer, DecodeError> {
    let bytes_per = (bitpix.unsigned_abs() / 8) as usize;
    if bytes_per == 0 {
        return Err(DecodeError::Malformed(format!("invalid BITPIX {}", bitpix)));
    }

    // Header-declared dimensions are untrusted; check them against the
    // bytes the file actually holds before allocating anything
    let count = axes
        .iter()
        .try_fold(1usize, |acc, &d| acc.checked_mul(d))
        .ok_or_else(|| DecodeError::Malformed("axis product overflows".to_string()))?;
    let data_len = count
        .checked_mul(bytes_per)
        .filter(|&n| n as u64 <= available)
        .ok_or_else(|| {
            DecodeError::Malformed(format!(
                "declared data array exceeds file size ({} bytes available)",
                available
            ))
        })?;

    let mut raw = vec![0u8; data_len];
    reader
        .read_exact(&mut raw)
        .map_err(|_| DecodeError::Malformed("truncated data array".to_string()))?;

    let bzero = header.get_f64("BZERO").unwrap_or(0.0) as f32;
    let bscale = header.get_f64("BSCALE").unwrap_or(1.0) as f32;

    let mut data = Vec::with_capacity(count);
    match bitpix {
        8 => {
            for b in &raw {
                data.push(*b as f32);
            }
        }
        16 => {
            for c in raw.chunks_exact(2) {
                data.push(i16::from_be_bytes([c[0], c[1]]) as f32);
            }
        }
        32 => {
            for c in raw.chunks_exact(4) {
                data.push(i32::from_be_bytes([c[0], c[1], c[2], c[3]]) as f32);
            }
        }
        64 => {
            for c in raw.chunks_exact(8) {
                let v = i64::from_be_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]);
                data.push(v as f32);
            }
        }
        -32 => {
            for c in raw.chunks_exact(4) {
                data.push(f32::from_be_bytes([c[0], c[1], c[2], c[3]]));
            }
        }
        -64 => {
            for c in raw.chunks_exact(8) {
                let v = f64::from_be_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]);
                data.push(v as f32);
            }
        }
        other => {
            return Err(DecodeError::Unsupported(format!("BITPIX {}", other)));
        }
    }

    if bzero != 0.0 || bscale != 1.0 {
        for v in &mut data {
            *v = bzero + bscale * *v;
        }
    }

    // NAXIS1 is the fastest-varying axis; outermost axis comes first
    let shape: Vec<usize> = axes.iter().rev().copied().collect();

    Ok(PixelBuffer { shape, data })
}
