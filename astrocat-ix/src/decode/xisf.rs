//! Minimal XISF reader
//!
//! Reads monolithic XISF files: the "XISF0100" signature, the XML
//! header, and the first Image element with attachment-located,
//! uncompressed sample data. FITS keywords embedded in the header are
//! surfaced through `XisfHeader`. Compressed or out-of-line data blocks
//! are reported as unsupported rather than misread.

use super::{DecodeError, DecodedImage, PixelBuffer};
use crate::header::{XisfHeader, XisfKeyword};
use quick_xml::events::Event;
use quick_xml::Reader;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::Path;

/// Geometry and storage of the first image in the file
#[derive(Debug, Default)]
struct ImageInfo {
    width: usize,
    height: usize,
    channels: usize,
    sample_format: String,
    /// Absolute byte offset and length of the attached data block
    location: Option<(u64, usize)>,
    compressed: bool,
}

/// Read header and first image from an XISF file
pub fn read_xisf(path: &Path) -> Result<DecodedImage, DecodeError> {
    let mut file = File::open(path)?;

    let mut preamble = [0u8; 16];
    file.read_exact(&mut preamble)
        .map_err(|_| DecodeError::Malformed("truncated XISF preamble".to_string()))?;
    if &preamble[..8] != b"XISF0100" {
        return Err(DecodeError::Malformed("missing XISF signature".to_string()));
    }

    let header_len = u32::from_le_bytes([preamble[8], preamble[9], preamble[10], preamble[11]]);
    let mut xml = vec![0u8; header_len as usize];
    file.read_exact(&mut xml)
        .map_err(|_| DecodeError::Malformed("truncated XISF header".to_string()))?;
    let xml = String::from_utf8_lossy(&xml).into_owned();

    let (header, info) = parse_header(&xml)?;
    let info = info.ok_or_else(|| DecodeError::Malformed("no Image element".to_string()))?;

    if info.compressed {
        return Err(DecodeError::Unsupported(
            "compressed XISF data blocks".to_string(),
        ));
    }
    let (offset, size) = info.location.ok_or_else(|| {
        DecodeError::Unsupported("non-attachment data location".to_string())
    })?;

    let pixels = read_samples(&mut file, &info, offset, size)?;

    Ok(DecodedImage {
        header: Box::new(header),
        pixels: Some(pixels),
    })
}

fn parse_header(xml: &str) -> Result<(XisfHeader, Option<ImageInfo>), DecodeError> {
    let mut reader = Reader::from_str(xml);

    let mut header = XisfHeader::new();
    let mut info: Option<ImageInfo> = None;
    let mut image_depth = 0usize;

    loop {
        match reader
            .read_event()
            .map_err(|e| DecodeError::Malformed(format!("invalid XML header: {}", e)))?
        {
            Event::Start(e) => match e.local_name().as_ref() {
                b"Image" if info.is_none() => {
                    info = Some(parse_image_attrs(&e)?);
                    image_depth = 1;
                }
                b"FITSKeyword" if image_depth > 0 => {
                    parse_fits_keyword(&e, &mut header)?;
                }
                _ => {}
            },
            Event::Empty(e) => match e.local_name().as_ref() {
                // Self-closing Image carries no keywords
                b"Image" if info.is_none() => {
                    info = Some(parse_image_attrs(&e)?);
                }
                b"FITSKeyword" if image_depth > 0 => {
                    parse_fits_keyword(&e, &mut header)?;
                }
                _ => {}
            },
            Event::End(e) => {
                if e.local_name().as_ref() == b"Image" && image_depth > 0 {
                    image_depth -= 1;
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }

    Ok((header, info))
}

fn parse_image_attrs(e: &quick_xml::events::BytesStart) -> Result<ImageInfo, DecodeError> {
    let mut info = ImageInfo {
        channels: 1,
        ..Default::default()
    };

    for attr in e.attributes() {
        let attr = attr.map_err(|e| DecodeError::Malformed(format!("bad attribute: {}", e)))?;
        let value = attr
            .unescape_value()
            .map_err(|e| DecodeError::Malformed(format!("bad attribute value: {}", e)))?;

        match attr.key.local_name().as_ref() {
            b"geometry" => {
                // width:height:channel-count
                let parts: Vec<&str> = value.split(':').collect();
                if parts.len() < 2 {
                    return Err(DecodeError::Malformed(format!("bad geometry: {}", value)));
                }
                info.width = parts[0]
                    .parse()
                    .map_err(|_| DecodeError::Malformed(format!("bad geometry: {}", value)))?;
                info.height = parts[1]
                    .parse()
                    .map_err(|_| DecodeError::Malformed(format!("bad geometry: {}", value)))?;
                if parts.len() > 2 {
                    info.channels = parts[2].parse().unwrap_or(1);
                }
            }
            b"sampleFormat" => info.sample_format = value.to_string(),
            b"location" => {
                let parts: Vec<&str> = value.split(':').collect();
                if parts.first() == Some(&"attachment") && parts.len() == 3 {
                    let offset = parts[1].parse().map_err(|_| {
                        DecodeError::Malformed(format!("bad location: {}", value))
                    })?;
                    let size = parts[2].parse().map_err(|_| {
                        DecodeError::Malformed(format!("bad location: {}", value))
                    })?;
                    info.location = Some((offset, size));
                }
            }
            b"compression" => info.compressed = true,
            _ => {}
        }
    }

    Ok(info)
}

fn parse_fits_keyword(
    e: &quick_xml::events::BytesStart,
    header: &mut XisfHeader,
) -> Result<(), DecodeError> {
    let mut name = None;
    let mut value = None;
    let mut comment = None;

    for attr in e.attributes() {
        let attr = attr.map_err(|e| DecodeError::Malformed(format!("bad attribute: {}", e)))?;
        let text = attr
            .unescape_value()
            .map_err(|e| DecodeError::Malformed(format!("bad attribute value: {}", e)))?
            .to_string();
        match attr.key.local_name().as_ref() {
            b"name" => name = Some(text),
            b"value" => value = Some(text),
            b"comment" => comment = Some(text),
            _ => {}
        }
    }

    if let (Some(name), Some(value)) = (name, value) {
        // Values keep their FITS formatting; strip string quoting
        let value = value.trim().trim_matches('\'').trim().to_string();
        header.push(name, XisfKeyword { value, comment });
    }

    Ok(())
}

fn read_samples(
    file: &mut File,
    info: &ImageInfo,
    offset: u64,
    size: usize,
) -> Result<PixelBuffer, DecodeError> {
    let count = info
        .width
        .checked_mul(info.height)
        .and_then(|n| n.checked_mul(info.channels.max(1)))
        .ok_or_else(|| DecodeError::Malformed("image geometry overflow".to_string()))?;

    let bytes_per = match info.sample_format.as_str() {
        "UInt8" => 1,
        "UInt16" => 2,
        "UInt32" | "Float32" => 4,
        "Float64" => 8,
        other => {
            return Err(DecodeError::Unsupported(format!("sample format {:?}", other)));
        }
    };

    if size != count * bytes_per {
        return Err(DecodeError::Malformed(format!(
            "data block size {} does not match geometry ({} samples)",
            size, count
        )));
    }

    let mut raw = vec![0u8; size];
    file.seek(SeekFrom::Start(offset))?;
    file.read_exact(&mut raw)
        .map_err(|_| DecodeError::Malformed("truncated data block".to_string()))?;

    // XISF data blocks are little-endian
    let mut data = Vec::with_capacity(count);
    match info.sample_format.as_str() {
        "UInt8" => data.extend(raw.iter().map(|&b| b as f32)),
        "UInt16" => {
            for c in raw.chunks_exact(2) {
                data.push(u16::from_le_bytes([c[0], c[1]]) as f32);
            }
        }
        "UInt32" => {
            for c in raw.chunks_exact(4) {
                data.push(u32::from_le_bytes([c[0], c[1], c[2], c[3]]) as f32);
            }
        }
        "Float32" => {
            for c in raw.chunks_exact(4) {
                data.push(f32::from_le_bytes([c[0], c[1], c[2], c[3]]));
            }
        }
        "Float64" => {
            for c in raw.chunks_exact(8) {
                let v = f64::from_le_bytes([c[0], c[1], c[2], c[3], c[4], c[5], c[6], c[7]]);
                data.push(v as f32);
            }
        }
        _ => unreachable!(),
    }

    // Planar storage: channel planes of height x width
    let shape = if info.channels > 1 {
        vec![info.channels, info.height, info.width]
    } else {
        vec![info.height, info.width]
    };

    Ok(PixelBuffer { shape, data })
}
