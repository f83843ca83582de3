//! TRF header layout.
//!
//! All integers are little-endian.
//!
//! | offset | size | field |
//! |--------|------|-------|
//! | 0  | 4 | magic `TRF\x01` |
//! | 4  | 4 | width |
//! | 8  | 4 | height |
//! | 12 | 4 | channels |
//! | 16 | 1 | element code |
//! | 17 | 3 | reserved, zero |
//! | 20 | 4 | data window x (i32) |
//! | 24 | 4 | data window y (i32) |
//! | 28 | 4 | full window x (i32) |
//! | 32 | 4 | full window y (i32) |
//! | 36 | 4 | full window width |
//! | 40 | 4 | full window height |
//! | 44 | 4 | tile width, 0 if untiled |
//! | 48 | 4 | tile height, 0 if untiled |
//! | 52 | 4 | attribute block length |
//!
//! The attribute block follows as `key\0value\0` pairs, then pixel data.

use std::collections::BTreeMap;

use crate::error::ImageIoError;
use crate::pixel::ElementType;
use crate::spec::{ImageSpec, SpecParts};

pub(crate) const MAGIC: &[u8; 4] = b"TRF\x01";
pub(crate) const FIXED_LEN: usize = 56;

/// Attribute blocks larger than this are rejected as corrupt.
const MAX_ATTRIBUTE_BYTES: u32 = 16 << 20;

fn u32_at(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn i32_at(buf: &[u8], at: usize) -> i32 {
    i32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

/// Serialize the header and attribute block for `spec`.
pub(crate) fn encode_header(spec: &ImageSpec) -> Result<Vec<u8>, ImageIoError> {
    let attributes = encode_attributes(spec)?;
    let attr_len = u32::try_from(attributes.len())
        .ok()
        .filter(|&len| len <= MAX_ATTRIBUTE_BYTES)
        .ok_or_else(|| ImageIoError::Unsupported("attribute block too large".into()))?;
    let (full_x, full_y, full_w, full_h) = spec.full_window();
    let (tw, th) = spec.tile_size().unwrap_or((0, 0));

    let mut out = Vec::with_capacity(FIXED_LEN + attributes.len());
    out.extend_from_slice(MAGIC);
    out.extend_from_slice(&spec.width.to_le_bytes());
    out.extend_from_slice(&spec.height.to_le_bytes());
    out.extend_from_slice(&spec.channels.to_le_bytes());
    out.extend_from_slice(&[spec.format.code(), 0, 0, 0]);
    out.extend_from_slice(&spec.x.to_le_bytes());
    out.extend_from_slice(&spec.y.to_le_bytes());
    out.extend_from_slice(&full_x.to_le_bytes());
    out.extend_from_slice(&full_y.to_le_bytes());
    out.extend_from_slice(&full_w.to_le_bytes());
    out.extend_from_slice(&full_h.to_le_bytes());
    out.extend_from_slice(&tw.to_le_bytes());
    out.extend_from_slice(&th.to_le_bytes());
    out.extend_from_slice(&attr_len.to_le_bytes());
    out.extend_from_slice(&attributes);
    Ok(out)
}

fn encode_attributes(spec: &ImageSpec) -> Result<Vec<u8>, ImageIoError> {
    let mut out = Vec::new();
    for (key, value) in spec.attributes() {
        if key.is_empty() || key.contains('\0') || value.contains('\0') {
            return Err(ImageIoError::Unsupported(format!(
                "attribute {key:?} cannot be stored"
            )));
        }
        out.extend_from_slice(key.as_bytes());
        out.push(0);
        out.extend_from_slice(value.as_bytes());
        out.push(0);
    }
    Ok(out)
}

/// Fixed part of a decoded header; the attribute block is read separately.
pub(crate) struct FixedHeader {
    parts: SpecParts,
    pub attr_len: u32,
}

pub(crate) fn decode_fixed(buf: &[u8; FIXED_LEN]) -> Result<FixedHeader, ImageIoError> {
    if &buf[..4] != MAGIC {
        return Err(ImageIoError::InvalidHeader("missing TRF magic".into()));
    }
    let format = ElementType::from_code(buf[16]).ok_or_else(|| {
        ImageIoError::InvalidHeader(format!("unknown element code {}", buf[16]))
    })?;
    let tile = match (u32_at(buf, 44), u32_at(buf, 48)) {
        (0, 0) => None,
        (0, _) | (_, 0) => {
            return Err(ImageIoError::InvalidHeader(
                "tile size has a zero dimension".into(),
            ));
        }
        (tw, th) => Some((tw, th)),
    };
    let attr_len = u32_at(buf, 52);
    if attr_len > MAX_ATTRIBUTE_BYTES {
        return Err(ImageIoError::InvalidHeader(format!(
            "attribute block of {attr_len} bytes"
        )));
    }
    Ok(FixedHeader {
        parts: SpecParts {
            width: u32_at(buf, 4),
            height: u32_at(buf, 8),
            channels: u32_at(buf, 12),
            format,
            x: i32_at(buf, 20),
            y: i32_at(buf, 24),
            full_x: i32_at(buf, 28),
            full_y: i32_at(buf, 32),
            full_width: u32_at(buf, 36),
            full_height: u32_at(buf, 40),
            tile,
            attributes: BTreeMap::new(),
        },
        attr_len,
    })
}

impl FixedHeader {
    pub fn width(&self) -> u32 {
        self.parts.width
    }

    pub fn height(&self) -> u32 {
        self.parts.height
    }

    /// Combine with the decoded attribute block into a validated spec.
    pub fn into_spec(mut self, attributes: &[u8]) -> Result<ImageSpec, ImageIoError> {
        self.parts.attributes = decode_attributes(attributes)?;
        ImageSpec::from_parts(self.parts).map_err(|e| match e {
            ImageIoError::InvalidGeometry(msg) => ImageIoError::InvalidHeader(msg),
            other => other,
        })
    }
}

fn decode_attributes(block: &[u8]) -> Result<BTreeMap<String, String>, ImageIoError> {
    let mut attributes = BTreeMap::new();
    if block.is_empty() {
        return Ok(attributes);
    }
    let body = block
        .strip_suffix(b"\0")
        .ok_or_else(|| ImageIoError::InvalidHeader("unterminated attribute block".into()))?;
    let mut fields = body.split(|&b| b == 0);
    while let Some(key) = fields.next() {
        let value = fields
            .next()
            .ok_or_else(|| ImageIoError::InvalidHeader("attribute without a value".into()))?;
        let text = |bytes: &[u8]| {
            String::from_utf8(bytes.to_vec())
                .map_err(|_| ImageIoError::InvalidHeader("attribute is not UTF-8".into()))
        };
        attributes.insert(text(key)?, text(value)?);
    }
    Ok(attributes)
}
