//! Farbfeld decoder.
//!
//! Forked from zune-farbfeld 0.5.2 by Caleb Etemesi (MIT/Apache-2.0/Zlib).

use super::encode::MAGIC;
use crate::error::ImageIoError;

/// Parse farbfeld header, returning (width, height).
pub(crate) fn parse_header(data: &[u8]) -> Result<(u32, u32), ImageIoError> {
    if data.len() < 16 {
        return Err(ImageIoError::UnexpectedEof);
    }
    if &data[0..8] != MAGIC {
        return Err(ImageIoError::InvalidHeader("missing farbfeld magic".into()));
    }
    let width = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);
    let height = u32::from_be_bytes([data[12], data[13], data[14], data[15]]);

    if width == 0 {
        return Err(ImageIoError::InvalidHeader("farbfeld width is zero".into()));
    }
    if height == 0 {
        return Err(ImageIoError::InvalidHeader("farbfeld height is zero".into()));
    }
    Ok((width, height))
}

/// Convert one row from big-endian u16 samples to native endian, in place.
pub(crate) fn decode_row(row: &mut [u8]) {
    for pair in row.chunks_exact_mut(2) {
        let val = u16::from_be_bytes([pair[0], pair[1]]);
        pair.copy_from_slice(&val.to_ne_bytes());
    }
}
