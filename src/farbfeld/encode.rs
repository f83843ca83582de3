//! Farbfeld encoder.
//!
//! Forked from zune-farbfeld 0.5.2 by Caleb Etemesi (MIT/Apache-2.0/Zlib).

use crate::error::ImageIoError;

pub(crate) const MAGIC: &[u8; 8] = b"farbfeld";

/// 16-byte header: magic, then width and height as u32 big-endian.
pub(crate) fn encode_header(width: u32, height: u32) -> [u8; 16] {
    let mut out = [0u8; 16];
    out[..8].copy_from_slice(MAGIC);
    out[8..12].copy_from_slice(&width.to_be_bytes());
    out[12..16].copy_from_slice(&height.to_be_bytes());
    out
}

/// Convert one row of native-endian RGBA16 samples to big-endian into `out`.
pub(crate) fn encode_row(row: &[u8], out: &mut Vec<u8>) -> Result<(), ImageIoError> {
    if row.len() % 8 != 0 {
        return Err(ImageIoError::SizeMismatch {
            expected: row.len() / 8 * 8,
            actual: row.len(),
        });
    }
    out.clear();
    out.reserve(row.len());
    for pair in row.chunks_exact(2) {
        let val = u16::from_ne_bytes([pair[0], pair[1]]);
        out.extend_from_slice(&val.to_be_bytes());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn header_layout() {
        let header = encode_header(3, 0x0102_0304);
        assert_eq!(&header[..8], b"farbfeld");
        assert_eq!(&header[8..12], &[0, 0, 0, 3]);
        assert_eq!(&header[12..], &[1, 2, 3, 4]);
    }

    #[test]
    fn row_is_big_endian() {
        let mut row = Vec::new();
        for v in [0x0102u16, 0x0304, 0x0506, 0xffff] {
            row.extend_from_slice(&v.to_ne_bytes());
        }
        let mut out = Vec::new();
        encode_row(&row, &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4, 5, 6, 0xff, 0xff]);
    }
}
