//! PNM encoder: P5, P6, P7, PFM.
//!
//! Credits: Draws from zune-ppm by Caleb Etemesi (MIT/Apache-2.0/Zlib).

use super::PnmFormat;
use crate::error::ImageIoError;
use crate::pixel::{ElementType, native_to_be, native_to_le};
use enough::Stop;
use std::io::Write;

/// Encode a native-endian, top-to-bottom pixel buffer as a PNM file into `out`.
///
/// Rows are converted one at a time through a scratch row, so the encoded
/// image is never held in memory next to `pixels`.
#[allow(clippy::too_many_arguments)]
pub(crate) fn encode_pnm<W: Write>(
    out: &mut W,
    pixels: &[u8],
    width: u32,
    height: u32,
    channels: u32,
    element: ElementType,
    fmt: PnmFormat,
    stop: &dyn Stop,
) -> Result<(), ImageIoError> {
    let w = width as usize;
    let h = height as usize;
    let row_bytes = w
        .checked_mul(channels as usize)
        .and_then(|wc| wc.checked_mul(element.size()))
        .ok_or(ImageIoError::DimensionsTooLarge { width, height })?;
    let expected = row_bytes
        .checked_mul(h)
        .ok_or(ImageIoError::DimensionsTooLarge { width, height })?;
    if pixels.len() != expected {
        return Err(ImageIoError::SizeMismatch {
            expected,
            actual: pixels.len(),
        });
    }

    stop.check()?;

    let header = match fmt {
        PnmFormat::Pgm => format!("P5\n{width} {height}\n{}\n", maxval(element)),
        PnmFormat::Ppm => format!("P6\n{width} {height}\n{}\n", maxval(element)),
        PnmFormat::Pam => {
            let mut header = format!(
                "P7\nWIDTH {width}\nHEIGHT {height}\nDEPTH {channels}\nMAXVAL {}\n",
                maxval(element)
            );
            if let Some(tupltype) = tupltype(channels) {
                header.push_str("TUPLTYPE ");
                header.push_str(tupltype);
                header.push('\n');
            }
            header.push_str("ENDHDR\n");
            header
        }
        PnmFormat::Pfm => {
            let magic = if channels == 1 { "Pf" } else { "PF" };
            format!("{magic}\n{width} {height}\n-1.0\n")
        }
    };
    out.write_all(header.as_bytes())?;
    if row_bytes == 0 {
        return Ok(());
    }

    let mut scratch = vec![0u8; row_bytes];
    let mut emit = |i: usize, row: &[u8], little_endian: bool| -> Result<(), ImageIoError> {
        if i % 16 == 0 {
            stop.check()?;
        }
        scratch.copy_from_slice(row);
        if little_endian {
            native_to_le(&mut scratch, element.size());
        } else {
            native_to_be(&mut scratch, element.size());
        }
        out.write_all(&scratch)?;
        Ok(())
    };

    match fmt {
        // PFM stores bottom-to-top
        PnmFormat::Pfm => {
            for (i, row) in pixels.chunks_exact(row_bytes).rev().enumerate() {
                emit(i, row, true)?;
            }
        }
        _ => {
            for (i, row) in pixels.chunks_exact(row_bytes).enumerate() {
                emit(i, row, false)?;
            }
        }
    }
    Ok(())
}

fn maxval(element: ElementType) -> u32 {
    if element == ElementType::U16 { 65535 } else { 255 }
}

fn tupltype(channels: u32) -> Option<&'static str> {
    match channels {
        1 => Some("GRAYSCALE"),
        2 => Some("GRAYSCALE_ALPHA"),
        3 => Some("RGB"),
        4 => Some("RGB_ALPHA"),
        _ => None,
    }
}
