//! PNM header parsing and pixel decoding: P5, P6, P7, PFM.
//!
//! Credits: Draws from zune-ppm by Caleb Etemesi (MIT/Apache-2.0/Zlib).

use super::{PnmFormat, PnmHeader};
use crate::error::ImageIoError;
use crate::pixel::{ElementType, native_to_be, native_to_le};
use enough::Stop;

struct HeaderCursor<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> HeaderCursor<'a> {
    fn skip_whitespace_and_comments(&mut self) {
        while let Some(&b) = self.data.get(self.pos) {
            if b == b'#' {
                while let Some(&c) = self.data.get(self.pos) {
                    self.pos += 1;
                    if c == b'\n' {
                        break;
                    }
                }
            } else if b.is_ascii_whitespace() {
                self.pos += 1;
            } else {
                break;
            }
        }
    }

    fn token(&mut self) -> Result<&'a str, ImageIoError> {
        self.skip_whitespace_and_comments();
        let start = self.pos;
        while let Some(&b) = self.data.get(self.pos) {
            if b.is_ascii_whitespace() {
                break;
            }
            self.pos += 1;
        }
        // A token must be terminated; running into the end may mean a split number.
        if start == self.pos || self.pos == self.data.len() {
            return Err(ImageIoError::UnexpectedEof);
        }
        core::str::from_utf8(&self.data[start..self.pos])
            .map_err(|_| ImageIoError::InvalidHeader("non-ASCII header token".into()))
    }

    fn number(&mut self, what: &str) -> Result<u32, ImageIoError> {
        let tok = self.token()?;
        tok.parse()
            .map_err(|_| ImageIoError::InvalidHeader(format!("invalid {what}: {tok:?}")))
    }

    /// Consume the single whitespace byte that separates the header from pixel data.
    fn end_of_header(&mut self) -> Result<usize, ImageIoError> {
        match self.data.get(self.pos) {
            Some(b) if b.is_ascii_whitespace() => Ok(self.pos + 1),
            Some(_) => Err(ImageIoError::InvalidHeader(
                "missing whitespace after header".into(),
            )),
            None => Err(ImageIoError::UnexpectedEof),
        }
    }

    fn line(&mut self) -> Result<&'a str, ImageIoError> {
        let start = self.pos;
        while let Some(&b) = self.data.get(self.pos) {
            self.pos += 1;
            if b == b'\n' {
                let line = &self.data[start..self.pos - 1];
                return core::str::from_utf8(line)
                    .map(str::trim)
                    .map_err(|_| ImageIoError::InvalidHeader("non-ASCII PAM header".into()));
            }
        }
        Err(ImageIoError::UnexpectedEof)
    }
}

/// Parse a PNM header.
pub(crate) fn parse_header(data: &[u8]) -> Result<PnmHeader, ImageIoError> {
    if data.len() < 2 {
        return Err(ImageIoError::UnexpectedEof);
    }
    if data[0] != b'P' {
        return Err(ImageIoError::InvalidHeader("missing PNM magic".into()));
    }
    let format = match data[1] {
        b'5' => PnmFormat::Pgm,
        b'6' => PnmFormat::Ppm,
        b'7' => PnmFormat::Pam,
        b'f' | b'F' => PnmFormat::Pfm,
        b'1'..=b'4' => {
            return Err(ImageIoError::Unsupported(format!(
                "PNM variant P{} (ASCII or 1-bit)",
                data[1] as char
            )));
        }
        _ => return Err(ImageIoError::InvalidHeader("unknown PNM magic".into())),
    };
    let mut cursor = HeaderCursor { data, pos: 2 };

    let header = match format {
        PnmFormat::Pgm | PnmFormat::Ppm => {
            let width = cursor.number("width")?;
            let height = cursor.number("height")?;
            let maxval = cursor.number("maxval")?;
            let data_offset = cursor.end_of_header()?;
            let depth = if format == PnmFormat::Pgm { 1 } else { 3 };
            PnmHeader {
                format,
                width,
                height,
                maxval,
                depth,
                element: element_for_maxval(maxval)?,
                little_endian: false,
                data_offset,
            }
        }
        PnmFormat::Pfm => {
            let width = cursor.number("width")?;
            let height = cursor.number("height")?;
            let scale_tok = cursor.token()?;
            let scale: f32 = scale_tok.parse().map_err(|_| {
                ImageIoError::InvalidHeader(format!("invalid PFM scale: {scale_tok:?}"))
            })?;
            if scale == 0.0 || !scale.is_finite() {
                return Err(ImageIoError::InvalidHeader(format!(
                    "invalid PFM scale: {scale}"
                )));
            }
            let data_offset = cursor.end_of_header()?;
            PnmHeader {
                format,
                width,
                height,
                maxval: 0,
                depth: if data[1] == b'F' { 3 } else { 1 },
                element: ElementType::F32,
                little_endian: scale < 0.0,
                data_offset,
            }
        }
        PnmFormat::Pam => parse_pam(&mut cursor)?,
    };

    if header.width == 0 || header.height == 0 {
        return Err(ImageIoError::InvalidHeader(format!(
            "zero dimension {}x{}",
            header.width, header.height
        )));
    }
    if header.depth == 0 {
        return Err(ImageIoError::InvalidHeader("zero depth".into()));
    }
    Ok(header)
}

fn parse_pam(cursor: &mut HeaderCursor<'_>) -> Result<PnmHeader, ImageIoError> {
    let mut width = None;
    let mut height = None;
    let mut depth = None;
    let mut maxval = None;
    // Rest of the magic line.
    cursor.line()?;
    loop {
        let line = cursor.line()?;
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        if line == "ENDHDR" {
            break;
        }
        let (key, value) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let value = value.trim();
        let parse = |v: &str| {
            v.parse::<u32>()
                .map_err(|_| ImageIoError::InvalidHeader(format!("invalid {key}: {v:?}")))
        };
        match key {
            "WIDTH" => width = Some(parse(value)?),
            "HEIGHT" => height = Some(parse(value)?),
            "DEPTH" => depth = Some(parse(value)?),
            "MAXVAL" => maxval = Some(parse(value)?),
            // Tuple type is informational only.
            "TUPLTYPE" => {}
            other => {
                return Err(ImageIoError::InvalidHeader(format!(
                    "unknown PAM header field {other:?}"
                )));
            }
        }
    }
    let missing = |field: &str| ImageIoError::InvalidHeader(format!("PAM header lacks {field}"));
    let maxval = maxval.ok_or_else(|| missing("MAXVAL"))?;
    Ok(PnmHeader {
        format: PnmFormat::Pam,
        width: width.ok_or_else(|| missing("WIDTH"))?,
        height: height.ok_or_else(|| missing("HEIGHT"))?,
        depth: depth.ok_or_else(|| missing("DEPTH"))?,
        maxval,
        element: element_for_maxval(maxval)?,
        little_endian: false,
        data_offset: cursor.pos,
    })
}

fn element_for_maxval(maxval: u32) -> Result<ElementType, ImageIoError> {
    match maxval {
        1..=255 => Ok(ElementType::U8),
        256..=65535 => Ok(ElementType::U16),
        _ => Err(ImageIoError::InvalidHeader(format!(
            "maxval {maxval} out of range"
        ))),
    }
}

/// Byte length of the pixel payload described by `header`.
pub(crate) fn payload_len(header: &PnmHeader) -> Result<usize, ImageIoError> {
    (header.width as usize)
        .checked_mul(header.height as usize)
        .and_then(|wh| wh.checked_mul(header.depth as usize))
        .and_then(|whd| whd.checked_mul(header.element.size()))
        .ok_or(ImageIoError::DimensionsTooLarge {
            width: header.width,
            height: header.height,
        })
}

/// Convert the pixel payload in place to top-to-bottom rows of native-endian samples.
///
/// `payload` holds exactly the bytes after the header; a short payload is
/// `UnexpectedEof`.
pub(crate) fn decode_pixels(
    mut payload: Vec<u8>,
    header: &PnmHeader,
    stop: &dyn Stop,
) -> Result<Vec<u8>, ImageIoError> {
    let len = payload_len(header)?;
    if payload.len() < len {
        return Err(ImageIoError::UnexpectedEof);
    }
    payload.truncate(len);
    let elem = header.element.size();
    let row_bytes = len / header.height as usize;

    match header.format {
        PnmFormat::Pfm => {
            // PFM stores bottom-to-top
            let rows = header.height as usize;
            for i in 0..rows / 2 {
                if i % 16 == 0 {
                    stop.check()?;
                }
                let (top, bottom) = payload.split_at_mut((rows - 1 - i) * row_bytes);
                top[i * row_bytes..(i + 1) * row_bytes].swap_with_slice(&mut bottom[..row_bytes]);
            }
            if header.little_endian {
                native_to_le(&mut payload, elem);
            } else {
                native_to_be(&mut payload, elem);
            }
        }
        _ => {
            stop.check()?;
            if elem > 1 {
                native_to_be(&mut payload, elem);
            }
        }
    }
    Ok(payload)
}
