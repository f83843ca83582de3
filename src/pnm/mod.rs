//! PNM family: P5 (PGM), P6 (PPM), P7 (PAM), PFM.
//!
//! Credits: Implementation draws from [zune-ppm](https://github.com/etemesi254/zune-image)
//! by Caleb Etemesi (MIT/Apache-2.0/Zlib licensed).
//!
//! PNM files have no origin, display window, tiles or metadata. The writer
//! buffers the image and encodes it on close, so scanlines may arrive in
//! any order. The reader parses the header, checks limits, then loads the
//! pixel payload at open.

mod decode;
mod encode;

use std::fs::File;
use std::io::{BufWriter, ErrorKind, Read, Write};
use std::path::Path;

use crate::backend::{FormatBackend, FormatReader, FormatWriter};
use crate::capabilities::{BackendCapabilities, WriteOrder};
use crate::error::ImageIoError;
use crate::limits::Limits;
use crate::pixel::ElementType;
use crate::spec::ImageSpec;
use enough::Stop;

/// Which PNM sub-format to use.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PnmFormat {
    /// P5: binary grayscale (PGM).
    Pgm,
    /// P6: binary RGB (PPM).
    Ppm,
    /// P7: PAM, any channel count.
    Pam,
    /// PFM: 32-bit float, grayscale or RGB.
    Pfm,
}

impl PnmFormat {
    /// Sub-format for writing `spec` to `path`.
    ///
    /// `.pgm`, `.ppm`, `.pam` and `.pfm` force their variant; anything else
    /// picks the plainest variant that can hold the spec.
    pub fn select(path: &Path, spec: &ImageSpec) -> Result<Self, ImageIoError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(str::to_ascii_lowercase);
        if spec.format.is_float() && spec.format != ElementType::F32 {
            return Err(ImageIoError::UnsupportedFormat(format!(
                "PFM stores only f32 samples, not {}",
                spec.format
            )));
        }
        let float = spec.format.is_float();
        let integer = matches!(spec.format, ElementType::U8 | ElementType::U16);
        let ch = spec.channels;

        let format = match ext.as_deref() {
            Some("pgm") if integer && ch == 1 => PnmFormat::Pgm,
            Some("ppm") if integer && ch == 3 => PnmFormat::Ppm,
            Some("pam") if integer => PnmFormat::Pam,
            Some("pfm") if float && (ch == 1 || ch == 3) => PnmFormat::Pfm,
            Some("pgm" | "ppm" | "pam" | "pfm") => {
                return Err(ImageIoError::UnsupportedFormat(format!(
                    "{} channel {} cannot be stored in {}",
                    ch,
                    spec.format,
                    path.display()
                )));
            }
            _ if float && (ch == 1 || ch == 3) => PnmFormat::Pfm,
            _ if integer && ch == 1 => PnmFormat::Pgm,
            _ if integer && ch == 3 => PnmFormat::Ppm,
            _ if integer => PnmFormat::Pam,
            _ => {
                return Err(ImageIoError::UnsupportedFormat(format!(
                    "PNM cannot store {} channel {}",
                    ch, spec.format
                )));
            }
        };
        Ok(format)
    }
}

/// Parsed PNM header (internal).
pub(crate) struct PnmHeader {
    pub format: PnmFormat,
    pub width: u32,
    pub height: u32,
    pub maxval: u32,
    pub depth: u32,
    pub element: ElementType,
    /// PFM only: negative scale means little-endian samples.
    pub little_endian: bool,
    pub data_offset: usize,
}

static CAPABILITIES: BackendCapabilities = BackendCapabilities::new()
    .with_write_order(WriteOrder::Buffered)
    .with_random_access_read(true)
    .with_lossless(true);

/// Netpbm backend.
#[derive(Clone, Copy, Debug, Default)]
pub struct PnmBackend;

impl FormatBackend for PnmBackend {
    fn name(&self) -> &'static str {
        "pnm"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["ppm", "pgm", "pam", "pfm", "pnm"]
    }

    fn identify(&self, header: &[u8]) -> bool {
        matches!(header, [b'P', b'5' | b'6' | b'7' | b'F' | b'f', ..])
    }

    fn capabilities(&self) -> &'static BackendCapabilities {
        &CAPABILITIES
    }

    fn check_spec(&self, path: &Path, spec: &ImageSpec) -> Result<(), ImageIoError> {
        PnmFormat::select(path, spec).map(|_| ())
    }

    fn create_writer(&self) -> Box<dyn FormatWriter> {
        Box::new(PnmWriter::default())
    }

    fn create_reader(&self) -> Box<dyn FormatReader> {
        Box::new(PnmReader::default())
    }
}

struct PnmTarget {
    file: File,
    format: PnmFormat,
    spec: ImageSpec,
    pixels: Vec<u8>,
}

#[derive(Default)]
struct PnmWriter {
    target: Option<PnmTarget>,
}

impl PnmWriter {
    fn target(&mut self) -> Result<&mut PnmTarget, ImageIoError> {
        self.target.as_mut().ok_or(ImageIoError::InvalidState {
            op: "write",
            state: "closed",
        })
    }
}

impl FormatWriter for PnmWriter {
    fn open(&mut self, file: File, path: &Path, spec: &ImageSpec) -> Result<(), ImageIoError> {
        let format = PnmFormat::select(path, spec)?;
        self.target = Some(PnmTarget {
            file,
            format,
            spec: spec.clone(),
            pixels: vec![0; spec.image_bytes()],
        });
        Ok(())
    }

    fn write_scanline(&mut self, row: u32, data: &[u8]) -> Result<(), ImageIoError> {
        let target = self.target()?;
        let stride = target.spec.scanline_bytes();
        let start = row as usize * stride;
        target.pixels[start..start + stride].copy_from_slice(data);
        Ok(())
    }

    fn write_image(
        &mut self,
        _spec: &ImageSpec,
        data: &[u8],
        stop: &dyn Stop,
    ) -> Result<(), ImageIoError> {
        stop.check()?;
        self.target()?.pixels.copy_from_slice(data);
        Ok(())
    }

    fn close(&mut self, stop: &dyn Stop) -> Result<(), ImageIoError> {
        let Some(mut target) = self.target.take() else {
            return Ok(());
        };
        let spec = &target.spec;
        let mut out = BufWriter::new(&mut target.file);
        encode::encode_pnm(
            &mut out,
            &target.pixels,
            spec.width,
            spec.height,
            spec.channels,
            spec.format,
            target.format,
            stop,
        )?;
        out.flush()?;
        Ok(())
    }
}

/// Upper bound on header bytes, comments included.
const MAX_HEADER_BYTES: usize = 64 * 1024;

/// Read just enough of `file` to parse the header.
///
/// Returns the header and every byte read so far, which may run into the payload.
fn read_header(file: &mut File) -> Result<(PnmHeader, Vec<u8>), ImageIoError> {
    let mut buf = Vec::with_capacity(512);
    let mut chunk = [0u8; 512];
    loop {
        match decode::parse_header(&buf) {
            Ok(header) => return Ok((header, buf)),
            Err(ImageIoError::UnexpectedEof) if buf.len() < MAX_HEADER_BYTES => {}
            Err(ImageIoError::UnexpectedEof) => {
                return Err(ImageIoError::InvalidHeader(format!(
                    "header longer than {MAX_HEADER_BYTES} bytes"
                )));
            }
            Err(e) => return Err(e),
        }
        let n = file.read(&mut chunk)?;
        if n == 0 {
            return Err(ImageIoError::UnexpectedEof);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}

struct PnmSource {
    _file: File,
    stride: usize,
    pixels: Vec<u8>,
}

#[derive(Default)]
struct PnmReader {
    source: Option<PnmSource>,
}

impl FormatReader for PnmReader {
    fn open(
        &mut self,
        mut file: File,
        limits: &Limits,
        stop: &dyn Stop,
    ) -> Result<ImageSpec, ImageIoError> {
        let (header, mut prefix) = read_header(&mut file)?;
        limits.check(header.width, header.height)?;
        let len = decode::payload_len(&header)?;
        limits.check_memory(len)?;
        let spec = ImageSpec::new(header.width, header.height, header.depth, header.element)?;

        let mut payload = prefix.split_off(header.data_offset);
        payload.truncate(len);
        let have = payload.len();
        if have < len {
            payload.resize(len, 0);
            file.read_exact(&mut payload[have..]).map_err(|e| match e.kind() {
                ErrorKind::UnexpectedEof => ImageIoError::UnexpectedEof,
                _ => ImageIoError::Io(e),
            })?;
        }
        let pixels = decode::decode_pixels(payload, &header, stop)?;
        log::debug!(
            "pnm: {:?} {}x{} depth {} maxval {}",
            header.format,
            header.width,
            header.height,
            header.depth,
            header.maxval
        );
        self.source = Some(PnmSource {
            _file: file,
            stride: spec.scanline_bytes(),
            pixels,
        });
        Ok(spec)
    }

    fn read_scanline(&mut self, row: u32, buf: &mut [u8]) -> Result<(), ImageIoError> {
        let source = self.source.as_ref().ok_or(ImageIoError::InvalidState {
            op: "read_scanline",
            state: "closed",
        })?;
        let start = row as usize * source.stride;
        let line = source
            .pixels
            .get(start..start + source.stride)
            .ok_or(ImageIoError::UnexpectedEof)?;
        buf.copy_from_slice(line);
        Ok(())
    }

    fn close(&mut self) -> Result<(), ImageIoError> {
        self.source = None;
        Ok(())
    }
}
