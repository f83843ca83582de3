//! Farbfeld backend.
//!
//! Farbfeld is a simple lossless format: 8-byte magic ("farbfeld"),
//! width/height as u32 big-endian, then RGBA u16 big-endian pixels.
//! Rows stream straight to and from the file, so writes and reads must go
//! top to bottom.
//!
//! Implementation draws from [zune-farbfeld](https://github.com/etemesi254/zune-image)
//! by Caleb Etemesi (MIT/Apache-2.0/Zlib licensed).

mod decode;
mod encode;

use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;

use crate::backend::{FormatBackend, FormatReader, FormatWriter};
use crate::capabilities::{BackendCapabilities, WriteOrder};
use crate::error::ImageIoError;
use crate::limits::Limits;
use crate::pixel::ElementType;
use crate::spec::ImageSpec;
use enough::Stop;

static CAPABILITIES: BackendCapabilities = BackendCapabilities::new()
    .with_write_order(WriteOrder::Sequential)
    .with_lossless(true);

/// Farbfeld backend. Stores 4-channel 16-bit images only.
#[derive(Clone, Copy, Debug, Default)]
pub struct FarbfeldBackend;

impl FormatBackend for FarbfeldBackend {
    fn name(&self) -> &'static str {
        "farbfeld"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["ff", "farbfeld"]
    }

    fn identify(&self, header: &[u8]) -> bool {
        header.starts_with(encode::MAGIC)
    }

    fn capabilities(&self) -> &'static BackendCapabilities {
        &CAPABILITIES
    }

    fn check_spec(&self, _path: &Path, spec: &ImageSpec) -> Result<(), ImageIoError> {
        if spec.channels != 4 || spec.format != ElementType::U16 {
            return Err(ImageIoError::UnsupportedFormat(format!(
                "farbfeld stores 4 channel uint16, not {} channel {}",
                spec.channels, spec.format
            )));
        }
        Ok(())
    }

    fn create_writer(&self) -> Box<dyn FormatWriter> {
        Box::new(FarbfeldWriter::default())
    }

    fn create_reader(&self) -> Box<dyn FormatReader> {
        Box::new(FarbfeldReader::default())
    }
}

fn io_to_eof(e: io::Error) -> ImageIoError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        ImageIoError::UnexpectedEof
    } else {
        ImageIoError::Io(e)
    }
}

struct FarbfeldSink {
    out: BufWriter<File>,
    stride: usize,
    height: u32,
    next_row: u32,
    scratch: Vec<u8>,
}

impl FarbfeldSink {
    /// Fill rows up to (not including) `row` with zeros.
    fn pad_to(&mut self, row: u32) -> io::Result<()> {
        if self.next_row < row {
            let zeros = vec![0u8; self.stride];
            while self.next_row < row {
                self.out.write_all(&zeros)?;
                self.next_row += 1;
            }
        }
        Ok(())
    }
}

#[derive(Default)]
struct FarbfeldWriter {
    sink: Option<FarbfeldSink>,
}

impl FormatWriter for FarbfeldWriter {
    fn open(&mut self, file: File, _path: &Path, spec: &ImageSpec) -> Result<(), ImageIoError> {
        let mut out = BufWriter::new(file);
        out.write_all(&encode::encode_header(spec.width, spec.height))?;
        self.sink = Some(FarbfeldSink {
            out,
            stride: spec.scanline_bytes(),
            height: spec.height,
            next_row: 0,
            scratch: Vec::new(),
        });
        Ok(())
    }

    fn write_scanline(&mut self, row: u32, data: &[u8]) -> Result<(), ImageIoError> {
        let sink = self.sink.as_mut().ok_or(ImageIoError::InvalidState {
            op: "write_scanline",
            state: "closed",
        })?;
        if row < sink.next_row {
            return Err(ImageIoError::SequenceError {
                expected: i64::from(sink.next_row),
                actual: i64::from(row),
            });
        }
        sink.pad_to(row)?;
        encode::encode_row(data, &mut sink.scratch)?;
        sink.out.write_all(&sink.scratch)?;
        sink.next_row = row + 1;
        Ok(())
    }

    fn close(&mut self, _stop: &dyn Stop) -> Result<(), ImageIoError> {
        let Some(mut sink) = self.sink.take() else {
            return Ok(());
        };
        sink.pad_to(sink.height)?;
        sink.out.flush()?;
        Ok(())
    }
}

struct FarbfeldSource {
    input: BufReader<File>,
    stride: usize,
    next_row: u32,
}

#[derive(Default)]
struct FarbfeldReader {
    source: Option<FarbfeldSource>,
}

impl FormatReader for FarbfeldReader {
    fn open(
        &mut self,
        file: File,
        limits: &Limits,
        _stop: &dyn Stop,
    ) -> Result<ImageSpec, ImageIoError> {
        let mut input = BufReader::new(file);
        let mut header = [0u8; 16];
        input.read_exact(&mut header).map_err(io_to_eof)?;
        let (width, height) = decode::parse_header(&header)?;
        limits.check(width, height)?;
        let spec = ImageSpec::new(width, height, 4, ElementType::U16)?;
        self.source = Some(FarbfeldSource {
            input,
            stride: spec.scanline_bytes(),
            next_row: 0,
        });
        Ok(spec)
    }

    fn read_scanline(&mut self, row: u32, buf: &mut [u8]) -> Result<(), ImageIoError> {
        let source = self.source.as_mut().ok_or(ImageIoError::InvalidState {
            op: "read_scanline",
            state: "closed",
        })?;
        if row < source.next_row {
            return Err(ImageIoError::SequenceError {
                expected: i64::from(source.next_row),
                actual: i64::from(row),
            });
        }
        let skip = u64::from(row - source.next_row) * source.stride as u64;
        if skip > 0 {
            let skipped = io::copy(&mut source.input.by_ref().take(skip), &mut io::sink())?;
            if skipped != skip {
                return Err(ImageIoError::UnexpectedEof);
            }
        }
        source.input.read_exact(buf).map_err(io_to_eof)?;
        decode::decode_row(buf);
        source.next_row = row + 1;
        Ok(())
    }

    fn close(&mut self) -> Result<(), ImageIoError> {
        self.source = None;
        Ok(())
    }
}
