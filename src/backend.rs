//! Format backend plugin interface.
//!
//! A [`FormatBackend`] is a stateless description of one file format. The
//! registry hands out `Arc<dyn FormatBackend>`; sessions ask it for a fresh
//! [`FormatWriter`] or [`FormatReader`] per file.
//!
//! Writers and readers only see requests the session already validated:
//! rows are data-window relative and in range, buffers have the exact
//! size, tile regions are aligned and clipped, and ordering obeys the
//! backend's declared [`WriteOrder`](crate::WriteOrder).

use std::fs::File;
use std::path::Path;

use enough::Stop;

use crate::capabilities::BackendCapabilities;
use crate::error::ImageIoError;
use crate::limits::Limits;
use crate::spec::{ImageSpec, TileRegion};

/// A registered file format.
pub trait FormatBackend: Send + Sync {
    /// Short format name, e.g. `"pnm"`.
    fn name(&self) -> &'static str;

    /// Lowercase file extensions handled by this backend, without the dot.
    fn extensions(&self) -> &'static [&'static str];

    /// Whether `header` (the first bytes of a file) looks like this format.
    fn identify(&self, header: &[u8]) -> bool;

    /// Static capability descriptor.
    fn capabilities(&self) -> &'static BackendCapabilities;

    /// Whether the backend can encode `spec` (channel count, element type)
    /// when writing to `path`. Capability checks (tiles, windows) are done
    /// by the session; this covers format-specific restrictions.
    fn check_spec(&self, path: &Path, spec: &ImageSpec) -> Result<(), ImageIoError>;

    /// New writer for one output file.
    fn create_writer(&self) -> Box<dyn FormatWriter>;

    /// New reader for one input file.
    fn create_reader(&self) -> Box<dyn FormatReader>;
}

/// Encoder side of a backend, bound to one file between `open` and `close`.
pub trait FormatWriter: Send {
    /// Take ownership of the freshly created file and write any header.
    fn open(&mut self, file: File, path: &Path, spec: &ImageSpec) -> Result<(), ImageIoError>;

    /// Write data-window row `row` (0-based). `data` is exactly one scanline.
    fn write_scanline(&mut self, row: u32, data: &[u8]) -> Result<(), ImageIoError>;

    /// Write a clipped tile. `data` holds `region.width * region.height` pixels.
    fn write_tile(&mut self, region: TileRegion, data: &[u8]) -> Result<(), ImageIoError> {
        let _ = (region, data);
        Err(ImageIoError::Unsupported("tiles".into()))
    }

    /// Write the whole data window of an untiled image.
    fn write_image(
        &mut self,
        spec: &ImageSpec,
        data: &[u8],
        stop: &dyn Stop,
    ) -> Result<(), ImageIoError> {
        let row_bytes = spec.scanline_bytes();
        for (row, line) in data.chunks_exact(row_bytes).enumerate() {
            if row % 16 == 0 {
                stop.check()?;
            }
            self.write_scanline(row as u32, line)?;
        }
        Ok(())
    }

    /// Finish the file (trailers, buffered encode) and release the handle.
    ///
    /// Called at most once. The handle must be released even on error.
    fn close(&mut self, stop: &dyn Stop) -> Result<(), ImageIoError>;
}

/// Decoder side of a backend, bound to one file between `open` and `close`.
pub trait FormatReader: Send {
    /// Take ownership of the file, parse the header, and describe the image.
    ///
    /// Readers that load pixel data up front check `limits` before allocating.
    fn open(
        &mut self,
        file: File,
        limits: &Limits,
        stop: &dyn Stop,
    ) -> Result<ImageSpec, ImageIoError>;

    /// Read data-window row `row` into `buf` (exactly one scanline).
    fn read_scanline(&mut self, row: u32, buf: &mut [u8]) -> Result<(), ImageIoError>;

    /// Read a clipped tile into `buf` (`region.width * region.height` pixels).
    fn read_tile(&mut self, region: TileRegion, buf: &mut [u8]) -> Result<(), ImageIoError> {
        let _ = (region, buf);
        Err(ImageIoError::Unsupported("tiles".into()))
    }

    /// Release the file handle.
    fn close(&mut self) -> Result<(), ImageIoError>;
}
