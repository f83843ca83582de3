//! TRF: tiled raster format.
//!
//! An uncompressed container that records everything an [`ImageSpec`] can
//! describe: data and full windows (including negative origins), tiling and
//! string attributes. Pixel samples are stored little-endian.
//!
//! Untiled images store rows top to bottom. Tiled images store one
//! full-size slot per tile in row-major tile order; edge tiles are padded
//! with zeros. Every row and slot has a fixed offset, so the writer seeks
//! and accepts scanlines and tiles in any order.

mod header;

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use crate::backend::{FormatBackend, FormatReader, FormatWriter};
use crate::capabilities::{BackendCapabilities, WriteOrder};
use crate::error::ImageIoError;
use crate::limits::Limits;
use crate::pixel::native_to_le;
use crate::spec::{ImageSpec, TileRegion};
use enough::Stop;

static CAPABILITIES: BackendCapabilities = BackendCapabilities::new()
    .with_tiles(true)
    .with_write_order(WriteOrder::RandomAccess)
    .with_random_access_read(true)
    .with_arbitrary_metadata(true)
    .with_display_window(true)
    .with_origin(true)
    .with_negative_origin(true)
    .with_lossless(true);

/// Tiled raster format backend.
#[derive(Clone, Copy, Debug, Default)]
pub struct TrfBackend;

impl FormatBackend for TrfBackend {
    fn name(&self) -> &'static str {
        "trf"
    }

    fn extensions(&self) -> &'static [&'static str] {
        &["trf"]
    }

    fn identify(&self, header: &[u8]) -> bool {
        header.starts_with(header::MAGIC)
    }

    fn capabilities(&self) -> &'static BackendCapabilities {
        &CAPABILITIES
    }

    fn check_spec(&self, _path: &Path, spec: &ImageSpec) -> Result<(), ImageIoError> {
        let header = header::encode_header(spec)?;
        Layout::new(spec, header.len() as u64).map(|_| ())
    }

    fn create_writer(&self) -> Box<dyn FormatWriter> {
        Box::new(TrfWriter::default())
    }

    fn create_reader(&self) -> Box<dyn FormatReader> {
        Box::new(TrfReader::default())
    }
}

/// Byte offsets of pixel storage inside a TRF file.
#[derive(Clone, Debug)]
struct Layout {
    data_offset: u64,
    elem_size: usize,
    bpp: usize,
    stride: usize,
    tile: Option<(u32, u32)>,
    tiles_across: u32,
    tile_bytes: usize,
    payload_len: u64,
}

impl Layout {
    /// Storage layout for `spec`, or `DimensionsTooLarge` when the padded
    /// payload does not fit in a file offset.
    fn new(spec: &ImageSpec, data_offset: u64) -> Result<Self, ImageIoError> {
        let too_large = || ImageIoError::DimensionsTooLarge {
            width: spec.width(),
            height: spec.height(),
        };
        let payload_len = match spec.tile_size() {
            Some(_) => (spec.tile_bytes() as u64)
                .checked_mul(u64::from(spec.tiles_across()))
                .and_then(|row| row.checked_mul(u64::from(spec.tiles_down()))),
            None => Some(spec.image_bytes() as u64),
        }
        .ok_or_else(too_large)?;
        data_offset.checked_add(payload_len).ok_or_else(too_large)?;
        Ok(Self {
            data_offset,
            elem_size: spec.format().size(),
            bpp: spec.bytes_per_pixel(),
            stride: spec.scanline_bytes(),
            tile: spec.tile_size(),
            tiles_across: spec.tiles_across(),
            tile_bytes: spec.tile_bytes(),
            payload_len,
        })
    }

    fn row_offset(&self, row: u32) -> u64 {
        self.data_offset + u64::from(row) * self.stride as u64
    }

    /// Offset of the slot holding the tile that starts at (`dx`, `dy`).
    fn slot_offset(&self, dx: u32, dy: u32, tw: u32, th: u32) -> u64 {
        let index = u64::from(dy / th) * u64::from(self.tiles_across) + u64::from(dx / tw);
        self.data_offset + index * self.tile_bytes as u64
    }

    fn end(&self) -> u64 {
        self.data_offset + self.payload_len
    }
}

fn io_to_eof(e: io::Error) -> ImageIoError {
    if e.kind() == io::ErrorKind::UnexpectedEof {
        ImageIoError::UnexpectedEof
    } else {
        ImageIoError::Io(e)
    }
}

struct TrfTarget {
    file: File,
    layout: Layout,
    scratch: Vec<u8>,
}

#[derive(Default)]
struct TrfWriter {
    target: Option<TrfTarget>,
}

impl TrfWriter {
    fn target(&mut self, op: &'static str) -> Result<&mut TrfTarget, ImageIoError> {
        self.target.as_mut().ok_or(ImageIoError::InvalidState {
            op,
            state: "closed",
        })
    }
}

impl FormatWriter for TrfWriter {
    fn open(&mut self, mut file: File, _path: &Path, spec: &ImageSpec) -> Result<(), ImageIoError> {
        let header = header::encode_header(spec)?;
        let layout = Layout::new(spec, header.len() as u64)?;
        file.write_all(&header)?;
        // Pre-size so unwritten rows and tiles read back as zeros.
        file.set_len(layout.end())?;
        self.target = Some(TrfTarget {
            file,
            layout,
            scratch: Vec::new(),
        });
        Ok(())
    }

    fn write_scanline(&mut self, row: u32, data: &[u8]) -> Result<(), ImageIoError> {
        let target = self.target("write_scanline")?;
        target.scratch.clear();
        target.scratch.extend_from_slice(data);
        native_to_le(&mut target.scratch, target.layout.elem_size);
        target
            .file
            .seek(SeekFrom::Start(target.layout.row_offset(row)))?;
        target.file.write_all(&target.scratch)?;
        Ok(())
    }

    fn write_tile(&mut self, region: TileRegion, data: &[u8]) -> Result<(), ImageIoError> {
        let target = self.target("write_tile")?;
        let layout = &target.layout;
        let (tw, th) = layout
            .tile
            .ok_or_else(|| ImageIoError::Unsupported("tile writes to an untiled image".into()))?;
        let slot_stride = tw as usize * layout.bpp;
        target.scratch.clear();
        target.scratch.resize(layout.tile_bytes, 0);
        region.scatter(data, &mut target.scratch, slot_stride, layout.bpp);
        native_to_le(&mut target.scratch, layout.elem_size);
        let offset = layout.slot_offset(region.x, region.y, tw, th);
        target.file.seek(SeekFrom::Start(offset))?;
        target.file.write_all(&target.scratch)?;
        Ok(())
    }

    fn close(&mut self, _stop: &dyn Stop) -> Result<(), ImageIoError> {
        let Some(mut target) = self.target.take() else {
            return Ok(());
        };
        target.file.flush()?;
        target.file.sync_data()?;
        Ok(())
    }
}

struct TrfSource {
    file: File,
    layout: Layout,
}

#[derive(Default)]
struct TrfReader {
    source: Option<TrfSource>,
}

impl TrfReader {
    fn source(&mut self, op: &'static str) -> Result<&mut TrfSource, ImageIoError> {
        self.source.as_mut().ok_or(ImageIoError::InvalidState {
            op,
            state: "closed",
        })
    }
}

impl TrfSource {
    fn read_at(&mut self, offset: u64, buf: &mut [u8]) -> Result<(), ImageIoError> {
        self.file.seek(SeekFrom::Start(offset))?;
        self.file.read_exact(buf).map_err(io_to_eof)
    }
}

impl FormatReader for TrfReader {
    fn open(
        &mut self,
        mut file: File,
        limits: &Limits,
        _stop: &dyn Stop,
    ) -> Result<ImageSpec, ImageIoError> {
        let mut fixed = [0u8; header::FIXED_LEN];
        file.read_exact(&mut fixed).map_err(io_to_eof)?;
        let fixed = header::decode_fixed(&fixed)?;
        limits.check(fixed.width(), fixed.height())?;
        let mut attributes = vec![0u8; fixed.attr_len as usize];
        file.read_exact(&mut attributes).map_err(io_to_eof)?;
        let spec = fixed.into_spec(&attributes)?;

        let data_offset = (header::FIXED_LEN + attributes.len()) as u64;
        let layout = Layout::new(&spec, data_offset)?;
        if file.metadata()?.len() < layout.end() {
            return Err(ImageIoError::UnexpectedEof);
        }
        log::debug!(
            "trf: {}x{} at ({}, {}), tiles {:?}, {} attributes",
            spec.width(),
            spec.height(),
            spec.x(),
            spec.y(),
            spec.tile_size(),
            spec.attributes().count()
        );
        self.source = Some(TrfSource { file, layout });
        Ok(spec)
    }

    fn read_scanline(&mut self, row: u32, buf: &mut [u8]) -> Result<(), ImageIoError> {
        let source = self.source("read_scanline")?;
        match source.layout.tile {
            None => {
                let offset = source.layout.row_offset(row);
                source.read_at(offset, buf)?;
            }
            Some((tw, th)) => {
                // Assemble the row from the slots of one tile row.
                let bpp = source.layout.bpp;
                let tile_stride = tw as usize * bpp;
                let in_tile = u64::from(row % th) * tile_stride as u64;
                let dy = row - row % th;
                for (i, chunk) in buf.chunks_mut(tile_stride).enumerate() {
                    let dx = i as u32 * tw;
                    let offset = source.layout.slot_offset(dx, dy, tw, th) + in_tile;
                    source.read_at(offset, chunk)?;
                }
            }
        }
        native_to_le(buf, source.layout.elem_size);
        Ok(())
    }

    fn read_tile(&mut self, region: TileRegion, buf: &mut [u8]) -> Result<(), ImageIoError> {
        let source = self.source("read_tile")?;
        let (tw, th) = source
            .layout
            .tile
            .ok_or_else(|| ImageIoError::Unsupported("tile reads from an untiled image".into()))?;
        let bpp = source.layout.bpp;
        let slot = source.layout.slot_offset(region.x, region.y, tw, th);
        let row_bytes = region.width as usize * bpp;
        let tile_stride = tw as usize * bpp;
        for (r, row) in buf.chunks_exact_mut(row_bytes).enumerate() {
            source.read_at(slot + (r * tile_stride) as u64, row)?;
        }
        native_to_le(buf, source.layout.elem_size);
        Ok(())
    }

    fn close(&mut self) -> Result<(), ImageIoError> {
        self.source = None;
        Ok(())
    }
}
