//! Image input session.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use enough::{Stop, Unstoppable};

use crate::backend::{FormatBackend, FormatReader};
use crate::error::ImageIoError;
use crate::limits::Limits;
use crate::output::tile_offset;
use crate::registry::Registry;
use crate::spec::{ImageSpec, TileRegion};

/// Reader session for one image file.
///
/// Opening parses the header; [`spec`](Self::spec) then describes the data
/// window, full window, tiling and attributes stored in the file.
pub struct ImageInput {
    backend: Arc<dyn FormatBackend>,
    reader: Option<Box<dyn FormatReader>>,
    spec: ImageSpec,
    path: PathBuf,
    limits: Limits,
    /// First row a sequential reader will still serve.
    next_row: u32,
    corrupted: bool,
}

impl core::fmt::Debug for ImageInput {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ImageInput")
            .field("format", &self.backend.name())
            .field("path", &self.path)
            .field("open", &self.reader.is_some())
            .field("spec", &self.spec)
            .finish()
    }
}

impl ImageInput {
    /// Open `path`, choosing the backend through `registry`.
    pub fn open(registry: &Registry, path: impl AsRef<Path>) -> Result<Self, ImageIoError> {
        Self::open_with(registry, path, &Limits::none(), &Unstoppable)
    }

    /// Open `path` with resource limits and a cancellation token for
    /// backends that decode the whole file up front.
    pub fn open_with(
        registry: &Registry,
        path: impl AsRef<Path>,
        limits: &Limits,
        stop: &dyn Stop,
    ) -> Result<Self, ImageIoError> {
        let path = path.as_ref();
        let backend = registry.resolve_input(path)?;
        let file = File::open(path).map_err(|e| ImageIoError::open(path, e))?;
        let mut reader = backend.create_reader();
        let spec = reader.open(file, limits, stop)?;
        if let Err(e) = limits.check(spec.width, spec.height) {
            let _ = reader.close();
            return Err(e);
        }
        log::debug!(
            "opened {} for reading as {} ({}x{} at ({}, {}), {} ch {})",
            path.display(),
            backend.name(),
            spec.width,
            spec.height,
            spec.x,
            spec.y,
            spec.channels,
            spec.format
        );
        Ok(Self {
            backend,
            reader: Some(reader),
            spec,
            path: path.to_path_buf(),
            limits: limits.clone(),
            next_row: 0,
            corrupted: false,
        })
    }

    /// Description of the image as stored in the file.
    pub fn spec(&self) -> &ImageSpec {
        &self.spec
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Name of the backend that decoded the header.
    pub fn format_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn is_open(&self) -> bool {
        self.reader.is_some()
    }

    /// Whether the bound backend supports `feature` for reading.
    ///
    /// Unknown feature names return `false`.
    pub fn supports(&self, feature: &str) -> bool {
        self.backend.capabilities().supports_input(feature)
    }

    fn random_access(&self) -> bool {
        self.backend.capabilities().random_access_read()
    }

    fn reader(&mut self, op: &'static str) -> Result<&mut dyn FormatReader, ImageIoError> {
        if self.corrupted {
            return Err(ImageIoError::Corrupted);
        }
        match self.reader.as_mut() {
            Some(reader) => Ok(&mut **reader),
            None => Err(ImageIoError::InvalidState {
                op,
                state: "closed",
            }),
        }
    }

    fn track<T>(&mut self, result: Result<T, ImageIoError>) -> Result<T, ImageIoError> {
        if let Err(e) = &result {
            if e.poisons_session() {
                log::warn!(
                    "{}: read failed, session is now unusable: {e}",
                    self.path.display()
                );
                self.corrupted = true;
            }
        }
        result
    }

    fn check_row_order(&self, row: u32) -> Result<(), ImageIoError> {
        if !self.random_access() && row < self.next_row {
            return Err(ImageIoError::SequenceError {
                expected: i64::from(self.spec.y) + i64::from(self.next_row),
                actual: i64::from(self.spec.y) + i64::from(row),
            });
        }
        Ok(())
    }

    /// Read scanline `y` (image coordinates) of depth plane `z` into `buf`.
    ///
    /// `buf` must hold exactly one scanline. Backends without random access
    /// serve rows in ascending order only.
    pub fn read_scanline(&mut self, y: i32, z: i32, buf: &mut [u8]) -> Result<(), ImageIoError> {
        self.reader("read_scanline")?;
        let spec = &self.spec;
        if z != 0 || !spec.contains(i64::from(spec.x), i64::from(y)) {
            return Err(ImageIoError::OutOfBounds {
                x: i64::from(spec.x),
                y: i64::from(y),
                z,
            });
        }
        let expected = spec.scanline_bytes();
        if buf.len() != expected {
            return Err(ImageIoError::SizeMismatch {
                expected,
                actual: buf.len(),
            });
        }
        let row = (i64::from(y) - i64::from(spec.y)) as u32;
        self.check_row_order(row)?;

        let result = self.reader("read_scanline")?.read_scanline(row, buf);
        self.track(result)?;
        self.next_row = self.next_row.max(row + 1);
        Ok(())
    }

    /// Read the tile whose top-left pixel is (`x`, `y`) into `buf`.
    ///
    /// `buf` is a full `tile_width * tile_height` tile; pixels of edge tiles
    /// that fall outside the data window are set to zero.
    pub fn read_tile(&mut self, x: i32, y: i32, z: i32, buf: &mut [u8]) -> Result<(), ImageIoError> {
        self.reader("read_tile")?;
        if !self.backend.capabilities().tiles() {
            return Err(ImageIoError::Unsupported(format!(
                "tiles are not supported by the {} backend",
                self.backend.name()
            )));
        }
        let spec = &self.spec;
        let (tw, th) = spec.tile.ok_or_else(|| {
            ImageIoError::Unsupported("tile reads from an untiled image".into())
        })?;
        let (dx, dy) = tile_offset(spec, x, y, z, tw, th)?;
        let expected = spec.tile_bytes();
        if buf.len() != expected {
            return Err(ImageIoError::SizeMismatch {
                expected,
                actual: buf.len(),
            });
        }
        let region = TileRegion::clipped(spec, dx, dy, tw, th);
        let bpp = spec.bytes_per_pixel();
        // Tiles of one tile row may come in any order, tile rows ascending.
        self.check_row_order(dy)?;

        let result = if region.width == tw && region.height == th {
            self.reader("read_tile")?.read_tile(region, buf)
        } else {
            let mut packed = vec![0u8; region.pixel_count() * bpp];
            let result = self.reader("read_tile")?.read_tile(region, &mut packed);
            if result.is_ok() {
                buf.fill(0);
                region.scatter(&packed, buf, tw as usize * bpp, bpp);
            }
            result
        };
        self.track(result)?;
        self.next_row = self.next_row.max(dy);
        Ok(())
    }

    /// Read the whole data window, scanline by scanline or tile by tile.
    ///
    /// The buffer is checked against `max_memory_bytes` of the limits
    /// given at open.
    pub fn read_image(&mut self) -> Result<Vec<u8>, ImageIoError> {
        self.reader("read_image")?;
        self.check_row_order(0)?;
        let spec = self.spec.clone();
        self.limits.check_memory(spec.image_bytes())?;
        let mut image = vec![0u8; spec.image_bytes()];
        let stride = spec.scanline_bytes();

        match spec.tile {
            Some((tw, th)) => {
                let bpp = spec.bytes_per_pixel();
                for dy in (0..spec.height).step_by(th as usize) {
                    for dx in (0..spec.width).step_by(tw as usize) {
                        let region = TileRegion::clipped(&spec, dx, dy, tw, th);
                        let mut packed = vec![0u8; region.pixel_count() * bpp];
                        let result = self.reader("read_image")?.read_tile(region, &mut packed);
                        self.track(result)?;
                        let start = dy as usize * stride + dx as usize * bpp;
                        region.scatter(&packed, &mut image[start..], stride, bpp);
                    }
                }
            }
            None => {
                for (row, line) in image.chunks_exact_mut(stride).enumerate() {
                    let result = self.reader("read_image")?.read_scanline(row as u32, line);
                    self.track(result)?;
                }
            }
        }
        self.next_row = spec.height;
        Ok(image)
    }

    /// Release the file. Closing twice is a no-op.
    pub fn close(&mut self) -> Result<(), ImageIoError> {
        let Some(mut reader) = self.reader.take() else {
            return Ok(());
        };
        let result = reader.close();
        drop(reader);
        log::debug!("closed {}", self.path.display());
        result.map_err(|e| match e {
            ImageIoError::CloseError(_) => e,
            other => ImageIoError::CloseError(other.to_string()),
        })
    }
}

impl Drop for ImageInput {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::error!("image input dropped without close, release failed: {e}");
        }
    }
}
