//! Image output session.
//!
//! An [`ImageOutput`] is bound to one backend when created and to one file
//! when opened. It validates every write against the negotiated spec and
//! the backend's capabilities before handing it to the backend writer.
//!
//! ```no_run
//! use zenio::{ElementType, ImageSpec, Registry};
//!
//! let registry = Registry::with_builtins();
//! let spec = ImageSpec::new(320, 240, 3, ElementType::U8)?;
//! let mut out = registry.create_output("scanlines.ppm")?;
//! out.open("scanlines.ppm", &spec)?;
//! let row = vec![0u8; spec.scanline_bytes()];
//! for y in 0..240 {
//!     out.write_scanline(y, 0, &row)?;
//! }
//! out.close()?;
//! # Ok::<(), zenio::ImageIoError>(())
//! ```

use std::borrow::Cow;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use enough::{Stop, Unstoppable};

use crate::backend::{FormatBackend, FormatWriter};
use crate::capabilities::WriteOrder;
use crate::error::ImageIoError;
use crate::limits::Limits;
use crate::spec::{ImageSpec, TileRegion};

/// Lifecycle of a session.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionState {
    /// Created, no file bound yet.
    Closed,
    /// File bound, nothing written.
    Opened,
    /// At least one write has succeeded.
    Writing,
    /// Closed after use; the session cannot be reopened.
    Finished,
}

impl SessionState {
    pub fn name(self) -> &'static str {
        match self {
            SessionState::Closed => "closed",
            SessionState::Opened => "opened",
            SessionState::Writing => "writing",
            SessionState::Finished => "finished",
        }
    }
}

/// Writer session for one image file.
pub struct ImageOutput {
    backend: Arc<dyn FormatBackend>,
    writer: Option<Box<dyn FormatWriter>>,
    state: SessionState,
    spec: Option<ImageSpec>,
    path: Option<PathBuf>,
    limits: Limits,
    stop: Arc<dyn Stop + Send + Sync>,
    /// Per-row (untiled) or per-tile (tiled) completion flags.
    written: Vec<bool>,
    /// First row a sequential backend will still accept.
    next_row: u32,
    corrupted: bool,
}

impl core::fmt::Debug for ImageOutput {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ImageOutput")
            .field("format", &self.backend.name())
            .field("state", &self.state)
            .field("path", &self.path)
            .field("spec", &self.spec)
            .field("corrupted", &self.corrupted)
            .finish()
    }
}

impl ImageOutput {
    /// Session for `backend`; usually obtained from
    /// [`Registry::create_output`](crate::Registry::create_output).
    pub fn new(backend: Arc<dyn FormatBackend>) -> Self {
        Self {
            backend,
            writer: None,
            state: SessionState::Closed,
            spec: None,
            path: None,
            limits: Limits::none(),
            stop: Arc::new(Unstoppable),
            written: Vec::new(),
            next_row: 0,
            corrupted: false,
        }
    }

    /// Apply resource limits checked at [`open`](Self::open).
    pub fn with_limits(mut self, limits: Limits) -> Self {
        self.limits = limits;
        self
    }

    /// Cancellation token checked during whole-image writes and buffered encodes.
    pub fn with_stop(mut self, stop: Arc<dyn Stop + Send + Sync>) -> Self {
        self.stop = stop;
        self
    }

    /// Whether the bound backend supports `feature` for writing.
    ///
    /// Unknown feature names return `false`.
    pub fn supports(&self, feature: &str) -> bool {
        self.backend.capabilities().supports_output(feature)
    }

    /// Name of the bound format backend.
    pub fn format_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Snapshot of the spec captured at open.
    pub fn spec(&self) -> Option<&ImageSpec> {
        self.spec.as_ref()
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// `(completed, total)` scanlines, or tiles for tiled images.
    pub fn progress(&self) -> (usize, usize) {
        (
            self.written.iter().filter(|&&done| done).count(),
            self.written.len(),
        )
    }

    /// Create `path` and prepare to write an image described by `spec`.
    ///
    /// The spec is copied; later changes to the caller's value do not
    /// affect this session.
    pub fn open(&mut self, path: impl AsRef<Path>, spec: &ImageSpec) -> Result<(), ImageIoError> {
        let path = path.as_ref();
        if self.state != SessionState::Closed {
            return Err(ImageIoError::InvalidState {
                op: "open",
                state: self.state.name(),
            });
        }
        self.negotiate(path, spec)?;
        self.limits.check(spec.width, spec.height)?;
        if self.backend.capabilities().write_order() == WriteOrder::Buffered {
            self.limits.check_memory(spec.image_bytes())?;
        }

        let mut snapshot = spec.clone();
        if !snapshot.attributes.is_empty() && !self.backend.capabilities().arbitrary_metadata() {
            log::debug!(
                "{}: {} backend does not store attributes, dropping {}",
                path.display(),
                self.backend.name(),
                snapshot.attributes.len()
            );
            snapshot.attributes.clear();
        }

        let file = File::create(path).map_err(|e| ImageIoError::open(path, e))?;
        let mut writer = self.backend.create_writer();
        writer.open(file, path, &snapshot).map_err(|e| match e {
            ImageIoError::OpenError { .. } => e,
            other => ImageIoError::open(path, other),
        })?;

        log::debug!(
            "opened {} for writing as {} ({}x{}, {} ch {})",
            path.display(),
            self.backend.name(),
            snapshot.width,
            snapshot.height,
            snapshot.channels,
            snapshot.format
        );

        let units = if snapshot.is_tiled() {
            snapshot.tiles_across() as usize * snapshot.tiles_down() as usize
        } else {
            snapshot.height as usize
        };
        self.written = vec![false; units];
        self.next_row = 0;
        self.writer = Some(writer);
        self.spec = Some(snapshot);
        self.path = Some(path.to_path_buf());
        self.state = SessionState::Opened;
        Ok(())
    }

    /// Reject specs that need something the backend cannot store.
    fn negotiate(&self, path: &Path, spec: &ImageSpec) -> Result<(), ImageIoError> {
        let caps = self.backend.capabilities();
        let name = self.backend.name();
        if spec.is_tiled() && !caps.tiles() {
            return Err(ImageIoError::open(
                path,
                format!("{name} does not support tiled images"),
            ));
        }
        if spec.has_origin() && !caps.origin() {
            return Err(ImageIoError::open(
                path,
                format!("{name} cannot record a data window origin"),
            ));
        }
        if (spec.x < 0 || spec.y < 0 || spec.full_x < 0 || spec.full_y < 0)
            && !caps.negative_origin()
        {
            return Err(ImageIoError::open(
                path,
                format!("{name} cannot record a negative origin"),
            ));
        }
        if spec.is_cropped() && !caps.display_window() {
            return Err(ImageIoError::open(
                path,
                format!("{name} cannot record a full window distinct from the data window"),
            ));
        }
        self.backend
            .check_spec(path, spec)
            .map_err(|e| ImageIoError::open(path, e))
    }

    fn check_writable(&self, op: &'static str) -> Result<&ImageSpec, ImageIoError> {
        match self.state {
            SessionState::Opened | SessionState::Writing => {}
            state => {
                return Err(ImageIoError::InvalidState {
                    op,
                    state: state.name(),
                });
            }
        }
        if self.corrupted {
            return Err(ImageIoError::Corrupted);
        }
        self.spec.as_ref().ok_or(ImageIoError::InvalidState {
            op,
            state: self.state.name(),
        })
    }

    /// Record a backend result, marking the session corrupted on I/O failure.
    fn track(&mut self, result: Result<(), ImageIoError>) -> Result<(), ImageIoError> {
        if let Err(e) = &result {
            if e.poisons_session() {
                log::warn!(
                    "{}: write failed, session is now unusable: {e}",
                    self.path.as_deref().unwrap_or(Path::new("?")).display()
                );
                self.corrupted = true;
            }
        }
        result
    }

    /// Write scanline `y` of depth plane `z` (always 0 for 2D images).
    ///
    /// `y` is in image coordinates, i.e. between `spec.y()` and
    /// `spec.y() + spec.height()`. `data` must hold exactly one scanline.
    pub fn write_scanline(&mut self, y: i32, z: i32, data: &[u8]) -> Result<(), ImageIoError> {
        let spec = self.check_writable("write_scanline")?;
        if spec.is_tiled() {
            return Err(ImageIoError::Unsupported(
                "scanline writes to a tiled image".into(),
            ));
        }
        if z != 0 || !spec.contains(i64::from(spec.x), i64::from(y)) {
            return Err(ImageIoError::OutOfBounds {
                x: i64::from(spec.x),
                y: i64::from(y),
                z,
            });
        }
        let expected = spec.scanline_bytes();
        if data.len() != expected {
            return Err(ImageIoError::SizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        let row = (i64::from(y) - i64::from(spec.y)) as u32;
        if self.backend.capabilities().write_order() == WriteOrder::Sequential
            && row < self.next_row
        {
            return Err(ImageIoError::SequenceError {
                expected: i64::from(spec.y) + i64::from(self.next_row),
                actual: i64::from(y),
            });
        }

        let result = match self.writer.as_mut() {
            Some(writer) => writer.write_scanline(row, data),
            None => Err(ImageIoError::Corrupted),
        };
        self.track(result)?;
        self.written[row as usize] = true;
        self.next_row = self.next_row.max(row + 1);
        self.state = SessionState::Writing;
        Ok(())
    }

    /// Write the tile whose top-left pixel is (`x`, `y`) in image coordinates.
    ///
    /// `data` is always a full `tile_width * tile_height` tile; pixels of
    /// edge tiles that fall outside the data window are ignored.
    pub fn write_tile(&mut self, x: i32, y: i32, z: i32, data: &[u8]) -> Result<(), ImageIoError> {
        let spec = self.check_writable("write_tile")?;
        if !self.backend.capabilities().tiles() {
            return Err(ImageIoError::Unsupported(format!(
                "tiles are not supported by the {} backend",
                self.backend.name()
            )));
        }
        let (tw, th) = spec.tile.ok_or_else(|| {
            ImageIoError::Unsupported("tile writes to an untiled image".into())
        })?;
        let (dx, dy) = tile_offset(spec, x, y, z, tw, th)?;
        let expected = spec.tile_bytes();
        if data.len() != expected {
            return Err(ImageIoError::SizeMismatch {
                expected,
                actual: data.len(),
            });
        }

        let region = TileRegion::clipped(spec, dx, dy, tw, th);
        let bpp = spec.bytes_per_pixel();
        let index = (dy / th) as usize * spec.tiles_across() as usize + (dx / tw) as usize;
        let clipped: Cow<'_, [u8]> = if region.width == tw && region.height == th {
            Cow::Borrowed(data)
        } else {
            Cow::Owned(region.gather(data, tw as usize * bpp, bpp))
        };

        let result = match self.writer.as_mut() {
            Some(writer) => writer.write_tile(region, &clipped),
            None => Err(ImageIoError::Corrupted),
        };
        self.track(result)?;
        self.written[index] = true;
        self.state = SessionState::Writing;
        Ok(())
    }

    /// Write the whole data window at once.
    ///
    /// `data` must be exactly `spec.image_bytes()` long. Tiled images are
    /// split into tiles. On a sequential backend this must be the first write;
    /// if it is cancelled, [`progress`](Self::progress) reports the rows that
    /// reached the file and `write_scanline` resumes from there.
    pub fn write_image(&mut self, data: &[u8]) -> Result<(), ImageIoError> {
        let spec = self.check_writable("write_image")?.clone();
        let expected = spec.image_bytes();
        if data.len() != expected {
            return Err(ImageIoError::SizeMismatch {
                expected,
                actual: data.len(),
            });
        }
        if self.backend.capabilities().write_order() == WriteOrder::Sequential
            && self.next_row != 0
        {
            return Err(ImageIoError::SequenceError {
                expected: i64::from(spec.y) + i64::from(self.next_row),
                actual: i64::from(spec.y),
            });
        }

        if spec.tile.is_none()
            && self.backend.capabilities().write_order() == WriteOrder::Sequential
        {
            return self.stream_rows(&spec, data);
        }

        let result = match self.writer.as_mut() {
            Some(writer) => match spec.tile {
                Some((tw, th)) => write_tiles(&mut **writer, &spec, data, tw, th, &*self.stop),
                None => writer.write_image(&spec, data, &*self.stop),
            },
            None => Err(ImageIoError::Corrupted),
        };
        self.track(result)?;
        self.written.fill(true);
        self.next_row = spec.height;
        self.state = SessionState::Writing;
        Ok(())
    }

    /// Feed a whole image to a sequential writer one row at a time, so a
    /// cancelled or failed write leaves `next_row` at the first unwritten row
    /// and the caller can resume with `write_scanline`.
    fn stream_rows(&mut self, spec: &ImageSpec, data: &[u8]) -> Result<(), ImageIoError> {
        let stop = Arc::clone(&self.stop);
        let stride = spec.scanline_bytes();
        for (row, line) in data.chunks_exact(stride).enumerate() {
            if row % 16 == 0 {
                stop.check()?;
            }
            let result = match self.writer.as_mut() {
                Some(writer) => writer.write_scanline(row as u32, line),
                None => Err(ImageIoError::Corrupted),
            };
            self.track(result)?;
            self.written[row] = true;
            self.next_row = row as u32 + 1;
            self.state = SessionState::Writing;
        }
        Ok(())
    }

    /// Finalize the file and release the handle.
    ///
    /// Closing twice, or closing a session that was never opened, is a no-op.
    /// Rows or tiles never written are stored as zeros.
    pub fn close(&mut self) -> Result<(), ImageIoError> {
        if matches!(self.state, SessionState::Closed | SessionState::Finished) {
            return Ok(());
        }
        self.state = SessionState::Finished;
        let Some(mut writer) = self.writer.take() else {
            return Ok(());
        };

        let path = self.path.as_deref().unwrap_or(Path::new("?")).display().to_string();
        let (done, total) = self.progress();
        if done < total && !self.corrupted {
            let unit = if self.spec.as_ref().is_some_and(ImageSpec::is_tiled) {
                "tiles"
            } else {
                "scanlines"
            };
            log::warn!("{path}: closing with {done} of {total} {unit} written");
        }

        let result = writer.close(&*self.stop);
        drop(writer);
        log::debug!("closed {path}");
        result.map_err(|e| match e {
            ImageIoError::CloseError(_) => e,
            other => ImageIoError::CloseError(other.to_string()),
        })
    }
}

impl Drop for ImageOutput {
    fn drop(&mut self) {
        if matches!(self.state, SessionState::Opened | SessionState::Writing) {
            if let Err(e) = self.close() {
                log::error!("image output dropped without close, finalize failed: {e}");
            }
        }
    }
}

/// Validate a tile origin and convert it to data-window-relative offsets.
pub(crate) fn tile_offset(
    spec: &ImageSpec,
    x: i32,
    y: i32,
    z: i32,
    tw: u32,
    th: u32,
) -> Result<(u32, u32), ImageIoError> {
    if z != 0 || !spec.contains(i64::from(x), i64::from(y)) {
        return Err(ImageIoError::OutOfBounds {
            x: i64::from(x),
            y: i64::from(y),
            z,
        });
    }
    let dx = (i64::from(x) - i64::from(spec.x)) as u32;
    let dy = (i64::from(y) - i64::from(spec.y)) as u32;
    if dx % tw != 0 || dy % th != 0 {
        return Err(ImageIoError::AlignmentError {
            x,
            y,
            tile_width: tw,
            tile_height: th,
        });
    }
    Ok((dx, dy))
}

fn write_tiles(
    writer: &mut dyn FormatWriter,
    spec: &ImageSpec,
    data: &[u8],
    tw: u32,
    th: u32,
    stop: &dyn Stop,
) -> Result<(), ImageIoError> {
    let bpp = spec.bytes_per_pixel();
    let stride = spec.scanline_bytes();
    for dy in (0..spec.height).step_by(th as usize) {
        stop.check()?;
        for dx in (0..spec.width).step_by(tw as usize) {
            let region = TileRegion::clipped(spec, dx, dy, tw, th);
            let start = dy as usize * stride + dx as usize * bpp;
            let tile = region.gather(&data[start..], stride, bpp);
            writer.write_tile(region, &tile)?;
        }
    }
    Ok(())
}
