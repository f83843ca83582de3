//! Pixel buffer descriptor.
//!
//! [`ImageSpec`] describes the geometry, channel layout and element type of
//! an image. The *data window* (`x`, `y`, `width`, `height`) is the region
//! that actually holds pixels; the *full window* is the nominal canvas it is
//! placed on. When the two differ the image is a crop.

use std::collections::BTreeMap;

use crate::error::ImageIoError;
use crate::pixel::ElementType;

/// Geometry and layout of an image.
///
/// Construct with [`ImageSpec::new`] and refine with the `with_*` builders.
/// Every builder validates and either returns a complete new spec or an
/// error, so an `ImageSpec` value always satisfies its invariants.
///
/// ```
/// use zenio::{ElementType, ImageSpec};
///
/// let spec = ImageSpec::new(16, 16, 3, ElementType::U8)?
///     .with_origin(32, 128)?
///     .with_full_window(0, 0, 640, 480)?;
/// assert!(spec.is_cropped());
/// assert_eq!(spec.scanline_bytes(), 48);
/// # Ok::<(), zenio::ImageIoError>(())
/// ```
#[derive(Clone, Debug, PartialEq)]
pub struct ImageSpec {
    pub(crate) x: i32,
    pub(crate) y: i32,
    pub(crate) width: u32,
    pub(crate) height: u32,
    pub(crate) full_x: i32,
    pub(crate) full_y: i32,
    pub(crate) full_width: u32,
    pub(crate) full_height: u32,
    pub(crate) channels: u32,
    pub(crate) format: ElementType,
    pub(crate) tile: Option<(u32, u32)>,
    pub(crate) attributes: BTreeMap<String, String>,
}

impl ImageSpec {
    /// Describe a `width` x `height` image with `channels` interleaved
    /// channels of `format`, origin at (0, 0).
    pub fn new(
        width: u32,
        height: u32,
        channels: u32,
        format: ElementType,
    ) -> Result<Self, ImageIoError> {
        if width == 0 || height == 0 {
            return Err(ImageIoError::InvalidGeometry(format!(
                "image dimensions must be non-zero, got {width}x{height}"
            )));
        }
        if channels == 0 {
            return Err(ImageIoError::InvalidGeometry(
                "channel count must be non-zero".into(),
            ));
        }
        let spec = Self {
            x: 0,
            y: 0,
            width,
            height,
            full_x: 0,
            full_y: 0,
            full_width: width,
            full_height: height,
            channels,
            format,
            tile: None,
            attributes: BTreeMap::new(),
        };
        spec.check_sizes()?;
        Ok(spec)
    }

    /// Place the data window's top-left corner at (`x`, `y`).
    ///
    /// While the full window still equals the data window it moves along.
    pub fn with_origin(mut self, x: i32, y: i32) -> Result<Self, ImageIoError> {
        let follows = !self.is_cropped();
        self.x = x;
        self.y = y;
        if follows {
            self.full_x = x;
            self.full_y = y;
        }
        self.check_windows()?;
        Ok(self)
    }

    /// Set the full (display) window the data window is placed on.
    ///
    /// The data window must already lie inside it, so when the full window
    /// does not cover the current origin call [`with_origin`](Self::with_origin)
    /// first. An origin set afterwards must stay inside the full window.
    ///
    /// ```
    /// use zenio::{ElementType, ImageSpec};
    ///
    /// let base = ImageSpec::new(16, 16, 1, ElementType::U8)?;
    /// assert!(base.clone().with_full_window(100, 100, 640, 480).is_err());
    /// let spec = base.with_origin(132, 228)?.with_full_window(100, 100, 640, 480)?;
    /// assert_eq!(spec.full_window(), (100, 100, 640, 480));
    /// # Ok::<(), zenio::ImageIoError>(())
    /// ```
    pub fn with_full_window(
        mut self,
        x: i32,
        y: i32,
        width: u32,
        height: u32,
    ) -> Result<Self, ImageIoError> {
        if width == 0 || height == 0 {
            return Err(ImageIoError::InvalidGeometry(format!(
                "full window dimensions must be non-zero, got {width}x{height}"
            )));
        }
        self.full_x = x;
        self.full_y = y;
        self.full_width = width;
        self.full_height = height;
        self.check_windows().map_err(|e| match e {
            ImageIoError::InvalidGeometry(msg) => ImageIoError::InvalidGeometry(format!(
                "{msg}; place the data window with with_origin before with_full_window"
            )),
            other => other,
        })?;
        Ok(self)
    }

    /// Request tiled storage with `tile_width` x `tile_height` tiles.
    pub fn with_tiles(mut self, tile_width: u32, tile_height: u32) -> Result<Self, ImageIoError> {
        if tile_width == 0 || tile_height == 0 {
            return Err(ImageIoError::InvalidGeometry(format!(
                "tile dimensions must be non-zero, got {tile_width}x{tile_height}"
            )));
        }
        self.tile = Some((tile_width, tile_height));
        self.check_sizes()?;
        Ok(self)
    }

    /// Remove any tile request; the image is stored as scanlines.
    pub fn without_tiles(mut self) -> Self {
        self.tile = None;
        self
    }

    /// Attach a string attribute. Backends without `arbitrary_metadata`
    /// support drop attributes.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    fn check_windows(&self) -> Result<(), ImageIoError> {
        let data_x_end = i64::from(self.x) + i64::from(self.width);
        let data_y_end = i64::from(self.y) + i64::from(self.height);
        let full_x_end = i64::from(self.full_x) + i64::from(self.full_width);
        let full_y_end = i64::from(self.full_y) + i64::from(self.full_height);
        if self.x < self.full_x
            || self.y < self.full_y
            || data_x_end > full_x_end
            || data_y_end > full_y_end
        {
            return Err(ImageIoError::InvalidGeometry(format!(
                "data window ({}, {}) {}x{} exceeds full window ({}, {}) {}x{}",
                self.x,
                self.y,
                self.width,
                self.height,
                self.full_x,
                self.full_y,
                self.full_width,
                self.full_height
            )));
        }
        if data_x_end > i64::from(i32::MAX) || data_y_end > i64::from(i32::MAX) {
            return Err(ImageIoError::InvalidGeometry(
                "data window extends past the coordinate range".into(),
            ));
        }
        Ok(())
    }

    fn check_sizes(&self) -> Result<(), ImageIoError> {
        let too_large = ImageIoError::DimensionsTooLarge {
            width: self.width,
            height: self.height,
        };
        let bpp = (self.channels as usize)
            .checked_mul(self.format.size())
            .ok_or(ImageIoError::InvalidGeometry(format!(
                "{} channels is too many",
                self.channels
            )))?;
        (self.width as usize)
            .checked_mul(self.height as usize)
            .and_then(|wh| wh.checked_mul(bpp))
            .ok_or(too_large)?;
        if let Some((tw, th)) = self.tile {
            (tw as usize)
                .checked_mul(th as usize)
                .and_then(|t| t.checked_mul(bpp))
                .ok_or(ImageIoError::DimensionsTooLarge {
                    width: tw,
                    height: th,
                })?;
        }
        Ok(())
    }

    // --- accessors ---

    /// Data window width in pixels.
    pub fn width(&self) -> u32 {
        self.width
    }

    /// Data window height in pixels.
    pub fn height(&self) -> u32 {
        self.height
    }

    /// Data window origin x.
    pub fn x(&self) -> i32 {
        self.x
    }

    /// Data window origin y.
    pub fn y(&self) -> i32 {
        self.y
    }

    pub fn channels(&self) -> u32 {
        self.channels
    }

    pub fn format(&self) -> ElementType {
        self.format
    }

    /// Full window as `(x, y, width, height)`.
    pub fn full_window(&self) -> (i32, i32, u32, u32) {
        (self.full_x, self.full_y, self.full_width, self.full_height)
    }

    /// Tile size, if tiled storage was requested.
    pub fn tile_size(&self) -> Option<(u32, u32)> {
        self.tile
    }

    pub fn attribute(&self, key: &str) -> Option<&str> {
        self.attributes.get(key).map(String::as_str)
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &str)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    // --- derived ---

    pub fn bytes_per_pixel(&self) -> usize {
        self.channels as usize * self.format.size()
    }

    /// Bytes in one row of the data window: `width * channels * element size`.
    pub fn scanline_bytes(&self) -> usize {
        self.width as usize * self.bytes_per_pixel()
    }

    /// Bytes in the whole data window.
    pub fn image_bytes(&self) -> usize {
        self.scanline_bytes() * self.height as usize
    }

    /// Bytes in one full tile, or 0 when untiled.
    pub fn tile_bytes(&self) -> usize {
        match self.tile {
            Some((tw, th)) => tw as usize * th as usize * self.bytes_per_pixel(),
            None => 0,
        }
    }

    pub fn is_tiled(&self) -> bool {
        self.tile.is_some()
    }

    /// Whether the data window differs from the full window (crop or overscan).
    pub fn is_cropped(&self) -> bool {
        self.x != self.full_x
            || self.y != self.full_y
            || self.width != self.full_width
            || self.height != self.full_height
    }

    /// Whether the data window starts somewhere other than (0, 0).
    pub fn has_origin(&self) -> bool {
        self.x != 0 || self.y != 0
    }

    /// Number of tile columns (0 when untiled).
    pub fn tiles_across(&self) -> u32 {
        self.tile.map_or(0, |(tw, _)| self.width.div_ceil(tw))
    }

    /// Number of tile rows (0 when untiled).
    pub fn tiles_down(&self) -> u32 {
        self.tile.map_or(0, |(_, th)| self.height.div_ceil(th))
    }

    /// One past the last column of the data window.
    pub fn x_end(&self) -> i64 {
        i64::from(self.x) + i64::from(self.width)
    }

    /// One past the last row of the data window.
    pub fn y_end(&self) -> i64 {
        i64::from(self.y) + i64::from(self.height)
    }

    /// Whether pixel (`x`, `y`) lies inside the data window.
    pub fn contains(&self, x: i64, y: i64) -> bool {
        x >= i64::from(self.x) && x < self.x_end() && y >= i64::from(self.y) && y < self.y_end()
    }

    /// Rebuild a spec from header fields a reader decoded from a file.
    pub(crate) fn from_parts(parts: SpecParts) -> Result<Self, ImageIoError> {
        if parts.full_width == 0 || parts.full_height == 0 {
            return Err(ImageIoError::InvalidGeometry(
                "full window dimensions must be non-zero".into(),
            ));
        }
        let mut spec = Self::new(parts.width, parts.height, parts.channels, parts.format)?;
        spec.x = parts.x;
        spec.y = parts.y;
        spec.full_x = parts.full_x;
        spec.full_y = parts.full_y;
        spec.full_width = parts.full_width;
        spec.full_height = parts.full_height;
        spec.check_windows()?;
        if let Some((tw, th)) = parts.tile {
            spec = spec.with_tiles(tw, th)?;
        }
        spec.attributes = parts.attributes;
        Ok(spec)
    }
}

/// Raw header fields decoded from a file, validated through [`ImageSpec::from_parts`].
pub(crate) struct SpecParts {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
    pub full_x: i32,
    pub full_y: i32,
    pub full_width: u32,
    pub full_height: u32,
    pub channels: u32,
    pub format: ElementType,
    pub tile: Option<(u32, u32)>,
    pub attributes: BTreeMap<String, String>,
}

/// A data-window-relative rectangle handed to backends for tile I/O.
///
/// `x`/`y` are offsets from the data window origin; `width`/`height` are
/// already clipped to the data window.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TileRegion {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl TileRegion {
    /// Region of the tile whose top-left corner is (`dx`, `dy`) relative to
    /// the data window, clipped to the data window of `spec`.
    pub(crate) fn clipped(spec: &ImageSpec, dx: u32, dy: u32, tw: u32, th: u32) -> Self {
        Self {
            x: dx,
            y: dy,
            width: tw.min(spec.width - dx),
            height: th.min(spec.height - dy),
        }
    }

    pub fn pixel_count(&self) -> usize {
        self.width as usize * self.height as usize
    }

    /// Copy the region's rows out of `src`, whose rows are `stride` bytes
    /// apart and whose first row starts at the region's top-left pixel.
    pub(crate) fn gather(&self, src: &[u8], stride: usize, bpp: usize) -> Vec<u8> {
        let row_bytes = self.width as usize * bpp;
        let mut out = Vec::with_capacity(row_bytes * self.height as usize);
        for r in 0..self.height as usize {
            let start = r * stride;
            out.extend_from_slice(&src[start..start + row_bytes]);
        }
        out
    }

    /// Inverse of [`gather`](Self::gather): spread packed rows into `dst`.
    pub(crate) fn scatter(&self, packed: &[u8], dst: &mut [u8], stride: usize, bpp: usize) {
        let row_bytes = self.width as usize * bpp;
        for (r, row) in packed.chunks_exact(row_bytes).enumerate() {
            let start = r * stride;
            dst[start..start + row_bytes].copy_from_slice(row);
        }
    }
}
