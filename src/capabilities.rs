//! Backend capability descriptors.
//!
//! Each backend returns a static [`BackendCapabilities`] describing what it
//! supports. Sessions check it before accepting a spec or an operation, and
//! callers can query it through `supports("tiles")` and friends before
//! choosing a write strategy.

/// How a backend accepts scanline writes.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteOrder {
    /// Rows stream straight to the file; each row must come strictly after
    /// the previously written one, so a row cannot be written twice.
    Sequential,
    /// Rows may arrive in any order; they are held in memory and encoded
    /// when the session closes.
    Buffered,
    /// Rows (and tiles) may be written in any order directly to the file.
    RandomAccess,
}

/// A named feature that can be queried with `supports()`.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Feature {
    Tiles,
    RandomAccess,
    MultiImage,
    ArbitraryMetadata,
    DisplayWindow,
    Origin,
    NegativeOrigin,
}

impl Feature {
    /// Parse a feature name. Unknown names yield `None`.
    pub fn from_name(name: &str) -> Option<Self> {
        Some(match name {
            "tiles" => Feature::Tiles,
            "random_access" => Feature::RandomAccess,
            "multi_image" | "multiimage" => Feature::MultiImage,
            "arbitrary_metadata" => Feature::ArbitraryMetadata,
            "display_window" | "displaywindow" => Feature::DisplayWindow,
            "origin" => Feature::Origin,
            "negative_origin" | "negativeorigin" => Feature::NegativeOrigin,
            _ => return None,
        })
    }

    /// Canonical feature name.
    pub fn name(self) -> &'static str {
        match self {
            Feature::Tiles => "tiles",
            Feature::RandomAccess => "random_access",
            Feature::MultiImage => "multi_image",
            Feature::ArbitraryMetadata => "arbitrary_metadata",
            Feature::DisplayWindow => "display_window",
            Feature::Origin => "origin",
            Feature::NegativeOrigin => "negative_origin",
        }
    }
}

/// Describes what a format backend supports.
///
/// Built with `const` builder methods so backends can declare it as a
/// `static`:
///
/// ```
/// use zenio::{BackendCapabilities, WriteOrder};
///
/// static CAPS: BackendCapabilities = BackendCapabilities::new()
///     .with_tiles(true)
///     .with_write_order(WriteOrder::RandomAccess)
///     .with_random_access_read(true);
///
/// assert!(CAPS.tiles());
/// assert!(CAPS.supports_output("random_access"));
/// assert!(!CAPS.supports_output("teleport"));
/// ```
#[non_exhaustive]
#[derive(Clone, Debug)]
pub struct BackendCapabilities {
    tiles: bool,
    write_order: WriteOrder,
    random_access_read: bool,
    multi_image: bool,
    arbitrary_metadata: bool,
    display_window: bool,
    origin: bool,
    negative_origin: bool,
    lossless: bool,
}

impl Default for BackendCapabilities {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendCapabilities {
    /// Sequential scanlines only, nothing else.
    pub const fn new() -> Self {
        Self {
            tiles: false,
            write_order: WriteOrder::Sequential,
            random_access_read: false,
            multi_image: false,
            arbitrary_metadata: false,
            display_window: false,
            origin: false,
            negative_origin: false,
            lossless: false,
        }
    }

    /// Whether tiled storage is supported.
    pub const fn tiles(&self) -> bool {
        self.tiles
    }

    /// Ordering policy for scanline writes.
    pub const fn write_order(&self) -> WriteOrder {
        self.write_order
    }

    /// Whether scanlines and tiles can be read in any order.
    pub const fn random_access_read(&self) -> bool {
        self.random_access_read
    }

    /// Whether a file can hold more than one subimage.
    pub const fn multi_image(&self) -> bool {
        self.multi_image
    }

    /// Whether arbitrary string attributes are stored.
    pub const fn arbitrary_metadata(&self) -> bool {
        self.arbitrary_metadata
    }

    /// Whether a full window distinct from the data window is recorded.
    pub const fn display_window(&self) -> bool {
        self.display_window
    }

    /// Whether a non-zero data window origin is recorded.
    pub const fn origin(&self) -> bool {
        self.origin
    }

    /// Whether negative data window origins are recorded.
    pub const fn negative_origin(&self) -> bool {
        self.negative_origin
    }

    /// Whether pixels read back are bit-identical to what was written.
    pub const fn lossless(&self) -> bool {
        self.lossless
    }

    /// Feature query from the point of view of a writer.
    ///
    /// `random_access` means scanlines may be written in any order.
    /// Unknown names return `false`.
    pub fn supports_output(&self, name: &str) -> bool {
        match Feature::from_name(name) {
            Some(Feature::RandomAccess) => self.write_order == WriteOrder::RandomAccess,
            Some(f) => self.has(f),
            None => false,
        }
    }

    /// Feature query from the point of view of a reader.
    ///
    /// `random_access` means scanlines and tiles may be read in any order.
    /// Unknown names return `false`.
    pub fn supports_input(&self, name: &str) -> bool {
        match Feature::from_name(name) {
            Some(Feature::RandomAccess) => self.random_access_read,
            Some(f) => self.has(f),
            None => false,
        }
    }

    fn has(&self, feature: Feature) -> bool {
        match feature {
            Feature::Tiles => self.tiles,
            Feature::RandomAccess => {
                self.write_order == WriteOrder::RandomAccess && self.random_access_read
            }
            Feature::MultiImage => self.multi_image,
            Feature::ArbitraryMetadata => self.arbitrary_metadata,
            Feature::DisplayWindow => self.display_window,
            Feature::Origin => self.origin,
            Feature::NegativeOrigin => self.negative_origin,
        }
    }

    // --- const builder methods for static construction ---

    pub const fn with_tiles(mut self, v: bool) -> Self {
        self.tiles = v;
        self
    }

    pub const fn with_write_order(mut self, order: WriteOrder) -> Self {
        self.write_order = order;
        self
    }

    pub const fn with_random_access_read(mut self, v: bool) -> Self {
        self.random_access_read = v;
        self
    }

    pub const fn with_multi_image(mut self, v: bool) -> Self {
        self.multi_image = v;
        self
    }

    pub const fn with_arbitrary_metadata(mut self, v: bool) -> Self {
        self.arbitrary_metadata = v;
        self
    }

    pub const fn with_display_window(mut self, v: bool) -> Self {
        self.display_window = v;
        self
    }

    pub const fn with_origin(mut self, v: bool) -> Self {
        self.origin = v;
        self
    }

    pub const fn with_negative_origin(mut self, v: bool) -> Self {
        self.negative_origin = v;
        self
    }

    pub const fn with_lossless(mut self, v: bool) -> Self {
        self.lossless = v;
        self
    }
}
