//! # zenio
//!
//! Pluggable image file I/O: a registry of format backends, and stateful
//! output and input sessions that write or read one image file through
//! scanlines, tiles, or the whole data window at once.
//!
//! ## Model
//!
//! - [`ImageSpec`] describes an image: data window (which may sit at a
//!   signed origin inside a larger full window), channel count,
//!   [`ElementType`], optional tile size and string attributes.
//! - [`Registry`] maps extensions and file signatures to
//!   [`FormatBackend`]s. [`initialize_registry`] builds the process-wide
//!   one with the bundled backends.
//! - [`ImageOutput`] validates every write against the `ImageSpec` and the
//!   backend's [`BackendCapabilities`] before delegating to the backend.
//! - [`ImageInput`] parses the header at open and serves scanlines or tiles.
//!
//! In-memory pixels are contiguous rows of interleaved channels with
//! native-endian elements.
//!
//! ## Bundled formats
//!
//! - **pnm**: P5 (PGM), P6 (PPM), P7 (PAM), PFM. Buffered writes, random-access reads.
//! - **farbfeld**: 16-bit RGBA, streamed top to bottom.
//! - **trf**: tiled raster format with windows, tiles and attributes,
//!   seekable in both directions.
//!
//! ## Non-Goals
//!
//! - Compressed production codecs (TIFF, PNG, JPEG)
//! - Color management
//! - Multi-image files
//!
//! ## Credits
//!
//! The PNM and farbfeld backends draw from [zune-image](https://github.com/etemesi254/zune-image)
//! by Caleb Etemesi (MIT/Apache-2.0/Zlib licensed).
//!
//! ## Usage
//!
//! ```no_run
//! use zenio::{ElementType, ImageSpec, initialize_registry};
//!
//! let registry = initialize_registry();
//!
//! // A 16x16 crop placed at (32, 128) on a 640x480 canvas, in 8x8 tiles.
//! let spec = ImageSpec::new(16, 16, 3, ElementType::U8)?
//!     .with_origin(32, 128)?
//!     .with_full_window(0, 0, 640, 480)?
//!     .with_tiles(8, 8)?;
//!
//! let mut out = registry.create_output("crop.trf")?;
//! assert!(out.supports("tiles"));
//! out.open("crop.trf", &spec)?;
//! out.write_image(&vec![0u8; spec.image_bytes()])?;
//! out.close()?;
//!
//! let mut input = registry.open_input("crop.trf")?;
//! assert_eq!(input.spec().full_window(), (0, 0, 640, 480));
//! let pixels = input.read_image()?;
//! # let _ = pixels;
//! # Ok::<(), zenio::ImageIoError>(())
//! ```

#![forbid(unsafe_code)]

mod backend;
mod capabilities;
mod error;
mod input;
mod limits;
mod output;
mod pixel;
mod registry;
mod spec;

pub mod farbfeld;
pub mod pnm;
pub mod trf;

// Re-exports
pub use backend::{FormatBackend, FormatReader, FormatWriter};
pub use capabilities::{BackendCapabilities, Feature, WriteOrder};
pub use enough::{Stop, Unstoppable};
pub use error::ImageIoError;
pub use input::ImageInput;
pub use limits::Limits;
pub use output::{ImageOutput, SessionState};
pub use pixel::ElementType;
pub use registry::{
    Registry, SIGNATURE_BYTES, create_output, initialize_registry, open_input, registry,
};
pub use spec::{ImageSpec, TileRegion};
