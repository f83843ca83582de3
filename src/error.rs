use enough::StopReason;

/// Errors from image sessions, the registry, and format backends.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ImageIoError {
    #[error("invalid geometry: {0}")]
    InvalidGeometry(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("could not open {path}: {reason}")]
    OpenError { path: String, reason: String },

    #[error("out-of-order access: expected row >= {expected}, got {actual}")]
    SequenceError { expected: i64, actual: i64 },

    #[error("size mismatch: expected {expected} bytes, got {actual}")]
    SizeMismatch { expected: usize, actual: usize },

    #[error("tile origin ({x}, {y}) is not on the {tile_width}x{tile_height} tile grid")]
    AlignmentError {
        x: i32,
        y: i32,
        tile_width: u32,
        tile_height: u32,
    },

    #[error("({x}, {y}, {z}) lies outside the data window")]
    OutOfBounds { x: i64, y: i64, z: i32 },

    #[error("failed to finalize file: {0}")]
    CloseError(String),

    #[error("operation not supported: {0}")]
    Unsupported(String),

    #[error("{op} not allowed while session is {state}")]
    InvalidState {
        op: &'static str,
        state: &'static str,
    },

    #[error("session is unusable after an earlier I/O failure")]
    Corrupted,

    #[error("format registry has not been initialized")]
    NotInitialized,

    #[error("invalid header: {0}")]
    InvalidHeader(String),

    #[error("unexpected end of input")]
    UnexpectedEof,

    #[error("dimensions too large: {width}x{height}")]
    DimensionsTooLarge { width: u32, height: u32 },

    #[error("limit exceeded: {0}")]
    LimitExceeded(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("operation cancelled")]
    Cancelled(StopReason),
}

impl From<StopReason> for ImageIoError {
    fn from(r: StopReason) -> Self {
        ImageIoError::Cancelled(r)
    }
}

impl ImageIoError {
    /// Whether this error means the underlying file can no longer be trusted.
    pub(crate) fn poisons_session(&self) -> bool {
        matches!(
            self,
            ImageIoError::Io(_) | ImageIoError::UnexpectedEof | ImageIoError::Corrupted
        )
    }

    pub(crate) fn open(path: &std::path::Path, reason: impl core::fmt::Display) -> Self {
        ImageIoError::OpenError {
            path: path.display().to_string(),
            reason: reason.to_string(),
        }
    }
}
