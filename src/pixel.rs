/// Per-channel element type of a pixel buffer.
#[non_exhaustive]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ElementType {
    /// 8-bit unsigned.
    U8,
    /// 8-bit signed.
    I8,
    /// 16-bit unsigned (native endian in memory).
    U16,
    /// 16-bit signed (native endian in memory).
    I16,
    /// 32-bit unsigned (native endian in memory).
    U32,
    /// 32-bit signed (native endian in memory).
    I32,
    /// 32-bit IEEE float (native endian in memory).
    F32,
    /// 64-bit IEEE float (native endian in memory).
    F64,
}

impl ElementType {
    /// Bytes per channel element.
    pub const fn size(&self) -> usize {
        match self {
            Self::U8 | Self::I8 => 1,
            Self::U16 | Self::I16 => 2,
            Self::U32 | Self::I32 | Self::F32 => 4,
            Self::F64 => 8,
        }
    }

    /// Whether the element is a floating-point type.
    pub const fn is_float(&self) -> bool {
        matches!(self, Self::F32 | Self::F64)
    }

    /// Short lowercase name, e.g. `"uint8"`.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::U8 => "uint8",
            Self::I8 => "int8",
            Self::U16 => "uint16",
            Self::I16 => "int16",
            Self::U32 => "uint32",
            Self::I32 => "int32",
            Self::F32 => "float",
            Self::F64 => "double",
        }
    }

    /// Stable one-byte code used in on-disk headers.
    pub(crate) const fn code(&self) -> u8 {
        match self {
            Self::U8 => 1,
            Self::I8 => 2,
            Self::U16 => 3,
            Self::I16 => 4,
            Self::U32 => 5,
            Self::I32 => 6,
            Self::F32 => 7,
            Self::F64 => 8,
        }
    }

    pub(crate) const fn from_code(code: u8) -> Option<Self> {
        Some(match code {
            1 => Self::U8,
            2 => Self::I8,
            3 => Self::U16,
            4 => Self::I16,
            5 => Self::U32,
            6 => Self::I32,
            7 => Self::F32,
            8 => Self::F64,
            _ => return None,
        })
    }
}

impl core::fmt::Display for ElementType {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.name())
    }
}

/// Reverse the byte order of every `elem_size`-byte sample in place.
///
/// Used by backends whose files store samples in a fixed byte order.
pub(crate) fn swap_sample_bytes(data: &mut [u8], elem_size: usize) {
    if elem_size > 1 {
        for sample in data.chunks_exact_mut(elem_size) {
            sample.reverse();
        }
    }
}

/// Convert native-endian samples to big-endian (or back; the operation is symmetric).
pub(crate) fn native_to_be(data: &mut [u8], elem_size: usize) {
    if cfg!(target_endian = "little") {
        swap_sample_bytes(data, elem_size);
    }
}

/// Convert native-endian samples to little-endian (or back).
pub(crate) fn native_to_le(data: &mut [u8], elem_size: usize) {
    if cfg!(target_endian = "big") {
        swap_sample_bytes(data, elem_size);
    }
}
