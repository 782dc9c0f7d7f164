//! Raster descriptor types.
//!
//! [`ImageInfo`] is what a node declares it can produce for the whole image
//! (extent, band count, sample type), computed once before streaming starts.

use crate::core::region::Region;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Storage type of one sample as it would be held by a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SampleType {
    /// Unsigned 8-bit integer.
    U8,
    /// Signed 16-bit integer.
    I16,
    /// Unsigned 16-bit integer.
    U16,
    /// Signed 32-bit integer.
    I32,
    /// Unsigned 32-bit integer.
    U32,
    /// 32-bit float.
    F32,
    /// 64-bit float.
    F64,
    /// The producing stage cannot say how large its samples are.
    Unknown,
}

impl SampleType {
    /// Size in bytes, `None` when unknown.
    pub fn size_bytes(&self) -> Option<u64> {
        match self {
            SampleType::U8 => Some(1),
            SampleType::I16 | SampleType::U16 => Some(2),
            SampleType::I32 | SampleType::U32 | SampleType::F32 => Some(4),
            SampleType::F64 => Some(8),
            SampleType::Unknown => None,
        }
    }
}

impl Default for SampleType {
    fn default() -> Self {
        SampleType::F32
    }
}

impl fmt::Display for SampleType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SampleType::U8 => "u8",
            SampleType::I16 => "i16",
            SampleType::U16 => "u16",
            SampleType::I32 => "i32",
            SampleType::U32 => "u32",
            SampleType::F32 => "f32",
            SampleType::F64 => "f64",
            SampleType::Unknown => "unknown",
        };
        write!(f, "{}", name)
    }
}

/// Output information of a node: everything it could produce for the
/// whole image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ImageInfo {
    /// Largest region the node can produce.
    pub extent: Region,
    /// Bands per pixel.
    pub bands: usize,
    /// Sample storage type.
    pub sample_type: SampleType,
}

impl ImageInfo {
    /// Create a new descriptor.
    pub fn new(extent: Region, bands: usize, sample_type: SampleType) -> Self {
        Self {
            extent,
            bands,
            sample_type,
        }
    }

    /// Same descriptor with another sample type.
    pub fn with_sample_type(mut self, sample_type: SampleType) -> Self {
        self.sample_type = sample_type;
        self
    }

    /// Same descriptor with another band count.
    pub fn with_bands(mut self, bands: usize) -> Self {
        self.bands = bands;
        self
    }

    /// Bytes per pixel (`sample size × bands`), `None` when undeterminable.
    pub fn bytes_per_pixel(&self) -> Option<u64> {
        match (self.sample_type.size_bytes(), self.bands) {
            (Some(size), bands) if bands > 0 => Some(size * bands as u64),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bytes_per_pixel() {
        let info = ImageInfo::new(Region::from_size(10, 10), 3, SampleType::U16);
        assert_eq!(info.bytes_per_pixel(), Some(6));
        assert_eq!(info.with_sample_type(SampleType::Unknown).bytes_per_pixel(), None);
        assert_eq!(info.with_bands(0).bytes_per_pixel(), None);
    }
}
