//! The pixel codec seam.
//!
//! The optimization engine never talks to a concrete codec directly; it sees
//! pictures go in and opaque payloads come out through [`PixelCodec`]. The
//! engine's binary searches rely on the codec being deterministic for fixed
//! inputs and monotone in quality: raising the quality of a fixed picture
//! must never decrease its PSNR or its encoded size.

use crate::Result;
use image::RgbaImage;

/// Per-frame encoding parameters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct EncodeSettings {
    /// Lossy quality, 0 (smallest) to 100 (best)
    pub quality: u8,
    /// Near-lossless mode; `quality` is ignored when set
    pub lossless: bool,
}

impl EncodeSettings {
    /// Lossy settings at the given quality
    pub fn lossy(quality: u8) -> Self {
        Self {
            quality,
            lossless: false,
        }
    }

    /// Near-lossless settings
    pub fn near_lossless() -> Self {
        Self {
            quality: 100,
            lossless: true,
        }
    }
}

impl Default for EncodeSettings {
    fn default() -> Self {
        Self::lossy(75)
    }
}

/// A still-picture codec the engine can drive
pub trait PixelCodec {
    /// Encodes a picture into a payload
    fn encode(&self, picture: &RgbaImage, settings: &EncodeSettings) -> Result<Vec<u8>>;

    /// Decodes a payload back into a picture
    fn decode(&self, payload: &[u8]) -> Result<RgbaImage>;
}
