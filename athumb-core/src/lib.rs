//! athumb Core Library
//!
//! This library provides the shared building blocks for athumb animated
//! thumbnails: the binary animation container, the pixel codec seam and the
//! PSNR distortion metrics used for quality measurement.

pub mod codec;
pub mod container;
pub mod metrics;
pub mod picture;

pub use codec::{EncodeSettings, PixelCodec};
pub use container::{Animation, AnimationBuilder, AnimationHeader, EncodedFrame};
pub use picture::TimedPicture;

/// Result type for athumb-core operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for athumb-core operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid magic bytes, expected 'ATHB'")]
    InvalidMagic,

    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u16),

    #[error("Frame timestamps must be non-decreasing, got {next} after {prev}")]
    FrameOrder { prev: i32, next: i32 },

    #[error("Animation data too short to carry a header: {0} bytes")]
    TruncatedAnimation(usize),

    #[error("Picture dimensions mismatched: expected {expected_width}x{expected_height}, got {width}x{height}")]
    DimensionMismatch {
        expected_width: u32,
        expected_height: u32,
        width: u32,
        height: u32,
    },

    #[error("Encode failed: {0}")]
    Encode(String),

    #[error("Decode failed: {0}")]
    Decode(String),
}
