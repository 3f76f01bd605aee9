//! athumb Decoder Library
//!
//! This library decodes generated animations back into timed frames and
//! measures their fidelity against the original frame sequence: per-frame
//! and aggregate PSNR for one animation, or an element-wise PSNR diff
//! between two candidate animations over the same ground truth.

pub mod comparator;

pub use comparator::{
    compare, compute_psnr, decode_animation, ThumbnailDiffPsnr, ThumbnailStatsPsnr,
};

/// Result type for athumb-decoder operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for athumb-decoder operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("athumb core error: {0}")]
    Core(#[from] athumb_core::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("Stats error: {0}")]
    Stats(String),

    #[error("Measured {measured} of {expected} frames")]
    FrameCountMismatch { expected: usize, measured: usize },
}
