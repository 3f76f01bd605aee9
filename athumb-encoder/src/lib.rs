//! athumb Encoder Library
//!
//! This library turns a sequence of timestamped pictures into an animated
//! thumbnail that fits a byte budget. Per-frame encoding qualities are
//! allocated with rate-distortion slope modeling and nested binary searches:
//! a slope-optimized joint search, a per-frame budget refinement pass and a
//! cheapest-first top-up pass, optionally followed by near-lossless or
//! equal-PSNR allocation strategies.

pub mod strategy;
pub mod thumbnailer;
pub mod video_reader;

mod rate_control;

#[cfg(test)]
pub(crate) mod test_codec;

pub use strategy::{AllocationStrategy, EqualPsnrStrategy, NearLosslessStrategy};
pub use thumbnailer::Thumbnailer;
pub use video_reader::VideoReader;

/// Result type for athumb-encoder operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for athumb-encoder operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("athumb core error: {0}")]
    Core(#[from] athumb_core::Error),

    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),

    #[error("FFmpeg error: {0}")]
    Ffmpeg(#[from] ffmpeg_next::Error),

    #[error("No video stream found")]
    NoVideoStream,

    #[error("Invalid video file")]
    InvalidVideo,

    #[error("Frame dimensions {width}x{height} do not match the {canvas_width}x{canvas_height} canvas")]
    DimensionMismatch {
        canvas_width: u32,
        canvas_height: u32,
        width: u32,
        height: u32,
    },

    #[error("No quality configuration fits the byte budget of {0} bytes")]
    ByteBudgetOverflow(usize),

    #[error("Stats error: {0}")]
    Stats(String),

    #[error("No frames were added")]
    NoFrames,
}

/// Animation generation options
#[derive(Debug, Clone)]
pub struct AnimationOptions {
    /// Number of times the animation repeats (0 = forever)
    pub loop_count: u16,
    /// Hard ceiling on the assembled animation size, in bytes
    pub byte_budget: usize,
    /// Lowest lossy quality the searches may assign
    pub minimum_lossy_quality: u8,
    /// Container flag: dispose the canvas to background between frames
    pub dispose_to_background: bool,
    /// Container flag: alpha-blend frames onto the canvas
    pub blend_frames: bool,
}

impl Default for AnimationOptions {
    fn default() -> Self {
        Self {
            loop_count: 0,
            byte_budget: 153_600,
            minimum_lossy_quality: 0,
            dispose_to_background: false,
            blend_frames: true,
        }
    }
}
