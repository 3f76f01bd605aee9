//! Timestamped picture type shared between the encoder and the comparator

use image::RgbaImage;

/// A raw picture together with its presentation timestamp
#[derive(Debug, Clone)]
pub struct TimedPicture {
    /// Decoded RGBA pixels
    pub picture: RgbaImage,
    /// Presentation timestamp in milliseconds
    pub timestamp_ms: i32,
}

impl TimedPicture {
    /// Creates a new timed picture
    pub fn new(picture: RgbaImage, timestamp_ms: i32) -> Self {
        Self {
            picture,
            timestamp_ms,
        }
    }

    /// Picture width in pixels
    pub fn width(&self) -> u32 {
        self.picture.width()
    }

    /// Picture height in pixels
    pub fn height(&self) -> u32 {
        self.picture.height()
    }
}
