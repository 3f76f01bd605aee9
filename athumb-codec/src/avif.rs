//! AVIF encoding and decoding behind the codec seam

use athumb_core::{codec::PixelCodec, EncodeSettings, Error, Result};
use image::RgbaImage;
use ravif::{Encoder, Img, RGBA8};

/// Encoder speed preset, 1 (slow) to 10 (fast)
const DEFAULT_SPEED: u8 = 4;

/// AVIF codec backed by `ravif` (encode) and `libavif` (decode)
#[derive(Debug, Clone)]
pub struct AvifCodec {
    speed: u8,
    threads: Option<usize>,
}

impl AvifCodec {
    /// Creates a codec with the default speed preset
    pub fn new() -> Self {
        Self {
            speed: DEFAULT_SPEED,
            threads: Some(num_cpus::get()),
        }
    }

    /// Overrides the encoder speed preset
    pub fn with_speed(mut self, speed: u8) -> Self {
        self.speed = speed;
        self
    }
}

impl Default for AvifCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl PixelCodec for AvifCodec {
    fn encode(&self, picture: &RgbaImage, settings: &EncodeSettings) -> Result<Vec<u8>> {
        let width = picture.width() as usize;
        let height = picture.height() as usize;

        // ravif has no dedicated lossless mode; quality 100 is its
        // near-lossless operating point.
        let quality = if settings.lossless {
            100.0
        } else {
            settings.quality.min(100) as f32
        };

        let img = Img::new(picture.as_raw().as_rgba(), width, height);

        let encoder = Encoder::new()
            .with_quality(quality)
            .with_alpha_quality(quality)
            .with_speed(self.speed)
            .with_num_threads(self.threads);

        let encoded = encoder
            .encode_rgba(img)
            .map_err(|e| Error::Encode(format!("{e:?}")))?;

        Ok(encoded.avif_file)
    }

    fn decode(&self, payload: &[u8]) -> Result<RgbaImage> {
        let img = libavif_image::read(payload).map_err(|e| Error::Decode(format!("{e:?}")))?;
        Ok(img.to_rgba8())
    }
}

// Helper trait to reinterpret raw RGBA bytes as ravif pixels
trait AsRgba {
    fn as_rgba(&self) -> &[RGBA8];
}

impl AsRgba for [u8] {
    fn as_rgba(&self) -> &[RGBA8] {
        unsafe { std::slice::from_raw_parts(self.as_ptr() as *const RGBA8, self.len() / 4) }
    }
}
