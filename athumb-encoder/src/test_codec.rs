//! Deterministic codec for exercising the allocation engine in tests.
//!
//! Reconstruction quantizes every sample with a step derived from the
//! quality, and the payload grows with quality in proportion to the
//! picture's edge count. That honors the monotonicity contract the binary
//! searches rely on: for a fixed picture, raising quality never lowers PSNR
//! and never shrinks the payload, and a flat picture yields a flat
//! rate-distortion curve.

use athumb_core::{EncodeSettings, Error, PixelCodec, Result};
use image::{Rgba, RgbaImage};

const MAGIC: [u8; 2] = [b'Q', b'C'];

/// Quantization step for a quality level; step 1 reconstructs exactly.
///
/// Steps are powers of two so the per-sample error (the masked low bits)
/// shrinks pointwise as quality rises, which keeps PSNR monotone for every
/// picture, not just statistically.
fn step_for(settings: &EncodeSettings) -> u8 {
    if settings.lossless {
        1
    } else {
        1u8 << ((100 - settings.quality.min(100) as u32) / 15)
    }
}

/// Number of horizontally adjacent pixel pairs that differ
fn edge_count(picture: &RgbaImage) -> usize {
    let mut edges = 0;
    for y in 0..picture.height() {
        for x in 1..picture.width() {
            if picture.get_pixel(x, y) != picture.get_pixel(x - 1, y) {
                edges += 1;
            }
        }
    }
    edges
}

/// Quantizing test codec
#[derive(Debug, Clone, Copy)]
pub(crate) struct QuantCodec;

impl PixelCodec for QuantCodec {
    fn encode(&self, picture: &RgbaImage, settings: &EncodeSettings) -> Result<Vec<u8>> {
        let step = step_for(settings);
        let padding = if settings.lossless {
            0
        } else {
            settings.quality.min(100) as usize * edge_count(picture) / 16
        };

        let mut payload = Vec::with_capacity(11 + picture.as_raw().len() + padding);
        payload.extend_from_slice(&MAGIC);
        payload.push(step);
        payload.extend_from_slice(&picture.width().to_le_bytes());
        payload.extend_from_slice(&picture.height().to_le_bytes());
        for &sample in picture.as_raw() {
            payload.push(sample / step * step);
        }
        payload.extend(std::iter::repeat(0u8).take(padding));
        Ok(payload)
    }

    fn decode(&self, payload: &[u8]) -> Result<RgbaImage> {
        if payload.len() < 11 || payload[..2] != MAGIC {
            return Err(Error::Decode("bad test payload".into()));
        }
        let width = u32::from_le_bytes([payload[3], payload[4], payload[5], payload[6]]);
        let height = u32::from_le_bytes([payload[7], payload[8], payload[9], payload[10]]);
        let pixel_bytes = (width * height * 4) as usize;
        let pixels = payload[11..11 + pixel_bytes].to_vec();
        RgbaImage::from_raw(width, height, pixels)
            .ok_or_else(|| Error::Decode("truncated test payload".into()))
    }
}

/// Single-color picture: zero edges, flat rate-distortion curve
pub(crate) fn solid_picture(width: u32, height: u32, value: u8) -> RgbaImage {
    RgbaImage::from_pixel(width, height, Rgba([value, value, value, 255]))
}

/// Deterministic high-detail picture: every horizontal neighbor differs
pub(crate) fn busy_picture(width: u32, height: u32) -> RgbaImage {
    RgbaImage::from_fn(width, height, |x, y| {
        let v = ((x * 31 + y * 57) % 251) as u8;
        Rgba([v, v.wrapping_add(93), v.wrapping_mul(7), 255])
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monotone_in_quality() {
        let picture = busy_picture(16, 16);
        let codec = QuantCodec;
        let mut last_size = 0;
        let mut last_psnr = 0.0f32;
        for quality in [0u8, 25, 50, 75, 100] {
            let settings = EncodeSettings::lossy(quality);
            let payload = codec.encode(&picture, &settings).unwrap();
            let decoded = codec.decode(&payload).unwrap();
            let psnr = athumb_core::metrics::psnr_all(&picture, &decoded).unwrap();
            assert!(payload.len() >= last_size);
            assert!(psnr >= last_psnr);
            last_size = payload.len();
            last_psnr = psnr;
        }
        // Quality 100 reconstructs exactly.
        assert_eq!(last_psnr, 99.0);
    }

    #[test]
    fn test_flat_picture_has_flat_curve() {
        let picture = solid_picture(16, 16, 128);
        let codec = QuantCodec;
        let low = codec
            .encode(&picture, &EncodeSettings::lossy(0))
            .unwrap()
            .len();
        let high = codec
            .encode(&picture, &EncodeSettings::lossy(100))
            .unwrap()
            .len();
        assert_eq!(low, high);
    }
}
