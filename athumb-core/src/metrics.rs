//! PSNR distortion metrics

use crate::{Error, Result};
use image::RgbaImage;

/// Index of the aggregate PSNR-all value in a distortion result
pub const PSNR_ALL: usize = 4;

/// Upper bound reported for (near-)identical pictures, in dB
const PSNR_CAP: f32 = 99.0;

/// Computes per-channel PSNR between two pictures.
///
/// The result holds R, G, B and A channel PSNR followed by the aggregate
/// PSNR over all channels at [`PSNR_ALL`]. Values are capped at 99 dB so
/// identical pictures compare finite.
pub fn distortion(reference: &RgbaImage, candidate: &RgbaImage) -> Result<[f32; 5]> {
    if reference.dimensions() != candidate.dimensions() {
        let (expected_width, expected_height) = reference.dimensions();
        let (width, height) = candidate.dimensions();
        return Err(Error::DimensionMismatch {
            expected_width,
            expected_height,
            width,
            height,
        });
    }

    let mut channel_sse = [0u64; 4];
    for (a, b) in reference.pixels().zip(candidate.pixels()) {
        for channel in 0..4 {
            let diff = a[channel] as i64 - b[channel] as i64;
            channel_sse[channel] += (diff * diff) as u64;
        }
    }

    let samples_per_channel = (reference.width() as u64 * reference.height() as u64).max(1);
    let total_sse: u64 = channel_sse.iter().sum();

    let mut result = [0.0f32; 5];
    for channel in 0..4 {
        result[channel] = psnr_from_sse(channel_sse[channel], samples_per_channel);
    }
    result[PSNR_ALL] = psnr_from_sse(total_sse, samples_per_channel * 4);

    Ok(result)
}

/// Aggregate PSNR between two pictures
pub fn psnr_all(reference: &RgbaImage, candidate: &RgbaImage) -> Result<f32> {
    Ok(distortion(reference, candidate)?[PSNR_ALL])
}

fn psnr_from_sse(sse: u64, samples: u64) -> f32 {
    if sse == 0 {
        return PSNR_CAP;
    }
    let mse = sse as f64 / samples as f64;
    let psnr = 10.0 * (255.0f64 * 255.0 / mse).log10();
    (psnr as f32).min(PSNR_CAP)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn solid(width: u32, height: u32, value: u8) -> RgbaImage {
        RgbaImage::from_pixel(width, height, Rgba([value, value, value, 255]))
    }

    #[test]
    fn test_identical_pictures_hit_the_cap() {
        let pic = solid(8, 8, 120);
        let result = distortion(&pic, &pic).unwrap();
        assert!(result.iter().all(|&v| v == PSNR_CAP));
    }

    #[test]
    fn test_known_mse() {
        // Every red sample off by 10: channel MSE = 100, PSNR ~ 28.13 dB.
        let a = solid(16, 16, 100);
        let mut b = a.clone();
        for pixel in b.pixels_mut() {
            pixel[0] = 110;
        }
        let result = distortion(&a, &b).unwrap();
        assert!((result[0] - 28.13).abs() < 0.01);
        // Untouched channels are exact.
        assert_eq!(result[1], PSNR_CAP);
        // The aggregate averages the error over all four channels.
        assert!((result[PSNR_ALL] - (result[0] + 6.02)).abs() < 0.05);
    }

    #[test]
    fn test_more_error_means_lower_psnr() {
        let a = solid(8, 8, 100);
        let mut off_by_five = a.clone();
        let mut off_by_twenty = a.clone();
        for pixel in off_by_five.pixels_mut() {
            pixel[1] = 105;
        }
        for pixel in off_by_twenty.pixels_mut() {
            pixel[1] = 120;
        }
        let near = psnr_all(&a, &off_by_five).unwrap();
        let far = psnr_all(&a, &off_by_twenty).unwrap();
        assert!(near > far);
    }

    #[test]
    fn test_dimension_mismatch() {
        let a = solid(8, 8, 0);
        let b = solid(8, 4, 0);
        assert!(matches!(
            distortion(&a, &b),
            Err(Error::DimensionMismatch { .. })
        ));
    }
}
