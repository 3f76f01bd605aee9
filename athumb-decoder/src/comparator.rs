//! Fidelity measurement of generated animations against ground truth

use crate::{Error, Result};
use athumb_core::{metrics, Animation, PixelCodec, TimedPicture};
use std::fmt;
use tracing::debug;

/// Per-frame PSNR of one animation plus aggregate statistics
#[derive(Debug, Clone, Default)]
pub struct ThumbnailStatsPsnr {
    /// PSNR per original frame, in source order
    pub psnr: Vec<f32>,
    pub min_psnr: f32,
    pub max_psnr: f32,
    pub mean_psnr: f32,
    pub median_psnr: f32,
}

/// Element-wise PSNR difference between two animations plus aggregates
#[derive(Debug, Clone, Default)]
pub struct ThumbnailDiffPsnr {
    /// Per-frame PSNR change from the first to the second animation
    pub psnr_diff: Vec<f32>,
    pub max_psnr_decrease: f32,
    pub max_psnr_increase: f32,
    pub mean_psnr_diff: f32,
    pub median_psnr_diff: f32,
}

/// Parses an animation and decodes every payload back into a timed picture.
///
/// Consecutive identical source frames are merged at assembly time, so the
/// decoded sequence may be shorter than the source sequence.
pub fn decode_animation<C: PixelCodec>(data: &[u8], codec: &C) -> Result<Vec<TimedPicture>> {
    let animation = Animation::from_bytes(data)?;

    let mut frames = Vec::with_capacity(animation.frames.len());
    for frame in &animation.frames {
        let picture = codec.decode(&frame.payload)?;
        if picture.dimensions() != (animation.header.width, animation.header.height) {
            return Err(Error::Core(athumb_core::Error::DimensionMismatch {
                expected_width: animation.header.width,
                expected_height: animation.header.height,
                width: picture.width(),
                height: picture.height(),
            }));
        }
        frames.push(TimedPicture::new(picture, frame.timestamp_ms));
    }

    debug!(frames = frames.len(), "decoded animation");
    Ok(frames)
}

/// Measures per-frame PSNR of an animation against the original frames.
///
/// The original and decoded sequences are walked in parallel; the decoded
/// pointer advances only when the next decoded frame's timestamp matches
/// the current original frame, which recovers the many-to-one mapping
/// created by frame merging. Every original frame must be measured.
pub fn compute_psnr<C: PixelCodec>(
    original_frames: &[TimedPicture],
    data: &[u8],
    codec: &C,
) -> Result<ThumbnailStatsPsnr> {
    if original_frames.is_empty() {
        return Err(Error::Stats("no original frames to measure".into()));
    }

    let decoded = decode_animation(data, codec)?;
    if decoded.is_empty() {
        return Err(Error::Stats("animation contains no frames".into()));
    }

    let mut stats = ThumbnailStatsPsnr::default();
    let mut decoded_index = 0;
    for original in original_frames {
        if decoded_index + 1 < decoded.len()
            && decoded[decoded_index + 1].timestamp_ms == original.timestamp_ms
        {
            decoded_index += 1;
        }

        match metrics::distortion(&original.picture, &decoded[decoded_index].picture) {
            Ok(distortion) => stats.psnr.push(distortion[metrics::PSNR_ALL]),
            Err(_) => break,
        }
    }

    // Not every frame was measured, the distortion computation failed.
    if stats.psnr.len() != original_frames.len() {
        return Err(Error::FrameCountMismatch {
            expected: original_frames.len(),
            measured: stats.psnr.len(),
        });
    }

    let mut sorted = stats.psnr.clone();
    sorted.sort_by(f32::total_cmp);
    stats.min_psnr = sorted[0];
    stats.max_psnr = sorted[sorted.len() - 1];
    stats.mean_psnr =
        (sorted.iter().map(|&v| v as f64).sum::<f64>() / sorted.len() as f64) as f32;
    stats.median_psnr = sorted[sorted.len() / 2];

    Ok(stats)
}

/// Compares two animations over the same ground truth.
///
/// The diff is element-wise `b − a`: positive values mean the second
/// animation is more faithful. An empty original sequence yields an empty
/// diff.
pub fn compare<C: PixelCodec>(
    original_frames: &[TimedPicture],
    data_a: &[u8],
    data_b: &[u8],
    codec: &C,
) -> Result<ThumbnailDiffPsnr> {
    if original_frames.is_empty() {
        return Ok(ThumbnailDiffPsnr::default());
    }

    let stats_a = compute_psnr(original_frames, data_a, codec)?;
    let stats_b = compute_psnr(original_frames, data_b, codec)?;

    let mut diff = ThumbnailDiffPsnr {
        psnr_diff: stats_a
            .psnr
            .iter()
            .zip(&stats_b.psnr)
            .map(|(a, b)| b - a)
            .collect(),
        ..ThumbnailDiffPsnr::default()
    };

    let mut sorted = diff.psnr_diff.clone();
    sorted.sort_by(f32::total_cmp);
    diff.max_psnr_decrease = sorted[0];
    diff.max_psnr_increase = sorted[sorted.len() - 1];
    diff.mean_psnr_diff =
        (sorted.iter().map(|&v| v as f64).sum::<f64>() / sorted.len() as f64) as f32;
    diff.median_psnr_diff = sorted[sorted.len() / 2];

    Ok(diff)
}

impl fmt::Display for ThumbnailStatsPsnr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.psnr.is_empty() {
            return Ok(());
        }
        writeln!(f, "Frame count: {}", self.psnr.len())?;

        for value in &self.psnr {
            write!(f, "{value:.3} ")?;
        }
        writeln!(f)?;

        writeln!(f, "{:<14}{:.3}", "Min PSNR:", self.min_psnr)?;
        writeln!(f, "{:<14}{:.3}", "Max PSNR:", self.max_psnr)?;
        writeln!(f, "{:<14}{:.3}", "Mean PSNR:", self.mean_psnr)?;
        writeln!(f, "{:<14}{:.3}", "Median PSNR:", self.median_psnr)?;
        Ok(())
    }
}

impl fmt::Display for ThumbnailDiffPsnr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.psnr_diff.is_empty() {
            return Ok(());
        }
        writeln!(f, "Frame count: {}", self.psnr_diff.len())?;

        for value in &self.psnr_diff {
            write!(f, "{value:+.3} ")?;
        }
        writeln!(f)?;

        if self.max_psnr_decrease > 0.0 {
            writeln!(f, "All frames improved in PSNR.")?;
        } else {
            writeln!(f, "{:<21}{:+.3}", "Max PSNR decrease:", self.max_psnr_decrease)?;
        }

        if self.max_psnr_increase < 0.0 {
            writeln!(f, "All frames worsened in PSNR.")?;
        } else {
            writeln!(f, "{:<21}{:+.3}", "Max PSNR increase:", self.max_psnr_increase)?;
        }

        writeln!(f, "{:<21}{:+.3}", "Mean PSNR change:", self.mean_psnr_diff)?;
        writeln!(f, "{:<21}{:+.3}", "Median PSNR change:", self.median_psnr_diff)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use athumb_core::{AnimationBuilder, EncodeSettings, Error as CoreError};
    use image::{Rgba, RgbaImage};

    /// Test codec storing raw RGBA behind a tiny header; decoding is exact
    struct RawCodec;

    impl PixelCodec for RawCodec {
        fn encode(
            &self,
            picture: &RgbaImage,
            _settings: &EncodeSettings,
        ) -> athumb_core::Result<Vec<u8>> {
            let mut payload = Vec::with_capacity(8 + picture.as_raw().len());
            payload.extend_from_slice(&picture.width().to_le_bytes());
            payload.extend_from_slice(&picture.height().to_le_bytes());
            payload.extend_from_slice(picture.as_raw());
            Ok(payload)
        }

        fn decode(&self, payload: &[u8]) -> athumb_core::Result<RgbaImage> {
            if payload.len() < 8 {
                return Err(CoreError::Decode("truncated payload".into()));
            }
            let width = u32::from_le_bytes([payload[0], payload[1], payload[2], payload[3]]);
            let height = u32::from_le_bytes([payload[4], payload[5], payload[6], payload[7]]);
            RgbaImage::from_raw(width, height, payload[8..].to_vec())
                .ok_or_else(|| CoreError::Decode("bad payload".into()))
        }
    }

    fn picture(width: u32, height: u32, seed: u8) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            let v = (x as u8)
                .wrapping_mul(7)
                .wrapping_add((y as u8).wrapping_mul(13))
                .wrapping_add(seed);
            Rgba([v, v.wrapping_add(40), v.wrapping_add(80), 255])
        })
    }

    fn assemble(frames: &[TimedPicture]) -> Vec<u8> {
        let mut builder = AnimationBuilder::new(frames[0].width(), frames[0].height());
        for frame in frames {
            let payload = RawCodec
                .encode(&frame.picture, &EncodeSettings::default())
                .unwrap();
            builder.push_frame(frame.timestamp_ms, payload).unwrap();
        }
        builder.finish().unwrap()
    }

    fn timed(frames: Vec<(RgbaImage, i32)>) -> Vec<TimedPicture> {
        frames
            .into_iter()
            .map(|(picture, timestamp_ms)| TimedPicture::new(picture, timestamp_ms))
            .collect()
    }

    #[test]
    fn test_roundtrip_without_duplicates() {
        let originals = timed(vec![
            (picture(8, 8, 0), 0),
            (picture(8, 8, 1), 40),
            (picture(8, 8, 2), 80),
        ]);
        let data = assemble(&originals);

        let decoded = decode_animation(&data, &RawCodec).unwrap();
        assert_eq!(decoded.len(), originals.len());
        for (original, decoded) in originals.iter().zip(&decoded) {
            assert_eq!(original.timestamp_ms, decoded.timestamp_ms);
            assert_eq!(original.picture, decoded.picture);
        }
    }

    #[test]
    fn test_psnr_aligns_merged_frames() {
        // The middle frame repeats the first; assembly merges them.
        let originals = timed(vec![
            (picture(8, 8, 0), 0),
            (picture(8, 8, 0), 40),
            (picture(8, 8, 2), 80),
        ]);
        let data = assemble(&originals);
        assert_eq!(decode_animation(&data, &RawCodec).unwrap().len(), 2);

        let stats = compute_psnr(&originals, &data, &RawCodec).unwrap();
        assert_eq!(stats.psnr.len(), 3);
        // Exact codec: every original frame still matches its picture.
        assert_eq!(stats.min_psnr, 99.0);
        assert_eq!(stats.max_psnr, 99.0);
        assert_eq!(stats.mean_psnr, 99.0);
        assert_eq!(stats.median_psnr, 99.0);
    }

    #[test]
    fn test_compare_same_animation_is_all_zero() {
        let originals = timed(vec![
            (picture(8, 8, 0), 0),
            (picture(8, 8, 1), 40),
            (picture(8, 8, 2), 80),
        ]);
        let data = assemble(&originals);

        let diff = compare(&originals, &data, &data, &RawCodec).unwrap();
        assert_eq!(diff.psnr_diff, vec![0.0, 0.0, 0.0]);
        assert_eq!(diff.max_psnr_decrease, 0.0);
        assert_eq!(diff.max_psnr_increase, 0.0);
        assert_eq!(diff.mean_psnr_diff, 0.0);
        assert_eq!(diff.median_psnr_diff, 0.0);
    }

    #[test]
    fn test_compare_detects_improvement() {
        let originals = timed(vec![
            (picture(8, 8, 0), 0),
            (picture(8, 8, 1), 40),
        ]);

        // First candidate carries distorted pictures, second is exact.
        let mut degraded_pictures = Vec::new();
        for original in &originals {
            let mut degraded = original.picture.clone();
            for pixel in degraded.pixels_mut() {
                pixel[0] = pixel[0].wrapping_add(12);
            }
            degraded_pictures.push(TimedPicture::new(degraded, original.timestamp_ms));
        }
        let data_a = assemble(&degraded_pictures);
        let data_b = assemble(&originals);

        let diff = compare(&originals, &data_a, &data_b, &RawCodec).unwrap();
        assert!(diff.psnr_diff.iter().all(|&d| d > 0.0));
        assert!(diff.max_psnr_decrease > 0.0);
        assert!(diff.mean_psnr_diff > 0.0);
    }

    #[test]
    fn test_compare_empty_originals_yields_empty_diff() {
        let frames = timed(vec![(picture(8, 8, 0), 0)]);
        let data = assemble(&frames);
        let diff = compare(&[], &data, &data, &RawCodec).unwrap();
        assert!(diff.psnr_diff.is_empty());
        assert_eq!(format!("{diff}"), "");
    }

    #[test]
    fn test_psnr_fails_on_canvas_mismatch() {
        let originals = timed(vec![(picture(8, 8, 0), 0), (picture(8, 8, 1), 40)]);
        let smaller = timed(vec![(picture(4, 4, 0), 0), (picture(4, 4, 1), 40)]);
        let data = assemble(&smaller);

        let err = compute_psnr(&originals, &data, &RawCodec).unwrap_err();
        assert!(matches!(err, Error::FrameCountMismatch { expected: 2, measured: 0 }));
    }

    #[test]
    fn test_stats_display_layout() {
        let originals = timed(vec![(picture(8, 8, 0), 0)]);
        let data = assemble(&originals);
        let stats = compute_psnr(&originals, &data, &RawCodec).unwrap();

        let rendered = format!("{stats}");
        assert!(rendered.contains("Frame count: 1"));
        assert!(rendered.contains("Min PSNR:"));
        assert!(rendered.contains("99.000"));
    }
}
