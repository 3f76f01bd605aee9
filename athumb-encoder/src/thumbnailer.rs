//! The thumbnail generator: frame collection, stats cache and assembly

use crate::{AnimationOptions, Error, Result};
use athumb_core::{container, metrics, AnimationBuilder, EncodeSettings, PixelCodec};
use athumb_codec::AvifCodec;
use image::RgbaImage;
use tracing::debug;

/// Number of integer quality levels the stats cache covers (0 through 100)
pub(crate) const QUALITY_LEVELS: usize = 101;

/// Cached measurement of one frame at one quality level
#[derive(Debug, Clone, Copy)]
pub(crate) struct QualityStats {
    pub size: usize,
    pub psnr: f32,
}

/// Per-frame optimization state
#[derive(Debug, Clone)]
pub(crate) struct FrameData {
    /// Source pixels; owned so they outlive every assembly
    pub picture: RgbaImage,
    /// Sort and alignment key
    pub timestamp_ms: i32,
    /// Settings the next encode of this frame will use
    pub config: EncodeSettings,
    /// Encoded size at the committed quality
    pub encoded_size: usize,
    /// Quality committed by the passes; only ever raised once set
    pub final_quality: Option<u8>,
    /// PSNR at the committed quality
    pub final_psnr: f32,
    /// Whether the committed encoding is near-lossless
    pub near_lossless: bool,
    /// Lossy measurements per integer quality level
    pub lossy_stats: [Option<QualityStats>; QUALITY_LEVELS],
}

impl FrameData {
    fn new(picture: RgbaImage, timestamp_ms: i32) -> Self {
        Self {
            picture,
            timestamp_ms,
            config: EncodeSettings::default(),
            encoded_size: 0,
            final_quality: None,
            final_psnr: 0.0,
            near_lossless: false,
            lossy_stats: [None; QUALITY_LEVELS],
        }
    }
}

/// Takes timestamped pictures as input and produces an animated thumbnail
/// that fits a byte budget.
pub struct Thumbnailer<C: PixelCodec = AvifCodec> {
    pub(crate) frames: Vec<FrameData>,
    pub(crate) codec: C,
    pub(crate) options: AnimationOptions,
    pub(crate) canvas: Option<(u32, u32)>,
}

impl Thumbnailer<AvifCodec> {
    /// Creates a thumbnailer with the default AVIF codec
    pub fn new(options: AnimationOptions) -> Self {
        Self::with_codec(options, AvifCodec::new())
    }
}

impl Default for Thumbnailer<AvifCodec> {
    fn default() -> Self {
        Self::new(AnimationOptions::default())
    }
}

impl<C: PixelCodec> Thumbnailer<C> {
    /// Creates a thumbnailer driving the given codec
    pub fn with_codec(options: AnimationOptions, codec: C) -> Self {
        Self {
            frames: Vec::new(),
            codec,
            options,
            canvas: None,
        }
    }

    /// Adds a frame with a timestamp in milliseconds.
    ///
    /// The first frame fixes the canvas; later frames must match its
    /// dimensions. Frames may arrive in any timestamp order and are sorted
    /// before generation.
    pub fn add_frame(&mut self, picture: RgbaImage, timestamp_ms: i32) -> Result<()> {
        let dimensions = picture.dimensions();
        match self.canvas {
            None => self.canvas = Some(dimensions),
            Some((canvas_width, canvas_height)) if dimensions != (canvas_width, canvas_height) => {
                return Err(Error::DimensionMismatch {
                    canvas_width,
                    canvas_height,
                    width: dimensions.0,
                    height: dimensions.1,
                });
            }
            Some(_) => {}
        }

        self.frames.push(FrameData::new(picture, timestamp_ms));
        Ok(())
    }

    /// Number of frames added so far
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// The generation options
    pub fn options(&self) -> &AnimationOptions {
        &self.options
    }

    /// Qualities committed by the last generation, in timestamp order
    pub fn final_qualities(&self) -> Vec<Option<u8>> {
        self.frames.iter().map(|frame| frame.final_quality).collect()
    }

    /// Orders frames by timestamp; duplicates keep their insertion order
    pub(crate) fn sort_frames(&mut self) {
        self.frames.sort_by_key(|frame| frame.timestamp_ms);
    }

    /// Clears all per-run state before a fresh budgeted generation.
    ///
    /// Codec output is assumed deterministic for fixed inputs, so cached
    /// measurements stay valid exactly as long as one run.
    pub(crate) fn reset_caches(&mut self) {
        for frame in &mut self.frames {
            frame.config = EncodeSettings::default();
            frame.encoded_size = 0;
            frame.final_quality = None;
            frame.final_psnr = 0.0;
            frame.near_lossless = false;
            frame.lossy_stats = [None; QUALITY_LEVELS];
        }
    }

    /// Size and PSNR of the indexed frame at its current settings.
    ///
    /// Lossy measurements are served from the per-frame cache when present;
    /// near-lossless measurements are computed every time.
    pub(crate) fn picture_stats(&mut self, index: usize) -> Result<(usize, f32)> {
        let frame = &self.frames[index];
        let quality = frame.config.quality.min(100) as usize;
        let cacheable = !frame.config.lossless;

        if cacheable {
            if let Some(stats) = frame.lossy_stats[quality] {
                return Ok((stats.size, stats.psnr));
            }
        }

        let (size, psnr) = measure(&self.codec, &frame.picture, &frame.config)?;
        if cacheable {
            self.frames[index].lossy_stats[quality] = Some(QualityStats { size, psnr });
        }
        Ok((size, psnr))
    }

    /// Size and PSNR of an arbitrary picture at the given settings.
    ///
    /// Does not touch frame state or the cache.
    pub fn picture_stats_for(
        &self,
        picture: &RgbaImage,
        settings: &EncodeSettings,
    ) -> Result<(usize, f32)> {
        measure(&self.codec, picture, settings)
    }

    /// Encodes every frame at its current settings, in timestamp order,
    /// without consulting the byte budget.
    pub(crate) fn assemble_unbudgeted(&self) -> Result<Vec<u8>> {
        let (width, height) = self.canvas.ok_or(Error::NoFrames)?;

        let mut builder = AnimationBuilder::new(width, height)
            .loop_count(self.options.loop_count)
            .dispose_to_background(self.options.dispose_to_background)
            .blend_frames(self.options.blend_frames);

        for frame in &self.frames {
            let payload = self.codec.encode(&frame.picture, &frame.config)?;
            builder.push_frame(frame.timestamp_ms, payload)?;
        }

        Ok(builder.finish()?)
    }

    /// Generates the animation at the frames' current settings, ignoring
    /// the byte budget.
    pub fn generate_unbudgeted(&mut self) -> Result<Vec<u8>> {
        if self.frames.is_empty() {
            return Err(Error::NoFrames);
        }
        self.sort_frames();
        let data = self.assemble_unbudgeted()?;
        debug!(size = data.len(), frames = self.frames.len(), "assembled unbudgeted animation");
        Ok(data)
    }

    /// Rewrites the loop count of a generated animation in place, without
    /// re-encoding any frame payload.
    pub fn set_loop_count(&self, data: &mut Vec<u8>) -> Result<()> {
        container::patch_loop_count(data, self.options.loop_count)?;
        Ok(())
    }
}

/// Encode-and-measure primitive: one codec round trip plus distortion
fn measure<C: PixelCodec>(
    codec: &C,
    picture: &RgbaImage,
    settings: &EncodeSettings,
) -> Result<(usize, f32)> {
    let payload = codec.encode(picture, settings)?;
    let decoded = codec.decode(&payload)?;
    let psnr = metrics::distortion(picture, &decoded)
        .map_err(|e| Error::Stats(e.to_string()))?[metrics::PSNR_ALL];
    Ok((payload.len(), psnr))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_codec::{busy_picture, solid_picture, QuantCodec};

    fn thumbnailer() -> Thumbnailer<QuantCodec> {
        Thumbnailer::with_codec(AnimationOptions::default(), QuantCodec)
    }

    #[test]
    fn test_add_frame_fixes_canvas() {
        let mut thumb = thumbnailer();
        thumb.add_frame(solid_picture(16, 16, 40), 0).unwrap();
        let err = thumb.add_frame(solid_picture(8, 16, 40), 40).unwrap_err();
        assert!(matches!(err, Error::DimensionMismatch { .. }));
        assert_eq!(thumb.frame_count(), 1);
    }

    #[test]
    fn test_picture_stats_cached_per_quality() {
        let mut thumb = thumbnailer();
        thumb.add_frame(busy_picture(16, 16), 0).unwrap();

        thumb.frames[0].config = EncodeSettings::lossy(50);
        let first = thumb.picture_stats(0).unwrap();
        assert!(thumb.frames[0].lossy_stats[50].is_some());
        let second = thumb.picture_stats(0).unwrap();
        assert_eq!(first, second);

        // Near-lossless measurements bypass the cache.
        thumb.frames[0].config = EncodeSettings::near_lossless();
        thumb.picture_stats(0).unwrap();
        assert!(thumb.frames[0].lossy_stats[100].is_none());
    }

    #[test]
    fn test_generate_unbudgeted_sorts_by_timestamp() {
        let mut thumb = thumbnailer();
        thumb.add_frame(busy_picture(16, 16), 80).unwrap();
        thumb.add_frame(solid_picture(16, 16, 10), 0).unwrap();
        thumb.add_frame(solid_picture(16, 16, 200), 40).unwrap();

        let data = thumb.generate_unbudgeted().unwrap();
        let animation = athumb_core::Animation::from_bytes(&data).unwrap();
        let timestamps: Vec<i32> = animation
            .frames
            .iter()
            .map(|frame| frame.timestamp_ms)
            .collect();
        assert_eq!(timestamps, vec![0, 40, 80]);
    }

    #[test]
    fn test_set_loop_count_patches_without_reencode() {
        let mut thumb = thumbnailer();
        thumb.add_frame(solid_picture(8, 8, 90), 0).unwrap();
        let mut data = thumb.generate_unbudgeted().unwrap();
        let before = data.clone();

        thumb.options.loop_count = 9;
        thumb.set_loop_count(&mut data).unwrap();

        let animation = athumb_core::Animation::from_bytes(&data).unwrap();
        assert_eq!(animation.header.loop_count, 9);
        // Only the header bytes changed.
        assert_eq!(data.len(), before.len());
        assert_eq!(data[22..], before[22..]);
    }

    #[test]
    fn test_generate_unbudgeted_without_frames() {
        let mut thumb = thumbnailer();
        assert!(matches!(
            thumb.generate_unbudgeted(),
            Err(Error::NoFrames)
        ));
    }
}
