//! Video frame extraction using FFmpeg

use crate::{Error, Result};
use athumb_core::TimedPicture;
use ffmpeg_next as ffmpeg;
use image::{ImageBuffer, Rgba};
use std::path::Path;
use std::sync::Once;

static FFMPEG_INIT: Once = Once::new();

/// Initialize FFmpeg (call once per application)
fn init_ffmpeg() {
    FFMPEG_INIT.call_once(|| {
        ffmpeg::init().expect("Failed to initialize FFmpeg");
    });
}

/// Video reader that extracts timestamped RGBA frames from video files
pub struct VideoReader {
    input: ffmpeg::format::context::Input,
    video_stream_index: usize,
    decoder: ffmpeg::codec::decoder::Video,
    time_base: ffmpeg::Rational,
}

impl VideoReader {
    /// Opens a video file
    pub fn open(path: &Path) -> Result<Self> {
        init_ffmpeg();

        let input = ffmpeg::format::input(&path)?;

        // Find the video stream
        let video_stream = input
            .streams()
            .best(ffmpeg::media::Type::Video)
            .ok_or(Error::NoVideoStream)?;

        let video_stream_index = video_stream.index();
        let time_base = video_stream.time_base();

        // Create decoder
        let context =
            ffmpeg::codec::context::Context::from_parameters(video_stream.parameters())?;
        let decoder = context.decoder().video()?;

        Ok(Self {
            input,
            video_stream_index,
            decoder,
            time_base,
        })
    }

    /// Gets the video width
    pub fn width(&self) -> u32 {
        self.decoder.width()
    }

    /// Gets the video height
    pub fn height(&self) -> u32 {
        self.decoder.height()
    }

    /// Gets the total duration in milliseconds
    pub fn duration_ms(&self) -> i64 {
        let stream_duration = self
            .input
            .stream(self.video_stream_index)
            .map(|stream| {
                let duration = stream.duration();
                let time_base = stream.time_base();
                (duration as f64 * time_base.numerator() as f64
                    / time_base.denominator() as f64
                    * 1000.0) as i64
            })
            .unwrap_or(0);

        if stream_duration > 0 {
            stream_duration
        } else {
            // Fall back to the container duration.
            (self.input.duration() as f64 / ffmpeg::ffi::AV_TIME_BASE as f64 * 1000.0) as i64
        }
    }

    /// Reads all frames with their presentation timestamps in milliseconds.
    ///
    /// With `max_fps` set, frames arriving faster than the given rate are
    /// skipped, which keeps thumbnail inputs small for high-fps sources.
    pub fn read_timed_frames(&mut self, max_fps: Option<f64>) -> Result<Vec<TimedPicture>> {
        let mut scaler = ffmpeg::software::scaling::Context::get(
            self.decoder.format(),
            self.decoder.width(),
            self.decoder.height(),
            ffmpeg::format::Pixel::RGBA,
            self.decoder.width(),
            self.decoder.height(),
            ffmpeg::software::scaling::Flags::BILINEAR,
        )?;

        let millis_per_unit = self.time_base.numerator() as f64 * 1000.0
            / self.time_base.denominator() as f64;
        let min_gap_ms = max_fps.map(|fps| 1000.0 / fps);

        let mut frames: Vec<TimedPicture> = Vec::new();
        let mut next_keep_ms = f64::NEG_INFINITY;

        let mut drain = |decoder: &mut ffmpeg::decoder::Video,
                         scaler: &mut ffmpeg::software::scaling::Context,
                         frames: &mut Vec<TimedPicture>,
                         next_keep_ms: &mut f64|
         -> Result<()> {
            let mut decoded = ffmpeg::frame::Video::empty();
            while decoder.receive_frame(&mut decoded).is_ok() {
                let timestamp_ms = decoded
                    .timestamp()
                    .map(|pts| (pts as f64 * millis_per_unit).round())
                    .unwrap_or_else(|| frames.len() as f64 * 1000.0 / 30.0);

                if timestamp_ms < *next_keep_ms {
                    continue;
                }
                if let Some(gap) = min_gap_ms {
                    *next_keep_ms = timestamp_ms + gap;
                }

                let mut rgba_frame = ffmpeg::frame::Video::empty();
                scaler.run(&decoded, &mut rgba_frame)?;

                let data = rgba_frame.data(0).to_vec();
                let picture = ImageBuffer::<Rgba<u8>, Vec<u8>>::from_raw(
                    rgba_frame.width(),
                    rgba_frame.height(),
                    data,
                )
                .ok_or(Error::InvalidVideo)?;

                frames.push(TimedPicture::new(picture, timestamp_ms as i32));
            }
            Ok(())
        };

        for (stream, packet) in self.input.packets() {
            if stream.index() == self.video_stream_index {
                self.decoder.send_packet(&packet)?;
                drain(
                    &mut self.decoder,
                    &mut scaler,
                    &mut frames,
                    &mut next_keep_ms,
                )?;
            }
        }

        // Flush decoder
        self.decoder.send_eof()?;
        drain(
            &mut self.decoder,
            &mut scaler,
            &mut frames,
            &mut next_keep_ms,
        )?;

        Ok(frames)
    }
}
