//! Quality allocation under the byte budget.
//!
//! Three passes run in sequence: a slope-optimized joint binary search that
//! freezes frames as their rate-distortion curves flatten, a per-frame
//! refinement scan that spends leftover slack in equal shares, and a
//! cheapest-first top-up that raises the quality floor across the remaining
//! frames until the budget is exhausted.

use crate::thumbnailer::Thumbnailer;
use crate::{Error, Result};
use athumb_core::{EncodeSettings, PixelCodec};
use tracing::debug;

/// PSNR window below the quality-100 point used for slope estimation, in dB
const PSNR_WINDOW_DB: f32 = 1.0;

/// Upper bound on refinement scans over the whole frame set
const REFINE_MAX_PASSES: usize = 5;

/// Width of the per-frame and top-up search windows, in quality levels
const SEARCH_WINDOW: i32 = 30;

impl<C: PixelCodec> Thumbnailer<C> {
    /// Finds the best per-frame qualities that fit the byte budget and
    /// returns the assembled animation.
    ///
    /// Fails with [`Error::ByteBudgetOverflow`] when even the minimum lossy
    /// quality across all frames exceeds the budget.
    pub fn generate(&mut self) -> Result<Vec<u8>> {
        if self.frames.is_empty() {
            return Err(Error::NoFrames);
        }
        self.reset_caches();

        let mut current = self.run_slope_pass()?;

        // Refinement converges with diminishing returns; stop at the size
        // fixed point.
        let mut current_size = current.len();
        for _ in 0..REFINE_MAX_PASSES {
            current = self.run_refine_pass(current)?;
            if current.len() == current_size {
                break;
            }
            current_size = current.len();
        }

        self.run_top_up_pass(current)
    }

    /// Rate-distortion slope of a frame between two quality levels.
    ///
    /// Zero when both levels encode to the same size (a flat segment).
    pub(crate) fn slope_between(
        &mut self,
        index: usize,
        low_quality: u8,
        high_quality: u8,
    ) -> Result<f32> {
        self.frames[index].config.quality = low_quality;
        let (low_size, low_psnr) = self.picture_stats(index)?;

        self.frames[index].config.quality = high_quality;
        let (high_size, high_psnr) = self.picture_stats(index)?;

        if high_size == low_size {
            Ok(0.0)
        } else {
            Ok((high_psnr - low_psnr) / (high_size as f32 - low_size as f32))
        }
    }

    /// Slope of a frame at the leftmost quality whose PSNR lies within
    /// [`PSNR_WINDOW_DB`] of the quality-100 point, found by binary search.
    pub(crate) fn threshold_slope(&mut self, index: usize) -> Result<f32> {
        self.frames[index].config.quality = 100;
        let (size_100, psnr_100) = self.picture_stats(index)?;

        let mut min_quality = 0i32;
        let mut max_quality = 100i32;
        let mut boundary_slope = 0.0f32;

        while min_quality <= max_quality {
            let mid_quality = ((min_quality + max_quality) / 2) as u8;
            self.frames[index].config.quality = mid_quality;
            let (new_size, new_psnr) = self.picture_stats(index)?;

            if psnr_100 - new_psnr <= PSNR_WINDOW_DB {
                boundary_slope = if size_100 == new_size {
                    0.0
                } else {
                    (psnr_100 - new_psnr) / (size_100 as f32 - new_size as f32)
                };
                max_quality = mid_quality as i32 - 1;
            } else {
                min_quality = mid_quality as i32 + 1;
            }
        }

        Ok(boundary_slope)
    }

    /// Median of the per-frame threshold slopes.
    ///
    /// The median keeps a few atypical frames (near-solid pictures with
    /// near-zero slope) from dominating the global target.
    fn median_limit_slope(&mut self) -> Result<f32> {
        let mut slopes = Vec::with_capacity(self.frames.len());
        for index in 0..self.frames.len() {
            slopes.push(self.threshold_slope(index)?);
        }
        slopes.sort_by(f32::total_cmp);
        Ok(slopes[slopes.len() / 2])
    }

    /// Primary pass: joint binary search over one global quality range.
    ///
    /// Each round pushes the still-active frames to the midpoint quality and
    /// trial-assembles the animation. A fitting trial commits the midpoint
    /// as those frames' `final_quality` and raises the floor; an oversized
    /// trial lowers the ceiling. A frame stays active only while its local
    /// slope between the current bounds exceeds the global limit, so flat
    /// frames freeze early while steep frames keep advancing.
    pub(crate) fn run_slope_pass(&mut self) -> Result<Vec<u8>> {
        self.sort_frames();

        let limit_slope = self.median_limit_slope()?;
        debug!(limit_slope, "estimated global slope target");

        let mut min_quality = self.options.minimum_lossy_quality.min(100) as i32;
        let mut max_quality = 100i32;
        let mut active: Vec<usize> = (0..self.frames.len()).collect();
        let mut current = Vec::new();

        while min_quality <= max_quality && !active.is_empty() {
            let mid_quality = ((min_quality + max_quality) / 2) as u8;

            let mut next_active = Vec::new();
            for &index in &active {
                let slope =
                    self.slope_between(index, min_quality as u8, max_quality as u8)?;
                if self.frames[index].final_quality.is_none() || slope > limit_slope {
                    self.frames[index].config.quality = mid_quality;
                    next_active.push(index);
                } else if let Some(final_quality) = self.frames[index].final_quality {
                    // A frozen frame is encoded at what it already committed.
                    self.frames[index].config.quality = final_quality;
                }
            }
            if next_active.is_empty() {
                break;
            }

            let candidate = self.assemble_unbudgeted()?;
            if candidate.len() <= self.options.byte_budget {
                for &index in &next_active {
                    self.frames[index].final_quality = Some(mid_quality);
                }
                current = candidate;
                min_quality = mid_quality as i32 + 1;
            } else {
                max_quality = mid_quality as i32 - 1;
            }

            active = next_active;
        }

        if current.is_empty() {
            return Err(Error::ByteBudgetOverflow(self.options.byte_budget));
        }

        // Refresh committed stats for the later passes.
        for index in 0..self.frames.len() {
            if let Some(final_quality) = self.frames[index].final_quality {
                self.frames[index].config = EncodeSettings::lossy(final_quality);
                let (size, psnr) = self.picture_stats(index)?;
                self.frames[index].encoded_size = size;
                self.frames[index].final_psnr = psnr;
            }
        }
        debug!(
            qualities = ?self.final_qualities(),
            size = current.len(),
            "slope pass committed"
        );

        Ok(current)
    }

    /// Secondary pass: one scan that spends remaining slack per frame.
    ///
    /// Passes the buffer through untouched when it already exceeds the
    /// budget. Each frame searches up to [`SEARCH_WINDOW`] levels above its
    /// committed quality, accepting a candidate only when it improves PSNR
    /// (or matches it at no extra cost) and its size delta stays within an
    /// equal per-remaining-frame share of the current slack.
    pub(crate) fn run_refine_pass(&mut self, current: Vec<u8>) -> Result<Vec<u8>> {
        let mut anim_size = current.len();
        if anim_size > self.options.byte_budget {
            return Ok(current);
        }

        let mut remaining_frames = self.frames.len();

        for index in 0..self.frames.len() {
            let frame = &self.frames[index];
            let mut min_quality = if frame.config.lossless {
                70
            } else {
                frame
                    .final_quality
                    .unwrap_or(self.options.minimum_lossy_quality) as i32
            };
            let mut max_quality = (min_quality + SEARCH_WINDOW).min(100);
            self.frames[index].config.lossless = false;

            while min_quality <= max_quality {
                let mid_quality = ((min_quality + max_quality) / 2) as u8;
                self.frames[index].config.quality = mid_quality;
                let (new_size, new_psnr) = self.picture_stats(index)?;

                let frame = &self.frames[index];
                let improves = new_psnr > frame.final_psnr
                    || (new_psnr == frame.final_psnr && new_size <= frame.encoded_size);
                if improves {
                    let share = (self.options.byte_budget - anim_size) / remaining_frames;
                    if new_size <= frame.encoded_size + share {
                        anim_size = anim_size.saturating_sub(frame.encoded_size) + new_size;
                        let frame = &mut self.frames[index];
                        frame.encoded_size = new_size;
                        frame.final_psnr = new_psnr;
                        frame.final_quality = Some(mid_quality);
                        frame.near_lossless = false;
                        min_quality = mid_quality as i32 + 1;
                    } else {
                        max_quality = mid_quality as i32 - 1;
                    }
                } else {
                    min_quality = mid_quality as i32 + 1;
                }
            }

            remaining_frames -= 1;
        }

        for frame in &mut self.frames {
            if let Some(final_quality) = frame.final_quality {
                frame.config.quality = final_quality;
            }
            frame.config.lossless = frame.near_lossless;
        }

        let candidate = self.assemble_unbudgeted()?;
        if candidate.len() <= self.options.byte_budget {
            debug!(
                qualities = ?self.final_qualities(),
                size = candidate.len(),
                "refine pass committed"
            );
            Ok(candidate)
        } else {
            // Bookkeeping drift put the trial over budget; keep the previous
            // animation as the result of this pass.
            Ok(current)
        }
    }

    /// Tertiary pass: cheapest-first lock-step top-up.
    ///
    /// Frames are visited in ascending order of the slope between their
    /// committed quality and quality 100. Each round binary-searches one
    /// quality floor applied to all remaining frames at once, commits the
    /// largest fitting floor and retires the flattest frame.
    pub(crate) fn run_top_up_pass(&mut self, current: Vec<u8>) -> Result<Vec<u8>> {
        let mut order: Vec<(f32, usize)> = Vec::new();
        for index in 0..self.frames.len() {
            if self.frames[index].near_lossless {
                continue;
            }
            let from = self.frames[index]
                .final_quality
                .unwrap_or(self.options.minimum_lossy_quality);
            let slope = self.slope_between(index, from, 100)?;
            order.push((slope, index));
        }
        order.sort_by(|a, b| a.0.total_cmp(&b.0));

        let mut current = current;

        while !order.is_empty() {
            let mut min_quality = 100i32;
            for &(_, index) in &order {
                let next_candidate = self.frames[index]
                    .final_quality
                    .map_or(self.options.minimum_lossy_quality as i32, |q| q as i32 + 1);
                min_quality = min_quality.min(next_candidate);
            }
            let mut max_quality = (min_quality + SEARCH_WINDOW).min(100);
            let mut committed_quality = None;

            while min_quality <= max_quality {
                let mid_quality = ((min_quality + max_quality) / 2) as u8;
                for &(_, index) in &order {
                    let frame = &mut self.frames[index];
                    frame.config.quality = frame.final_quality.map_or(mid_quality, |q| {
                        q.max(mid_quality)
                    });
                }

                let candidate = self.assemble_unbudgeted()?;
                if candidate.len() <= self.options.byte_budget {
                    committed_quality = Some(mid_quality);
                    current = candidate;
                    min_quality = mid_quality as i32 + 1;
                } else {
                    max_quality = mid_quality as i32 - 1;
                }
            }

            let Some(quality) = committed_quality else {
                break;
            };
            for &(_, index) in &order {
                if self.frames[index].final_quality.is_none_or(|q| q < quality) {
                    self.frames[index].config = EncodeSettings::lossy(quality);
                    self.frames[index].final_quality = Some(quality);
                    let (size, psnr) = self.picture_stats(index)?;
                    self.frames[index].encoded_size = size;
                    self.frames[index].final_psnr = psnr;
                }
            }

            order.remove(0);
        }

        // Leave configs in sync with the committed qualities.
        for frame in &mut self.frames {
            if let Some(final_quality) = frame.final_quality {
                frame.config.quality = final_quality;
            }
        }
        debug!(
            qualities = ?self.final_qualities(),
            size = current.len(),
            "top-up pass finished"
        );

        Ok(current)
    }
}
