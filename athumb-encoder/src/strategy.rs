//! Pluggable allocation strategies layered on the three-pass pipeline.
//!
//! A strategy may rearrange per-frame settings however it likes, but the
//! driver only commits its result when the animation still fits the byte
//! budget; otherwise the previous animation is returned untouched, so a
//! strategy can never regress the best result found so far.

use crate::thumbnailer::Thumbnailer;
use crate::{Error, Result};
use athumb_core::{EncodeSettings, PixelCodec};
use tracing::debug;

/// A quality allocation refinement over an already generated animation
pub trait AllocationStrategy<C: PixelCodec> {
    /// Strategy name for diagnostics
    fn name(&self) -> &'static str;

    /// Attempts to build a better animation than `current`.
    ///
    /// Returns `Ok(None)` when no acceptable improvement exists; the engine
    /// state must then be back to a configuration consistent with
    /// `current`. Hard codec failures propagate as errors.
    fn improve(&self, engine: &mut Thumbnailer<C>, current: &[u8]) -> Result<Option<Vec<u8>>>;
}

/// Switches frames to near-lossless mode where that improves fidelity.
///
/// Upgrades are accepted per frame only on a strict PSNR gain. When the
/// upgraded assembly exceeds the budget, upgrades are shed in descending
/// order of byte cost until it fits; shedding them all means failure.
pub struct NearLosslessStrategy;

struct Upgrade {
    index: usize,
    lossy_config: EncodeSettings,
    size: usize,
    psnr: f32,
    cost: isize,
}

impl<C: PixelCodec> AllocationStrategy<C> for NearLosslessStrategy {
    fn name(&self) -> &'static str {
        "near-lossless"
    }

    fn improve(&self, engine: &mut Thumbnailer<C>, _current: &[u8]) -> Result<Option<Vec<u8>>> {
        let mut upgrades: Vec<Upgrade> = Vec::new();

        for index in 0..engine.frames.len() {
            if engine.frames[index].near_lossless {
                continue;
            }
            let lossy_config = engine.frames[index].config;
            engine.frames[index].config = EncodeSettings::near_lossless();
            let (size, psnr) = engine.picture_stats(index)?;

            if psnr > engine.frames[index].final_psnr {
                let cost = size as isize - engine.frames[index].encoded_size as isize;
                engine.frames[index].near_lossless = true;
                upgrades.push(Upgrade {
                    index,
                    lossy_config,
                    size,
                    psnr,
                    cost,
                });
            } else {
                engine.frames[index].config = lossy_config;
            }
        }

        if upgrades.is_empty() {
            return Ok(None);
        }
        upgrades.sort_by_key(|upgrade| upgrade.cost);

        loop {
            let candidate = engine.assemble_unbudgeted()?;
            if candidate.len() <= engine.options.byte_budget {
                for upgrade in &upgrades {
                    let frame = &mut engine.frames[upgrade.index];
                    frame.encoded_size = upgrade.size;
                    frame.final_psnr = upgrade.psnr;
                }
                debug!(upgraded = upgrades.len(), "near-lossless upgrades committed");
                return Ok(Some(candidate));
            }

            // Shed the costliest upgrade and try again.
            let Some(shed) = upgrades.pop() else {
                return Ok(None);
            };
            let frame = &mut engine.frames[shed.index];
            frame.config = shed.lossy_config;
            frame.near_lossless = false;
            if upgrades.is_empty() {
                return Ok(None);
            }
        }
    }
}

/// Allocates qualities so all frames land near one PSNR value.
///
/// Binary search on a global PSNR target bounded by the weakest frame's
/// reachable range; each candidate target assigns every frame the lowest
/// quality whose PSNR reaches it, and the assembly must fit the budget.
pub struct EqualPsnrStrategy {
    /// Number of target bisection rounds
    pub iterations: usize,
}

impl Default for EqualPsnrStrategy {
    fn default() -> Self {
        Self { iterations: 8 }
    }
}

impl<C: PixelCodec> AllocationStrategy<C> for EqualPsnrStrategy {
    fn name(&self) -> &'static str {
        "equal-psnr"
    }

    fn improve(&self, engine: &mut Thumbnailer<C>, _current: &[u8]) -> Result<Option<Vec<u8>>> {
        let floor = engine.options.minimum_lossy_quality.min(100);
        let frame_count = engine.frames.len();

        // The weakest frame bounds the reachable target range.
        let mut low_target = f32::INFINITY;
        let mut high_target = f32::INFINITY;
        for index in 0..frame_count {
            engine.frames[index].config = EncodeSettings::lossy(floor);
            let (_, floor_psnr) = engine.picture_stats(index)?;
            engine.frames[index].config = EncodeSettings::lossy(100);
            let (_, top_psnr) = engine.picture_stats(index)?;
            low_target = low_target.min(floor_psnr);
            high_target = high_target.min(top_psnr);
        }

        let mut best: Option<(Vec<u8>, Vec<u8>)> = None;

        for _ in 0..self.iterations {
            let target = (low_target + high_target) / 2.0;

            let mut qualities = Vec::with_capacity(frame_count);
            for index in 0..frame_count {
                let mut lo = floor as i32;
                let mut hi = 100i32;
                let mut chosen = 100u8;
                while lo <= hi {
                    let mid = ((lo + hi) / 2) as u8;
                    engine.frames[index].config = EncodeSettings::lossy(mid);
                    let (_, psnr) = engine.picture_stats(index)?;
                    if psnr >= target {
                        chosen = mid;
                        hi = mid as i32 - 1;
                    } else {
                        lo = mid as i32 + 1;
                    }
                }
                engine.frames[index].config = EncodeSettings::lossy(chosen);
                qualities.push(chosen);
            }

            let candidate = engine.assemble_unbudgeted()?;
            if candidate.len() <= engine.options.byte_budget {
                best = Some((candidate, qualities));
                low_target = target;
            } else {
                high_target = target;
            }
        }

        let Some((data, qualities)) = best else {
            return Ok(None);
        };
        for (index, &quality) in qualities.iter().enumerate() {
            engine.frames[index].config = EncodeSettings::lossy(quality);
            engine.frames[index].final_quality = Some(quality);
            engine.frames[index].near_lossless = false;
            let (size, psnr) = engine.picture_stats(index)?;
            engine.frames[index].encoded_size = size;
            engine.frames[index].final_psnr = psnr;
        }
        debug!(qualities = ?qualities, size = data.len(), "equal-PSNR allocation committed");
        Ok(Some(data))
    }
}

impl<C: PixelCodec> Thumbnailer<C> {
    /// Runs a strategy and commits its result only when it fits the budget
    pub(crate) fn apply_strategy(
        &mut self,
        strategy: &dyn AllocationStrategy<C>,
        current: Vec<u8>,
    ) -> Result<Vec<u8>> {
        match strategy.improve(self, &current)? {
            Some(candidate)
                if !candidate.is_empty() && candidate.len() <= self.options.byte_budget =>
            {
                debug!(
                    strategy = strategy.name(),
                    size = candidate.len(),
                    "allocation strategy accepted"
                );
                Ok(candidate)
            }
            _ => {
                debug!(strategy = strategy.name(), "allocation strategy kept previous animation");
                Ok(current)
            }
        }
    }

    /// Generates the animation so all frames land near one PSNR value.
    ///
    /// Falls back to [`Thumbnailer::generate`] when no equal-PSNR
    /// allocation fits the budget.
    pub fn generate_equal_psnr(&mut self) -> Result<Vec<u8>> {
        if self.frames.is_empty() {
            return Err(Error::NoFrames);
        }
        self.reset_caches();
        self.sort_frames();
        match EqualPsnrStrategy::default().improve(self, &[])? {
            Some(data) => Ok(data),
            None => self.generate(),
        }
    }

    /// Tries to upgrade frames to near-lossless mode.
    ///
    /// A lossy animation must have been generated first. Keeps the given
    /// animation when no fitting upgrade exists.
    pub fn try_near_lossless(&mut self, current: Vec<u8>) -> Result<Vec<u8>> {
        if self.frames.is_empty() {
            return Err(Error::NoFrames);
        }
        self.apply_strategy(&NearLosslessStrategy, current)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_codec::{busy_picture, QuantCodec};
    use crate::AnimationOptions;

    fn thumbnailer(byte_budget: usize) -> Thumbnailer<QuantCodec> {
        let options = AnimationOptions {
            byte_budget,
            ..AnimationOptions::default()
        };
        Thumbnailer::with_codec(options, QuantCodec)
    }

    fn add_busy_frames(thumb: &mut Thumbnailer<QuantCodec>, count: usize) {
        for i in 0..count {
            let mut picture = busy_picture(16, 16);
            picture.get_pixel_mut(0, 0)[0] = i as u8;
            thumb.add_frame(picture, i as i32 * 40).unwrap();
        }
    }

    #[test]
    fn test_near_lossless_upgrade_committed() {
        // Tight budget: the lossy pipeline lands on low qualities, while
        // near-lossless payloads are small enough to fit.
        let mut thumb = thumbnailer(4_000);
        add_busy_frames(&mut thumb, 3);
        let data = thumb.generate().unwrap();

        let upgraded = thumb.try_near_lossless(data).unwrap();
        assert!(upgraded.len() <= 4_000);
        assert!(thumb.frames.iter().all(|frame| frame.near_lossless));
        assert!(thumb.frames.iter().all(|frame| frame.final_psnr == 99.0));
    }

    #[test]
    fn test_near_lossless_keeps_baseline_when_no_gain() {
        // A generous budget drives every frame to an exact reconstruction,
        // leaving near-lossless nothing to improve.
        let mut thumb = thumbnailer(1_000_000);
        add_busy_frames(&mut thumb, 3);
        let data = thumb.generate().unwrap();

        let result = thumb.try_near_lossless(data.clone()).unwrap();
        assert_eq!(result, data);
        assert!(thumb.frames.iter().all(|frame| !frame.near_lossless));
    }

    #[test]
    fn test_equal_psnr_fits_budget() {
        let mut thumb = thumbnailer(5_000);
        add_busy_frames(&mut thumb, 3);

        let data = thumb.generate_equal_psnr().unwrap();
        assert!(!data.is_empty());
        assert!(data.len() <= 5_000);
        for quality in thumb.final_qualities() {
            assert!(quality.is_some());
        }
    }

    #[test]
    fn test_equal_psnr_assigns_similar_fidelity() {
        let mut thumb = thumbnailer(6_000);
        // One low-detail and two high-detail frames.
        thumb
            .add_frame(crate::test_codec::solid_picture(16, 16, 127), 0)
            .unwrap();
        let mut second = busy_picture(16, 16);
        second.get_pixel_mut(0, 0)[0] = 1;
        thumb.add_frame(second, 40).unwrap();
        thumb.add_frame(busy_picture(16, 16), 80).unwrap();

        let data = thumb.generate_equal_psnr().unwrap();
        assert!(data.len() <= 6_000);

        let psnrs: Vec<f32> = thumb.frames.iter().map(|frame| frame.final_psnr).collect();
        let min = psnrs.iter().cloned().fold(f32::INFINITY, f32::min);
        let max = psnrs.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
        assert!(min > 0.0);
        // All frames land in a narrow fidelity band.
        assert!(max - min < 15.0);
    }

    #[test]
    fn test_equal_psnr_falls_back_on_starved_budget() {
        let mut thumb = thumbnailer(64);
        add_busy_frames(&mut thumb, 3);
        assert!(matches!(
            thumb.generate_equal_psnr(),
            Err(Error::ByteBudgetOverflow(64))
        ));
    }
}
