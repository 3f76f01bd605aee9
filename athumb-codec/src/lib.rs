//! AVIF implementation of the athumb pixel codec seam.
//!
//! Frames are encoded with `ravif` and decoded with `libavif`. The engine
//! only sees the [`PixelCodec`] trait, so the codec can be swapped without
//! touching the allocation logic.

pub mod avif;

pub use avif::AvifCodec;
