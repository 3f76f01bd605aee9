//! Animation container format serialization and deserialization

use crate::{Error, Result};
use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{Read, Write};

/// Magic bytes for the athumb container: "ATHB"
const MAGIC: [u8; 4] = [b'A', b'T', b'H', b'B'];

/// Current container format version
const VERSION: u16 = 1;

/// Byte offset of the loop count field inside a serialized animation.
///
/// Fixed by the header layout (magic, version, width, height), which lets
/// [`patch_loop_count`] rewrite the value without touching frame payloads.
const LOOP_COUNT_OFFSET: usize = 4 + 2 + 4 + 4;

/// Serialized header size in bytes
const HEADER_LEN: usize = LOOP_COUNT_OFFSET + 2 + 1 + 1 + 4;

/// Animation container header
#[derive(Debug, Clone)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct AnimationHeader {
    /// Format version
    pub version: u16,
    /// Canvas width in pixels
    pub width: u32,
    /// Canvas height in pixels
    pub height: u32,
    /// Number of times the animation repeats (0 = forever)
    pub loop_count: u16,
    /// Whether the canvas is disposed to background between frames
    pub dispose_to_background: bool,
    /// Whether frames are alpha-blended onto the canvas
    pub blend_frames: bool,
    /// Number of stored frames
    pub frame_count: u32,
}

impl AnimationHeader {
    /// Creates a new animation header
    pub fn new(
        width: u32,
        height: u32,
        loop_count: u16,
        dispose_to_background: bool,
        blend_frames: bool,
        frame_count: u32,
    ) -> Self {
        Self {
            version: VERSION,
            width,
            height,
            loop_count,
            dispose_to_background,
            blend_frames,
            frame_count,
        }
    }

    /// Reads a header from a reader
    pub fn read<R: Read>(reader: &mut R) -> Result<Self> {
        // Read and validate magic bytes
        let mut magic = [0u8; 4];
        reader.read_exact(&mut magic)?;
        if magic != MAGIC {
            return Err(Error::InvalidMagic);
        }

        // Read version
        let version = reader.read_u16::<LittleEndian>()?;
        if version != VERSION {
            return Err(Error::UnsupportedVersion(version));
        }

        // Read remaining header fields
        let width = reader.read_u32::<LittleEndian>()?;
        let height = reader.read_u32::<LittleEndian>()?;
        let loop_count = reader.read_u16::<LittleEndian>()?;
        let dispose_to_background = reader.read_u8()? != 0;
        let blend_frames = reader.read_u8()? != 0;
        let frame_count = reader.read_u32::<LittleEndian>()?;

        Ok(Self {
            version,
            width,
            height,
            loop_count,
            dispose_to_background,
            blend_frames,
            frame_count,
        })
    }

    /// Writes the header to a writer
    pub fn write<W: Write>(&self, writer: &mut W) -> Result<()> {
        writer.write_all(&MAGIC)?;
        writer.write_u16::<LittleEndian>(self.version)?;
        writer.write_u32::<LittleEndian>(self.width)?;
        writer.write_u32::<LittleEndian>(self.height)?;
        writer.write_u16::<LittleEndian>(self.loop_count)?;
        writer.write_u8(self.dispose_to_background as u8)?;
        writer.write_u8(self.blend_frames as u8)?;
        writer.write_u32::<LittleEndian>(self.frame_count)?;
        Ok(())
    }
}

/// A single encoded frame with its presentation timestamp
#[derive(Debug, Clone)]
pub struct EncodedFrame {
    /// Presentation timestamp in milliseconds
    pub timestamp_ms: i32,
    /// Codec payload for this frame
    pub payload: Vec<u8>,
}

impl EncodedFrame {
    /// Creates a new encoded frame
    pub fn new(timestamp_ms: i32, payload: Vec<u8>) -> Self {
        Self {
            timestamp_ms,
            payload,
        }
    }

    /// Returns the payload size in bytes
    pub fn payload_size(&self) -> usize {
        self.payload.len()
    }
}

/// Complete parsed animation
#[derive(Debug, Clone)]
pub struct Animation {
    /// Container header
    pub header: AnimationHeader,
    /// Encoded frames in timestamp order
    pub frames: Vec<EncodedFrame>,
}

impl Animation {
    /// Reads an animation from a reader
    pub fn read<R: Read>(mut reader: R) -> Result<Self> {
        let header = AnimationHeader::read(&mut reader)?;

        let mut frames = Vec::with_capacity(header.frame_count as usize);
        for _ in 0..header.frame_count {
            let timestamp_ms = reader.read_i32::<LittleEndian>()?;
            let payload_len = reader.read_u32::<LittleEndian>()?;

            let mut payload = vec![0u8; payload_len as usize];
            reader.read_exact(&mut payload)?;

            frames.push(EncodedFrame::new(timestamp_ms, payload));
        }

        Ok(Self { header, frames })
    }

    /// Parses an animation from an in-memory buffer
    pub fn from_bytes(data: &[u8]) -> Result<Self> {
        Self::read(data)
    }

    /// Writes the animation to a writer
    pub fn write<W: Write>(&self, mut writer: W) -> Result<()> {
        self.header.write(&mut writer)?;

        for frame in &self.frames {
            writer.write_i32::<LittleEndian>(frame.timestamp_ms)?;
            writer.write_u32::<LittleEndian>(frame.payload.len() as u32)?;
            writer.write_all(&frame.payload)?;
        }

        Ok(())
    }

    /// Total size of the encoded payloads in bytes
    pub fn payload_size(&self) -> usize {
        self.frames.iter().map(EncodedFrame::payload_size).sum()
    }
}

/// Incremental animation assembler.
///
/// Frames must be pushed in non-decreasing timestamp order. A frame whose
/// payload is byte-identical to the previous one is merged into it: the run
/// keeps the first frame's entry, so the stored sequence can be shorter than
/// the source sequence.
#[derive(Debug)]
pub struct AnimationBuilder {
    width: u32,
    height: u32,
    loop_count: u16,
    dispose_to_background: bool,
    blend_frames: bool,
    frames: Vec<EncodedFrame>,
}

impl AnimationBuilder {
    /// Creates a builder for the given canvas
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            loop_count: 0,
            dispose_to_background: false,
            blend_frames: true,
            frames: Vec::new(),
        }
    }

    /// Sets the loop count (0 = loop forever)
    pub fn loop_count(mut self, loop_count: u16) -> Self {
        self.loop_count = loop_count;
        self
    }

    /// Sets the dispose-to-background flag
    pub fn dispose_to_background(mut self, dispose: bool) -> Self {
        self.dispose_to_background = dispose;
        self
    }

    /// Sets the frame blending flag
    pub fn blend_frames(mut self, blend: bool) -> Self {
        self.blend_frames = blend;
        self
    }

    /// Appends an encoded frame, merging it when identical to the last one
    pub fn push_frame(&mut self, timestamp_ms: i32, payload: Vec<u8>) -> Result<()> {
        if let Some(last) = self.frames.last() {
            if timestamp_ms < last.timestamp_ms {
                return Err(Error::FrameOrder {
                    prev: last.timestamp_ms,
                    next: timestamp_ms,
                });
            }
            if last.payload == payload {
                return Ok(());
            }
        }
        self.frames.push(EncodedFrame::new(timestamp_ms, payload));
        Ok(())
    }

    /// Number of frames currently stored (after merging)
    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Serializes the assembled animation to a byte buffer
    pub fn finish(self) -> Result<Vec<u8>> {
        let header = AnimationHeader::new(
            self.width,
            self.height,
            self.loop_count,
            self.dispose_to_background,
            self.blend_frames,
            self.frames.len() as u32,
        );
        let animation = Animation {
            header,
            frames: self.frames,
        };

        let mut buffer = Vec::new();
        animation.write(&mut buffer)?;
        Ok(buffer)
    }
}

/// Rewrites the loop count of a serialized animation in place.
///
/// Only the two header bytes at a fixed offset are touched; frame payloads
/// are left as they are.
pub fn patch_loop_count(data: &mut [u8], loop_count: u16) -> Result<()> {
    if data.len() < HEADER_LEN {
        return Err(Error::TruncatedAnimation(data.len()));
    }
    if data[..4] != MAGIC {
        return Err(Error::InvalidMagic);
    }
    data[LOOP_COUNT_OFFSET..LOOP_COUNT_OFFSET + 2].copy_from_slice(&loop_count.to_le_bytes());
    Ok(())
}
