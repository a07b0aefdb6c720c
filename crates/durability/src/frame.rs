//! Record frame format
//!
//! Every record written to the write buffer is framed. A block handed to
//! storage is a run of frames, each padded to an 8-byte boundary.
//!
//! # Frame Layout
//!
//! ```text
//! ┌───────────────┬──────────┬──────────┬───────────┬────────────────┬─────────────┬─────────┐
//! │ Length (4)    │ Ver (1)  │ Flags (1)│ Type (2)  │ StreamId (4)   │ Payload     │ Padding │
//! └───────────────┴──────────┴──────────┴───────────┴────────────────┴─────────────┴─────────┘
//! ```
//!
//! All integers are little-endian. `Length` is the payload length, excluding
//! the header and padding.
//!
//! # Flags
//!
//! - bit 7: first frame of a batch
//! - bit 6: last frame of a batch
//!
//! Frames between a batch's first and last frame carry neither flag. A frame
//! with no flags outside a batch is a standalone record.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::Cursor;
use tidelog_core::{Error, Result, StreamId};

/// Size of the frame header in bytes
pub const HEADER_LENGTH: usize = 12;

/// Frames start at multiples of this
pub const FRAME_ALIGNMENT: usize = 8;

/// Current frame version
pub const FRAME_VERSION: u8 = 0;

/// Frame type of a regular record
pub const TYPE_MESSAGE: i16 = 0;

/// Round `length` up to the frame alignment
pub const fn align(length: usize) -> usize {
    (length + FRAME_ALIGNMENT - 1) & !(FRAME_ALIGNMENT - 1)
}

/// Bytes a frame with `payload_length` bytes of payload occupies in a block
pub const fn aligned_frame_length(payload_length: usize) -> usize {
    align(payload_length + HEADER_LENGTH)
}

/// Batch flags of a frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FrameFlags(u8);

impl FrameFlags {
    /// Batch begin bit
    pub const BATCH_BEGIN: u8 = 0x80;
    /// Batch end bit
    pub const BATCH_END: u8 = 0x40;

    /// A record that is not part of a batch
    pub const STANDALONE: FrameFlags = FrameFlags(0);
    /// First record of a batch
    pub const BEGIN: FrameFlags = FrameFlags(Self::BATCH_BEGIN);
    /// Record between the first and last of a batch
    pub const INTERIOR: FrameFlags = FrameFlags(0);
    /// Last record of a batch
    pub const END: FrameFlags = FrameFlags(Self::BATCH_END);

    /// Wrap raw flag bits
    pub const fn from_bits(bits: u8) -> Self {
        FrameFlags(bits)
    }

    /// Raw flag bits
    pub const fn bits(self) -> u8 {
        self.0
    }

    /// Whether the batch-begin bit is set
    pub const fn is_batch_begin(self) -> bool {
        self.0 & Self::BATCH_BEGIN != 0
    }

    /// Whether the batch-end bit is set
    pub const fn is_batch_end(self) -> bool {
        self.0 & Self::BATCH_END != 0
    }

    /// Flags for record `index` of a batch of `count` records
    pub fn for_batch_member(index: usize, count: usize) -> Self {
        match (index == 0, index + 1 == count) {
            (true, true) => FrameFlags::STANDALONE,
            (true, false) => FrameFlags::BEGIN,
            (false, true) => FrameFlags::END,
            (false, false) => FrameFlags::INTERIOR,
        }
    }
}

/// Decoded frame header
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    /// Payload length in bytes
    pub length: usize,
    /// Frame version
    pub version: u8,
    /// Batch flags
    pub flags: FrameFlags,
    /// Frame type
    pub frame_type: i16,
    /// Stream the record was written on
    pub stream_id: i32,
}

impl FrameHeader {
    /// Header of a regular record
    pub fn message(length: usize, flags: FrameFlags, stream_id: StreamId) -> Self {
        FrameHeader {
            length,
            version: FRAME_VERSION,
            flags,
            frame_type: TYPE_MESSAGE,
            stream_id: stream_id.as_u32() as i32,
        }
    }

    /// Append the encoded header to `buf`
    pub fn write_to(&self, buf: &mut Vec<u8>) -> Result<()> {
        let length = i32::try_from(self.length)
            .map_err(|_| Error::protocol(format!("frame of {} bytes is too large", self.length)))?;
        buf.write_i32::<LittleEndian>(length)?;
        buf.write_u8(self.version)?;
        buf.write_u8(self.flags.bits())?;
        buf.write_i16::<LittleEndian>(self.frame_type)?;
        buf.write_i32::<LittleEndian>(self.stream_id)?;
        Ok(())
    }

    /// Decode the header at the start of `bytes`
    pub fn read_from(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_LENGTH {
            return Err(Error::protocol(format!(
                "truncated frame header: {} of {} bytes",
                bytes.len(),
                HEADER_LENGTH
            )));
        }
        let mut cursor = Cursor::new(bytes);
        let length = cursor.read_i32::<LittleEndian>()?;
        let version = cursor.read_u8()?;
        let flags = FrameFlags::from_bits(cursor.read_u8()?);
        let frame_type = cursor.read_i16::<LittleEndian>()?;
        let stream_id = cursor.read_i32::<LittleEndian>()?;

        let length = usize::try_from(length)
            .map_err(|_| Error::protocol(format!("negative frame length {}", length)))?;
        Ok(FrameHeader {
            length,
            version,
            flags,
            frame_type,
            stream_id,
        })
    }
}

/// Append one padded frame carrying `payload` to `buf`
pub fn encode_frame(
    buf: &mut Vec<u8>,
    payload: &[u8],
    flags: FrameFlags,
    stream_id: StreamId,
) -> Result<()> {
    let start = buf.len();
    FrameHeader::message(payload.len(), flags, stream_id).write_to(buf)?;
    buf.extend_from_slice(payload);
    buf.resize(start + aligned_frame_length(payload.len()), 0);
    Ok(())
}

/// A frame borrowed from a block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame<'a> {
    /// Offset of the frame header within the block
    pub offset: usize,
    /// Decoded header
    pub header: FrameHeader,
    /// Payload bytes
    pub payload: &'a [u8],
}

/// Walks the frames of a block left to right
///
/// Yields an error and stops on the first malformed frame.
#[derive(Debug, Clone)]
pub struct FrameIter<'a> {
    block: &'a [u8],
    offset: usize,
    failed: bool,
}

impl<'a> FrameIter<'a> {
    /// Iterate over the frames in `block`
    pub fn new(block: &'a [u8]) -> Self {
        FrameIter {
            block,
            offset: 0,
            failed: false,
        }
    }

    fn read_frame(&self) -> Result<Frame<'a>> {
        let offset = self.offset;
        let header = FrameHeader::read_from(&self.block[offset..])?;
        let start = offset + HEADER_LENGTH;
        let end = start
            .checked_add(header.length)
            .filter(|end| *end <= self.block.len())
            .ok_or_else(|| {
                Error::protocol(format!(
                    "frame at offset {} claims {} bytes but only {} remain",
                    offset,
                    header.length,
                    self.block.len() - start
                ))
            })?;
        Ok(Frame {
            offset,
            header,
            payload: &self.block[start..end],
        })
    }
}

impl<'a> Iterator for FrameIter<'a> {
    type Item = Result<Frame<'a>>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.offset >= self.block.len() {
            return None;
        }
        match self.read_frame() {
            Ok(frame) => {
                // The last frame's padding may be cut off at the block end
                self.offset = (self.offset + aligned_frame_length(frame.header.length))
                    .min(self.block.len());
                Some(Ok(frame))
            }
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}
