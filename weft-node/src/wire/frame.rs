//! Stream framing.
//!
//! A frame is a `u16` message type, a `u16` payload length, and the payload
//! bytes. Unknown trailing payload bytes are ignored by [`Framed::from_frame`]
//! implementations, so newer nodes can append optional fields without
//! breaking older ones.
use std::io;

use byteorder::{NetworkEndian, ReadBytesExt, WriteBytesExt};

use crate::wire::{Error, Size};

/// Messages that can be framed on a reliable byte stream.
pub trait Framed: Sized {
    /// The message's frame type id.
    fn frame_type(&self) -> u16;
    /// Encode the frame payload.
    fn frame_payload(&self) -> Vec<u8>;
    /// Decode a message from a frame. Trailing unknown payload bytes must be
    /// tolerated.
    fn from_frame(frame_type: u16, payload: &[u8]) -> Result<Self, Error>;
}

/// Write a single frame to the given stream. Does not flush.
pub fn write_frame<W: io::Write, M: Framed>(writer: &mut W, msg: &M) -> Result<usize, Error> {
    let payload = msg.frame_payload();

    if payload.len() > Size::MAX as usize {
        return Err(Error::FrameTooLarge);
    }
    writer.write_u16::<NetworkEndian>(msg.frame_type())?;
    writer.write_u16::<NetworkEndian>(payload.len() as Size)?;
    writer.write_all(&payload)?;

    Ok(4 + payload.len())
}

/// Read a single frame from the given stream, blocking until one is
/// available. A clean end-of-stream surfaces as an `UnexpectedEof` I/O
/// error, which [`Error::is_eof`] recognizes.
pub fn read_frame<R: io::Read, M: Framed>(reader: &mut R) -> Result<M, Error> {
    let frame_type = reader.read_u16::<NetworkEndian>()?;
    let len = reader.read_u16::<NetworkEndian>()? as usize;
    let mut payload = vec![0; len];

    reader.read_exact(&mut payload)?;

    M::from_frame(frame_type, &payload)
}
