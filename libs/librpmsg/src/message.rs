//! RPMsg message framing
//!
//! Every buffer starts with a 16-byte little-endian header followed by the
//! payload. The layout matches the host's rpmsg bus driver:
//!
//! ```text
//! 0        4        8          12     14      16
//! +--------+--------+----------+------+-------+-----------+
//! |  src   |  dst   | reserved | len  | flags | payload.. |
//! +--------+--------+----------+------+-------+-----------+
//! ```

use crate::error::{Error, Result};

/// Maximum size of a buffer (including the header)
pub const RPMSG_BUF_SIZE: usize = 512;

/// Size of the wire header
pub const HEADER_SIZE: usize = 16;

/// Largest payload that fits in one buffer
pub const MAX_PAYLOAD: usize = RPMSG_BUF_SIZE - HEADER_SIZE;

/// Message header
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Header {
    /// Source endpoint address
    pub src: u32,
    /// Destination endpoint address
    pub dst: u32,
    /// Reserved (written as zero)
    pub reserved: u32,
    /// Payload length in bytes
    pub len: u16,
    /// Flags (written as zero)
    pub flags: u16,
}

impl Header {
    /// Header for a `len`-byte payload
    pub const fn new(src: u32, dst: u32, len: u16) -> Self {
        Self {
            src,
            dst,
            reserved: 0,
            len,
            flags: 0,
        }
    }

    /// Parse and validate the header at the start of `buf`
    ///
    /// Fails with `MalformedHeader` if `buf` cannot hold a header, or the
    /// length field runs past the end of `buf`.
    pub fn read_from(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_SIZE {
            return Err(Error::MalformedHeader);
        }

        let header = Self {
            src: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            dst: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
            reserved: u32::from_le_bytes([buf[8], buf[9], buf[10], buf[11]]),
            len: u16::from_le_bytes([buf[12], buf[13]]),
            flags: u16::from_le_bytes([buf[14], buf[15]]),
        };

        if header.len as usize > buf.len() - HEADER_SIZE {
            return Err(Error::MalformedHeader);
        }

        Ok(header)
    }

    /// Serialize into the first `HEADER_SIZE` bytes of `buf`
    pub fn write_to(&self, buf: &mut [u8]) -> Result<()> {
        let out = buf
            .get_mut(..HEADER_SIZE)
            .ok_or(Error::PayloadTooLarge)?;
        out[0..4].copy_from_slice(&self.src.to_le_bytes());
        out[4..8].copy_from_slice(&self.dst.to_le_bytes());
        out[8..12].copy_from_slice(&self.reserved.to_le_bytes());
        out[12..14].copy_from_slice(&self.len.to_le_bytes());
        out[14..16].copy_from_slice(&self.flags.to_le_bytes());
        Ok(())
    }

    /// Total frame length (header + payload)
    #[inline]
    pub const fn frame_len(&self) -> usize {
        HEADER_SIZE + self.len as usize
    }
}

/// A decoded message borrowed from a buffer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Frame<'a> {
    pub src: u32,
    pub dst: u32,
    pub payload: &'a [u8],
}

impl Frame<'_> {
    #[inline]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}

/// Write a framed message into `buf`
///
/// Returns the frame length. Nothing is written if the frame does not fit.
pub fn encode(buf: &mut [u8], src: u32, dst: u32, payload: &[u8]) -> Result<usize> {
    let frame_len = HEADER_SIZE + payload.len();
    if frame_len > buf.len() || payload.len() > u16::MAX as usize {
        return Err(Error::PayloadTooLarge);
    }

    let header = Header::new(src, dst, payload.len() as u16);
    header.write_to(buf)?;
    buf[HEADER_SIZE..frame_len].copy_from_slice(payload);

    Ok(frame_len)
}

/// Parse a framed message out of `buf`
pub fn decode(buf: &[u8]) -> Result<Frame<'_>> {
    let header = Header::read_from(buf)?;
    Ok(Frame {
        src: header.src,
        dst: header.dst,
        payload: &buf[HEADER_SIZE..header.frame_len()],
    })
}

/// An owned copy of a received message
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Message {
    /// Source endpoint address
    pub src: u32,
    /// Destination endpoint address
    pub dst: u32,
    /// Payload bytes
    pub payload: heapless::Vec<u8, MAX_PAYLOAD>,
}

impl Message {
    /// Copy a frame into owned storage
    pub fn from_frame(frame: &Frame<'_>) -> Result<Self> {
        let payload =
            heapless::Vec::from_slice(frame.payload).map_err(|_| Error::PayloadTooLarge)?;
        Ok(Self {
            src: frame.src,
            dst: frame.dst,
            payload,
        })
    }

    #[inline]
    pub fn as_slice(&self) -> &[u8] {
        &self.payload
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.payload.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
