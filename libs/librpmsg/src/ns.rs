//! Name service announcements
//!
//! Channels exist only as a convention between the two ends. The coprocessor
//! tells the host that a channel was created or torn down by sending a
//! fixed-layout record to the host's name-service endpoint. The channel
//! name is what the host uses to bind a driver, so it must match exactly.
//!
//! Announcements are fire-and-forget: no acknowledgement comes back.

use crate::error::{Delivery, Error, Result};
use crate::transport::{send_on, Transport};
use crate::virtqueue::Virtqueue;

/// Reserved address of the host's name-service endpoint
pub const RPMSG_NS_ADDR: u32 = 53;

/// Size of the channel name and description fields
pub const RPMSG_NAME_SIZE: usize = 32;

/// Size of an encoded announcement
pub const NS_MSG_SIZE: usize = 2 * RPMSG_NAME_SIZE + 8;

/// Fixed-capacity text field; one byte is always kept for the terminator
pub type NameField = heapless::String<RPMSG_NAME_SIZE>;

/// Whether a channel is being created or destroyed
#[repr(u32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum NsIntent {
    Create = 0,
    Destroy = 1,
}

impl NsIntent {
    pub const fn from_raw(value: u32) -> Option<Self> {
        match value {
            0 => Some(Self::Create),
            1 => Some(Self::Destroy),
            _ => None,
        }
    }
}

/// Name service announcement payload
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NsAnnouncement {
    /// Channel name, used by the host to match a driver
    pub name: NameField,
    /// Human-readable description
    pub desc: NameField,
    /// Local address the channel's messages originate from
    pub addr: u32,
    pub intent: NsIntent,
}

impl NsAnnouncement {
    /// Build an announcement
    ///
    /// Fails with `PayloadTooLarge` if `name` or `desc` does not fit in its
    /// field with a terminating NUL.
    pub fn new(intent: NsIntent, name: &str, desc: &str, addr: u32) -> Result<Self> {
        Ok(Self {
            name: field(name)?,
            desc: field(desc)?,
            addr,
            intent,
        })
    }

    /// Build an announcement, cutting long text at a char boundary
    pub fn truncated(intent: NsIntent, name: &str, desc: &str, addr: u32) -> Self {
        Self {
            name: field_truncated(name),
            desc: field_truncated(desc),
            addr,
            intent,
        }
    }

    /// Encode into the wire layout
    pub fn to_bytes(&self) -> [u8; NS_MSG_SIZE] {
        let mut out = [0u8; NS_MSG_SIZE];
        out[..self.name.len()].copy_from_slice(self.name.as_bytes());
        out[RPMSG_NAME_SIZE..RPMSG_NAME_SIZE + self.desc.len()]
            .copy_from_slice(self.desc.as_bytes());
        out[64..68].copy_from_slice(&self.addr.to_le_bytes());
        out[68..72].copy_from_slice(&(self.intent as u32).to_le_bytes());
        out
    }

    /// Decode from the wire layout
    pub fn from_bytes(buf: &[u8]) -> Result<Self> {
        if buf.len() != NS_MSG_SIZE {
            return Err(Error::MalformedHeader);
        }

        let addr = u32::from_le_bytes([buf[64], buf[65], buf[66], buf[67]]);
        let flags = u32::from_le_bytes([buf[68], buf[69], buf[70], buf[71]]);
        let intent = NsIntent::from_raw(flags).ok_or(Error::MalformedHeader)?;

        Ok(Self {
            name: parse_field(&buf[..RPMSG_NAME_SIZE])?,
            desc: parse_field(&buf[RPMSG_NAME_SIZE..2 * RPMSG_NAME_SIZE])?,
            addr,
            intent,
        })
    }
}

fn field(text: &str) -> Result<NameField> {
    if text.len() >= RPMSG_NAME_SIZE {
        return Err(Error::PayloadTooLarge);
    }
    let mut out = NameField::new();
    out.push_str(text).map_err(|_| Error::PayloadTooLarge)?;
    Ok(out)
}

fn field_truncated(text: &str) -> NameField {
    let mut end = text.len().min(RPMSG_NAME_SIZE - 1);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let mut out = NameField::new();
    // Fits by construction
    let _ = out.push_str(&text[..end]);
    out
}

fn parse_field(raw: &[u8]) -> Result<NameField> {
    let end = raw.iter().position(|&b| b == 0).ok_or(Error::MalformedHeader)?;
    let text = core::str::from_utf8(&raw[..end]).map_err(|_| Error::MalformedHeader)?;
    field(text)
}

impl<Tx: Virtqueue, Rx: Virtqueue> Transport<Tx, Rx> {
    /// Announce creation or destruction of a channel to the host
    ///
    /// The announcement is sent from `addr` to the name-service endpoint.
    /// Every outcome of [`Transport::send`] is passed through unchanged.
    pub fn announce_channel(
        &mut self,
        intent: NsIntent,
        name: &str,
        desc: &str,
        addr: u32,
    ) -> Result<Delivery> {
        let announcement = NsAnnouncement::new(intent, name, desc, addr)?;
        self.announce(&announcement)
    }

    /// Send a prepared announcement
    pub fn announce(&mut self, announcement: &NsAnnouncement) -> Result<Delivery> {
        log::debug!(
            "ns {:?} '{}' at addr {}",
            announcement.intent,
            announcement.name,
            announcement.addr
        );
        let config = *self.config();
        send_on(
            self.tx_mut(),
            &config,
            announcement.addr,
            config.ns_addr,
            &announcement.to_bytes(),
        )
    }
}
