//! Transport shared between execution contexts
//!
//! `SharedTransport` wraps each direction in its own spin lock, so a send
//! never waits on a receive and vice versa. Each lock is held for exactly
//! one acquire/fill/submit sequence.

use spin::Mutex;

use crate::config::{ConfigError, LinkConfig};
use crate::error::{Delivery, Result};
use crate::message::{Frame, Message};
use crate::ns::{NsAnnouncement, NsIntent};
use crate::transport::{receive_on, receive_with_on, send_on, Received};
use crate::virtqueue::Virtqueue;

/// Transport usable through `&self`
pub struct SharedTransport<Tx: Virtqueue, Rx: Virtqueue> {
    tx: Mutex<Tx>,
    rx: Mutex<Rx>,
    config: LinkConfig,
}

impl<Tx: Virtqueue, Rx: Virtqueue> SharedTransport<Tx, Rx> {
    pub fn new(tx: Tx, rx: Rx) -> Self {
        Self {
            tx: Mutex::new(tx),
            rx: Mutex::new(rx),
            config: LinkConfig::new(),
        }
    }

    pub fn with_config(tx: Tx, rx: Rx, config: LinkConfig) -> core::result::Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            tx: Mutex::new(tx),
            rx: Mutex::new(rx),
            config,
        })
    }

    #[inline]
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// See [`Transport::send`](crate::Transport::send)
    pub fn send(&self, src: u32, dst: u32, payload: &[u8]) -> Result<Delivery> {
        send_on(&mut *self.tx.lock(), &self.config, src, dst, payload)
    }

    /// See [`Transport::receive`](crate::Transport::receive)
    pub fn receive(&self, data: &mut [u8]) -> Result<Received> {
        receive_on(&mut *self.rx.lock(), &self.config, data)
    }

    pub fn receive_message(&self) -> Result<Message> {
        receive_with_on(&mut *self.rx.lock(), &self.config, |frame| Message::from_frame(&frame))?
    }

    /// `f` runs with the inbound lock held; keep it short
    pub fn receive_with<R>(&self, f: impl FnOnce(Frame<'_>) -> R) -> Result<R> {
        receive_with_on(&mut *self.rx.lock(), &self.config, f)
    }

    /// See [`Transport::announce_channel`](crate::Transport::announce_channel)
    pub fn announce_channel(&self, intent: NsIntent, name: &str, desc: &str, addr: u32) -> Result<Delivery> {
        let announcement = NsAnnouncement::new(intent, name, desc, addr)?;
        log::debug!("ns {:?} '{}' at addr {}", intent, announcement.name, addr);
        self.send(addr, self.config.ns_addr, &announcement.to_bytes())
    }

    pub fn into_parts(self) -> (Tx, Rx) {
        (self.tx.into_inner(), self.rx.into_inner())
    }
}
