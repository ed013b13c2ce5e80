//! RPMsg transport
//!
//! A `Transport` groups the two virtqueues needed for two-way communication
//! with the host:
//! - `tx` ("virtqueue0"): coprocessor -> host
//! - `rx` ("virtqueue1"): host -> coprocessor
//!
//! Any number of logical channels can share one transport; they are told
//! apart only by the addresses in each message header.
//!
//! The transport does no locking. Callers sharing it across contexts must
//! serialize access per direction (see [`crate::shared::SharedTransport`]).

use crate::config::{ConfigError, LinkConfig};
use crate::error::{Delivery, Error, Result, Status, RPMSG_SUCCESS};
use crate::message::{self, Frame, Header, Message, HEADER_SIZE};
use crate::virtqueue::{Lease, Notify, OnDrop, Virtqueue};

/// Addressing and length of a message copied out by [`Transport::receive`]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Received {
    /// Endpoint the message originated from
    pub src: u32,
    /// Endpoint the message was sent to (selects the local channel)
    pub dst: u32,
    /// Payload length in bytes
    pub len: usize,
}

impl Status for Received {
    fn status(&self) -> i16 {
        RPMSG_SUCCESS
    }
}

/// Two-way transport over a pair of virtqueues
pub struct Transport<Tx: Virtqueue, Rx: Virtqueue> {
    tx: Tx,
    rx: Rx,
    config: LinkConfig,
}

impl<Tx: Virtqueue, Rx: Virtqueue> Transport<Tx, Rx> {
    /// Create a transport with the default link configuration
    pub fn new(tx: Tx, rx: Rx) -> Self {
        Self {
            tx,
            rx,
            config: LinkConfig::new(),
        }
    }

    /// Create a transport with an explicit link configuration
    pub fn with_config(tx: Tx, rx: Rx, config: LinkConfig) -> core::result::Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { tx, rx, config })
    }

    #[inline]
    pub fn config(&self) -> &LinkConfig {
        &self.config
    }

    /// Outbound (coprocessor -> host) queue
    #[inline]
    pub fn tx(&self) -> &Tx {
        &self.tx
    }

    /// Inbound (host -> coprocessor) queue
    #[inline]
    pub fn rx(&self) -> &Rx {
        &self.rx
    }

    pub fn tx_mut(&mut self) -> &mut Tx {
        &mut self.tx
    }

    pub fn rx_mut(&mut self) -> &mut Rx {
        &mut self.rx
    }

    /// Borrow both queues at once
    pub fn queues_mut(&mut self) -> (&mut Tx, &mut Rx) {
        (&mut self.tx, &mut self.rx)
    }

    /// Split back into the underlying queues
    pub fn into_parts(self) -> (Tx, Rx) {
        (self.tx, self.rx)
    }

    /// Send a message from `src` to `dst`
    ///
    /// `Delivery::NoKick` still means the message was queued; the host
    /// simply did not ask to be interrupted.
    pub fn send(&mut self, src: u32, dst: u32, payload: &[u8]) -> Result<Delivery> {
        send_on(&mut self.tx, &self.config, src, dst, payload)
    }

    /// Receive one message, copying its payload into `data`
    ///
    /// If `data` is too small the message is left queued and
    /// `PayloadTooLarge` is returned. A frame that overruns the link's
    /// buffer size is consumed and reported as `MalformedHeader`.
    pub fn receive(&mut self, data: &mut [u8]) -> Result<Received> {
        receive_on(&mut self.rx, &self.config, data)
    }

    /// Receive one message into owned storage
    pub fn receive_message(&mut self) -> Result<Message> {
        receive_with_on(&mut self.rx, &self.config, |frame| Message::from_frame(&frame))?
    }

    /// Receive one message and hand it to `f` without copying
    ///
    /// The buffer goes back to the host once `f` returns.
    pub fn receive_with<R>(&mut self, f: impl FnOnce(Frame<'_>) -> R) -> Result<R> {
        receive_with_on(&mut self.rx, &self.config, f)
    }
}

/// Send path over a single outbound queue
pub(crate) fn send_on<Q: Virtqueue + ?Sized>(
    queue: &mut Q,
    config: &LinkConfig,
    src: u32,
    dst: u32,
    payload: &[u8],
) -> Result<Delivery> {
    // Reject before touching the ring
    if payload.len() > config.max_payload() {
        return Err(Error::PayloadTooLarge);
    }

    let mut lease = Lease::acquire(queue, OnDrop::Return)?;

    let frame_len = {
        let capacity = lease.capacity().min(config.buf_size);
        let buf = lease.bytes_mut()?;
        let limit = capacity.min(buf.len());
        // On failure the lease drops and the buffer goes back unwritten
        message::encode(&mut buf[..limit], src, dst, payload)?
    };

    let notify = lease.submit(frame_len as u32)?;
    Ok(match notify {
        Notify::Kicked => Delivery::Kicked,
        Notify::Suppressed => Delivery::NoKick,
    })
}

/// Receive path over a single inbound queue, copying into `data`
pub(crate) fn receive_on<Q: Virtqueue + ?Sized>(
    queue: &mut Q,
    config: &LinkConfig,
    data: &mut [u8],
) -> Result<Received> {
    let lease = Lease::acquire(queue, OnDrop::Consume)?;

    let received = {
        let buf = lease.bytes()?;
        // Frames never exceed the link buffer size, whatever the host posted
        let limit = lease.capacity().min(config.buf_size).min(buf.len());
        let frame = match message::decode(&buf[..limit]) {
            Ok(frame) => frame,
            Err(err) => {
                log::warn!("dropping buffer {}: {}", lease.head(), err);
                return Err(err);
            }
        };

        if frame.len() > data.len() {
            None
        } else {
            data[..frame.len()].copy_from_slice(frame.payload);
            Some(Received {
                src: frame.src,
                dst: frame.dst,
                len: frame.len(),
            })
        }
    };

    match received {
        Some(received) => {
            lease.submit(HEADER_SIZE as u32 + received.len as u32)?;
            Ok(received)
        }
        None => {
            // Leave the message queued for a retry with more room
            lease.give_back();
            Err(Error::PayloadTooLarge)
        }
    }
}

/// Receive path handing the borrowed frame to `f`
pub(crate) fn receive_with_on<Q, R>(
    queue: &mut Q,
    config: &LinkConfig,
    f: impl FnOnce(Frame<'_>) -> R,
) -> Result<R>
where
    Q: Virtqueue + ?Sized,
{
    let lease = Lease::acquire(queue, OnDrop::Consume)?;

    let (result, used) = {
        let buf = lease.bytes()?;
        let limit = lease.capacity().min(config.buf_size).min(buf.len());
        let frame = match message::decode(&buf[..limit]) {
            Ok(frame) => frame,
            Err(err) => {
                log::warn!("dropping buffer {}: {}", lease.head(), err);
                return Err(err);
            }
        };
        let used = Header::new(frame.src, frame.dst, frame.len() as u16).frame_len();
        (f(frame), used)
    };

    lease.submit(used as u32)?;
    Ok(result)
}
