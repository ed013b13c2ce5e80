//! Ring-queue contract
//!
//! The transport never touches descriptor tables directly. It talks to one
//! `Virtqueue` per direction, which lends out fixed-size buffers by head
//! index and takes them back as used.
//!
//! Buffers are borrowed through a [`Lease`], which guarantees the slot goes
//! back to the ring exactly once, on every exit path.

use crate::error::Error;

/// Descriptor-table index identifying one buffer slot
pub type Head = u16;

/// A buffer the peer has offered
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AvailBuf {
    /// Head index of the descriptor
    pub head: Head,
    /// Buffer capacity in bytes
    pub len: u32,
}

/// Ring-level failures
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum QueueError {
    /// Nothing on offer right now
    Empty,
    /// Head index outside the descriptor table, or a descriptor that
    /// points outside shared memory
    InvalidHead,
}

impl From<QueueError> for Error {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Empty => Error::NoBufferAvailable,
            QueueError::InvalidHead => Error::InvalidHead,
        }
    }
}

/// Whether submitting a used buffer notified the peer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Notify {
    /// Doorbell rung
    Kicked,
    /// Peer asked not to be interrupted
    Suppressed,
}

/// One direction of a shared-memory ring
///
/// Implementations must not block: `acquire_available` either hands out a
/// buffer immediately or reports `QueueError::Empty`.
pub trait Virtqueue {
    /// Number of descriptors in the table
    fn size(&self) -> u16;

    /// Buffers currently on offer from the peer
    fn pending(&self) -> u16;

    /// Take the next available buffer
    ///
    /// On error the ring state is left untouched.
    fn acquire_available(&mut self) -> Result<AvailBuf, QueueError>;

    /// Borrow the bytes of an acquired buffer
    fn buffer(&self, head: Head) -> Result<&[u8], QueueError>;

    /// Mutably borrow the bytes of an acquired buffer
    fn buffer_mut(&mut self, head: Head) -> Result<&mut [u8], QueueError>;

    /// Return a buffer to the peer as used, `len` bytes written
    fn submit_used(&mut self, head: Head, len: u32) -> Result<Notify, QueueError>;

    /// Undo the most recent `acquire_available` for a buffer that was
    /// never written; the peer sees no change.
    fn release_unused(&mut self, head: Head);
}

impl<Q: Virtqueue + ?Sized> Virtqueue for &mut Q {
    fn size(&self) -> u16 {
        (**self).size()
    }

    fn pending(&self) -> u16 {
        (**self).pending()
    }

    fn acquire_available(&mut self) -> Result<AvailBuf, QueueError> {
        (**self).acquire_available()
    }

    fn buffer(&self, head: Head) -> Result<&[u8], QueueError> {
        (**self).buffer(head)
    }

    fn buffer_mut(&mut self, head: Head) -> Result<&mut [u8], QueueError> {
        (**self).buffer_mut(head)
    }

    fn submit_used(&mut self, head: Head, len: u32) -> Result<Notify, QueueError> {
        (**self).submit_used(head, len)
    }

    fn release_unused(&mut self, head: Head) {
        (**self).release_unused(head)
    }
}

/// What happens to a lease that is dropped without being settled
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OnDrop {
    /// Mark the buffer used (inbound: the message is consumed)
    Consume,
    /// Hand the buffer back untouched (outbound: nothing was sent)
    Return,
}

/// A buffer on loan from a `Virtqueue`
///
/// Not `Copy`/`Clone`: the slot is settled once, either explicitly via
/// [`Lease::submit`] / [`Lease::give_back`], or by `Drop` according to
/// the lease's [`OnDrop`] policy.
pub struct Lease<'q, Q: Virtqueue + ?Sized> {
    queue: &'q mut Q,
    buf: AvailBuf,
    on_drop: OnDrop,
    settled: bool,
}

impl<'q, Q: Virtqueue + ?Sized> Lease<'q, Q> {
    /// Acquire the next available buffer
    pub fn acquire(queue: &'q mut Q, on_drop: OnDrop) -> Result<Self, Error> {
        let buf = queue.acquire_available()?;
        log::trace!("acquired head {} ({} bytes)", buf.head, buf.len);
        Ok(Self {
            queue,
            buf,
            on_drop,
            settled: false,
        })
    }

    #[inline]
    pub fn head(&self) -> Head {
        self.buf.head
    }

    /// Capacity of the leased buffer
    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.len as usize
    }

    pub fn bytes(&self) -> Result<&[u8], Error> {
        Ok(self.queue.buffer(self.buf.head)?)
    }

    pub fn bytes_mut(&mut self) -> Result<&mut [u8], Error> {
        Ok(self.queue.buffer_mut(self.buf.head)?)
    }

    /// Return the buffer as used with `len` valid bytes
    pub fn submit(mut self, len: u32) -> Result<Notify, Error> {
        self.settled = true;
        match self.queue.submit_used(self.buf.head, len) {
            Ok(notify) => {
                log::trace!("submitted head {} ({} bytes, {:?})", self.buf.head, len, notify);
                Ok(notify)
            }
            Err(err) => {
                log::warn!("failed to submit head {}: {:?}", self.buf.head, err);
                self.queue.release_unused(self.buf.head);
                Err(err.into())
            }
        }
    }

    /// Hand the buffer back without consuming it
    pub fn give_back(mut self) {
        self.settled = true;
        self.queue.release_unused(self.buf.head);
    }
}

impl<Q: Virtqueue + ?Sized> Drop for Lease<'_, Q> {
    fn drop(&mut self) {
        if self.settled {
            return;
        }
        match self.on_drop {
            OnDrop::Consume => {
                if let Err(err) = self.queue.submit_used(self.buf.head, self.buf.len) {
                    log::warn!("failed to return head {}: {:?}", self.buf.head, err);
                }
            }
            OnDrop::Return => self.queue.release_unused(self.buf.head),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Single-slot queue that counts settlements
    struct OneSlot {
        offered: bool,
        data: [u8; 8],
        used: u32,
        returned: u32,
        reject_submit: bool,
    }

    impl OneSlot {
        fn new() -> Self {
            Self { offered: true, data: [0; 8], used: 0, returned: 0, reject_submit: false }
        }
    }

    impl Virtqueue for OneSlot {
        fn size(&self) -> u16 {
            1
        }

        fn pending(&self) -> u16 {
            self.offered as u16
        }

        fn acquire_available(&mut self) -> Result<AvailBuf, QueueError> {
            if !self.offered {
                return Err(QueueError::Empty);
            }
            self.offered = false;
            Ok(AvailBuf { head: 0, len: 8 })
        }

        fn buffer(&self, _head: Head) -> Result<&[u8], QueueError> {
            Ok(&self.data)
        }

        fn buffer_mut(&mut self, _head: Head) -> Result<&mut [u8], QueueError> {
            Ok(&mut self.data)
        }

        fn submit_used(&mut self, _head: Head, _len: u32) -> Result<Notify, QueueError> {
            if self.reject_submit {
                return Err(QueueError::InvalidHead);
            }
            self.used += 1;
            Ok(Notify::Kicked)
        }

        fn release_unused(&mut self, _head: Head) {
            self.returned += 1;
            self.offered = true;
        }
    }

    #[test]
    fn test_drop_consumes_once() {
        let mut q = OneSlot::new();
        {
            let _lease = Lease::acquire(&mut q, OnDrop::Consume).unwrap();
        }
        assert_eq!(q.used, 1);
        assert_eq!(q.returned, 0);
    }

    #[test]
    fn test_submit_is_not_repeated_on_drop() {
        let mut q = OneSlot::new();
        let lease = Lease::acquire(&mut q, OnDrop::Consume).unwrap();
        assert_eq!(lease.submit(4), Ok(Notify::Kicked));
        assert_eq!(q.used, 1);
    }

    #[test]
    fn test_failed_submit_hands_buffer_back() {
        let mut q = OneSlot::new();
        q.reject_submit = true;
        let lease = Lease::acquire(&mut q, OnDrop::Consume).unwrap();
        assert_eq!(lease.submit(4), Err(Error::InvalidHead));
        assert_eq!(q.used, 0);
        assert_eq!(q.returned, 1);
        assert_eq!(q.pending(), 1);
    }

    #[test]
    fn test_drop_returns_unwritten_buffer() {
        let mut q = OneSlot::new();
        {
            let _lease = Lease::acquire(&mut q, OnDrop::Return).unwrap();
        }
        assert_eq!(q.used, 0);
        assert_eq!(q.returned, 1);
        assert_eq!(q.pending(), 1);
    }

    #[test]
    fn test_empty_queue_maps_to_no_buffer() {
        let mut q = OneSlot::new();
        q.offered = false;
        assert!(matches!(
            Lease::acquire(&mut q, OnDrop::Consume),
            Err(Error::NoBufferAvailable)
        ));
    }
}
