//! Device-side (coprocessor) vring

use core::ptr::NonNull;
use core::sync::atomic::{fence, Ordering};

use super::{AvailFlags, BufferWindow, Doorbell, RingMem, UsedElem, UsedFlags, VringLayout};
use crate::virtqueue::{AvailBuf, Head, Notify, QueueError, Virtqueue};

/// Device side of one split vring
///
/// Consumes buffers from the avail ring and returns them on the used ring,
/// ringing `D` when the host has not suppressed interrupts.
pub struct Vring<D: Doorbell> {
    mem: RingMem,
    window: BufferWindow,
    doorbell: D,
    /// Next avail ring entry to consume
    last_avail_idx: u16,
    /// Most recent acquisition not yet returned
    in_flight: Option<Head>,
}

// SAFETY: the ring only holds pointers into shared memory that stays mapped
// for the link's lifetime; moving the handle between contexts is fine as long
// as one context uses it at a time, which `&mut self` enforces.
unsafe impl<D: Doorbell + Send> Send for Vring<D> {}

impl<D: Doorbell> Vring<D> {
    /// Attach to a vring the host has already initialized
    ///
    /// # Safety
    /// - `base` must point to `layout.size()` bytes of ring memory, 8-byte
    ///   aligned, that outlive the returned value
    /// - every buffer the host posts must lie inside `window`
    /// - no other device-side handle may exist for the same ring
    pub unsafe fn new(base: NonNull<u8>, layout: VringLayout, window: BufferWindow, doorbell: D) -> Self {
        Self {
            mem: RingMem::new(base, layout),
            window,
            doorbell,
            last_avail_idx: 0,
            in_flight: None,
        }
    }

    #[inline]
    pub fn layout(&self) -> &VringLayout {
        self.mem.layout()
    }

    #[inline]
    pub fn last_avail_idx(&self) -> u16 {
        self.last_avail_idx
    }

    pub fn doorbell(&self) -> &D {
        &self.doorbell
    }

    /// Ask the host not to notify us when it posts buffers
    pub fn suppress_notifications(&mut self, suppress: bool) {
        let flags = if suppress { UsedFlags::NO_NOTIFY } else { UsedFlags::empty() };
        self.mem.set_used_flags(flags);
    }

    /// Ring the doorbell unless the host suppressed interrupts
    pub fn kick(&mut self) -> Notify {
        // Used index must be visible before the host reads our flags decision
        fence(Ordering::SeqCst);
        if self.mem.avail_flags().contains(AvailFlags::NO_INTERRUPT) {
            log::trace!("kick suppressed by host");
            return Notify::Suppressed;
        }
        self.doorbell.ring();
        Notify::Kicked
    }

    fn check_head(&self, head: Head) -> Result<(), QueueError> {
        if head >= self.mem.layout().num() {
            return Err(QueueError::InvalidHead);
        }
        Ok(())
    }

    fn locate(&self, head: Head) -> Result<(NonNull<u8>, usize), QueueError> {
        self.check_head(head)?;
        let desc = self.mem.desc(head);
        let ptr = self
            .window
            .translate(desc.addr, desc.len)
            .ok_or(QueueError::InvalidHead)?;
        Ok((ptr, desc.len as usize))
    }
}

impl<D: Doorbell> Virtqueue for Vring<D> {
    fn size(&self) -> u16 {
        self.mem.layout().num()
    }

    fn pending(&self) -> u16 {
        self.mem.avail_idx().wrapping_sub(self.last_avail_idx)
    }

    fn acquire_available(&mut self) -> Result<AvailBuf, QueueError> {
        let avail_idx = self.mem.avail_idx();
        if avail_idx == self.last_avail_idx {
            return Err(QueueError::Empty);
        }
        // Ring entries must be read after the index that published them
        fence(Ordering::Acquire);

        if avail_idx.wrapping_sub(self.last_avail_idx) > self.size() {
            log::warn!(
                "avail idx {} ran ahead of {} on a {}-entry ring",
                avail_idx,
                self.last_avail_idx,
                self.size()
            );
            return Err(QueueError::InvalidHead);
        }

        let head = self.mem.avail_ring(self.last_avail_idx);
        let (_, len) = self.locate(head).map_err(|err| {
            log::warn!("avail entry {} holds bad head {}", self.last_avail_idx, head);
            err
        })?;

        self.last_avail_idx = self.last_avail_idx.wrapping_add(1);
        self.in_flight = Some(head);

        Ok(AvailBuf {
            head,
            len: len as u32,
        })
    }

    fn buffer(&self, head: Head) -> Result<&[u8], QueueError> {
        let (ptr, len) = self.locate(head)?;
        // SAFETY: `locate` checked the range against the shared window
        Ok(unsafe { core::slice::from_raw_parts(ptr.as_ptr(), len) })
    }

    fn buffer_mut(&mut self, head: Head) -> Result<&mut [u8], QueueError> {
        let (ptr, len) = self.locate(head)?;
        // SAFETY: as above; the host does not touch a buffer while it sits
        // between the avail and used rings
        Ok(unsafe { core::slice::from_raw_parts_mut(ptr.as_ptr(), len) })
    }

    fn submit_used(&mut self, head: Head, len: u32) -> Result<Notify, QueueError> {
        self.check_head(head)?;

        let used_idx = self.mem.used_idx();
        self.mem.set_used_ring(
            used_idx,
            UsedElem {
                id: head as u32,
                len,
            },
        );
        // Element before index
        fence(Ordering::Release);
        self.mem.set_used_idx(used_idx.wrapping_add(1));

        if self.in_flight == Some(head) {
            self.in_flight = None;
        }

        Ok(self.kick())
    }

    fn release_unused(&mut self, head: Head) {
        if self.in_flight != Some(head) {
            log::warn!("release of head {} which is not the latest acquisition", head);
            return;
        }
        self.in_flight = None;
        self.last_avail_idx = self.last_avail_idx.wrapping_sub(1);
    }
}
