//! Driver-side (host) vring
//!
//! The real host side lives in the host's virtio/rpmsg drivers. This is a
//! minimal equivalent for host tooling and tests: it initializes the ring,
//! posts buffers and reaps used ones.

use core::ptr::NonNull;
use core::sync::atomic::{fence, Ordering};

use super::{AvailFlags, BufferWindow, Desc, DescFlags, RingMem, UsedElem, UsedFlags, VringLayout};
use crate::virtqueue::Head;

/// Errors posting a buffer
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PostError {
    /// Every descriptor is already with the device
    Full,
    /// Head index outside the descriptor table
    InvalidHead,
    /// Buffer does not lie inside the shared window
    OutOfWindow,
}

/// Driver side of one split vring
pub struct HostRing {
    mem: RingMem,
    window: BufferWindow,
    /// Shadow of avail.idx
    avail_idx: u16,
    /// Next used ring entry to reap
    last_used_idx: u16,
}

// SAFETY: see `Vring`
unsafe impl Send for HostRing {}

impl HostRing {
    /// Initialize (zero) the ring memory and take the driver role
    ///
    /// # Safety
    /// `base` must point to `layout.size()` bytes, 8-byte aligned, that
    /// outlive the returned value and any `Vring` attached to them.
    pub unsafe fn init(base: NonNull<u8>, layout: VringLayout, window: BufferWindow) -> Self {
        let mem = RingMem::new(base, layout);
        mem.clear();
        Self {
            mem,
            window,
            avail_idx: 0,
            last_used_idx: 0,
        }
    }

    #[inline]
    pub fn layout(&self) -> &VringLayout {
        self.mem.layout()
    }

    /// Buffers handed to the device and not yet reaped
    #[inline]
    pub fn outstanding(&self) -> u16 {
        self.avail_idx.wrapping_sub(self.last_used_idx)
    }

    /// Suppress or allow device interrupts on used buffers
    pub fn set_interrupts(&mut self, enabled: bool) {
        let flags = if enabled { AvailFlags::empty() } else { AvailFlags::NO_INTERRUPT };
        self.mem.set_avail_flags(flags);
    }

    /// Whether the device wants to hear about newly posted buffers
    pub fn device_wants_notify(&self) -> bool {
        !self.mem.used_flags().contains(UsedFlags::NO_NOTIFY)
    }

    /// Point descriptor `head` at `[addr, addr + len)` and make it available
    pub fn post(&mut self, head: Head, addr: u64, len: u32, flags: DescFlags) -> Result<(), PostError> {
        if self.outstanding() >= self.layout().num() {
            return Err(PostError::Full);
        }
        self.stage(head, addr, len, flags)?;
        self.publish_head(head);
        Ok(())
    }

    /// Write descriptor `head` without publishing it
    ///
    /// Lets the host fill the buffer through [`HostRing::buffer_mut`] before
    /// the device can see it.
    pub fn stage(&mut self, head: Head, addr: u64, len: u32, flags: DescFlags) -> Result<(), PostError> {
        if head >= self.layout().num() {
            return Err(PostError::InvalidHead);
        }
        if self.window.translate(addr, len).is_none() {
            return Err(PostError::OutOfWindow);
        }

        self.mem.set_desc(
            head,
            Desc {
                addr,
                len,
                flags: flags.bits(),
                next: 0,
            },
        );
        Ok(())
    }

    /// Publish a raw head index on the avail ring
    ///
    /// No validation: this is the primitive `post` builds on, and lets
    /// tests present the device with a corrupt ring.
    pub fn publish_head(&mut self, head: Head) {
        self.mem.set_avail_ring(self.avail_idx, head);
        // Entry before index
        fence(Ordering::Release);
        self.avail_idx = self.avail_idx.wrapping_add(1);
        self.mem.set_avail_idx(self.avail_idx);
    }

    /// Reap the next used buffer
    pub fn take_used(&mut self) -> Option<UsedElem> {
        let used_idx = self.mem.used_idx();
        if used_idx == self.last_used_idx {
            return None;
        }
        fence(Ordering::Acquire);
        let elem = self.mem.used_ring(self.last_used_idx);
        self.last_used_idx = self.last_used_idx.wrapping_add(1);
        Some(elem)
    }

    /// Descriptor currently stored at `head`
    pub fn desc(&self, head: Head) -> Option<Desc> {
        (head < self.layout().num()).then(|| self.mem.desc(head))
    }

    /// Bytes of the buffer described by `head`
    pub fn buffer(&self, head: Head) -> Option<&[u8]> {
        let desc = self.desc(head)?;
        let ptr = self.window.translate(desc.addr, desc.len)?;
        // SAFETY: translated range lies inside the window
        Some(unsafe { core::slice::from_raw_parts(ptr.as_ptr(), desc.len as usize) })
    }

    /// Mutable bytes of the buffer described by `head`
    pub fn buffer_mut(&mut self, head: Head) -> Option<&mut [u8]> {
        let desc = self.desc(head)?;
        let ptr = self.window.translate(desc.addr, desc.len)?;
        // SAFETY: as above; only call for buffers not currently with the device
        Some(unsafe { core::slice::from_raw_parts_mut(ptr.as_ptr(), desc.len as usize) })
    }
}
