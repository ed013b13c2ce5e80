//! Split vring virtqueues
//!
//! The coprocessor plays the virtio *device* role: the host posts buffers on
//! the avail ring, the coprocessor takes them, fills or drains them, and
//! hands them back on the used ring.
//!
//! - [`Vring`]: device side, implements [`Virtqueue`](crate::Virtqueue)
//! - [`HostRing`]: driver side, for host tooling and tests
//!
//! Ring memory and buffers live in memory both processors can see. Buffer
//! addresses inside descriptors are device-visible addresses; a
//! [`BufferWindow`] translates them into local pointers and rejects anything
//! outside the shared region.

mod device;
mod host;
mod layout;

pub use device::Vring;
pub use host::{HostRing, PostError};
pub use layout::{VringLayout, DESC_SIZE, MAX_QUEUE_SIZE, USED_ELEM_SIZE};

use core::ptr::{self, NonNull};

bitflags::bitflags! {
    /// Descriptor flags
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct DescFlags: u16 {
        /// Buffer continues via the `next` field
        const NEXT = 1 << 0;
        /// Buffer is device write-only
        const WRITE = 1 << 1;
        /// Buffer holds a list of descriptors
        const INDIRECT = 1 << 2;
    }
}

bitflags::bitflags! {
    /// Avail ring flags (written by the host)
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct AvailFlags: u16 {
        /// Host does not want to be interrupted when buffers are used
        const NO_INTERRUPT = 1 << 0;
    }
}

bitflags::bitflags! {
    /// Used ring flags (written by the coprocessor)
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
    pub struct UsedFlags: u16 {
        /// Coprocessor does not want to be notified when buffers are posted
        const NO_NOTIFY = 1 << 0;
    }
}

/// Descriptor table entry
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct Desc {
    /// Device-visible buffer address
    pub addr: u64,
    /// Buffer length
    pub len: u32,
    pub flags: u16,
    pub next: u16,
}

/// Used ring element
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct UsedElem {
    /// Head index of the returned descriptor
    pub id: u32,
    /// Bytes written into the buffer
    pub len: u32,
}

/// Signal to the peer that a ring changed
///
/// On the PRU this is an INTC system event; on the host side an interrupt
/// or mailbox write.
pub trait Doorbell {
    fn ring(&mut self);
}

impl<F: FnMut()> Doorbell for F {
    fn ring(&mut self) {
        self()
    }
}

/// Mapping from device-visible buffer addresses to local memory
#[derive(Clone, Copy, Debug)]
pub struct BufferWindow {
    device_base: u64,
    local: NonNull<u8>,
    len: usize,
}

impl BufferWindow {
    /// Create a window of `len` bytes seen by the peer at `device_base`
    ///
    /// # Safety
    /// `local..local + len` must be valid for reads and writes for as long
    /// as any ring built on this window is in use.
    pub const unsafe fn new(device_base: u64, local: NonNull<u8>, len: usize) -> Self {
        Self {
            device_base,
            local,
            len,
        }
    }

    #[inline]
    pub const fn device_base(&self) -> u64 {
        self.device_base
    }

    #[inline]
    pub const fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Device-visible address of the byte at `offset` in the window
    #[inline]
    pub const fn device_addr(&self, offset: usize) -> u64 {
        self.device_base + offset as u64
    }

    /// Translate `[addr, addr + len)` into a local pointer
    pub fn translate(&self, addr: u64, len: u32) -> Option<NonNull<u8>> {
        let offset = usize::try_from(addr.checked_sub(self.device_base)?).ok()?;
        let end = offset.checked_add(len as usize)?;
        if end > self.len {
            return None;
        }
        // SAFETY: offset + len is within the window
        NonNull::new(unsafe { self.local.as_ptr().add(offset) })
    }
}

/// Volatile accessors over one vring's memory
#[derive(Clone, Copy, Debug)]
pub(crate) struct RingMem {
    base: NonNull<u8>,
    layout: VringLayout,
}

impl RingMem {
    /// # Safety
    /// `base` must point to `layout.size()` bytes, aligned to 8, valid for
    /// the lifetime of the ring.
    pub(crate) const unsafe fn new(base: NonNull<u8>, layout: VringLayout) -> Self {
        Self { base, layout }
    }

    #[inline]
    pub(crate) fn layout(&self) -> &VringLayout {
        &self.layout
    }

    #[inline]
    fn at<T>(&self, offset: usize) -> *mut T {
        // SAFETY: callers only pass offsets produced by the layout
        unsafe { self.base.as_ptr().add(offset) as *mut T }
    }

    /// Zero the whole ring
    pub(crate) fn clear(&self) {
        // SAFETY: the ring spans `layout.size()` bytes from `base`
        unsafe { ptr::write_bytes(self.base.as_ptr(), 0, self.layout.size()) }
    }

    pub(crate) fn desc(&self, head: u16) -> Desc {
        let offset = self.layout.desc_offset() + DESC_SIZE * head as usize;
        unsafe { ptr::read_volatile(self.at::<Desc>(offset)) }
    }

    pub(crate) fn set_desc(&self, head: u16, desc: Desc) {
        let offset = self.layout.desc_offset() + DESC_SIZE * head as usize;
        unsafe { ptr::write_volatile(self.at::<Desc>(offset), desc) }
    }

    pub(crate) fn avail_flags(&self) -> AvailFlags {
        let raw = unsafe { ptr::read_volatile(self.at::<u16>(self.layout.avail_offset())) };
        AvailFlags::from_bits_truncate(raw)
    }

    pub(crate) fn set_avail_flags(&self, flags: AvailFlags) {
        unsafe { ptr::write_volatile(self.at::<u16>(self.layout.avail_offset()), flags.bits()) }
    }

    pub(crate) fn avail_idx(&self) -> u16 {
        unsafe { ptr::read_volatile(self.at::<u16>(self.layout.avail_offset() + 2)) }
    }

    pub(crate) fn set_avail_idx(&self, idx: u16) {
        unsafe { ptr::write_volatile(self.at::<u16>(self.layout.avail_offset() + 2), idx) }
    }

    pub(crate) fn avail_ring(&self, idx: u16) -> u16 {
        let slot = idx & (self.layout.num() - 1);
        unsafe { ptr::read_volatile(self.at::<u16>(self.layout.avail_ring_offset(slot))) }
    }

    pub(crate) fn set_avail_ring(&self, idx: u16, head: u16) {
        let slot = idx & (self.layout.num() - 1);
        unsafe { ptr::write_volatile(self.at::<u16>(self.layout.avail_ring_offset(slot)), head) }
    }

    pub(crate) fn used_flags(&self) -> UsedFlags {
        let raw = unsafe { ptr::read_volatile(self.at::<u16>(self.layout.used_offset())) };
        UsedFlags::from_bits_truncate(raw)
    }

    pub(crate) fn set_used_flags(&self, flags: UsedFlags) {
        unsafe { ptr::write_volatile(self.at::<u16>(self.layout.used_offset()), flags.bits()) }
    }

    pub(crate) fn used_idx(&self) -> u16 {
        unsafe { ptr::read_volatile(self.at::<u16>(self.layout.used_offset() + 2)) }
    }

    pub(crate) fn set_used_idx(&self, idx: u16) {
        unsafe { ptr::write_volatile(self.at::<u16>(self.layout.used_offset() + 2), idx) }
    }

    pub(crate) fn used_ring(&self, idx: u16) -> UsedElem {
        let slot = idx & (self.layout.num() - 1);
        unsafe { ptr::read_volatile(self.at::<UsedElem>(self.layout.used_ring_offset(slot))) }
    }

    pub(crate) fn set_used_ring(&self, idx: u16, elem: UsedElem) {
        let slot = idx & (self.layout.num() - 1);
        unsafe { ptr::write_volatile(self.at::<UsedElem>(self.layout.used_ring_offset(slot)), elem) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_translate() {
        let mut backing = [0u8; 64];
        let local = NonNull::new(backing.as_mut_ptr()).unwrap();
        let window = unsafe { BufferWindow::new(0x8000_0000, local, backing.len()) };

        assert_eq!(window.translate(0x8000_0000, 64), Some(local));
        assert!(window.translate(0x8000_0010, 48).is_some());
        assert!(window.translate(0x8000_0010, 49).is_none());
        assert!(window.translate(0x7fff_ffff, 1).is_none());
        assert!(window.translate(u64::MAX, u32::MAX).is_none());
        assert_eq!(window.device_addr(16), 0x8000_0010);
    }

    #[test]
    fn test_desc_size_matches_layout() {
        assert_eq!(core::mem::size_of::<Desc>(), DESC_SIZE);
        assert_eq!(core::mem::size_of::<UsedElem>(), USED_ELEM_SIZE);
    }
}
