//! Split vring memory layout
//!
//! ```text
//! +--------------------+  0
//! | desc[num]          |  16 bytes each
//! +--------------------+  avail_offset
//! | avail.flags        |  u16
//! | avail.idx          |  u16
//! | avail.ring[num]    |  u16 each
//! | used_event         |  u16
//! +--------------------+  used_offset (aligned to `align`)
//! | used.flags         |  u16
//! | used.idx           |  u16
//! | used.ring[num]     |  {id: u32, len: u32}
//! | avail_event        |  u16
//! +--------------------+  size
//! ```

/// Largest descriptor table the split ring format allows
pub const MAX_QUEUE_SIZE: u16 = 32768;

/// Size of one descriptor
pub const DESC_SIZE: usize = 16;

/// Size of one used-ring element
pub const USED_ELEM_SIZE: usize = 8;

/// Geometry of one vring
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct VringLayout {
    num: u16,
    align: usize,
}

impl VringLayout {
    /// Layout for `num` descriptors with the used ring aligned to `align`
    ///
    /// `num` must be a power of two no larger than `MAX_QUEUE_SIZE`;
    /// `align` must be a power of two of at least 4.
    pub const fn new(num: u16, align: usize) -> Option<Self> {
        if num == 0 || !num.is_power_of_two() || num > MAX_QUEUE_SIZE {
            return None;
        }
        if align < 4 || !align.is_power_of_two() {
            return None;
        }
        Some(Self { num, align })
    }

    #[inline]
    pub const fn num(&self) -> u16 {
        self.num
    }

    #[inline]
    pub const fn align(&self) -> usize {
        self.align
    }

    #[inline]
    pub const fn desc_offset(&self) -> usize {
        0
    }

    #[inline]
    pub const fn avail_offset(&self) -> usize {
        DESC_SIZE * self.num as usize
    }

    /// Offset of the avail ring slot `slot`
    #[inline]
    pub const fn avail_ring_offset(&self, slot: u16) -> usize {
        self.avail_offset() + 4 + 2 * slot as usize
    }

    #[inline]
    pub const fn used_offset(&self) -> usize {
        let avail_end = self.avail_offset() + 2 * (3 + self.num as usize);
        align_up(avail_end, self.align)
    }

    /// Offset of the used ring element `slot`
    #[inline]
    pub const fn used_ring_offset(&self, slot: u16) -> usize {
        self.used_offset() + 4 + USED_ELEM_SIZE * slot as usize
    }

    /// Total bytes occupied by the ring
    #[inline]
    pub const fn size(&self) -> usize {
        self.used_offset() + 6 + USED_ELEM_SIZE * self.num as usize
    }
}

const fn align_up(value: usize, align: usize) -> usize {
    (value + align - 1) & !(align - 1)
}
