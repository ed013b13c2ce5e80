//! Simulated shared memory
//!
//! One allocation stands in for the carveout both processors see:
//!
//! ```text
//! +-----------+-----------+-------------------------------+
//! | vring0    | vring1    | buffers: tx[num] | rx[num]    |
//! | (tx)      | (rx)      |                               |
//! +-----------+-----------+-------------------------------+
//! ```

use std::ptr::NonNull;

use anyhow::{anyhow, Result};
use librpmsg::vring::{BufferWindow, VringLayout};

/// Direction of a vring, named from the coprocessor's side
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Direction {
    /// Coprocessor to host ("virtqueue0")
    Tx,
    /// Host to coprocessor ("virtqueue1")
    Rx,
}

/// Backing store for both vrings and their buffers
pub struct SharedRegion {
    // u64 words keep every ring 8-byte aligned
    words: Vec<u64>,
    layout: VringLayout,
    buf_size: usize,
    ring_stride: usize,
    device_base: u64,
}

impl SharedRegion {
    pub fn new(layout: VringLayout, buf_size: usize, device_base: u64) -> Result<Self> {
        if buf_size == 0 {
            return Err(anyhow!("buffer size must be non-zero"));
        }
        let ring_stride = layout.size().next_multiple_of(8);
        let pool = 2 * layout.num() as usize * buf_size;
        let bytes = 2 * ring_stride + pool;

        Ok(Self {
            words: vec![0u64; bytes.div_ceil(8)],
            layout,
            buf_size,
            ring_stride,
            device_base,
        })
    }

    #[inline]
    pub fn layout(&self) -> VringLayout {
        self.layout
    }

    #[inline]
    pub fn buf_size(&self) -> usize {
        self.buf_size
    }

    fn base(&mut self) -> NonNull<u8> {
        // Vec data pointers are never null
        NonNull::from(&mut self.words[..]).cast::<u8>()
    }

    /// Start of the ring for `dir`
    pub fn ring(&mut self, dir: Direction) -> NonNull<u8> {
        let offset = match dir {
            Direction::Tx => 0,
            Direction::Rx => self.ring_stride,
        };
        // SAFETY: both rings lie inside the allocation
        unsafe { self.base().add(offset) }
    }

    /// Window over the buffer pool
    pub fn window(&mut self) -> BufferWindow {
        let len = 2 * self.layout.num() as usize * self.buf_size;
        // SAFETY: the pool follows the two rings inside the allocation, and
        // the allocation is never resized
        unsafe {
            let local = self.base().add(2 * self.ring_stride);
            BufferWindow::new(self.device_base, local, len)
        }
    }

    /// Offset into the window of buffer `head` for `dir`
    pub fn slot_offset(&self, dir: Direction, head: u16) -> usize {
        let index = match dir {
            Direction::Tx => head as usize,
            Direction::Rx => self.layout.num() as usize + head as usize,
        };
        index * self.buf_size
    }
}
