//! In-memory ring double shared by the integration tests

#![allow(dead_code)]

use std::collections::VecDeque;

use librpmsg::{AvailBuf, Head, Notify, QueueError, Virtqueue};

pub const SLOT_SIZE: usize = librpmsg::RPMSG_BUF_SIZE;

/// One direction of a ring, held entirely in a `Vec`
///
/// Tracks every settlement so tests can check that each acquired buffer is
/// returned exactly once.
pub struct MockQueue {
    pub slots: Vec<Vec<u8>>,
    /// Heads on offer, front first; may hold bogus values for corruption tests
    pub avail: VecDeque<Head>,
    /// `(head, len)` in submission order
    pub used: Vec<(Head, u32)>,
    pub in_flight: Option<Head>,
    /// Notification outcome for each upcoming submission; `Kicked` once empty
    pub kick_plan: VecDeque<Notify>,
    pub acquired: u32,
    pub released: u32,
}

impl MockQueue {
    /// Queue with `num` slots of `SLOT_SIZE`, all on offer
    pub fn offering(num: u16) -> Self {
        let mut queue = Self::idle(num);
        queue.avail.extend(0..num);
        queue
    }

    /// Queue with `num` slots, none on offer
    pub fn idle(num: u16) -> Self {
        Self {
            slots: vec![vec![0u8; SLOT_SIZE]; num as usize],
            avail: VecDeque::new(),
            used: Vec::new(),
            in_flight: None,
            kick_plan: VecDeque::new(),
            acquired: 0,
            released: 0,
        }
    }

    /// Put `head` at the back of the avail list without any check
    pub fn inject_head(&mut self, head: Head) {
        self.avail.push_back(head);
    }

    /// Host-side write of a raw frame into `head` and offer it
    pub fn offer_bytes(&mut self, head: Head, bytes: &[u8]) {
        let slot = &mut self.slots[head as usize];
        slot.fill(0);
        slot[..bytes.len()].copy_from_slice(bytes);
        self.avail.push_back(head);
    }

    /// Host-side framing of a message into `head`, then offer it
    pub fn offer_message(&mut self, head: Head, src: u32, dst: u32, payload: &[u8]) {
        let slot = &mut self.slots[head as usize];
        let len = librpmsg::message::encode(slot, src, dst, payload).unwrap();
        let frame = slot[..len].to_vec();
        self.offer_bytes(head, &frame);
    }

    /// Bytes the coprocessor wrote into the `n`th submitted buffer
    pub fn used_frame(&self, n: usize) -> &[u8] {
        let (head, len) = self.used[n];
        &self.slots[head as usize][..len as usize]
    }

    /// Hand every used buffer from `self` to `peer` as an inbound message
    ///
    /// Mirrors what the host does when it loops a message back. Slots keep
    /// the same head index on both sides, and the outbound slot is re-posted.
    pub fn deliver_to(&mut self, peer: &mut MockQueue) {
        let used: Vec<_> = self.used.drain(..).collect();
        for (head, len) in used {
            let frame = self.slots[head as usize][..len as usize].to_vec();
            peer.offer_bytes(head, &frame);
            self.avail.push_back(head);
        }
    }

    fn check(&self, head: Head) -> Result<(), QueueError> {
        if head as usize >= self.slots.len() {
            return Err(QueueError::InvalidHead);
        }
        Ok(())
    }
}

impl Virtqueue for MockQueue {
    fn size(&self) -> u16 {
        self.slots.len() as u16
    }

    fn pending(&self) -> u16 {
        self.avail.len() as u16
    }

    fn acquire_available(&mut self) -> Result<AvailBuf, QueueError> {
        let head = *self.avail.front().ok_or(QueueError::Empty)?;
        self.check(head)?;
        assert!(self.in_flight.is_none(), "acquire while head {:?} is out", self.in_flight);
        self.avail.pop_front();
        self.in_flight = Some(head);
        self.acquired += 1;
        Ok(AvailBuf {
            head,
            len: SLOT_SIZE as u32,
        })
    }

    fn buffer(&self, head: Head) -> Result<&[u8], QueueError> {
        self.check(head)?;
        Ok(&self.slots[head as usize])
    }

    fn buffer_mut(&mut self, head: Head) -> Result<&mut [u8], QueueError> {
        self.check(head)?;
        Ok(&mut self.slots[head as usize])
    }

    fn submit_used(&mut self, head: Head, len: u32) -> Result<Notify, QueueError> {
        self.check(head)?;
        assert_eq!(self.in_flight, Some(head), "submit of head {} not in flight", head);
        self.in_flight = None;
        self.used.push((head, len));
        Ok(self.kick_plan.pop_front().unwrap_or(Notify::Kicked))
    }

    fn release_unused(&mut self, head: Head) {
        assert_eq!(self.in_flight, Some(head), "release of head {} not in flight", head);
        self.in_flight = None;
        self.released += 1;
        self.avail.push_front(head);
    }
}
