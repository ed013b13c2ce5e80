//! Property tests over interleaved host and coprocessor ring activity
//!
//! Drives real split vrings from both sides with a random schedule and
//! checks that every buffer comes back exactly once, in order.

mod common;

use std::collections::{BTreeSet, VecDeque};
use std::ptr::NonNull;

use common::SLOT_SIZE;
use librpmsg::message::{decode, encode};
use librpmsg::vring::{BufferWindow, DescFlags, HostRing, Vring, VringLayout};
use librpmsg::{Error, Transport};
use proptest::prelude::*;

const NUM: u16 = 4;
const BASE: u64 = 0x4000_0000;

#[derive(Clone, Debug)]
enum Op {
    /// Host posts an inbound message with `extra` padding bytes
    HostSend { extra: usize },
    /// Host posts an empty outbound buffer
    HostPost,
    HostReapRx,
    HostReapTx,
    /// Coprocessor receives into `room` bytes of storage
    Receive { room: usize },
    Send { extra: usize },
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0usize..40).prop_map(|extra| Op::HostSend { extra }),
        Just(Op::HostPost),
        Just(Op::HostReapRx),
        Just(Op::HostReapTx),
        (0usize..48).prop_map(|room| Op::Receive { room }),
        (0usize..40).prop_map(|extra| Op::Send { extra }),
    ]
}

fn payload(seq: u32, extra: usize) -> Vec<u8> {
    let mut out = seq.to_le_bytes().to_vec();
    out.resize(4 + extra, seq as u8);
    out
}

struct Harness {
    _rings: [Vec<u64>; 2],
    _bufs: Vec<u8>,
    window: BufferWindow,
    host_tx: HostRing,
    host_rx: HostRing,
    /// Heads the host may post next, per direction
    free_tx: BTreeSet<u16>,
    free_rx: BTreeSet<u16>,
    /// Sequence numbers of inbound messages not yet received
    inbound: VecDeque<(u32, usize)>,
    /// Sequence numbers sent but not yet reaped by the host
    outbound: VecDeque<u32>,
    /// Outbound buffers posted and not yet filled
    tx_posted: usize,
    /// Inbound buffers consumed by the coprocessor but not yet reaped
    rx_consumed: usize,
    next_seq: u32,
}

type Link = Transport<Vring<fn()>, Vring<fn()>>;

fn no_bell() {}

impl Harness {
    fn new() -> (Self, Link) {
        let layout = VringLayout::new(NUM, 16).unwrap();
        let words = layout.size().div_ceil(8);
        let mut rings = [vec![0u64; words], vec![0u64; words]];
        let mut bufs = vec![0u8; 2 * NUM as usize * SLOT_SIZE];

        let local = NonNull::new(bufs.as_mut_ptr()).unwrap();
        let window = unsafe { BufferWindow::new(BASE, local, bufs.len()) };
        let tx_mem = NonNull::new(rings[0].as_mut_ptr() as *mut u8).unwrap();
        let rx_mem = NonNull::new(rings[1].as_mut_ptr() as *mut u8).unwrap();

        let host_tx = unsafe { HostRing::init(tx_mem, layout, window) };
        let host_rx = unsafe { HostRing::init(rx_mem, layout, window) };
        let tx = unsafe { Vring::new(tx_mem, layout, window, no_bell as fn()) };
        let rx = unsafe { Vring::new(rx_mem, layout, window, no_bell as fn()) };

        let harness = Self {
            _rings: rings,
            _bufs: bufs,
            window,
            host_tx,
            host_rx,
            free_tx: (0..NUM).collect(),
            free_rx: (0..NUM).collect(),
            inbound: VecDeque::new(),
            outbound: VecDeque::new(),
            tx_posted: 0,
            rx_consumed: 0,
            next_seq: 0,
        };
        (harness, Transport::new(tx, rx))
    }

    fn slot_addr(&self, rx: bool, head: u16) -> u64 {
        let slot = head as usize + if rx { NUM as usize } else { 0 };
        self.window.device_addr(slot * SLOT_SIZE)
    }

    fn step(&mut self, link: &mut Link, op: Op) -> Result<(), TestCaseError> {
        match op {
            Op::HostSend { extra } => {
                let Some(head) = self.free_rx.pop_first() else { return Ok(()) };
                let addr = self.slot_addr(true, head);
                self.host_rx
                    .post(head, addr, SLOT_SIZE as u32, DescFlags::empty())
                    .map_err(|e| TestCaseError::fail(format!("{:?}", e)))?;

                let seq = self.next_seq;
                self.next_seq += 1;
                let body = payload(seq, extra);
                let buf = self.host_rx.buffer_mut(head).unwrap();
                encode(buf, 1024, 30, &body).unwrap();
                self.inbound.push_back((seq, body.len()));
            }
            Op::HostPost => {
                let Some(head) = self.free_tx.pop_first() else { return Ok(()) };
                let addr = self.slot_addr(false, head);
                self.host_tx
                    .post(head, addr, SLOT_SIZE as u32, DescFlags::WRITE)
                    .map_err(|e| TestCaseError::fail(format!("{:?}", e)))?;
                self.tx_posted += 1;
            }
            Op::HostReapRx => {
                let mut reaped = 0;
                while let Some(used) = self.host_rx.take_used() {
                    let head = used.id as u16;
                    prop_assert!(head < NUM);
                    prop_assert!(self.free_rx.insert(head), "head {} returned twice", head);
                    reaped += 1;
                }
                prop_assert_eq!(reaped, self.rx_consumed);
                self.rx_consumed = 0;
            }
            Op::HostReapTx => {
                while let Some(used) = self.host_tx.take_used() {
                    let head = used.id as u16;
                    prop_assert!(self.free_tx.insert(head), "head {} returned twice", head);
                    let bytes = &self.host_tx.buffer(head).unwrap()[..used.len as usize];
                    let frame = decode(bytes).unwrap();
                    let seq = u32::from_le_bytes(frame.payload[..4].try_into().unwrap());
                    prop_assert_eq!(Some(seq), self.outbound.pop_front());
                }
                prop_assert!(self.outbound.is_empty());
            }
            Op::Receive { room } => {
                let mut out = vec![0u8; room];
                let result = link.receive(&mut out);
                match self.inbound.front().copied() {
                    None => {
                        prop_assert_eq!(result, Err(Error::NoBufferAvailable));
                    }
                    Some((_, len)) if len > room => {
                        prop_assert_eq!(result, Err(Error::PayloadTooLarge));
                    }
                    Some((seq, len)) => {
                        let got = result.map_err(|e| TestCaseError::fail(e.as_str()))?;
                        prop_assert_eq!((got.src, got.dst, got.len), (1024, 30, len));
                        prop_assert_eq!(&out[..4], &seq.to_le_bytes()[..]);
                        self.inbound.pop_front();
                        self.rx_consumed += 1;
                    }
                }
            }
            Op::Send { extra } => {
                let seq = self.next_seq;
                let result = link.send(30, 1024, &payload(seq, extra));
                if self.tx_posted == 0 {
                    prop_assert_eq!(result, Err(Error::NoBufferAvailable));
                } else {
                    prop_assert!(result.is_ok(), "{:?}", result);
                    self.next_seq += 1;
                    self.tx_posted -= 1;
                    self.outbound.push_back(seq);
                }
            }
        }
        Ok(())
    }
}

proptest! {
    #[test]
    fn buffers_return_exactly_once_in_order(ops in proptest::collection::vec(arb_op(), 1..200)) {
        let (mut harness, mut link) = Harness::new();
        for op in ops {
            harness.step(&mut link, op)?;
        }

        // Drain: everything the coprocessor was given comes back
        harness.step(&mut link, Op::HostReapRx)?;
        harness.step(&mut link, Op::HostReapTx)?;
        let expected_free_rx = NUM as usize - harness.inbound.len();
        prop_assert_eq!(harness.free_rx.len(), expected_free_rx);
        prop_assert_eq!(harness.free_tx.len(), NUM as usize - harness.tx_posted);
    }
}
