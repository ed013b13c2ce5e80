//! Host driver and echo firmware
//!
//! `HostDriver` plays the part of the host's virtio/rpmsg drivers over the
//! simulated region: it keeps the outbound ring stocked with empty buffers,
//! injects inbound messages, and turns name-service records into a channel
//! table. `EchoFirmware` is the coprocessor side, built on
//! `librpmsg::Transport`.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, bail, Result};
use librpmsg::message::{decode, encode};
use librpmsg::vring::{BufferWindow, DescFlags, Doorbell, HostRing, Vring};
use librpmsg::{
    Delivery, Error, LinkConfig, NsAnnouncement, NsIntent, Transport, HEADER_SIZE, MAX_PAYLOAD,
};
use tracing::{debug, info, warn};

use crate::config::SimConfig;
use crate::memory::{Direction, SharedRegion};

/// Interrupt line from the coprocessor to the host, counted
#[derive(Clone, Debug, Default)]
pub struct Bell(Arc<AtomicU32>);

impl Bell {
    pub fn count(&self) -> u32 {
        self.0.load(Ordering::Relaxed)
    }
}

impl Doorbell for Bell {
    fn ring(&mut self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }
}

/// A message the coprocessor sent to a non-reserved address
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HostMessage {
    pub src: u32,
    pub dst: u32,
    pub payload: Vec<u8>,
}

/// Channel as the host sees it
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Channel {
    pub name: String,
    pub desc: String,
}

/// Host side of both vrings
pub struct HostDriver {
    tx: HostRing,
    rx: HostRing,
    window: BufferWindow,
    slot_offsets: [Vec<usize>; 2],
    buf_size: u32,
    ns_addr: u32,
    /// Inbound slots not currently with the coprocessor
    free_rx: Vec<u16>,
    /// Live channels by coprocessor port
    channels: BTreeMap<u32, Channel>,
}

impl HostDriver {
    /// Initialize both rings in `region`
    ///
    /// # Safety
    /// `region` must outlive the driver and must not be moved or resized.
    pub unsafe fn init(region: &mut SharedRegion, link: &LinkConfig) -> Self {
        let layout = region.layout();
        let window = region.window();
        let tx = HostRing::init(region.ring(Direction::Tx), layout, window);
        let rx = HostRing::init(region.ring(Direction::Rx), layout, window);
        let slots = |dir: Direction| -> Vec<usize> {
            (0..layout.num()).map(|head| region.slot_offset(dir, head)).collect()
        };

        Self {
            tx,
            rx,
            window,
            slot_offsets: [slots(Direction::Tx), slots(Direction::Rx)],
            buf_size: region.buf_size() as u32,
            ns_addr: link.ns_addr,
            free_rx: (0..layout.num()).rev().collect(),
            channels: BTreeMap::new(),
        }
    }

    fn slot_addr(&self, dir: Direction, head: u16) -> u64 {
        let offsets = match dir {
            Direction::Tx => &self.slot_offsets[0],
            Direction::Rx => &self.slot_offsets[1],
        };
        self.window.device_addr(offsets[head as usize])
    }

    /// Hand every outbound slot to the coprocessor
    pub fn stock_tx(&mut self) -> Result<()> {
        for head in 0..self.tx.layout().num() {
            self.post_tx(head)?;
        }
        Ok(())
    }

    fn post_tx(&mut self, head: u16) -> Result<()> {
        let addr = self.slot_addr(Direction::Tx, head);
        self.tx
            .post(head, addr, self.buf_size, DescFlags::WRITE)
            .map_err(|e| anyhow!("posting tx head {}: {:?}", head, e))
    }

    /// Queue one message for the coprocessor
    pub fn inject(&mut self, src: u32, dst: u32, payload: &[u8]) -> Result<()> {
        if HEADER_SIZE + payload.len() > self.buf_size as usize {
            bail!("{}-byte payload does not fit a {}-byte buffer", payload.len(), self.buf_size);
        }
        let head = self
            .free_rx
            .pop()
            .ok_or_else(|| anyhow!("all inbound buffers are with the coprocessor"))?;
        let addr = self.slot_addr(Direction::Rx, head);

        self.rx
            .stage(head, addr, self.buf_size, DescFlags::empty())
            .map_err(|e| anyhow!("staging rx head {}: {:?}", head, e))?;
        let buf = self
            .rx
            .buffer_mut(head)
            .ok_or_else(|| anyhow!("rx head {} outside the pool", head))?;
        encode(buf, src, dst, payload)?;
        self.rx.publish_head(head);

        debug!("injected {} bytes {} -> {} in rx head {}", payload.len(), src, dst, head);
        Ok(())
    }

    /// Take back inbound buffers the coprocessor has consumed
    pub fn reap_rx(&mut self) -> usize {
        let mut reaped = 0;
        while let Some(used) = self.rx.take_used() {
            self.free_rx.push(used.id as u16);
            reaped += 1;
        }
        reaped
    }

    /// Collect everything the coprocessor sent and re-post the buffers
    ///
    /// Name-service records update the channel table; everything else is
    /// returned. A slot is re-posted even when its frame fails to parse.
    pub fn reap_tx(&mut self) -> Result<Vec<HostMessage>> {
        let mut messages = Vec::new();

        while let Some(used) = self.tx.take_used() {
            let head = used.id as u16;
            let message = self.read_tx(head, used.len);
            self.post_tx(head)?;
            let message = message?;

            if message.dst == self.ns_addr {
                let ns = NsAnnouncement::from_bytes(&message.payload)?;
                self.apply_announcement(&ns);
            } else {
                messages.push(message);
            }
        }

        Ok(messages)
    }

    fn read_tx(&self, head: u16, len: u32) -> Result<HostMessage> {
        let buf = self
            .tx
            .buffer(head)
            .ok_or_else(|| anyhow!("tx head {} outside the pool", head))?;
        let bytes = buf
            .get(..len as usize)
            .ok_or_else(|| anyhow!("used length {} past buffer end", len))?;
        let frame = decode(bytes)?;
        Ok(HostMessage {
            src: frame.src,
            dst: frame.dst,
            payload: frame.payload.to_vec(),
        })
    }

    fn apply_announcement(&mut self, ns: &NsAnnouncement) {
        match ns.intent {
            NsIntent::Create => {
                info!("channel '{}' ({}) created at port {}", ns.name, ns.desc, ns.addr);
                self.channels.insert(
                    ns.addr,
                    Channel {
                        name: ns.name.to_string(),
                        desc: ns.desc.to_string(),
                    },
                );
            }
            NsIntent::Destroy => {
                if self.channels.remove(&ns.addr).is_none() {
                    warn!("destroy for unknown channel '{}' at port {}", ns.name, ns.addr);
                } else {
                    info!("channel '{}' destroyed", ns.name);
                }
            }
        }
    }

    pub fn channels(&self) -> &BTreeMap<u32, Channel> {
        &self.channels
    }

    /// Stop or resume interrupts from the coprocessor
    pub fn set_interrupts(&mut self, enabled: bool) {
        self.tx.set_interrupts(enabled);
        self.rx.set_interrupts(enabled);
    }
}

/// Link type the firmware runs on
pub type Link = Transport<Vring<Bell>, Vring<Bell>>;

/// Coprocessor firmware that echoes every message back to its sender
pub struct EchoFirmware {
    link: Link,
    name: String,
    desc: String,
    port: u32,
    echoed: u64,
    dropped: u64,
}

impl EchoFirmware {
    /// Attach to the rings the host initialized in `region`
    ///
    /// # Safety
    /// `region` must outlive the firmware, and the host must have
    /// initialized both rings already.
    pub unsafe fn attach(region: &mut SharedRegion, config: &SimConfig, bell: Bell) -> Result<Self> {
        let layout = region.layout();
        let window = region.window();
        let tx = Vring::new(region.ring(Direction::Tx), layout, window, bell.clone());
        let rx = Vring::new(region.ring(Direction::Rx), layout, window, bell);
        let link = Transport::with_config(tx, rx, config.link)?;

        Ok(Self {
            link,
            name: config.channel.name.clone(),
            desc: config.channel.desc.clone(),
            port: config.channel.port,
            echoed: 0,
            dropped: 0,
        })
    }

    /// Announce the channel to the host
    pub fn start(&mut self) -> librpmsg::Result<Delivery> {
        self.link
            .announce_channel(NsIntent::Create, &self.name, &self.desc, self.port)
    }

    /// Withdraw the channel
    pub fn stop(&mut self) -> librpmsg::Result<Delivery> {
        self.link
            .announce_channel(NsIntent::Destroy, &self.name, &self.desc, self.port)
    }

    /// Echo every pending message; returns how many were handled
    pub fn poll(&mut self) -> librpmsg::Result<usize> {
        let mut data = [0u8; MAX_PAYLOAD];
        let mut handled = 0;

        loop {
            let msg = match self.link.receive(&mut data) {
                Ok(msg) => msg,
                Err(Error::NoBufferAvailable) => return Ok(handled),
                Err(e) => return Err(e),
            };
            handled += 1;

            if msg.dst != self.port {
                warn!("message for unknown port {} dropped", msg.dst);
                self.dropped += 1;
                continue;
            }

            match self.link.send(self.port, msg.src, &data[..msg.len]) {
                Ok(delivery) => {
                    debug!("echoed {} bytes to {} ({:?})", msg.len, msg.src, delivery);
                    self.echoed += 1;
                }
                Err(e) if e.is_retriable() => {
                    warn!("no outbound buffer, echo to {} dropped", msg.src);
                    self.dropped += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    pub fn echoed(&self) -> u64 {
        self.echoed
    }

    pub fn dropped(&self) -> u64 {
        self.dropped
    }
}

/// Outcome of a simulation run
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Report {
    pub rounds: u32,
    pub echoed: u64,
    pub dropped: u64,
    pub kicks: u32,
    pub channels_seen: Vec<String>,
}

/// Both sides of the link over one region
pub struct Simulation {
    host: HostDriver,
    firmware: EchoFirmware,
    bell: Bell,
    host_addr: u32,
    port: u32,
    // Dropped last; the rings above point into its allocation
    _region: SharedRegion,
}

impl Simulation {
    pub fn new(config: &SimConfig) -> Result<Self> {
        config.validate()?;

        let mut region = SharedRegion::new(config.layout()?, config.link.buf_size, config.ring.device_base)?;
        let bell = Bell::default();

        // SAFETY: the region's allocation never moves or resizes, and the
        // simulation owns it alongside both sides of the link
        let (mut host, firmware) = unsafe {
            let host = HostDriver::init(&mut region, &config.link);
            let firmware = EchoFirmware::attach(&mut region, config, bell.clone())?;
            (host, firmware)
        };
        host.set_interrupts(config.ring.interrupts);
        host.stock_tx()?;

        Ok(Self {
            host,
            firmware,
            bell,
            host_addr: config.channel.host_addr,
            port: config.channel.port,
            _region: region,
        })
    }

    #[cfg(test)]
    pub fn host(&mut self) -> &mut HostDriver {
        &mut self.host
    }

    #[cfg(test)]
    pub fn firmware(&mut self) -> &mut EchoFirmware {
        &mut self.firmware
    }

    /// One message out to the firmware and back
    pub fn round(&mut self, n: u32) -> Result<()> {
        let payload = format!("round {}", n);
        self.host.inject(self.host_addr, self.port, payload.as_bytes())?;

        let handled = self.firmware.poll()?;
        self.host.reap_rx();
        let replies = self.host.reap_tx()?;

        if handled != 1 || replies.len() != 1 {
            bail!("round {}: handled {} messages, got {} replies", n, handled, replies.len());
        }
        let reply = &replies[0];
        if reply.payload != payload.as_bytes() || reply.dst != self.host_addr || reply.src != self.port {
            bail!("round {}: unexpected reply {:?}", n, reply);
        }
        Ok(())
    }

    /// Announce, echo `rounds` messages, withdraw
    pub fn run(&mut self, rounds: u32) -> Result<Report> {
        let mut report = Report {
            rounds,
            ..Report::default()
        };

        let delivery = self.firmware.start()?;
        debug!("announcement delivered: {:?}", delivery);
        self.host.reap_tx()?;
        for (port, channel) in self.host.channels() {
            info!("host bound '{}' ({}) on port {}", channel.name, channel.desc, port);
            report.channels_seen.push(channel.name.clone());
        }

        for n in 0..rounds {
            self.round(n)?;
        }

        self.firmware.stop()?;
        self.host.reap_tx()?;
        if !self.host.channels().is_empty() {
            bail!("channel still registered after destroy");
        }

        report.echoed = self.firmware.echoed();
        report.dropped = self.firmware.dropped();
        report.kicks = self.bell.count();
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use librpmsg::Virtqueue;

    fn sim() -> Simulation {
        Simulation::new(&SimConfig::default()).unwrap()
    }

    #[test]
    fn test_run_echoes_every_round() {
        let mut sim = sim();
        let report = sim.run(5).unwrap();

        assert_eq!(report.echoed, 5);
        assert_eq!(report.dropped, 0);
        assert_eq!(report.channels_seen, vec!["rpmsg-pru".to_string()]);
        // create + destroy + 5 echoes on tx, 5 consumed on rx
        assert_eq!(report.kicks, 12);
    }

    #[test]
    fn test_more_rounds_than_slots() {
        let mut config = SimConfig::default();
        config.ring.num = 2;
        let mut sim = Simulation::new(&config).unwrap();
        assert_eq!(sim.run(9).unwrap().echoed, 9);
    }

    #[test]
    fn test_channel_table() {
        let mut sim = sim();
        sim.firmware().start().unwrap();
        sim.host().reap_tx().unwrap();

        let channel = &sim.host().channels()[&30];
        assert_eq!(channel.name, "rpmsg-pru");
        assert_eq!(channel.desc, "Channel 30");

        sim.firmware().stop().unwrap();
        sim.host().reap_tx().unwrap();
        assert!(sim.host().channels().is_empty());
    }

    #[test]
    fn test_suppressed_interrupts() {
        let mut config = SimConfig::default();
        config.ring.interrupts = false;
        let mut sim = Simulation::new(&config).unwrap();
        let report = sim.run(3).unwrap();
        assert_eq!(report.echoed, 3);
        assert_eq!(report.kicks, 0);
    }

    #[test]
    fn test_wrong_port_is_dropped() {
        let mut sim = sim();
        sim.host().inject(1024, 99, b"stray").unwrap();
        assert_eq!(sim.firmware().poll(), Ok(1));
        assert_eq!(sim.firmware().dropped(), 1);
        assert_eq!(sim.host().reap_rx(), 1);
        assert!(sim.host().reap_tx().unwrap().is_empty());
    }

    #[test]
    fn test_backpressure_drops_echo() {
        let mut config = SimConfig::default();
        config.ring.num = 1;
        let mut sim = Simulation::new(&config).unwrap();

        sim.host().inject(1024, 30, b"a").unwrap();
        assert_eq!(sim.firmware().poll(), Ok(1));
        // The only outbound buffer is now with the host
        sim.host().reap_rx();
        sim.host().inject(1024, 30, b"b").unwrap();
        assert_eq!(sim.firmware().poll(), Ok(1));
        assert_eq!(sim.firmware().dropped(), 1);

        let replies = sim.host().reap_tx().unwrap();
        assert_eq!(replies.len(), 1);
        assert_eq!(replies[0].payload, b"a");
    }

    #[test]
    fn test_malformed_outbound_frame_is_reposted() {
        let mut sim = sim();
        {
            let tx = sim.firmware().link.tx_mut();
            let buf = tx.acquire_available().unwrap();
            encode(tx.buffer_mut(buf.head).unwrap(), 30, 1024, b"cut short").unwrap();
            // Used length stops at the header
            tx.submit_used(buf.head, HEADER_SIZE as u32).unwrap();
        }

        assert!(sim.host().reap_tx().is_err());
        assert_eq!(sim.host().tx.outstanding(), 16);
        sim.round(0).unwrap();
    }

    #[test]
    fn test_inbound_exhaustion() {
        let mut config = SimConfig::default();
        config.ring.num = 2;
        let mut sim = Simulation::new(&config).unwrap();

        sim.host().inject(1024, 30, b"1").unwrap();
        sim.host().inject(1024, 30, b"2").unwrap();
        assert!(sim.host().inject(1024, 30, b"3").is_err());
    }
}
