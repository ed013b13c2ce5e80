//! # librpmsg - Coprocessor RPMsg Transport
//!
//! Addressed message exchange between a real-time coprocessor and its host
//! over two shared-memory virtqueues.
//!
//! ## Features
//!
//! - **Transport** - send and receive over a pair of rings, no allocation
//! - **Framing** - the 16-byte rpmsg header used by the host's bus driver
//! - **Name service** - channel create/destroy announcements
//! - **Vrings** - split-ring device side, plus a driver side for host tooling
//! - **Shared access** - per-direction spin locks for multi-context callers
//!
//! ## Quick Start
//!
//! ```no_run
//! use librpmsg::{NsIntent, Transport, Error};
//! # fn rings() -> (librpmsg::vring::Vring<fn()>, librpmsg::vring::Vring<fn()>) { unimplemented!() }
//!
//! let (tx, rx) = rings();
//! let mut link = Transport::new(tx, rx);
//!
//! // Tell the host the channel exists
//! link.announce_channel(NsIntent::Create, "rpmsg-pru", "Channel 30", 30)?;
//!
//! let mut buf = [0u8; librpmsg::MAX_PAYLOAD];
//! loop {
//!     match link.receive(&mut buf) {
//!         Ok(msg) => {
//!             // Echo back to whoever sent it
//!             link.send(msg.dst, msg.src, &buf[..msg.len])?;
//!         }
//!         Err(Error::NoBufferAvailable) => continue,
//!         Err(e) => return Err(e),
//!     }
//! }
//! # Ok::<(), Error>(())
//! ```
//!
//! ## Error Handling
//!
//! Every operation returns `Result<T, Error>`. `Error::NoBufferAvailable` is
//! the only retriable failure; `InvalidHead` and `MalformedHeader` mean the
//! link needs an external reset. Numeric codes are available through
//! [`Status`] for callers that report status over a register or log line.

#![cfg_attr(not(test), no_std)]

// Core modules
pub mod config;
pub mod error;
pub mod message;
pub mod ns;
pub mod shared;
pub mod transport;
pub mod virtqueue;
pub mod vring;

// Re-export commonly used types at the crate root
pub use config::{ConfigError, LinkConfig};
pub use error::{Delivery, Error, Result, Status, RPMSG_NO_KICK, RPMSG_SUCCESS};
pub use message::{Frame, Header, Message, HEADER_SIZE, MAX_PAYLOAD, RPMSG_BUF_SIZE};
pub use ns::{NsAnnouncement, NsIntent, NS_MSG_SIZE, RPMSG_NAME_SIZE, RPMSG_NS_ADDR};
pub use shared::SharedTransport;
pub use transport::{Received, Transport};
pub use virtqueue::{AvailBuf, Head, Lease, Notify, OnDrop, QueueError, Virtqueue};

/// Prelude for firmware main loops
pub mod prelude {
    pub use crate::error::{Delivery, Error, Result, Status};
    pub use crate::ns::NsIntent;
    pub use crate::transport::{Received, Transport};
    pub use crate::virtqueue::Virtqueue;
}
