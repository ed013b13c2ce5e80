//! Link configuration
//!
//! Both ends of the link must agree on these values. The defaults match the
//! host's rpmsg bus driver.

use crate::message::{HEADER_SIZE, RPMSG_BUF_SIZE};
use crate::ns::RPMSG_NS_ADDR;

/// Per-link parameters
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(default))]
pub struct LinkConfig {
    /// Buffer size in bytes, header included
    pub buf_size: usize,
    /// Address of the host's name-service endpoint
    pub ns_addr: u32,
}

impl LinkConfig {
    pub const fn new() -> Self {
        Self {
            buf_size: RPMSG_BUF_SIZE,
            ns_addr: RPMSG_NS_ADDR,
        }
    }

    /// Largest payload a single message may carry
    #[inline]
    pub const fn max_payload(&self) -> usize {
        self.buf_size.saturating_sub(HEADER_SIZE)
    }

    /// Check the configuration against the fixed wire format
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.buf_size <= HEADER_SIZE {
            return Err(ConfigError::BufferTooSmall(self.buf_size));
        }
        if self.buf_size > RPMSG_BUF_SIZE {
            return Err(ConfigError::BufferTooLarge(self.buf_size));
        }
        Ok(())
    }
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Configuration errors
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("buffer size {0} leaves no room for a payload")]
    BufferTooSmall(usize),
    #[error("buffer size {0} exceeds the {max}-byte maximum", max = RPMSG_BUF_SIZE)]
    BufferTooLarge(usize),
}
