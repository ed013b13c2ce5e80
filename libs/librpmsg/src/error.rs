//! Transport result codes
//!
//! Every transport operation returns exactly one of:
//! - a success, optionally distinguished (`Delivery::NoKick`)
//! - a specific failure kind (`Error`)
//!
//! The numeric codes are part of the link ABI and must stay stable.

/// Success
pub const RPMSG_SUCCESS: i16 = 0;
/// Success, but the peer did not need a notification
pub const RPMSG_NO_KICK: i16 = 1;

/// Transport error codes
#[repr(i16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, thiserror::Error)]
pub enum Error {
    /// The peer has not offered a buffer yet (retriable)
    #[error("no buffer available")]
    NoBufferAvailable = -1,
    /// Message does not fit into the fixed-size buffer
    #[error("payload too large for buffer")]
    PayloadTooLarge = -2,
    /// Ring reported a head index outside the descriptor table
    #[error("invalid head index")]
    InvalidHead = -3,
    /// Embedded length field disagrees with the buffer
    #[error("malformed message header")]
    MalformedHeader = -4,
}

impl Error {
    /// Stable numeric code
    #[inline]
    pub const fn code(self) -> i16 {
        self as i16
    }

    /// Convert from a numeric code
    pub const fn from_code(code: i16) -> Option<Self> {
        match code {
            -1 => Some(Self::NoBufferAvailable),
            -2 => Some(Self::PayloadTooLarge),
            -3 => Some(Self::InvalidHead),
            -4 => Some(Self::MalformedHeader),
            _ => None,
        }
    }

    /// Caller may simply try again later
    #[inline]
    pub const fn is_retriable(self) -> bool {
        matches!(self, Self::NoBufferAvailable)
    }

    /// Ring or framing invariant violated; the link needs an external reset
    #[inline]
    pub const fn is_fatal(self) -> bool {
        matches!(self, Self::InvalidHead | Self::MalformedHeader)
    }

    /// Get human-readable error message
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NoBufferAvailable => "no buffer available",
            Self::PayloadTooLarge => "payload too large for buffer",
            Self::InvalidHead => "invalid head index",
            Self::MalformedHeader => "malformed message header",
        }
    }
}

/// Successful send outcome
#[repr(i16)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Delivery {
    /// Buffer submitted and the peer was notified
    Kicked = RPMSG_SUCCESS,
    /// Buffer submitted; peer had notifications suppressed
    NoKick = RPMSG_NO_KICK,
}

impl Delivery {
    /// Stable numeric code
    #[inline]
    pub const fn code(self) -> i16 {
        self as i16
    }

    #[inline]
    pub const fn is_kicked(self) -> bool {
        matches!(self, Self::Kicked)
    }
}

/// Transport result type
pub type Result<T> = core::result::Result<T, Error>;

/// Flatten an outcome into its numeric status code
pub trait Status {
    fn status(&self) -> i16;
}

impl Status for Error {
    fn status(&self) -> i16 {
        self.code()
    }
}

impl Status for Delivery {
    fn status(&self) -> i16 {
        self.code()
    }
}

impl<T: Status> Status for Result<T> {
    fn status(&self) -> i16 {
        match self {
            Ok(value) => value.status(),
            Err(err) => err.code(),
        }
    }
}
