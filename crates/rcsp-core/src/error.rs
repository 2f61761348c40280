//! Error taxonomy for the upload core.

use std::fmt;

use thiserror::Error;

use crate::protocol::FrameError;
use crate::transport::TransportError;

/// Identifies which wait ran out of time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitPoint {
    /// One of the six handshake steps.
    Handshake,
    /// FE ACK for the given command.
    Ack(u8),
    /// The first window ACK after metadata.
    InitialWindowAck,
    /// A window ACK inside the data loop.
    WindowAck,
    /// FILE_COMPLETE / SESSION_CLOSE at the end of the transfer.
    Completion,
    /// A 9E reply for the given command.
    QixReply(u8),
}

impl fmt::Display for WaitPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaitPoint::Handshake => write!(f, "handshake reply"),
            WaitPoint::Ack(cmd) => write!(f, "ACK for cmd 0x{cmd:02X}"),
            WaitPoint::InitialWindowAck => write!(f, "initial window ACK"),
            WaitPoint::WindowAck => write!(f, "window ACK"),
            WaitPoint::Completion => write!(f, "completion handshake"),
            WaitPoint::QixReply(cmd) => write!(f, "9E reply for cmd 0x{cmd:02X}"),
        }
    }
}

#[derive(Error, Debug)]
pub enum CoreError {
    #[error("transport unavailable: {0}")]
    Unavailable(String),

    #[error("timed out waiting for {waiting}")]
    Timeout { waiting: WaitPoint },

    #[error("protocol violation: {0}")]
    Protocol(#[from] FrameError),

    #[error("device reported status 0x{status:02X} during {phase}")]
    DeviceStatus { phase: &'static str, status: u8 },

    #[error("device rejected authentication")]
    AuthFailed,

    #[error("upload cancelled")]
    Cancelled,

    #[error("payload of {size} bytes outside the supported range 1..={limit}")]
    SizeLimit { size: usize, limit: usize },

    #[error(transparent)]
    Transport(#[from] TransportError),
}

impl CoreError {
    /// True for errors that best-effort phases swallow.
    pub fn is_timeout(&self) -> bool {
        matches!(self, CoreError::Timeout { .. })
    }
}
