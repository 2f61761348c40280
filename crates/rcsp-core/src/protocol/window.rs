//! Window ACK parsing.
//!
//! During the data phase the device dictates what to send next with an
//! 8-byte ACK body under `(flag=0x80, cmd=0x1D)`:
//!
//! ```text
//! [ wa_seq(1) | status(1) | win_size(BE16) | next_offset(BE32) ]
//! ```

use byteorder::{BigEndian, ByteOrder};

use super::frame::FrameError;

/// One window grant from the device.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowAck {
    pub wa_seq: u8,
    pub status: u8,
    /// Maximum bytes the host may send before the next ACK.
    pub win_size: u16,
    /// Payload offset the window starts at.
    pub next_offset: u32,
}

impl WindowAck {
    pub const SIZE: usize = 8;

    pub fn from_body(body: &[u8]) -> Result<Self, FrameError> {
        if body.len() < Self::SIZE {
            return Err(FrameError::TooShort { actual: body.len() });
        }
        Ok(Self {
            wa_seq: body[0],
            status: body[1],
            win_size: BigEndian::read_u16(&body[2..4]),
            next_offset: BigEndian::read_u32(&body[4..8]),
        })
    }

    /// The commit window: offset zero with a window no larger than one
    /// chunk. The device uses the resulting prefix chunk as the final
    /// acknowledgment of the transfer.
    pub fn is_commit(&self, chunk_size: u16) -> bool {
        self.next_offset == 0 && self.win_size <= chunk_size
    }
}
