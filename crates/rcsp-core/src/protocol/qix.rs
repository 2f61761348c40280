//! 9E frame codec for the control channel.
//!
//! ```text
//! 9E | checksum(1) | flag(1) | cmd(1) | length(LE16) | payload[length]
//! ```
//!
//! The checksum is the wrapping byte sum of everything after it. The flag
//! byte carries a 4-bit serial in its high nibble and request/response bits
//! in the low one; in practice the vendor app only ever sends `0x08`
//! (set-style) and `0x0B` (request-style) with serial 0, and replies are
//! matched by command byte rather than serial.

use byteorder::{ByteOrder, LittleEndian};

use super::constants::{QIX_MAGIC, QIX_OVERHEAD};
use super::frame::FrameError;

/// A decoded 9E frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QixFrame {
    pub flag: u8,
    pub cmd: u8,
    pub payload: Vec<u8>,
}

impl QixFrame {
    pub fn new(cmd: u8, payload: Vec<u8>, flag: u8) -> Self {
        Self { flag, cmd, payload }
    }

    /// 4-bit serial from the flag's high nibble.
    pub fn serial(&self) -> u8 {
        self.flag >> 4
    }

    pub fn is_request(&self) -> bool {
        self.flag & 0x08 != 0
    }

    pub fn needs_response(&self) -> bool {
        self.flag & 0x02 != 0
    }

    /// Wrapping byte sum used as the frame checksum.
    pub fn checksum(tail: &[u8]) -> u8 {
        tail.iter().fold(0u8, |acc, &b| acc.wrapping_add(b))
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(QIX_OVERHEAD + self.payload.len());
        buf.push(QIX_MAGIC);
        buf.push(0); // checksum backfilled below
        buf.push(self.flag);
        buf.push(self.cmd);
        let mut len = [0u8; 2];
        LittleEndian::write_u16(&mut len, self.payload.len() as u16);
        buf.extend_from_slice(&len);
        buf.extend_from_slice(&self.payload);
        buf[1] = Self::checksum(&buf[2..]);
        buf
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < QIX_OVERHEAD {
            return Err(FrameError::TooShort {
                actual: bytes.len(),
            });
        }
        if bytes[0] != QIX_MAGIC {
            return Err(FrameError::BadMagic);
        }
        let computed = Self::checksum(&bytes[2..]);
        if computed != bytes[1] {
            return Err(FrameError::ChecksumMismatch {
                computed,
                carried: bytes[1],
            });
        }
        let declared = LittleEndian::read_u16(&bytes[4..6]) as usize;
        let actual = bytes.len() - QIX_OVERHEAD;
        if declared != actual {
            return Err(FrameError::LengthMismatch { declared, actual });
        }
        Ok(Self {
            flag: bytes[2],
            cmd: bytes[3],
            payload: bytes[6..].to_vec(),
        })
    }
}
