//! FE frame codec for the data channel.
//!
//! ```text
//! FE DC BA | flag(1) | cmd(1) | length(BE16) | body[length] | EF
//! ```

use byteorder::{BigEndian, ByteOrder};
use thiserror::Error;

use super::constants::{FRAME_MAGIC, FRAME_OVERHEAD, FRAME_TERMINATOR};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum FrameError {
    #[error("frame too short: {actual} bytes")]
    TooShort { actual: usize },
    #[error("bad frame magic")]
    BadMagic,
    #[error("bad frame terminator")]
    BadTerminator,
    #[error("declared length {declared} does not match body length {actual}")]
    LengthMismatch { declared: usize, actual: usize },
    #[error("unknown frame flag 0x{0:02X}")]
    UnknownFlag(u8),
    #[error("checksum mismatch: computed 0x{computed:02X}, carried 0x{carried:02X}")]
    ChecksumMismatch { computed: u8, carried: u8 },
}

/// The three frame roles the device distinguishes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum FrameFlag {
    /// Reply to a command, host or device originated.
    Response = 0x00,
    /// Unsolicited notification or data frame.
    Notification = 0x80,
    /// Command expecting a response.
    Command = 0xC0,
}

impl FrameFlag {
    pub fn from_byte(b: u8) -> Result<Self, FrameError> {
        match b {
            0x00 => Ok(Self::Response),
            0x80 => Ok(Self::Notification),
            0xC0 => Ok(Self::Command),
            other => Err(FrameError::UnknownFlag(other)),
        }
    }
}

/// A decoded FE frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub flag: FrameFlag,
    pub cmd: u8,
    pub body: Vec<u8>,
}

impl Frame {
    pub fn new(flag: FrameFlag, cmd: u8, body: Vec<u8>) -> Self {
        Self { flag, cmd, body }
    }

    pub fn response(cmd: u8, body: Vec<u8>) -> Self {
        Self::new(FrameFlag::Response, cmd, body)
    }

    pub fn notification(cmd: u8, body: Vec<u8>) -> Self {
        Self::new(FrameFlag::Notification, cmd, body)
    }

    pub fn command(cmd: u8, body: Vec<u8>) -> Self {
        Self::new(FrameFlag::Command, cmd, body)
    }

    /// Serialize to wire bytes.
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(FRAME_OVERHEAD + self.body.len());
        buf.extend_from_slice(&FRAME_MAGIC);
        buf.push(self.flag as u8);
        buf.push(self.cmd);
        let mut len = [0u8; 2];
        BigEndian::write_u16(&mut len, self.body.len() as u16);
        buf.extend_from_slice(&len);
        buf.extend_from_slice(&self.body);
        buf.push(FRAME_TERMINATOR);
        buf
    }

    /// Parse wire bytes. The buffer must hold exactly one frame.
    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < FRAME_OVERHEAD {
            return Err(FrameError::TooShort {
                actual: bytes.len(),
            });
        }
        if bytes[..3] != FRAME_MAGIC {
            return Err(FrameError::BadMagic);
        }
        if bytes[bytes.len() - 1] != FRAME_TERMINATOR {
            return Err(FrameError::BadTerminator);
        }
        let declared = BigEndian::read_u16(&bytes[5..7]) as usize;
        let actual = bytes.len() - FRAME_OVERHEAD;
        if declared != actual {
            return Err(FrameError::LengthMismatch { declared, actual });
        }
        Ok(Self {
            flag: FrameFlag::from_byte(bytes[3])?,
            cmd: bytes[4],
            body: bytes[7..bytes.len() - 1].to_vec(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let frame = Frame::command(0x21, vec![0x03, 0x00]);
        let decoded = Frame::decode(&frame.encode()).unwrap();
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_roundtrip_empty_body() {
        let frame = Frame::response(0x0D, vec![]);
        let bytes = frame.encode();
        assert_eq!(bytes.len(), 8);
        assert_eq!(Frame::decode(&bytes).unwrap(), frame);
    }

    #[test]
    fn test_known_encoding() {
        let frame = Frame::notification(0x01, vec![0x06, 0x1D, 0x00, 0xC0, 0xB8]);
        assert_eq!(
            frame.encode(),
            [0xFE, 0xDC, 0xBA, 0x80, 0x01, 0x00, 0x05, 0x06, 0x1D, 0x00, 0xC0, 0xB8, 0xEF]
        );
    }

    #[test]
    fn test_decode_rejects_short_input() {
        assert_eq!(
            Frame::decode(&[0xFE, 0xDC, 0xBA, 0x00, 0x06, 0x00]),
            Err(FrameError::TooShort { actual: 6 })
        );
    }

    #[test]
    fn test_decode_rejects_bad_magic() {
        let mut bytes = Frame::response(0x06, vec![0x00]).encode();
        bytes[0] = 0xFD;
        assert_eq!(Frame::decode(&bytes), Err(FrameError::BadMagic));
    }

    #[test]
    fn test_decode_rejects_bad_terminator() {
        let mut bytes = Frame::response(0x06, vec![0x00]).encode();
        let last = bytes.len() - 1;
        bytes[last] = 0x00;
        assert_eq!(Frame::decode(&bytes), Err(FrameError::BadTerminator));
    }

    #[test]
    fn test_decode_rejects_length_mismatch() {
        let mut bytes = Frame::response(0x06, vec![0x00, 0x01]).encode();
        bytes[6] = 0x05;
        assert_eq!(
            Frame::decode(&bytes),
            Err(FrameError::LengthMismatch {
                declared: 5,
                actual: 2
            })
        );
    }

    #[test]
    fn test_decode_rejects_unknown_flag() {
        let mut bytes = Frame::response(0x06, vec![0x00]).encode();
        bytes[3] = 0x40;
        assert_eq!(Frame::decode(&bytes), Err(FrameError::UnknownFlag(0x40)));
    }
}
