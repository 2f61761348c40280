//! Per-upload bookkeeping.

use chrono::NaiveDateTime;

use crate::crc::crc16_xmodem;
use crate::protocol::constants::{DEFAULT_CHUNK_SIZE, MAX_CHUNK_SIZE, MAX_NAME_LEN};

/// What the payload bytes contain; selects the stored file extension.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// A JPEG still.
    Still,
    /// An MJPG/AVI animation.
    Animation,
}

impl MediaKind {
    pub fn extension(&self) -> &'static str {
        match self {
            MediaKind::Still => ".jpg",
            MediaKind::Animation => ".avi",
        }
    }

    fn name_prefix(&self) -> &'static str {
        match self {
            MediaKind::Still => "PIC",
            MediaKind::Animation => "MOV",
        }
    }
}

/// Mutable state of one upload, owned by the state machine.
pub(crate) struct UploadSession {
    /// Shared outbound sequence counter, wrapping at 256.
    seq: u8,
    pub payload_len: u32,
    pub file_crc: u16,
    pub chunk_size: u16,
    pub bytes_sent: u64,
    pub kind: MediaKind,
    pub name: String,
}

impl UploadSession {
    pub fn new(payload: &[u8], kind: MediaKind) -> Self {
        let name = format!(
            "{}{:04X}{}",
            kind.name_prefix(),
            rand::random::<u16>(),
            kind.extension()
        );
        debug_assert!(name.len() <= MAX_NAME_LEN);
        Self {
            seq: 0,
            payload_len: payload.len() as u32,
            file_crc: crc16_xmodem(payload),
            chunk_size: DEFAULT_CHUNK_SIZE,
            bytes_sent: 0,
            kind,
            name,
        }
    }

    /// Consume the current sequence value.
    pub fn next_seq(&mut self) -> u8 {
        let seq = self.seq;
        self.seq = self.seq.wrapping_add(1);
        seq
    }

    pub fn set_seq(&mut self, value: u8) {
        self.seq = value;
    }

    /// Adopt the device's suggested chunk size when plausible, otherwise
    /// keep the default.
    pub fn adopt_chunk_size(&mut self, suggested: u16) {
        self.chunk_size = if suggested > 0 && suggested <= MAX_CHUNK_SIZE {
            suggested
        } else {
            DEFAULT_CHUNK_SIZE
        };
    }

    /// Metadata body: sequence, big-endian size, whole-file CRC, a 2-byte
    /// nonce, then the NUL-terminated name.
    pub fn metadata_body(&mut self) -> Vec<u8> {
        let mut body = Vec::with_capacity(9 + self.name.len() + 1);
        body.push(self.next_seq());
        body.extend_from_slice(&self.payload_len.to_be_bytes());
        body.extend_from_slice(&self.file_crc.to_be_bytes());
        let nonce: [u8; 2] = rand::random();
        body.extend_from_slice(&nonce);
        body.extend_from_slice(self.name.as_bytes());
        body.push(0x00);
        body
    }
}

/// Stored-path reply for FILE_COMPLETE: `U+555C` + `YYYYMMDDHHMMSS` +
/// extension, UTF-16LE, double-NUL terminated.
pub(crate) fn completion_path(kind: MediaKind, timestamp: NaiveDateTime) -> Vec<u8> {
    let path = format!(
        "\u{555C}{}{}",
        timestamp.format("%Y%m%d%H%M%S"),
        kind.extension()
    );
    let mut bytes: Vec<u8> = path.encode_utf16().flat_map(u16::to_le_bytes).collect();
    bytes.extend_from_slice(&[0x00, 0x00]);
    bytes
}
