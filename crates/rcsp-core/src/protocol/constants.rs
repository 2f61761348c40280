//! Protocol constants for the badge link layer.
//!
//! Recovered from captures of the vendor application; the endpoint UUIDs
//! and fixed control writes are reproduced byte for byte.

use std::time::Duration;
use uuid::Uuid;

// ============================================================================
// GATT endpoints
// ============================================================================

/// Data channel, host → device (auth bytes, commands, data frames).
pub const CHAR_DATA_WRITE: Uuid = Uuid::from_u128(0x0000AE01_0000_1000_8000_00805F9B34FB);
/// Data channel, device → host (responses and notifications).
pub const CHAR_DATA_NOTIFY: Uuid = Uuid::from_u128(0x0000AE02_0000_1000_8000_00805F9B34FB);
/// Control channel, host → device.
pub const CHAR_CTRL_WRITE: Uuid = Uuid::from_u128(0x0000FD02_0000_1000_8000_00805F9B34FB);
/// Control channel write fallback on newer firmware.
pub const CHAR_CTRL_WRITE_ALT: Uuid = Uuid::from_u128(0x0000FD04_0000_1000_8000_00805F9B34FB);
/// Control channel notification sources.
pub const CHAR_CTRL_NOTIFY: [Uuid; 3] = [
    Uuid::from_u128(0x0000FD01_0000_1000_8000_00805F9B34FB),
    Uuid::from_u128(0x0000FD03_0000_1000_8000_00805F9B34FB),
    Uuid::from_u128(0x0000FD05_0000_1000_8000_00805F9B34FB),
];

// ============================================================================
// FE frame envelope
// ============================================================================

pub const FRAME_MAGIC: [u8; 3] = [0xFE, 0xDC, 0xBA];
pub const FRAME_TERMINATOR: u8 = 0xEF;
/// Magic + flag + cmd + length + terminator.
pub const FRAME_OVERHEAD: usize = 8;

// ============================================================================
// FE commands
// ============================================================================

/// Reset auth flag (fixed body, no sequence byte).
pub const CMD_RESET_FLAG: u8 = 0x06;
/// Device info query (125-byte response).
pub const CMD_DEVICE_INFO: u8 = 0x03;
/// Device config query (56-byte response).
pub const CMD_DEVICE_CONFIG: u8 = 0x07;
/// Open an upload session.
pub const CMD_SESSION_OPEN: u8 = 0x21;
/// Negotiate transfer parameters.
pub const CMD_TRANSFER_PARAMS: u8 = 0x27;
/// File metadata (response carries the chunk size).
pub const CMD_FILE_METADATA: u8 = 0x1B;
/// Window ACK, device → host.
pub const CMD_WINDOW_ACK: u8 = 0x1D;
/// Data frame.
pub const CMD_DATA: u8 = 0x01;
/// Sub-op byte carried by every data frame body.
pub const DATA_FRAME_TAG: u8 = 0x1D;
/// Device asks for the stored path; host replies with it.
pub const CMD_FILE_COMPLETE: u8 = 0x20;
/// Session close with status.
pub const CMD_SESSION_CLOSE: u8 = 0x1C;

/// Auxiliary request/response opcodes.
pub const CMD_GET_FEATURE_MAP: u8 = 0x02;
pub const CMD_GET_TARGET_INFO: u8 = 0x03;
pub const CMD_GET_SYS_INFO: u8 = 0x07;
pub const CMD_FILE_BROWSE_START: u8 = 0x0C;
pub const CMD_FILE_BROWSE_STOP: u8 = 0x0D;
pub const CMD_SMALL_FILE: u8 = 0x28;

// ============================================================================
// 9E frame envelope and commands
// ============================================================================

pub const QIX_MAGIC: u8 = 0x9E;
/// Magic + checksum + flag + cmd + length.
pub const QIX_OVERHEAD: usize = 6;

/// Flag byte for set-style writes (no reply expected).
pub const QIX_FLAG_SET: u8 = 0x08;
/// Flag byte for request-style writes (reply expected).
pub const QIX_FLAG_GET: u8 = 0x0B;

pub const QIX_CMD_TIME_SET: u8 = 0x02;
pub const QIX_CMD_SETTINGS: u8 = 0x16;
pub const QIX_CMD_REQ_DATA: u8 = 0x29;
pub const QIX_CMD_RET_BATTERY: u8 = 0x27;
pub const QIX_CMD_REQ_SCREEN_INFO: u8 = 0xC6;
pub const QIX_CMD_RET_SCREEN_INFO: u8 = 0xC7;
pub const QIX_CMD_PREPARE: u8 = 0xDC;

/// First two bytes of the prepare-complete notification.
pub const QIX_READY_SIGNATURE: [u8; 2] = [0x9E, 0xE6];

/// Fixed control writes replayed during session bootstrap (the time-set
/// write is built dynamically because its payload carries the clock).
pub const QIX_WRITE_SETTINGS: &[u8] = &[0x9E, 0x20, 0x08, 0x16, 0x01, 0x00, 0x01];
pub const QIX_WRITE_HEARTBEAT: &[u8] = &[0x9E, 0xB5, 0x0B, 0x29, 0x01, 0x00, 0x80];
pub const QIX_WRITE_INFO_REQUEST: &[u8] = &[0x9E, 0xD3, 0x0B, 0xC6, 0x01, 0x00, 0x01];
pub const QIX_WRITE_PREPARE: &[u8] = &[0x9E, 0xF4, 0x0B, 0xDC, 0x01, 0x00, 0x0C];
/// Settings push group observed alongside the main settings write.
pub const QIX_WRITE_SETTINGS_AUX: [&[u8]; 3] = [
    &[0x9E, 0x30, 0x08, 0x20, 0x02, 0x00, 0xFF, 0x07],
    &[0x9E, 0x2B, 0x08, 0xFF, 0x02, 0x00, 0x22, 0x00],
    &[0x9E, 0x2D, 0x08, 0xFF, 0x02, 0x00, 0x24, 0x00],
];

// ============================================================================
// Session parameters
// ============================================================================

/// Chunk size used when the metadata ACK carries none (or a bad one).
pub const DEFAULT_CHUNK_SIZE: u16 = 490;
/// Largest chunk size the host will accept from the device.
pub const MAX_CHUNK_SIZE: u16 = 4096;
/// Hard payload ceiling; larger uploads are rejected before phase 1.
pub const MAX_PAYLOAD_LEN: usize = 2_000_000;
/// Device-side limit on the metadata file name (ASCII, without NUL).
pub const MAX_NAME_LEN: usize = 11;
/// Slots cycle 0..8 within one window.
pub const WINDOW_SLOTS: u8 = 8;
/// Notification queue capacity; the oldest entry is evicted beyond this.
pub const NOTIFICATION_QUEUE_CAP: usize = 200;

// ============================================================================
// Timeouts
// ============================================================================

/// Per-step budget during the auth handshake.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(5);
/// FE request/response ACKs.
pub const ACK_TIMEOUT: Duration = Duration::from_secs(8);
/// First window ACK after metadata; missing it fails the upload.
pub const INITIAL_WINDOW_ACK_TIMEOUT: Duration = Duration::from_secs(10);
/// Window ACKs and completion frames inside the data loop.
pub const WINDOW_EVENT_TIMEOUT: Duration = Duration::from_secs(15);
/// Best-effort 9E replies.
pub const QIX_REPLY_TIMEOUT: Duration = Duration::from_secs(3);
