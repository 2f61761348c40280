//! rcsp-core: Jieli RCSP upload protocol stack for BLE LED badges.
//!
//! This crate implements the host side of the link-layer protocol used to
//! push media (a JPEG still or an MJPG/AVI animation) to badge peripherals
//! running the Jieli RCSP firmware.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Crypto**: the vendor block cipher and the handshake messages
//! - **Protocol**: FE and 9E frame codecs, window-ACK parsing, constants
//! - **Transport**: four-endpoint abstraction (btleplug, mock)
//! - **Bus**: notification classification, auto-ack, predicate waiters
//! - **Session**: the upload state machine and windowed data pump
//! - **Rcsp**: auxiliary request/response surface (queries, small files)
//! - **Events**: observer pattern for UI decoupling
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use rcsp_core::{BleTransport, Connection, MediaKind};
//!
//! let transport = BleTransport::connect(None, Duration::from_secs(5))
//!     .expect("badge not found");
//! let connection = Connection::open(Arc::new(transport)).expect("subscribe failed");
//! let jpeg = std::fs::read("still.jpg").expect("read payload");
//! connection.upload(&jpeg, MediaKind::Still).expect("upload failed");
//! ```

pub mod auth;
pub mod bus;
pub mod config;
pub mod connection;
pub mod crc;
pub mod crypto;
pub mod error;
pub mod events;
pub mod protocol;
pub mod rcsp;
pub mod session;
pub mod transport;

// Re-exports for convenience
pub use config::UploadConfig;
pub use connection::Connection;
pub use error::{CoreError, WaitPoint};
pub use events::{LogLevel, NullObserver, TracingObserver, UploadEvent, UploadObserver, UploadPhase};
pub use rcsp::{Attr, BatteryStatus, DirEntry, RcspClient, ScreenInfo};
pub use session::{CancelHandle, MediaKind};
pub use transport::{BadgeTransport, BleTransport, Endpoint, MockTransport, TransportError};
