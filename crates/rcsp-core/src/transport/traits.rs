//! Transport layer abstraction.
//!
//! The core never talks GATT directly; it sees four logical endpoints and
//! an inbound notification stream. This keeps the protocol stack testable
//! against a mock and leaves reconnection policy to the caller.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("no matching device found (filter: {filter})")]
    DeviceNotFound { filter: String },

    #[error("failed to connect: {0}")]
    ConnectFailed(String),

    #[error("characteristic {uuid} not present on device")]
    CharacteristicMissing { uuid: String },

    #[error("write failed on {endpoint:?}: {message}")]
    WriteFailed { endpoint: Endpoint, message: String },

    #[error("subscribe failed: {0}")]
    SubscribeFailed(String),

    #[error("endpoint {0:?} is not writable")]
    NotWritable(Endpoint),

    #[error("device disconnected")]
    Disconnected,
}

/// The four logical channels of a badge connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Endpoint {
    /// Host → device: auth bytes, FE commands, FE data frames.
    DataWrite,
    /// Device → host: FE responses and notifications.
    DataNotify,
    /// Host → device: 9E control writes.
    CtrlWrite,
    /// Device → host: 9E notifications.
    CtrlNotify,
}

impl Endpoint {
    pub fn is_writable(&self) -> bool {
        matches!(self, Endpoint::DataWrite | Endpoint::CtrlWrite)
    }
}

/// Inbound fan-in callback. Invoked once per notification with the source
/// endpoint and the intact payload.
pub type NotificationSink = Box<dyn Fn(Endpoint, Vec<u8>) + Send + Sync>;

/// Abstract badge transport.
///
/// Contract:
/// - writes on a single endpoint are serialized (a write starts only after
///   the previous one resolved);
/// - implementations prefer write-without-response where the endpoint
///   advertises it;
/// - every inbound payload is delivered intact to the registered sink.
pub trait BadgeTransport: Send + Sync {
    /// Write raw bytes to a writable endpoint.
    fn write(&self, endpoint: Endpoint, data: &[u8]) -> Result<(), TransportError>;

    /// Register the notification sink and start delivery.
    fn subscribe(&self, sink: NotificationSink) -> Result<(), TransportError>;

    /// Check whether the device is still connected.
    fn is_connected(&self) -> bool;
}
