//! Transport module - four-endpoint abstraction over BLE GATT.

pub mod ble;
pub mod mock;
pub mod traits;

pub use ble::BleTransport;
pub use mock::MockTransport;
pub use traits::{BadgeTransport, Endpoint, NotificationSink, TransportError};
