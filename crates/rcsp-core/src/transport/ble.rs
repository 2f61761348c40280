//! btleplug-based BLE transport.
//!
//! Bridges the async btleplug API to the blocking [`BadgeTransport`] trait
//! by owning a small tokio runtime. Writes prefer write-without-response
//! whenever the characteristic advertises it, and are serialized per
//! endpoint.

use std::sync::Mutex;
use std::time::Duration;

use btleplug::api::{
    Central, CharPropFlags, Characteristic, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral};
use futures::StreamExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::traits::{BadgeTransport, Endpoint, NotificationSink, TransportError};
use crate::protocol::constants::{
    CHAR_CTRL_NOTIFY, CHAR_CTRL_WRITE, CHAR_CTRL_WRITE_ALT, CHAR_DATA_NOTIFY, CHAR_DATA_WRITE,
};

/// Primary service advertised by the badge.
const SERVICE_DATA: Uuid = Uuid::from_u128(0x0000AE00_0000_1000_8000_00805F9B34FB);

pub struct BleTransport {
    runtime: tokio::runtime::Runtime,
    peripheral: Peripheral,
    data_write: Characteristic,
    ctrl_write: Characteristic,
    data_notify: Characteristic,
    ctrl_notify: Vec<Characteristic>,
    data_lock: Mutex<()>,
    ctrl_lock: Mutex<()>,
}

impl BleTransport {
    /// Scan for a badge and connect.
    ///
    /// With a `name_filter` the first peripheral whose name or address
    /// contains it wins; otherwise any peripheral advertising the badge
    /// data service is taken.
    pub fn connect(
        name_filter: Option<&str>,
        scan_timeout: Duration,
    ) -> Result<Self, TransportError> {
        let runtime = tokio::runtime::Builder::new_multi_thread()
            .worker_threads(2)
            .enable_all()
            .build()
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        let (peripheral, chars) =
            runtime.block_on(Self::discover(name_filter, scan_timeout))?;

        let find = |uuid: Uuid| -> Result<Characteristic, TransportError> {
            chars
                .iter()
                .find(|c| c.uuid == uuid)
                .cloned()
                .ok_or(TransportError::CharacteristicMissing {
                    uuid: uuid.to_string(),
                })
        };

        let data_write = find(CHAR_DATA_WRITE)?;
        let data_notify = find(CHAR_DATA_NOTIFY)?;
        let ctrl_write = find(CHAR_CTRL_WRITE).or_else(|_| find(CHAR_CTRL_WRITE_ALT))?;
        let ctrl_notify: Vec<Characteristic> = CHAR_CTRL_NOTIFY
            .iter()
            .filter_map(|uuid| chars.iter().find(|c| c.uuid == *uuid).cloned())
            .collect();

        info!(
            ctrl_notify = ctrl_notify.len(),
            "Badge characteristics resolved"
        );

        Ok(Self {
            runtime,
            peripheral,
            data_write,
            ctrl_write,
            data_notify,
            ctrl_notify,
            data_lock: Mutex::new(()),
            ctrl_lock: Mutex::new(()),
        })
    }

    async fn discover(
        name_filter: Option<&str>,
        scan_timeout: Duration,
    ) -> Result<(Peripheral, Vec<Characteristic>), TransportError> {
        let manager = Manager::new()
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        let adapter: Adapter = manager
            .adapters()
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?
            .into_iter()
            .next()
            .ok_or_else(|| TransportError::ConnectFailed("no Bluetooth adapter".into()))?;

        adapter
            .start_scan(ScanFilter::default())
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        tokio::time::sleep(scan_timeout).await;

        let peripherals = adapter
            .peripherals()
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        let mut target = None;
        for peripheral in peripherals {
            let Ok(Some(props)) = peripheral.properties().await else {
                continue;
            };
            let name = props.local_name.unwrap_or_default();
            let address = peripheral.address().to_string();
            let matches = match name_filter {
                Some(f) => name.contains(f) || address.contains(f),
                None => props.services.contains(&SERVICE_DATA),
            };
            if matches {
                debug!(name = %name, address = %address, "Badge candidate");
                target = Some(peripheral);
                break;
            }
        }
        let _ = adapter.stop_scan().await;

        let peripheral = target.ok_or_else(|| TransportError::DeviceNotFound {
            filter: name_filter.unwrap_or("badge service").to_string(),
        })?;

        peripheral
            .connect()
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;
        peripheral
            .discover_services()
            .await
            .map_err(|e| TransportError::ConnectFailed(e.to_string()))?;

        let chars = peripheral.characteristics().into_iter().collect();
        Ok((peripheral, chars))
    }

    fn write_char(
        &self,
        characteristic: &Characteristic,
        endpoint: Endpoint,
        data: &[u8],
    ) -> Result<(), TransportError> {
        let write_type = if characteristic
            .properties
            .contains(CharPropFlags::WRITE_WITHOUT_RESPONSE)
        {
            WriteType::WithoutResponse
        } else {
            WriteType::WithResponse
        };
        self.runtime
            .block_on(self.peripheral.write(characteristic, data, write_type))
            .map_err(|e| TransportError::WriteFailed {
                endpoint,
                message: e.to_string(),
            })
    }
}

impl BadgeTransport for BleTransport {
    fn write(&self, endpoint: Endpoint, data: &[u8]) -> Result<(), TransportError> {
        match endpoint {
            Endpoint::DataWrite => {
                let _serialized = self.data_lock.lock().unwrap();
                self.write_char(&self.data_write, endpoint, data)
            }
            Endpoint::CtrlWrite => {
                let _serialized = self.ctrl_lock.lock().unwrap();
                self.write_char(&self.ctrl_write, endpoint, data)
            }
            other => Err(TransportError::NotWritable(other)),
        }
    }

    fn subscribe(&self, sink: NotificationSink) -> Result<(), TransportError> {
        let data_uuid = self.data_notify.uuid;
        self.runtime.block_on(async {
            self.peripheral
                .subscribe(&self.data_notify)
                .await
                .map_err(|e| TransportError::SubscribeFailed(e.to_string()))?;
            for characteristic in &self.ctrl_notify {
                self.peripheral
                    .subscribe(characteristic)
                    .await
                    .map_err(|e| TransportError::SubscribeFailed(e.to_string()))?;
            }
            Ok::<(), TransportError>(())
        })?;

        let mut stream = self
            .runtime
            .block_on(self.peripheral.notifications())
            .map_err(|e| TransportError::SubscribeFailed(e.to_string()))?;

        self.runtime.spawn(async move {
            while let Some(notification) = stream.next().await {
                let endpoint = if notification.uuid == data_uuid {
                    Endpoint::DataNotify
                } else {
                    Endpoint::CtrlNotify
                };
                sink(endpoint, notification.value);
            }
            warn!("Notification stream ended");
        });
        Ok(())
    }

    fn is_connected(&self) -> bool {
        self.runtime
            .block_on(self.peripheral.is_connected())
            .unwrap_or(false)
    }
}
