//! BlueZ-backed implementation of [`BleBackend`] (Linux, feature
//! `bluetooth`).
//!
//! Central role over D-Bus via the `bluer` crate: device discovery streams,
//! connect-by-address, GATT characteristic read/write/notify. BlueZ
//! negotiates the transfer unit itself, so the requested MTU is advisory
//! here; the negotiated value is read back from the write characteristic.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use bluer::gatt::remote::{Characteristic, CharacteristicWriteRequest};
use bluer::gatt::WriteOp;
use bluer::{Adapter, AdapterEvent, Address, DiscoveryFilter, DiscoveryTransport, Session};
use futures::{pin_mut, StreamExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;
use uuid::Uuid;

use crate::addr;
use crate::backend::{Advertisement, BleBackend, NotificationStream, ScanEvent, WriteMode};
use crate::error::{BleError, Result};

/// How long to wait for BlueZ to finish resolving GATT services after a
/// connect, polled in steps.
const SERVICE_RESOLUTION_TIMEOUT: Duration = Duration::from_secs(10);
const SERVICE_RESOLUTION_POLL: Duration = Duration::from_millis(200);

/// Native BLE backend over BlueZ.
pub struct BluezBackend {
    _session: Session,
    adapter: Adapter,
    scan_task: Mutex<Option<JoinHandle<()>>>,
    subscriptions: Mutex<HashMap<(String, Uuid), JoinHandle<()>>>,
}

impl BluezBackend {
    /// Connect to the system Bluetooth daemon and claim the default adapter.
    ///
    /// # Errors
    ///
    /// - [`BleError::AdapterNotFound`] when no adapter (or no bluetoothd) is
    ///   available
    /// - [`BleError::AdapterPoweredOff`] when the adapter exists but is off
    pub async fn new() -> Result<Self> {
        let session = Session::new().await.map_err(|_| BleError::AdapterNotFound)?;
        let adapter = session
            .default_adapter()
            .await
            .map_err(|_| BleError::AdapterNotFound)?;
        if !adapter
            .is_powered()
            .await
            .map_err(|e| BleError::ScanFailed(e.to_string()))?
        {
            return Err(BleError::AdapterPoweredOff);
        }
        Ok(Self {
            _session: session,
            adapter,
            scan_task: Mutex::new(None),
            subscriptions: Mutex::new(HashMap::new()),
        })
    }

    fn device(&self, device_id: &str) -> Result<bluer::Device> {
        let address: Address = addr::format_address(device_id)
            .parse()
            .map_err(|_| BleError::DeviceNotFound(device_id.to_string()))?;
        self.adapter
            .device(address)
            .map_err(|_| BleError::DeviceNotFound(device_id.to_string()))
    }

    async fn characteristic(
        &self,
        device_id: &str,
        service_uuid: Uuid,
        characteristic_uuid: Uuid,
    ) -> Result<Characteristic> {
        let device = self.device(device_id)?;
        let services = device.services().await.map_err(discovery_err)?;
        for service in services {
            if service.uuid().await.map_err(discovery_err)? != service_uuid {
                continue;
            }
            for characteristic in service.characteristics().await.map_err(discovery_err)? {
                if characteristic.uuid().await.map_err(discovery_err)? == characteristic_uuid {
                    return Ok(characteristic);
                }
            }
            return Err(BleError::CharacteristicNotFound(characteristic_uuid));
        }
        Err(BleError::ServiceNotFound(service_uuid))
    }

    fn scan_task_slot(&self) -> MutexGuard<'_, Option<JoinHandle<()>>> {
        self.scan_task.lock().expect("scan task lock poisoned")
    }

    fn subscription_map(&self) -> MutexGuard<'_, HashMap<(String, Uuid), JoinHandle<()>>> {
        self.subscriptions
            .lock()
            .expect("subscription map lock poisoned")
    }
}

async fn read_advertisement(adapter: &Adapter, address: Address) -> bluer::Result<Advertisement> {
    let device = adapter.device(address)?;
    let name = device.name().await?;
    let rssi = device.rssi().await?;
    Ok(Advertisement {
        id: address.to_string(),
        name,
        rssi,
    })
}

fn discovery_err(error: bluer::Error) -> BleError {
    BleError::DiscoveryFailed(error.to_string())
}

#[async_trait]
impl BleBackend for BluezBackend {
    async fn request_permissions(&self) -> Result<bool> {
        // BlueZ has no runtime permission prompt; the adapter power state is
        // the effective gate.
        if !self
            .adapter
            .is_powered()
            .await
            .map_err(|e| BleError::ScanFailed(e.to_string()))?
        {
            return Err(BleError::AdapterPoweredOff);
        }
        Ok(true)
    }

    async fn start_scan(
        &self,
        service_filter: Option<Vec<Uuid>>,
    ) -> Result<mpsc::Receiver<ScanEvent>> {
        if let Some(uuids) = service_filter {
            let filter = DiscoveryFilter {
                uuids: uuids.into_iter().collect(),
                transport: DiscoveryTransport::Le,
                duplicate_data: true,
                ..Default::default()
            };
            self.adapter
                .set_discovery_filter(filter)
                .await
                .map_err(|e| BleError::ScanFailed(e.to_string()))?;
        }

        let (tx, rx) = mpsc::channel(64);
        let adapter = self.adapter.clone();
        let handle = tokio::spawn(async move {
            // `discover_devices_with_changes` re-emits DeviceAdded when a
            // known device's properties (RSSI, name) change, which is what
            // keeps the discovered set fresh.
            let events = match adapter.discover_devices_with_changes().await {
                Ok(events) => events,
                Err(error) => {
                    let _ = tx.send(Err(BleError::ScanFailed(error.to_string()))).await;
                    return;
                }
            };
            pin_mut!(events);
            while let Some(event) = events.next().await {
                if let AdapterEvent::DeviceAdded(address) = event {
                    match read_advertisement(&adapter, address).await {
                        Ok(advertisement) => {
                            if tx.send(Ok(advertisement)).await.is_err() {
                                break;
                            }
                        }
                        // Device vanished between event and property read.
                        Err(_) => continue,
                    }
                }
            }
        });
        *self.scan_task_slot() = Some(handle);
        Ok(rx)
    }

    async fn stop_scan(&self) -> Result<()> {
        // Dropping the discovery stream ends the BlueZ discovery session.
        if let Some(handle) = self.scan_task_slot().take() {
            handle.abort();
        }
        Ok(())
    }

    async fn connect(&self, device_id: &str, requested_mtu: Option<u16>) -> Result<()> {
        if let Some(mtu) = requested_mtu {
            debug!(device = %device_id, mtu, "BlueZ negotiates the transfer unit itself; request noted");
        }
        let device = self.device(device_id)?;
        device
            .connect()
            .await
            .map_err(|e| BleError::DeviceNotFound(format!("{device_id} ({e})")))
    }

    async fn discover_services(&self, device_id: &str) -> Result<()> {
        let device = self.device(device_id)?;
        // BlueZ resolves GATT services in the background after connect.
        let mut waited = Duration::ZERO;
        while waited < SERVICE_RESOLUTION_TIMEOUT {
            if device
                .is_services_resolved()
                .await
                .map_err(discovery_err)?
            {
                return Ok(());
            }
            tokio::time::sleep(SERVICE_RESOLUTION_POLL).await;
            waited += SERVICE_RESOLUTION_POLL;
        }
        Err(BleError::DiscoveryFailed(
            "service resolution timed out".to_string(),
        ))
    }

    async fn negotiated_mtu(
        &self,
        device_id: &str,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Option<u16>> {
        let characteristic = self
            .characteristic(device_id, service, characteristic)
            .await?;
        // Older BlueZ versions do not expose the MTU property.
        Ok(characteristic
            .mtu()
            .await
            .ok()
            .and_then(|mtu| u16::try_from(mtu).ok()))
    }

    async fn is_connected(&self, device_id: &str, service: Uuid) -> Result<bool> {
        let device = self.device(device_id)?;
        if !device
            .is_connected()
            .await
            .map_err(|e| BleError::DeviceNotFound(format!("{device_id} ({e})")))?
        {
            return Ok(false);
        }
        let uuids = device
            .uuids()
            .await
            .map_err(discovery_err)?
            .unwrap_or_default();
        Ok(uuids.contains(&service))
    }

    async fn disconnect(&self, device_id: &str) -> Result<()> {
        let device = self.device(device_id)?;
        device
            .disconnect()
            .await
            .map_err(|e| BleError::DeviceNotFound(format!("{device_id} ({e})")))
    }

    async fn read(&self, device_id: &str, service: Uuid, characteristic: Uuid) -> Result<Vec<u8>> {
        let ch = self.characteristic(device_id, service, characteristic).await?;
        ch.read().await.map_err(|e| BleError::ReadFailed {
            characteristic,
            message: e.to_string(),
        })
    }

    async fn write(
        &self,
        device_id: &str,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
        mode: WriteMode,
    ) -> Result<()> {
        let ch = self.characteristic(device_id, service, characteristic).await?;
        let op_type = match mode {
            WriteMode::Acknowledged => WriteOp::Request,
            WriteMode::Unacknowledged => WriteOp::Command,
        };
        ch.write_ext(
            value,
            &CharacteristicWriteRequest {
                op_type,
                ..Default::default()
            },
        )
        .await
        .map_err(|e| BleError::WriteFailed {
            characteristic,
            message: e.to_string(),
        })
    }

    async fn subscribe(
        &self,
        device_id: &str,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<NotificationStream> {
        let ch = self.characteristic(device_id, service, characteristic).await?;

        let (tx, rx) = mpsc::channel(16);
        let (ready_tx, ready_rx) = tokio::sync::oneshot::channel();
        let handle = tokio::spawn(async move {
            match ch.notify().await {
                Ok(notifications) => {
                    let _ = ready_tx.send(Ok(()));
                    pin_mut!(notifications);
                    while let Some(value) = notifications.next().await {
                        if tx.send(value).await.is_err() {
                            break;
                        }
                    }
                }
                Err(error) => {
                    let _ = ready_tx.send(Err(BleError::SubscribeFailed(error.to_string())));
                }
            }
        });
        ready_rx
            .await
            .map_err(|_| BleError::SubscribeFailed("subscription task exited".to_string()))??;
        let key = (addr::normalize_address(device_id), characteristic);
        if let Some(previous) = self.subscription_map().insert(key, handle) {
            previous.abort();
        }
        Ok(rx)
    }

    async fn unsubscribe(
        &self,
        device_id: &str,
        _service: Uuid,
        characteristic: Uuid,
    ) -> Result<()> {
        let key = (addr::normalize_address(device_id), characteristic);
        // Aborting the forwarder drops the notify stream, which makes BlueZ
        // send StopNotify.
        if let Some(handle) = self.subscription_map().remove(&key) {
            handle.abort();
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        if let Some(handle) = self.scan_task_slot().take() {
            handle.abort();
        }
        for (_, handle) in self.subscription_map().drain() {
            handle.abort();
        }
        Ok(())
    }
}
