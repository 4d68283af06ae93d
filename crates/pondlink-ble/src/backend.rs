//! Platform capability interface.
//!
//! Every platform BLE stack is abstracted behind one trait, [`BleBackend`],
//! with implementations selected at composition time:
//!
//! - [`crate::bluez::BluezBackend`] — native-capable (Linux/BlueZ, feature
//!   `bluetooth`)
//! - [`UnsupportedBackend`] — runtimes without native BLE; every operation
//!   fails fast with [`BleError::UnsupportedRuntime`]
//! - `MockBackend` — scripted stack for tests (feature `mock-bluetooth`)
//!
//! The backend is an explicitly constructed, explicitly owned resource that
//! callers pass into components as `Arc<dyn BleBackend>`; there is no
//! module-level manager instance, and teardown is an explicit
//! [`BleBackend::shutdown`] call.

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::error::{BleError, Result};

/// How a characteristic write is issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Wait for peripheral-side confirmation before the call completes.
    Acknowledged,
    /// Fire-and-forget; lower latency, no delivery guarantee.
    Unacknowledged,
}

/// One advertisement sighting reported by the platform during a scan.
///
/// Scans are duplicate-permissive: multiple advertisements per device are
/// expected and drive RSSI freshness.
#[derive(Debug, Clone)]
pub struct Advertisement {
    /// Platform-assigned device identifier.
    pub id: String,
    /// Advertised name, if broadcast.
    pub name: Option<String>,
    /// Signal strength of this sighting, in dBm.
    pub rssi: Option<i16>,
}

/// Item on the scan stream: an advertisement, or a fatal platform scan error
/// that terminates the scan.
pub type ScanEvent = Result<Advertisement>;

/// Stream of raw notification values from a subscribed characteristic.
pub type NotificationStream = mpsc::Receiver<Vec<u8>>;

/// The platform BLE stack, as consumed by the provisioning core.
#[async_trait]
pub trait BleBackend: Send + Sync {
    /// Request the platform's Bluetooth scan/connect permissions.
    ///
    /// Returns whether permission was granted. Called once per scan start.
    async fn request_permissions(&self) -> Result<bool>;

    /// Begin an active, duplicate-permissive scan, optionally restricted to
    /// devices advertising one of `service_filter`.
    ///
    /// Returns the stream of scan events. The scan runs until
    /// [`BleBackend::stop_scan`] is called or the stream reports a fatal
    /// error.
    async fn start_scan(&self, service_filter: Option<Vec<Uuid>>)
        -> Result<mpsc::Receiver<ScanEvent>>;

    /// Stop an active scan. A no-op when no scan is running.
    async fn stop_scan(&self) -> Result<()>;

    /// Connect to a device, requesting `requested_mtu` as the transfer unit
    /// on platforms that support negotiation.
    async fn connect(&self, device_id: &str, requested_mtu: Option<u16>) -> Result<()>;

    /// Perform full service/characteristic discovery on a connected device.
    async fn discover_services(&self, device_id: &str) -> Result<()>;

    /// The transfer unit actually negotiated for the given characteristic,
    /// if the platform exposes it.
    async fn negotiated_mtu(
        &self,
        device_id: &str,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Option<u16>>;

    /// Whether the device is currently connected and exposes `service`.
    async fn is_connected(&self, device_id: &str, service: Uuid) -> Result<bool>;

    /// Release the connection to a device.
    async fn disconnect(&self, device_id: &str) -> Result<()>;

    /// Read the current value of a characteristic.
    async fn read(&self, device_id: &str, service: Uuid, characteristic: Uuid) -> Result<Vec<u8>>;

    /// Write a value to a characteristic with the given mode.
    async fn write(
        &self,
        device_id: &str,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
        mode: WriteMode,
    ) -> Result<()>;

    /// Subscribe to value-change notifications on a characteristic.
    async fn subscribe(
        &self,
        device_id: &str,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<NotificationStream>;

    /// Tear down a notification subscription.
    async fn unsubscribe(&self, device_id: &str, service: Uuid, characteristic: Uuid)
        -> Result<()>;

    /// Release every resource the backend holds. Terminal.
    async fn shutdown(&self) -> Result<()>;
}

/// Backend for runtimes without native BLE (web builds, sandboxed dev
/// environments).
///
/// Satisfies the same contract as the capable backends by failing every
/// operation fast with [`BleError::UnsupportedRuntime`], so callers get
/// "use a real device/build" instead of a hang or a silently empty scan.
#[derive(Debug, Default, Clone, Copy)]
pub struct UnsupportedBackend;

impl UnsupportedBackend {
    /// Create the stub backend.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

#[async_trait]
impl BleBackend for UnsupportedBackend {
    async fn request_permissions(&self) -> Result<bool> {
        Err(BleError::UnsupportedRuntime)
    }

    async fn start_scan(
        &self,
        _service_filter: Option<Vec<Uuid>>,
    ) -> Result<mpsc::Receiver<ScanEvent>> {
        Err(BleError::UnsupportedRuntime)
    }

    async fn stop_scan(&self) -> Result<()> {
        Err(BleError::UnsupportedRuntime)
    }

    async fn connect(&self, _device_id: &str, _requested_mtu: Option<u16>) -> Result<()> {
        Err(BleError::UnsupportedRuntime)
    }

    async fn discover_services(&self, _device_id: &str) -> Result<()> {
        Err(BleError::UnsupportedRuntime)
    }

    async fn negotiated_mtu(
        &self,
        _device_id: &str,
        _service: Uuid,
        _characteristic: Uuid,
    ) -> Result<Option<u16>> {
        Err(BleError::UnsupportedRuntime)
    }

    async fn is_connected(&self, _device_id: &str, _service: Uuid) -> Result<bool> {
        Err(BleError::UnsupportedRuntime)
    }

    async fn disconnect(&self, _device_id: &str) -> Result<()> {
        Err(BleError::UnsupportedRuntime)
    }

    async fn read(
        &self,
        _device_id: &str,
        _service: Uuid,
        _characteristic: Uuid,
    ) -> Result<Vec<u8>> {
        Err(BleError::UnsupportedRuntime)
    }

    async fn write(
        &self,
        _device_id: &str,
        _service: Uuid,
        _characteristic: Uuid,
        _value: &[u8],
        _mode: WriteMode,
    ) -> Result<()> {
        Err(BleError::UnsupportedRuntime)
    }

    async fn subscribe(
        &self,
        _device_id: &str,
        _service: Uuid,
        _characteristic: Uuid,
    ) -> Result<NotificationStream> {
        Err(BleError::UnsupportedRuntime)
    }

    async fn unsubscribe(
        &self,
        _device_id: &str,
        _service: Uuid,
        _characteristic: Uuid,
    ) -> Result<()> {
        Err(BleError::UnsupportedRuntime)
    }

    async fn shutdown(&self) -> Result<()> {
        Ok(())
    }
}
