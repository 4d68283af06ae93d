//! Caller-facing facade.
//!
//! [`BleCentral`] bundles discovery and provisioning behind one explicitly
//! owned backend: scan for boards, pick one, deliver credentials, release
//! everything with [`BleCentral::shutdown`]. Callers needing bespoke
//! characteristic interaction outside the Wi-Fi path use the low-level
//! `read`/`write`/`monitor` primitives.

use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::backend::{BleBackend, NotificationStream, UnsupportedBackend, WriteMode};
use crate::config::ProvisioningConfig;
use crate::error::Result;
use crate::provision::Provisioner;
use crate::scanner::Scanner;
use crate::types::{DiscoveredDevice, WifiCredentials};

/// BLE central for pond-board discovery and Wi-Fi provisioning.
pub struct BleCentral {
    backend: Arc<dyn BleBackend>,
    scanner: Scanner,
    provisioner: Provisioner,
}

impl BleCentral {
    /// Create a central over an explicitly constructed backend.
    #[must_use]
    pub fn new(backend: Arc<dyn BleBackend>) -> Self {
        Self {
            scanner: Scanner::new(Arc::clone(&backend)),
            provisioner: Provisioner::new(Arc::clone(&backend)),
            backend,
        }
    }

    /// Create a central over the platform's native BLE stack.
    ///
    /// # Errors
    ///
    /// Returns [`crate::error::BleError::UnsupportedRuntime`] on builds
    /// without native BLE support, and adapter errors when the stack exists
    /// but is unusable.
    #[cfg(feature = "bluetooth")]
    pub async fn native() -> Result<Self> {
        let backend = crate::bluez::BluezBackend::new().await?;
        Ok(Self::new(Arc::new(backend)))
    }

    /// Create a central over the platform's native BLE stack.
    ///
    /// # Errors
    ///
    /// This build has no native BLE support; always returns
    /// [`crate::error::BleError::UnsupportedRuntime`].
    #[cfg(not(feature = "bluetooth"))]
    pub async fn native() -> Result<Self> {
        Err(crate::error::BleError::UnsupportedRuntime)
    }

    /// Create a central that fails every operation with the
    /// unsupported-runtime error.
    #[must_use]
    pub fn unsupported() -> Self {
        Self::new(Arc::new(UnsupportedBackend::new()))
    }

    /// Start a bounded scan for nearby boards. See [`Scanner::start_scan`].
    ///
    /// # Errors
    ///
    /// See [`Scanner::start_scan`].
    pub async fn start_scan(
        &self,
        service_filter: Option<Vec<Uuid>>,
        duration: Duration,
    ) -> Result<()> {
        self.scanner.start_scan(service_filter, duration).await
    }

    /// Stop an active scan early. See [`Scanner::stop_scan`].
    ///
    /// # Errors
    ///
    /// See [`Scanner::stop_scan`].
    pub async fn stop_scan(&self) -> Result<()> {
        self.scanner.stop_scan().await
    }

    /// Snapshot of the discovered devices.
    #[must_use]
    pub fn devices(&self) -> Vec<DiscoveredDevice> {
        self.scanner.devices()
    }

    /// Whether a scan window is currently open.
    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.scanner.is_scanning()
    }

    /// Take the error that terminated the last scan, if any.
    #[must_use]
    pub fn take_last_scan_error(&self) -> Option<crate::error::BleError> {
        self.scanner.take_last_scan_error()
    }

    /// Connect to a board (or reuse an existing connection).
    ///
    /// # Errors
    ///
    /// See [`Provisioner::connect`].
    pub async fn connect(&self, device_id: &str, config: &ProvisioningConfig) -> Result<()> {
        self.provisioner.connect(device_id, config).await
    }

    /// Deliver Wi-Fi credentials to a board.
    ///
    /// # Errors
    ///
    /// See [`Provisioner::provision_wifi`].
    pub async fn provision_wifi(
        &self,
        device_id: &str,
        credentials: &WifiCredentials,
        config: &ProvisioningConfig,
    ) -> Result<()> {
        self.provisioner
            .provision_wifi(device_id, credentials, config)
            .await
    }

    /// Read a characteristic on a connected board.
    ///
    /// # Errors
    ///
    /// See [`Provisioner::read`].
    pub async fn read(
        &self,
        device_id: &str,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Vec<u8>> {
        self.provisioner.read(device_id, service, characteristic).await
    }

    /// Write a raw value to a characteristic on a connected board.
    ///
    /// # Errors
    ///
    /// See [`Provisioner::write`].
    pub async fn write(
        &self,
        device_id: &str,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
        mode: WriteMode,
    ) -> Result<()> {
        self.provisioner
            .write(device_id, service, characteristic, value, mode)
            .await
    }

    /// Subscribe to value-change notifications on a characteristic.
    ///
    /// # Errors
    ///
    /// See [`Provisioner::monitor`].
    pub async fn monitor(
        &self,
        device_id: &str,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<NotificationStream> {
        self.provisioner
            .monitor(device_id, service, characteristic)
            .await
    }

    /// Stop scanning and release every backend resource. Terminal.
    ///
    /// # Errors
    ///
    /// Propagates the backend's teardown failure.
    pub async fn shutdown(&self) -> Result<()> {
        if self.scanner.is_scanning() {
            let _ = self.scanner.stop_scan().await;
        }
        self.backend.shutdown().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::Advertisement;
    use crate::mock::MockBackend;

    #[tokio::test(start_paused = true)]
    async fn test_scan_then_provision_flow() {
        let mock = MockBackend::new();
        let central = BleCentral::new(Arc::new(mock.clone()));

        mock.queue_advertisement(Advertisement {
            id: "F4:65:0B:4A:8A:C6".into(),
            name: Some("PondBoard-01".into()),
            rssi: Some(-48),
        });

        central
            .start_scan(None, Duration::from_secs(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(!central.is_scanning());

        let devices = central.devices();
        assert_eq!(devices.len(), 1);
        let board = &devices[0];

        mock.auto_notify_after_writes(2, b"OK".to_vec());
        let config = ProvisioningConfig {
            notify_characteristic_uuid: Some(
                Uuid::parse_str("12345678-1234-5678-1234-56789abcdef1").unwrap(),
            ),
            ..Default::default()
        };
        central
            .provision_wifi(&board.id, &WifiCredentials::new("HomeNet", "secret123"), &config)
            .await
            .unwrap();

        central.shutdown().await.unwrap();
        assert!(mock.shutdown_called());
    }

    #[tokio::test]
    async fn test_unsupported_central_fails_fast() {
        let central = BleCentral::unsupported();

        let err = central
            .start_scan(None, Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(err.is_unsupported_runtime());
        assert!(!central.is_scanning());

        let err = central
            .provision_wifi(
                "F4:65:0B:4A:8A:C6",
                &WifiCredentials::new("HomeNet", "secret123"),
                &ProvisioningConfig::default(),
            )
            .await
            .unwrap_err();
        assert!(err.is_unsupported_runtime());
    }
}
