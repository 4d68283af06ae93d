//! Provisioning orchestration.
//!
//! Ties the phases together for one provisioning call:
//! connect/reuse → discover → subscribe (if a notify characteristic is
//! configured) → chunked write → acknowledgement wait → unconditional
//! cleanup. Also exposes the low-level read/write/monitor primitives for
//! bespoke characteristic interaction outside the Wi-Fi path.
//!
//! Provisioning is not idempotent-safe to retry blindly: re-invoking after a
//! partial failure re-triggers a fresh connection and a fresh write
//! sequence, and the board's tolerance for duplicate credential writes is
//! firmware-dependent. Accordingly, nothing here auto-retries.

use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::ack::AckWaiter;
use crate::backend::{BleBackend, NotificationStream, WriteMode};
use crate::config::{ProvisioningConfig, CONNECT_TIMEOUT};
use crate::error::{BleError, Result};
use crate::transport;
use crate::types::WifiCredentials;

/// Orchestrates connections and credential delivery over an owned backend.
pub struct Provisioner {
    backend: Arc<dyn BleBackend>,
}

impl Provisioner {
    /// Create a provisioner over the given backend.
    #[must_use]
    pub fn new(backend: Arc<dyn BleBackend>) -> Self {
        Self { backend }
    }

    /// Obtain a connected, service-discovered handle for `device_id`.
    ///
    /// Reuses an existing connection exposing the configured service when
    /// one is present (most BLE stacks disallow overlapping connect calls to
    /// the same peer); otherwise connects with a bounded timeout, requesting
    /// the configured transfer unit, and performs full discovery.
    ///
    /// # Errors
    ///
    /// [`BleError::ConnectTimeout`] when the attempt exceeds the bound;
    /// connection and discovery failures propagate. No automatic retry.
    pub async fn connect(&self, device_id: &str, config: &ProvisioningConfig) -> Result<()> {
        if self
            .backend
            .is_connected(device_id, config.service_uuid)
            .await?
        {
            debug!(device = %device_id, "reusing existing connection");
            return Ok(());
        }

        tokio::time::timeout(
            CONNECT_TIMEOUT,
            self.backend.connect(device_id, Some(config.requested_mtu)),
        )
        .await
        .map_err(|_| BleError::ConnectTimeout {
            device: device_id.to_string(),
            seconds: CONNECT_TIMEOUT.as_secs(),
        })??;

        self.backend.discover_services(device_id).await?;
        Ok(())
    }

    /// Deliver Wi-Fi credentials to a board.
    ///
    /// # Errors
    ///
    /// Credential/config validation, connection, transport, and
    /// acknowledgement failures all propagate; see [`BleError`] for the
    /// taxonomy. Cleanup (subscription teardown, connection release) runs on
    /// every exit path once a connection was established, so failures never
    /// leak an open connection or a dangling subscription.
    pub async fn provision_wifi(
        &self,
        device_id: &str,
        credentials: &WifiCredentials,
        config: &ProvisioningConfig,
    ) -> Result<()> {
        credentials.validate()?;
        config.validate()?;

        info!(device = %device_id, "provisioning Wi-Fi credentials");
        self.connect(device_id, config).await?;

        let result = self.deliver(device_id, credentials, config).await;

        // Unconditional cleanup: runs whether delivery succeeded, the write
        // failed mid-sequence, the board rejected, or the wait timed out.
        if let Some(notify_uuid) = config.notify_characteristic_uuid {
            if let Err(error) = self
                .backend
                .unsubscribe(device_id, config.service_uuid, notify_uuid)
                .await
            {
                warn!(device = %device_id, %error, "notification teardown failed");
            }
        }
        if let Err(error) = self.backend.disconnect(device_id).await {
            warn!(device = %device_id, %error, "connection release failed");
        }

        match &result {
            Ok(()) => info!(device = %device_id, "provisioning complete"),
            Err(error) => warn!(device = %device_id, %error, "provisioning failed"),
        }
        result
    }

    async fn deliver(
        &self,
        device_id: &str,
        credentials: &WifiCredentials,
        config: &ProvisioningConfig,
    ) -> Result<()> {
        // Subscribe before writing: a board that acknowledges faster than
        // the fragment loop finishes must not race past the subscription.
        let waiter = match config.notify_characteristic_uuid {
            Some(notify_uuid) => {
                let stream = self
                    .backend
                    .subscribe(device_id, config.service_uuid, notify_uuid)
                    .await?;
                Some(AckWaiter::attach(stream))
            }
            None => None,
        };

        let payload = credentials.wire_payload()?;
        let mtu = self
            .backend
            .negotiated_mtu(
                device_id,
                config.service_uuid,
                config.write_characteristic_uuid,
            )
            .await?;
        let chunk_size = config.effective_chunk_size(mtu);

        transport::write_chunked(
            self.backend.as_ref(),
            device_id,
            config.service_uuid,
            config.write_characteristic_uuid,
            &payload,
            chunk_size,
            config.write_mode(),
        )
        .await?;

        match waiter {
            Some(waiter) => {
                let message = waiter.wait(config.ack_timeout).await?;
                debug!(device = %device_id, ack = %message, "board acknowledged");
                Ok(())
            }
            // Firmware without the completion notification: transport
            // completion alone is the success signal.
            None => Ok(()),
        }
    }

    /// Read the current value of a characteristic on a connected device.
    ///
    /// # Errors
    ///
    /// Propagates the backend's read failure.
    pub async fn read(
        &self,
        device_id: &str,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<Vec<u8>> {
        self.backend.read(device_id, service, characteristic).await
    }

    /// Write a raw value to a characteristic on a connected device.
    ///
    /// # Errors
    ///
    /// Propagates the backend's write failure.
    pub async fn write(
        &self,
        device_id: &str,
        service: Uuid,
        characteristic: Uuid,
        value: &[u8],
        mode: WriteMode,
    ) -> Result<()> {
        self.backend
            .write(device_id, service, characteristic, value, mode)
            .await
    }

    /// Subscribe to value-change notifications on a characteristic.
    ///
    /// The caller owns the returned stream; drop it (or call the backend's
    /// unsubscribe) to stop monitoring.
    ///
    /// # Errors
    ///
    /// Propagates the backend's subscribe failure.
    pub async fn monitor(
        &self,
        device_id: &str,
        service: Uuid,
        characteristic: Uuid,
    ) -> Result<NotificationStream> {
        self.backend
            .subscribe(device_id, service, characteristic)
            .await
    }
}
