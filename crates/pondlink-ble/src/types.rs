//! Shared types for the provisioning flow.
//!
//! Most behavior lives in the phase modules (scanner, transport, ack); this
//! module holds the data they exchange: discovered devices, the caller-supplied
//! credentials, and the fixed wire payload.

use serde::{Deserialize, Serialize};

use crate::error::{BleError, Result};

/// One BLE peripheral seen during a scan.
///
/// Transient and never persisted: created on first advertisement sighting
/// within a scan window, updated in place when a later advertisement changes
/// `name` or `rssi`, and discarded wholesale when a new scan starts.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredDevice {
    /// Platform-assigned device identifier. Stable per OS session, not
    /// guaranteed stable across reboots.
    pub id: String,

    /// Advertised device name, if the device broadcasts one.
    pub name: Option<String>,

    /// Last-seen signal strength in dBm.
    pub rssi: Option<i16>,
}

/// Wi-Fi credentials to be delivered to a board.
///
/// Held only in memory for the duration of one provisioning call; never
/// logged or stored. The `Debug` impl redacts the password accordingly.
#[derive(Clone)]
pub struct WifiCredentials {
    /// Network name. Must be non-empty.
    pub ssid: String,

    /// Network password.
    pub wifi_password: String,
}

impl std::fmt::Debug for WifiCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WifiCredentials")
            .field("ssid", &self.ssid)
            .field("wifi_password", &"<redacted>")
            .finish()
    }
}

/// The JSON document written to the board, fragment by fragment.
///
/// Field names are a firmware contract: the board expects `ssid` and `pass`,
/// even though the in-memory structure says `wifi_password`.
#[derive(Serialize)]
struct WirePayload<'a> {
    ssid: &'a str,
    pass: &'a str,
}

impl WifiCredentials {
    /// Create credentials from caller-supplied values.
    pub fn new(ssid: impl Into<String>, wifi_password: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            wifi_password: wifi_password.into(),
        }
    }

    /// Validate the credentials before transmission.
    ///
    /// # Errors
    ///
    /// Returns [`BleError::InvalidConfig`] if the SSID is empty.
    pub fn validate(&self) -> Result<()> {
        if self.ssid.is_empty() {
            return Err(BleError::InvalidConfig {
                field: "ssid".to_string(),
                message: "SSID must not be empty".to_string(),
            });
        }
        Ok(())
    }

    /// Serialize the credentials into the UTF-8 JSON wire payload.
    ///
    /// # Errors
    ///
    /// Returns [`BleError::PayloadEncoding`] if serialization fails.
    pub fn wire_payload(&self) -> Result<Vec<u8>> {
        serde_json::to_vec(&WirePayload {
            ssid: &self.ssid,
            pass: &self.wifi_password,
        })
        .map_err(|e| BleError::PayloadEncoding(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_wire_payload_field_names_are_fixed() {
        let creds = WifiCredentials::new("HomeNet", "secret123");
        let payload = creds.wire_payload().unwrap();
        let json = String::from_utf8(payload).unwrap();
        assert_eq!(json, r#"{"ssid":"HomeNet","pass":"secret123"}"#);
    }

    #[test]
    fn test_empty_ssid_rejected() {
        let creds = WifiCredentials::new("", "secret123");
        let err = creds.validate().unwrap_err();
        assert_eq!(err.error_code(), "INVALID_CONFIG");
    }

    #[test]
    fn test_debug_redacts_password() {
        let creds = WifiCredentials::new("HomeNet", "secret123");
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("HomeNet"));
        assert!(rendered.contains("<redacted>"));
        assert!(!rendered.contains("secret123"));
    }

    #[test]
    fn test_discovered_device_serializes() {
        let device = DiscoveredDevice {
            id: "F4:65:0B:4A:8A:C6".to_string(),
            name: Some("PondBoard-01".to_string()),
            rssi: Some(-52),
        };
        let json = serde_json::to_string(&device).unwrap();
        assert!(json.contains("F4:65:0B:4A:8A:C6"));
        assert!(json.contains("-52"));
    }
}
