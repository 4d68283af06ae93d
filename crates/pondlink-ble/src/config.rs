//! Provisioning configuration.
//!
//! Handles the per-call operation parameters for Wi-Fi provisioning:
//! - GATT endpoint UUIDs (service, write characteristic, optional notify
//!   characteristic)
//! - Transfer unit request and payload fragment sizing
//! - Write acknowledgement mode and acknowledgement timeout
//!
//! All fields have defaults; a config is constructed fresh per provisioning
//! call and not retained. TOML load/save is provided for callers (such as the
//! CLI) that keep firmware endpoint values in a file.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::backend::WriteMode;
use crate::error::{BleError, Result};

/// Placeholder service UUID, pending firmware-side values.
///
/// A configuration value, not a literal baked into logic: every code path
/// reads the UUID from [`ProvisioningConfig`].
pub const PLACEHOLDER_SERVICE_UUID: Uuid = Uuid::nil();

/// Placeholder write characteristic UUID ("all ones"), pending firmware-side
/// values.
pub const PLACEHOLDER_WRITE_CHARACTERISTIC_UUID: Uuid = Uuid::max();

/// Transfer unit requested at connection time on platforms that support
/// negotiation.
pub const DEFAULT_REQUESTED_MTU: u16 = 185;

/// Conservative fragment size matching the legacy minimum GATT payload.
pub const DEFAULT_CHUNK_SIZE: usize = 20;

/// ATT header overhead subtracted from a negotiated MTU when deriving the
/// fragment size.
pub const ATT_HEADER_OVERHEAD: u16 = 3;

/// Default time to wait for the board's completion notification.
pub const DEFAULT_ACK_TIMEOUT: Duration = Duration::from_secs(15);

/// Bounded timeout for a connection attempt.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// Pacing delay between fragment writes, protecting constrained firmware
/// from receive-buffer overrun.
pub const WRITE_PACING_DELAY: Duration = Duration::from_millis(10);

/// Default scan window.
pub const DEFAULT_SCAN_DURATION: Duration = Duration::from_secs(10);

/// Operation parameters for one provisioning call.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProvisioningConfig {
    /// GATT service exposing the provisioning characteristics.
    pub service_uuid: Uuid,

    /// Characteristic the credential payload is written to.
    pub write_characteristic_uuid: Uuid,

    /// Characteristic carrying the board's completion notification.
    ///
    /// When `None` (firmware without the notification), transport completion
    /// alone signals success.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub notify_characteristic_uuid: Option<Uuid>,

    /// Transfer unit to request at connection time, where supported.
    pub requested_mtu: u16,

    /// Override for the payload fragment size. When `None` the size is
    /// derived from the negotiated transfer unit, falling back to
    /// [`DEFAULT_CHUNK_SIZE`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<usize>,

    /// Whether each fragment write waits for a peripheral-side write
    /// acknowledgement. `true` maps to acknowledged writes, `false` to
    /// unacknowledged writes; see [`ProvisioningConfig::write_mode`].
    pub use_acknowledged_writes: bool,

    /// Maximum time to wait for the completion notification after the
    /// payload write finishes.
    #[serde(rename = "ack_timeout_ms", with = "duration_millis")]
    pub ack_timeout: Duration,
}

impl Default for ProvisioningConfig {
    fn default() -> Self {
        Self {
            service_uuid: PLACEHOLDER_SERVICE_UUID,
            write_characteristic_uuid: PLACEHOLDER_WRITE_CHARACTERISTIC_UUID,
            notify_characteristic_uuid: None,
            requested_mtu: DEFAULT_REQUESTED_MTU,
            chunk_size: None,
            use_acknowledged_writes: true,
            ack_timeout: DEFAULT_ACK_TIMEOUT,
        }
    }
}

impl ProvisioningConfig {
    /// Validate the configuration.
    ///
    /// # Errors
    ///
    /// Returns [`BleError::InvalidConfig`] naming the offending field.
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == Some(0) {
            return Err(BleError::InvalidConfig {
                field: "chunk_size".to_string(),
                message: "fragment size must be non-zero".to_string(),
            });
        }
        if self.ack_timeout.is_zero() {
            return Err(BleError::InvalidConfig {
                field: "ack_timeout_ms".to_string(),
                message: "acknowledgement timeout must be non-zero".to_string(),
            });
        }
        if self.requested_mtu < 23 {
            return Err(BleError::InvalidConfig {
                field: "requested_mtu".to_string(),
                message: "transfer unit below the GATT minimum of 23".to_string(),
            });
        }
        if self.notify_characteristic_uuid == Some(self.write_characteristic_uuid) {
            return Err(BleError::InvalidConfig {
                field: "notify_characteristic_uuid".to_string(),
                message: "notify and write characteristics must differ".to_string(),
            });
        }
        Ok(())
    }

    /// The write mode each fragment is issued with.
    ///
    /// The mapping is direct: `use_acknowledged_writes == true` means every
    /// fragment waits for peripheral confirmation.
    #[must_use]
    pub const fn write_mode(&self) -> WriteMode {
        if self.use_acknowledged_writes {
            WriteMode::Acknowledged
        } else {
            WriteMode::Unacknowledged
        }
    }

    /// The fragment size to use given the transfer unit the platform
    /// actually negotiated.
    ///
    /// An explicit `chunk_size` override always wins. Otherwise a negotiated
    /// unit larger than the legacy minimum yields `mtu - 3` (ATT header),
    /// and the conservative [`DEFAULT_CHUNK_SIZE`] applies when nothing was
    /// negotiated.
    #[must_use]
    pub fn effective_chunk_size(&self, negotiated_mtu: Option<u16>) -> usize {
        if let Some(size) = self.chunk_size {
            return size;
        }
        match negotiated_mtu {
            Some(mtu) if mtu > 23 => usize::from(mtu - ATT_HEADER_OVERHEAD),
            _ => DEFAULT_CHUNK_SIZE,
        }
    }

    /// Load configuration from a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed, or if the
    /// parsed configuration fails validation.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Self =
            toml::from_str(&content).map_err(|e| BleError::ConfigParse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| BleError::ConfigParse(e.to_string()))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// The default configuration file path for this platform.
    ///
    /// # Errors
    ///
    /// Returns an error if no suitable config directory can be determined.
    pub fn default_path() -> Result<PathBuf> {
        let dirs = directories::ProjectDirs::from("", "", "pondlink").ok_or_else(|| {
            BleError::InvalidConfig {
                field: "config_path".to_string(),
                message: "cannot determine config directory".to_string(),
            }
        })?;
        Ok(dirs.config_dir().join("provisioning.toml"))
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{self, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_u64(duration.as_millis() as u64)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Duration, D::Error>
    where
        D: Deserializer<'de>,
    {
        let ms = u64::deserialize(deserializer)?;
        Ok(Duration::from_millis(ms))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ProvisioningConfig::default();
        assert_eq!(config.service_uuid, PLACEHOLDER_SERVICE_UUID);
        assert_eq!(
            config.write_characteristic_uuid,
            PLACEHOLDER_WRITE_CHARACTERISTIC_UUID
        );
        assert!(config.notify_characteristic_uuid.is_none());
        assert_eq!(config.requested_mtu, 185);
        assert!(config.use_acknowledged_writes);
        assert_eq!(config.ack_timeout, Duration::from_secs(15));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_chunk_size_override_wins() {
        let config = ProvisioningConfig {
            chunk_size: Some(64),
            ..Default::default()
        };
        assert_eq!(config.effective_chunk_size(Some(185)), 64);
        assert_eq!(config.effective_chunk_size(None), 64);
    }

    #[test]
    fn test_chunk_size_derived_from_negotiated_mtu() {
        let config = ProvisioningConfig::default();
        assert_eq!(config.effective_chunk_size(Some(185)), 182);
    }

    #[test]
    fn test_chunk_size_falls_back_to_legacy_default() {
        let config = ProvisioningConfig::default();
        assert_eq!(config.effective_chunk_size(None), DEFAULT_CHUNK_SIZE);
        // A legacy-minimum negotiation is no better than the default.
        assert_eq!(config.effective_chunk_size(Some(23)), DEFAULT_CHUNK_SIZE);
    }

    #[test]
    fn test_zero_chunk_size_rejected() {
        let config = ProvisioningConfig {
            chunk_size: Some(0),
            ..Default::default()
        };
        let err = config.validate().unwrap_err();
        assert!(format!("{err}").contains("chunk_size"));
    }

    #[test]
    fn test_zero_ack_timeout_rejected() {
        let config = ProvisioningConfig {
            ack_timeout: Duration::ZERO,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_notify_must_differ_from_write() {
        let config = ProvisioningConfig {
            notify_characteristic_uuid: Some(PLACEHOLDER_WRITE_CHARACTERISTIC_UUID),
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_toml_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("provisioning.toml");

        let config = ProvisioningConfig {
            service_uuid: Uuid::parse_str("12345678-1234-5678-1234-56789abcdef0").unwrap(),
            notify_characteristic_uuid: Some(
                Uuid::parse_str("12345678-1234-5678-1234-56789abcdef1").unwrap(),
            ),
            chunk_size: Some(64),
            use_acknowledged_writes: false,
            ack_timeout: Duration::from_millis(2500),
            ..Default::default()
        };
        config.save(&path).unwrap();

        let loaded = ProvisioningConfig::load(&path).unwrap();
        assert_eq!(loaded.service_uuid, config.service_uuid);
        assert_eq!(
            loaded.notify_characteristic_uuid,
            config.notify_characteristic_uuid
        );
        assert_eq!(loaded.chunk_size, Some(64));
        assert!(!loaded.use_acknowledged_writes);
        assert_eq!(loaded.ack_timeout, Duration::from_millis(2500));
    }

    #[test]
    fn test_load_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("provisioning.toml");
        std::fs::write(&path, "chunk_size = 0\n").unwrap();
        assert!(ProvisioningConfig::load(&path).is_err());
    }
}
