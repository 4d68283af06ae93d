//! Unified error types for the pondlink BLE core.
//!
//! This module provides a unified error type [`BleError`] that covers all
//! failure modes across the provisioning flow: runtime support, permissions,
//! scanning, connection, chunked transport, and acknowledgement.
//!
//! # Design Principles
//!
//! - **Specific variants**: Each error variant captures exactly one failure mode
//! - **Actionable messages**: Error messages guide users toward resolution
//! - **Distinguishable causes**: A peripheral rejection, an acknowledgement
//!   timeout, and an unreachable device are separate variants so callers can
//!   present something better than a generic failure message
//!
//! # Example
//!
//! ```rust
//! use pondlink_ble::error::{BleError, Result};
//!
//! fn check_ssid(ssid: &str) -> Result<()> {
//!     if ssid.is_empty() {
//!         return Err(BleError::InvalidConfig {
//!             field: "ssid".to_string(),
//!             message: "SSID must not be empty".to_string(),
//!         });
//!     }
//!     Ok(())
//! }
//! ```

use thiserror::Error;
use uuid::Uuid;

/// The unified error type for all pondlink BLE operations.
///
/// Each variant is designed to be:
///
/// 1. **Self-descriptive**: The variant name indicates the failure mode
/// 2. **Contextual**: Variants include relevant data for debugging
/// 3. **Actionable**: Error messages suggest how to resolve the issue
#[derive(Debug, Error)]
pub enum BleError {
    // =========================================================================
    // RUNTIME & PERMISSION ERRORS
    // =========================================================================
    /// BLE was requested on a runtime without native BLE support.
    ///
    /// Surfaced immediately and distinctly from permission or connectivity
    /// errors, so the caller can show "use a real device/build" rather than
    /// "check your Bluetooth".
    #[error("BLE is not supported in this runtime. Use a build with native Bluetooth support.")]
    UnsupportedRuntime,

    /// A required platform permission was refused.
    #[error("Bluetooth permission denied: {0}. Grant the permission and try again.")]
    PermissionDenied(String),

    /// No Bluetooth adapter was found on this system.
    #[error(
        "No Bluetooth adapter found. Ensure Bluetooth hardware is present and drivers are loaded."
    )]
    AdapterNotFound,

    /// The Bluetooth adapter exists but is powered off.
    #[error("Bluetooth adapter is powered off. Run 'bluetoothctl power on' to enable.")]
    AdapterPoweredOff,

    // =========================================================================
    // SCAN ERRORS
    // =========================================================================
    /// Device scanning failed with a platform-reported error.
    #[error("Bluetooth scan failed: {0}")]
    ScanFailed(String),

    // =========================================================================
    // CONNECTION ERRORS
    // =========================================================================
    /// The target device was not found or is not reachable.
    #[error("Device not reachable: '{0}'. Ensure the board is powered on and within range.")]
    DeviceNotFound(String),

    /// The connection attempt did not complete within the bounded timeout.
    #[error("Connection to '{device}' timed out after {seconds} seconds")]
    ConnectTimeout {
        /// Identifier of the device being connected.
        device: String,
        /// Timeout that elapsed.
        seconds: u64,
    },

    /// GATT service/characteristic discovery failed after connecting.
    #[error("Service discovery failed: {0}")]
    DiscoveryFailed(String),

    /// The expected GATT service was not present on the device.
    #[error("Service {0} not found on device. Check the configured service UUID.")]
    ServiceNotFound(Uuid),

    /// The expected GATT characteristic was not present in the service.
    #[error("Characteristic {0} not found. Check the configured characteristic UUIDs.")]
    CharacteristicNotFound(Uuid),

    // =========================================================================
    // TRANSPORT ERRORS
    // =========================================================================
    /// A characteristic write failed. The remaining fragment sequence is
    /// aborted and the whole payload must be considered undelivered.
    #[error("Write to characteristic {characteristic} failed: {message}")]
    WriteFailed {
        /// The characteristic the write targeted.
        characteristic: Uuid,
        /// The underlying platform error.
        message: String,
    },

    /// A characteristic read failed.
    #[error("Read from characteristic {characteristic} failed: {message}")]
    ReadFailed {
        /// The characteristic the read targeted.
        characteristic: Uuid,
        /// The underlying platform error.
        message: String,
    },

    /// Subscribing to characteristic notifications failed.
    #[error("Could not subscribe to notifications: {0}")]
    SubscribeFailed(String),

    /// The credential payload could not be serialized.
    #[error("Failed to encode provisioning payload: {0}")]
    PayloadEncoding(String),

    // =========================================================================
    // ACKNOWLEDGEMENT ERRORS
    // =========================================================================
    /// The peripheral reported a provisioning failure via its notification
    /// characteristic. The message carries the peripheral's reason text.
    #[error("Board rejected provisioning: {0}")]
    AckRejected(String),

    /// No terminal notification arrived before the acknowledgement timeout.
    ///
    /// Distinguishable from [`BleError::AckRejected`] so the caller can tell
    /// "peripheral rejected" from "peripheral unreachable/slow".
    #[error("No acknowledgement from board within {ms} ms")]
    AckTimeout {
        /// The timeout that elapsed, in milliseconds.
        ms: u64,
    },

    /// The notification stream closed before a terminal signal arrived.
    #[error("Notification stream closed before the board acknowledged")]
    NotificationsClosed,

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// A configuration value failed validation.
    #[error("Invalid configuration: {field}: {message}")]
    InvalidConfig {
        /// Name of the offending field.
        field: String,
        /// Why the value was rejected.
        message: String,
    },

    /// A configuration file exists but could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParse(String),

    /// A low-level I/O error occurred (config file access).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// A specialized [`Result`] type for pondlink BLE operations.
pub type Result<T> = std::result::Result<T, BleError>;

impl BleError {
    /// Returns `true` if this error means BLE is unavailable in the current
    /// runtime (as opposed to a device- or permission-level failure).
    #[inline]
    #[must_use]
    pub fn is_unsupported_runtime(&self) -> bool {
        matches!(self, Self::UnsupportedRuntime)
    }

    /// Returns `true` if this error is related to adapter state or permissions.
    #[inline]
    #[must_use]
    pub fn is_adapter_error(&self) -> bool {
        matches!(
            self,
            Self::PermissionDenied(_) | Self::AdapterNotFound | Self::AdapterPoweredOff
        )
    }

    /// Returns `true` if this error arose while establishing or using a
    /// connection to a device.
    #[inline]
    #[must_use]
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            Self::DeviceNotFound(_)
                | Self::ConnectTimeout { .. }
                | Self::DiscoveryFailed(_)
                | Self::ServiceNotFound(_)
                | Self::CharacteristicNotFound(_)
        )
    }

    /// Returns `true` if this error arose from the chunked transport phase.
    #[inline]
    #[must_use]
    pub fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::WriteFailed { .. }
                | Self::ReadFailed { .. }
                | Self::SubscribeFailed(_)
                | Self::PayloadEncoding(_)
        )
    }

    /// Returns `true` if this error arose from the acknowledgement phase.
    #[inline]
    #[must_use]
    pub fn is_ack_error(&self) -> bool {
        matches!(
            self,
            Self::AckRejected(_) | Self::AckTimeout { .. } | Self::NotificationsClosed
        )
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidConfig { .. } | Self::ConfigParse(_) | Self::Io(_)
        )
    }

    /// Returns `true` if retrying the same operation may succeed without
    /// user intervention.
    #[inline]
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::DeviceNotFound(_)
                | Self::ConnectTimeout { .. }
                | Self::ScanFailed(_)
                | Self::AckTimeout { .. }
        )
    }

    /// Returns a machine-readable error code for caller branching.
    #[inline]
    #[must_use]
    pub fn error_code(&self) -> &'static str {
        match self {
            Self::UnsupportedRuntime => "UNSUPPORTED_RUNTIME",
            Self::PermissionDenied(_) => "PERMISSION_DENIED",
            Self::AdapterNotFound => "ADAPTER_NOT_FOUND",
            Self::AdapterPoweredOff => "ADAPTER_POWERED_OFF",
            Self::ScanFailed(_) => "SCAN_FAILED",
            Self::DeviceNotFound(_) => "DEVICE_NOT_FOUND",
            Self::ConnectTimeout { .. } => "CONNECT_TIMEOUT",
            Self::DiscoveryFailed(_) => "DISCOVERY_FAILED",
            Self::ServiceNotFound(_) => "SERVICE_NOT_FOUND",
            Self::CharacteristicNotFound(_) => "CHARACTERISTIC_NOT_FOUND",
            Self::WriteFailed { .. } => "WRITE_FAILED",
            Self::ReadFailed { .. } => "READ_FAILED",
            Self::SubscribeFailed(_) => "SUBSCRIBE_FAILED",
            Self::PayloadEncoding(_) => "PAYLOAD_ENCODING",
            Self::AckRejected(_) => "ACK_REJECTED",
            Self::AckTimeout { .. } => "ACK_TIMEOUT",
            Self::NotificationsClosed => "NOTIFICATIONS_CLOSED",
            Self::InvalidConfig { .. } => "INVALID_CONFIG",
            Self::ConfigParse(_) => "CONFIG_PARSE",
            Self::Io(_) => "IO_ERROR",
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
