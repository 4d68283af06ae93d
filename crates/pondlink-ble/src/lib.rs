//! # pondlink-ble
//!
//! BLE Wi-Fi provisioning core for PondLink pond-monitoring boards.
//!
//! This crate provides:
//! - Bounded-window device discovery with a live, deduplicated device set
//! - Connection management with reuse, bounded timeouts, and transfer-unit
//!   requests
//! - MTU-aware chunked delivery of the credential payload
//! - An optional notification-based acknowledgement wait (`OK` / `ERROR …`)
//!
//! ## Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`backend`] - Platform capability interface and the unsupported-runtime stub
//! - [`bluez`] - Native BlueZ implementation (feature `bluetooth`)
//! - [`scanner`] - Device discovery with dedup and auto-stop
//! - [`transport`] - Chunked, paced, base64-framed characteristic writes
//! - `ack` - Acknowledgement waiter over the board's notification protocol
//! - [`provision`] - Orchestration of one provisioning call
//! - [`central`] - Caller-facing facade bundling the above
//! - [`config`] - Per-call provisioning parameters and their defaults
//! - [`types`] - Discovered devices, credentials, wire payload
//! - [`addr`] - Colon-insensitive device-address utilities
//! - [`error`] - Unified error types for the crate
//!
//! ## Example
//!
//! ```no_run
//! use pondlink_ble::{BleCentral, ProvisioningConfig, WifiCredentials};
//! use std::time::Duration;
//!
//! # async fn run() -> pondlink_ble::Result<()> {
//! let central = BleCentral::native().await?;
//! central.start_scan(None, Duration::from_secs(10)).await?;
//! tokio::time::sleep(Duration::from_secs(10)).await;
//!
//! if let Some(board) = central.devices().first() {
//!     central
//!         .provision_wifi(
//!             &board.id,
//!             &WifiCredentials::new("HomeNet", "secret123"),
//!             &ProvisioningConfig::default(),
//!         )
//!         .await?;
//! }
//! central.shutdown().await?;
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

mod ack;
pub mod addr;
pub mod backend;
#[cfg(feature = "bluetooth")]
pub mod bluez;
pub mod central;
pub mod config;
pub mod error;
#[cfg(any(test, feature = "mock-bluetooth"))]
pub mod mock;
pub mod provision;
pub mod scanner;
pub mod transport;
pub mod types;

// Re-export primary types for convenience
pub use backend::{
    Advertisement, BleBackend, NotificationStream, ScanEvent, UnsupportedBackend, WriteMode,
};
#[cfg(feature = "bluetooth")]
pub use bluez::BluezBackend;
pub use central::BleCentral;
pub use config::{
    ProvisioningConfig, CONNECT_TIMEOUT, DEFAULT_ACK_TIMEOUT, DEFAULT_CHUNK_SIZE,
    DEFAULT_REQUESTED_MTU, DEFAULT_SCAN_DURATION, PLACEHOLDER_SERVICE_UUID,
    PLACEHOLDER_WRITE_CHARACTERISTIC_UUID, WRITE_PACING_DELAY,
};
pub use error::{BleError, Result};
#[cfg(any(test, feature = "mock-bluetooth"))]
pub use mock::{MockBackend, RecordedWrite};
pub use provision::Provisioner;
pub use scanner::Scanner;
pub use transport::chunk_payload;
pub use types::{DiscoveredDevice, WifiCredentials};
