//! Device discovery.
//!
//! Produces a live, deduplicated set of nearby devices for a bounded scan
//! window. The device set is written only by the scan's own consumer task;
//! callers observe it through snapshots.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::backend::{Advertisement, BleBackend};
use crate::error::{BleError, Result};
use crate::types::DiscoveredDevice;

struct ScanShared {
    devices: Mutex<HashMap<String, DiscoveredDevice>>,
    scanning: AtomicBool,
    last_error: Mutex<Option<BleError>>,
    task: Mutex<Option<JoinHandle<()>>>,
}

/// Bounded-window BLE device scanner.
///
/// Starting a scan clears the previous device set, requests platform
/// permissions, and arms an auto-stop timer; [`Scanner::stop_scan`] stops
/// early and cancels the pending auto-stop so a stale stop cannot fire into
/// a later scan.
pub struct Scanner {
    backend: Arc<dyn BleBackend>,
    shared: Arc<ScanShared>,
}

impl Scanner {
    /// Create a scanner over the given backend.
    #[must_use]
    pub fn new(backend: Arc<dyn BleBackend>) -> Self {
        Self {
            backend,
            shared: Arc::new(ScanShared {
                devices: Mutex::new(HashMap::new()),
                scanning: AtomicBool::new(false),
                last_error: Mutex::new(None),
                task: Mutex::new(None),
            }),
        }
    }

    /// Start a scan for `duration`, optionally restricted to devices
    /// advertising one of `service_filter`.
    ///
    /// # Errors
    ///
    /// - [`BleError::UnsupportedRuntime`] when the backend has no native BLE;
    ///   the scanning flag never becomes true
    /// - [`BleError::PermissionDenied`] when the platform refuses the scan
    ///   permission; the scan does not start
    /// - [`BleError::ScanFailed`] when the platform rejects the scan start
    pub async fn start_scan(
        &self,
        service_filter: Option<Vec<Uuid>>,
        duration: Duration,
    ) -> Result<()> {
        if self.shared.scanning.load(Ordering::SeqCst) {
            self.stop_scan().await?;
        }

        let granted = self.backend.request_permissions().await?;
        if !granted {
            return Err(BleError::PermissionDenied(
                "bluetooth scan/connect".to_string(),
            ));
        }

        lock(&self.shared.devices).clear();
        *lock(&self.shared.last_error) = None;

        let mut events = self.backend.start_scan(service_filter).await?;
        self.shared.scanning.store(true, Ordering::SeqCst);

        let backend = Arc::clone(&self.backend);
        let shared = Arc::clone(&self.shared);
        let handle = tokio::spawn(async move {
            let deadline = tokio::time::sleep(duration);
            tokio::pin!(deadline);
            loop {
                tokio::select! {
                    () = &mut deadline => {
                        debug!("scan window elapsed");
                        break;
                    }
                    event = events.recv() => match event {
                        Some(Ok(advertisement)) => upsert(&shared, advertisement),
                        Some(Err(error)) => {
                            warn!(%error, "scan error reported by platform, stopping scan");
                            *lock(&shared.last_error) = Some(error);
                            break;
                        }
                        None => break,
                    }
                }
            }
            let _ = backend.stop_scan().await;
            shared.scanning.store(false, Ordering::SeqCst);
        });
        *lock(&self.shared.task) = Some(handle);

        Ok(())
    }

    /// Stop an active scan early.
    ///
    /// Cancels the pending auto-stop timer before stopping the platform
    /// scan, so the earlier timer cannot fire into a subsequent scan.
    ///
    /// # Errors
    ///
    /// Propagates the backend's stop failure.
    pub async fn stop_scan(&self) -> Result<()> {
        if let Some(handle) = lock(&self.shared.task).take() {
            handle.abort();
        }
        self.backend.stop_scan().await?;
        self.shared.scanning.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Whether a scan window is currently open.
    #[must_use]
    pub fn is_scanning(&self) -> bool {
        self.shared.scanning.load(Ordering::SeqCst)
    }

    /// Snapshot of the discovered devices, sorted by id.
    #[must_use]
    pub fn devices(&self) -> Vec<DiscoveredDevice> {
        let mut devices: Vec<_> = lock(&self.shared.devices).values().cloned().collect();
        devices.sort_by(|a, b| a.id.cmp(&b.id));
        devices
    }

    /// Take the error that terminated the last scan, if any.
    #[must_use]
    pub fn take_last_scan_error(&self) -> Option<BleError> {
        lock(&self.shared.last_error).take()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().expect("scan state lock poisoned")
}

/// Insert the device if unseen; update in place only when `rssi` or `name`
/// changed. Static re-advertisements are dropped to avoid update churn.
/// Advertisements that omit a previously seen field do not erase it.
fn upsert(shared: &ScanShared, advertisement: Advertisement) {
    let mut devices = lock(&shared.devices);
    match devices.get_mut(&advertisement.id) {
        Some(existing) => {
            if advertisement.rssi.is_some() && existing.rssi != advertisement.rssi {
                existing.rssi = advertisement.rssi;
            }
            if advertisement.name.is_some() && existing.name != advertisement.name {
                existing.name = advertisement.name;
            }
        }
        None => {
            devices.insert(
                advertisement.id.clone(),
                DiscoveredDevice {
                    id: advertisement.id,
                    name: advertisement.name,
                    rssi: advertisement.rssi,
                },
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::UnsupportedBackend;
    use crate::mock::MockBackend;

    fn advertisement(id: &str, name: Option<&str>, rssi: Option<i16>) -> Advertisement {
        Advertisement {
            id: id.to_string(),
            name: name.map(str::to_string),
            rssi,
        }
    }

    fn scanner_with_mock() -> (Scanner, MockBackend) {
        let mock = MockBackend::new();
        let scanner = Scanner::new(Arc::new(mock.clone()));
        (scanner, mock)
    }

    #[tokio::test(start_paused = true)]
    async fn test_dedup_one_entry_per_device_with_latest_fields() {
        let (scanner, mock) = scanner_with_mock();

        mock.queue_advertisement(advertisement("AA", Some("PondBoard-01"), Some(-70)));
        mock.queue_advertisement(advertisement("AA", Some("PondBoard-01"), Some(-55)));
        mock.queue_advertisement(advertisement("AA", None, Some(-55)));
        mock.queue_advertisement(advertisement("BB", None, Some(-80)));

        scanner
            .start_scan(None, Duration::from_secs(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        let devices = scanner.devices();
        assert_eq!(devices.len(), 2);
        let first = &devices[0];
        assert_eq!(first.id, "AA");
        assert_eq!(first.rssi, Some(-55));
        // A later sighting without a name does not erase the known name.
        assert_eq!(first.name.as_deref(), Some("PondBoard-01"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_scan_stops_after_duration() {
        let (scanner, mock) = scanner_with_mock();
        mock.queue_advertisement(advertisement("AA", None, Some(-60)));

        scanner
            .start_scan(None, Duration::from_secs(10))
            .await
            .unwrap();
        assert!(scanner.is_scanning());

        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(!scanner.is_scanning());
        assert_eq!(mock.stop_scan_calls(), 1);

        // Advertisements after the window closes are not recorded.
        mock.queue_advertisement(advertisement("CC", None, Some(-40)));
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(scanner.devices().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_explicit_stop_cancels_pending_auto_stop() {
        let (scanner, mock) = scanner_with_mock();

        scanner
            .start_scan(None, Duration::from_secs(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;

        scanner.stop_scan().await.unwrap();
        assert!(!scanner.is_scanning());
        assert_eq!(mock.stop_scan_calls(), 1);

        // Past the original deadline: the cancelled timer must not fire a
        // second stop.
        tokio::time::sleep(Duration::from_secs(15)).await;
        assert_eq!(mock.stop_scan_calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_new_scan_clears_previous_devices() {
        let (scanner, mock) = scanner_with_mock();
        mock.queue_advertisement(advertisement("AA", None, Some(-60)));

        scanner
            .start_scan(None, Duration::from_secs(2))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;
        assert_eq!(scanner.devices().len(), 1);

        scanner
            .start_scan(None, Duration::from_secs(2))
            .await
            .unwrap();
        assert!(scanner.devices().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_permission_denied_prevents_scan() {
        let (scanner, mock) = scanner_with_mock();
        mock.set_permission_granted(false);

        let err = scanner
            .start_scan(None, Duration::from_secs(10))
            .await
            .unwrap_err();
        assert_eq!(err.error_code(), "PERMISSION_DENIED");
        assert!(!scanner.is_scanning());
    }

    #[tokio::test]
    async fn test_unsupported_runtime_fails_fast() {
        let scanner = Scanner::new(Arc::new(UnsupportedBackend::new()));

        let err = scanner
            .start_scan(None, Duration::from_secs(10))
            .await
            .unwrap_err();
        assert!(err.is_unsupported_runtime());
        assert!(!scanner.is_scanning());
    }

    #[tokio::test(start_paused = true)]
    async fn test_platform_scan_error_stops_scan_and_surfaces() {
        let (scanner, mock) = scanner_with_mock();
        mock.queue_advertisement(advertisement("AA", None, Some(-60)));
        mock.queue_scan_error("hci device busy");

        scanner
            .start_scan(None, Duration::from_secs(10))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(!scanner.is_scanning());
        let error = scanner.take_last_scan_error().expect("scan error recorded");
        assert_eq!(error.error_code(), "SCAN_FAILED");
        assert!(format!("{error}").contains("hci device busy"));
    }
}
