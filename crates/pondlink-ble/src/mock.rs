//! Scripted BLE backend for tests.
//!
//! `MockBackend` satisfies the full [`BleBackend`] contract with in-memory
//! bookkeeping: queued advertisements, recorded writes, scripted
//! notifications, and injectable failures (permission denial, scan error,
//! connect hang, write failure). The cleanup-invariant tests assert against
//! its recorded `unsubscribe`/`disconnect` calls.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use uuid::Uuid;

use crate::backend::{Advertisement, BleBackend, NotificationStream, ScanEvent, WriteMode};
use crate::error::{BleError, Result};

/// One recorded characteristic write.
#[derive(Debug, Clone)]
pub struct RecordedWrite {
    /// Target device.
    pub device_id: String,
    /// Target characteristic.
    pub characteristic: Uuid,
    /// Raw bytes passed to the backend.
    pub value: Vec<u8>,
    /// Mode the write was issued with.
    pub mode: WriteMode,
}

#[derive(Debug, Clone)]
enum ScriptedScanItem {
    Advertisement(Advertisement),
    Error(String),
}

#[derive(Default)]
struct MockState {
    permission_granted: bool,
    queued_scan_items: Vec<ScriptedScanItem>,
    scan_tx: Option<mpsc::Sender<ScanEvent>>,
    stop_scan_calls: usize,

    connected: HashSet<String>,
    connect_calls: Vec<(String, Option<u16>)>,
    connect_hangs: bool,
    fail_connect: Option<String>,
    discover_calls: Vec<String>,
    negotiated_mtu: Option<u16>,
    disconnect_calls: Vec<String>,

    writes: Vec<RecordedWrite>,
    fail_write_at: Option<usize>,
    read_value: Vec<u8>,

    notify_tx: Option<mpsc::Sender<Vec<u8>>>,
    auto_notify_after_writes: Option<(usize, Vec<u8>)>,
    fail_subscribe: Option<String>,
    subscribe_calls: Vec<(String, Uuid)>,
    unsubscribe_calls: Vec<(String, Uuid)>,

    // Flat call-order trace, for ordering assertions.
    operations: Vec<String>,

    shutdown_called: bool,
}

/// Scripted in-memory implementation of [`BleBackend`].
#[derive(Clone)]
pub struct MockBackend {
    state: Arc<Mutex<MockState>>,
}

impl Default for MockBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl MockBackend {
    /// Create a mock with permissions granted and no scripted failures.
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(MockState {
                permission_granted: true,
                ..MockState::default()
            })),
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().expect("mock state lock poisoned")
    }

    // --- scripting -------------------------------------------------------

    /// Script whether [`BleBackend::request_permissions`] grants.
    pub fn set_permission_granted(&self, granted: bool) {
        self.lock().permission_granted = granted;
    }

    /// Queue an advertisement. Delivered immediately when a scan is active,
    /// otherwise on the next `start_scan`.
    pub fn queue_advertisement(&self, advertisement: Advertisement) {
        let mut state = self.lock();
        if let Some(tx) = &state.scan_tx {
            let _ = tx.try_send(Ok(advertisement));
        } else {
            state
                .queued_scan_items
                .push(ScriptedScanItem::Advertisement(advertisement));
        }
    }

    /// Queue a fatal platform scan error.
    pub fn queue_scan_error(&self, message: impl Into<String>) {
        let message = message.into();
        let mut state = self.lock();
        if let Some(tx) = &state.scan_tx {
            let _ = tx.try_send(Err(BleError::ScanFailed(message)));
        } else {
            state
                .queued_scan_items
                .push(ScriptedScanItem::Error(message));
        }
    }

    /// Mark a device as already connected (connection-reuse scenarios).
    pub fn add_connected_device(&self, device_id: impl Into<String>) {
        self.lock().connected.insert(device_id.into());
    }

    /// Make `connect` never complete (connect-timeout scenarios).
    pub fn set_connect_hangs(&self, hangs: bool) {
        self.lock().connect_hangs = hangs;
    }

    /// Make `connect` fail with the given message.
    pub fn set_connect_failure(&self, message: impl Into<String>) {
        self.lock().fail_connect = Some(message.into());
    }

    /// Script the transfer unit reported by `negotiated_mtu`.
    pub fn set_negotiated_mtu(&self, mtu: Option<u16>) {
        self.lock().negotiated_mtu = mtu;
    }

    /// Make the `index`-th write (0-based) fail.
    pub fn fail_write_at(&self, index: usize) {
        self.lock().fail_write_at = Some(index);
    }

    /// Script the value returned by `read`.
    pub fn set_read_value(&self, value: Vec<u8>) {
        self.lock().read_value = value;
    }

    /// Make `subscribe` fail with the given message.
    pub fn set_subscribe_failure(&self, message: impl Into<String>) {
        self.lock().fail_subscribe = Some(message.into());
    }

    /// Push a notification frame to the active subscription.
    pub fn notify(&self, frame: Vec<u8>) {
        if let Some(tx) = &self.lock().notify_tx {
            let _ = tx.try_send(frame);
        }
    }

    /// Automatically push `frame` once `write_count` writes have completed.
    pub fn auto_notify_after_writes(&self, write_count: usize, frame: Vec<u8>) {
        self.lock().auto_notify_after_writes = Some((write_count, frame));
    }

    // --- inspection ------------------------------------------------------

    /// All writes recorded so far, in issue order.
    #[must_use]
    pub fn writes(&self) -> Vec<RecordedWrite> {
        self.lock().writes.clone()
    }

    /// Recorded `connect` calls as `(device_id, requested_mtu)`.
    #[must_use]
    pub fn connect_calls(&self) -> Vec<(String, Option<u16>)> {
        self.lock().connect_calls.clone()
    }

    /// Recorded `discover_services` calls.
    #[must_use]
    pub fn discover_calls(&self) -> Vec<String> {
        self.lock().discover_calls.clone()
    }

    /// Recorded `disconnect` calls.
    #[must_use]
    pub fn disconnect_calls(&self) -> Vec<String> {
        self.lock().disconnect_calls.clone()
    }

    /// Recorded `subscribe` calls as `(device_id, characteristic)`.
    #[must_use]
    pub fn subscribe_calls(&self) -> Vec<(String, Uuid)> {
        self.lock().subscribe_calls.clone()
    }

    /// Recorded `unsubscribe` calls as `(device_id, characteristic)`.
    #[must_use]
    pub fn unsubscribe_calls(&self) -> Vec<(String, Uuid)> {
        self.lock().unsubscribe_calls.clone()
    }

    /// Number of `stop_scan` calls.
    #[must_use]
    pub fn stop_scan_calls(&self) -> usize {
        self.lock().stop_scan_calls
    }

    /// Whether `shutdown` has been called.
    #[must_use]
    pub fn shutdown_called(&self) -> bool {
        self.lock().shutdown_called
    }

    /// Flat trace of backend calls (`"connect"`, `"write"`, `"subscribe"`,
    /// `"unsubscribe"`, `"disconnect"`, …) in invocation order.
    #[must_use]
    pub fn operation_log(&self) -> Vec<String> {
        self.lock().operations.clone()
    }
}

#[async_trait]
impl BleBackend for MockBackend {
    async fn request_permissions(&self) -> Result<bool> {
        Ok(self.lock().permission_granted)
    }

    async fn start_scan(
        &self,
        _service_filter: Option<Vec<Uuid>>,
    ) -> Result<mpsc::Receiver<ScanEvent>> {
        let (tx, rx) = mpsc::channel(256);
        let mut state = self.lock();
        for item in state.queued_scan_items.drain(..) {
            let event = match item {
                ScriptedScanItem::Advertisement(adv) => Ok(adv),
                ScriptedScanItem::Error(message) => Err(BleError::ScanFailed(message)),
            };
            let _ = tx.try_send(event);
        }
        state.scan_tx = Some(tx);
        Ok(rx)
    }

    async fn stop_scan(&self) -> Result<()> {
        let mut state = self.lock();
        state.stop_scan_calls += 1;
        state.scan_tx = None;
        Ok(())
    }

    async fn connect(&self, device_id: &str, requested_mtu: Option<u16>) -> Result<()> {
        let hangs = {
            let mut state = self.lock();
            state.operations.push("connect".to_string());
            state
                .connect_calls
                .push((device_id.to_string(), requested_mtu));
            if let Some(message) = state.fail_connect.clone() {
                return Err(BleError::DeviceNotFound(message));
            }
            state.connect_hangs
        };
        if hangs {
            tokio::time::sleep(Duration::from_secs(3600)).await;
        }
        self.lock().connected.insert(device_id.to_string());
        Ok(())
    }

    async fn discover_services(&self, device_id: &str) -> Result<()> {
        let mut state = self.lock();
        state.operations.push("discover".to_string());
        state.discover_calls.push(device_id.to_string());
        Ok(())
    }

    async fn negotiated_mtu(
        &self,
        _device_id: &str,
        _service: Uuid,
        _characteristic: Uuid,
    ) -> Result<Option<u16>> {
        Ok(self.lock().negotiated_mtu)
    }

    async fn is_connected(&self, device_id: &str, _service: Uuid) -> Result<bool> {
        Ok(self.lock().connected.contains(device_id))
    }

    async fn disconnect(&self, device_id: &str) -> Result<()> {
        let mut state = self.lock();
        state.operations.push("disconnect".to_string());
        state.connected.remove(device_id);
        state.disconnect_calls.push(device_id.to_string());
        Ok(())
    }

    async fn read(&self, _device_id: &str, _service: Uuid, _characteristic: Uuid) -> Result<Vec<u8>> {
        Ok(self.lock().read_value.clone())
    }

    async fn write(
        &self,
        device_id: &str,
        _service: Uuid,
        characteristic: Uuid,
        value: &[u8],
        mode: WriteMode,
    ) -> Result<()> {
        let auto_notify = {
            let mut state = self.lock();
            let index = state.writes.len();
            if state.fail_write_at == Some(index) {
                return Err(BleError::WriteFailed {
                    characteristic,
                    message: "scripted write failure".to_string(),
                });
            }
            state.operations.push("write".to_string());
            state.writes.push(RecordedWrite {
                device_id: device_id.to_string(),
                characteristic,
                value: value.to_vec(),
                mode,
            });
            match &state.auto_notify_after_writes {
                Some((count, frame)) if state.writes.len() == *count => {
                    state.notify_tx.as_ref().map(|tx| (tx.clone(), frame.clone()))
                }
                _ => None,
            }
        };
        if let Some((tx, frame)) = auto_notify {
            let _ = tx.try_send(frame);
        }
        Ok(())
    }

    async fn subscribe(
        &self,
        device_id: &str,
        _service: Uuid,
        characteristic: Uuid,
    ) -> Result<NotificationStream> {
        let mut state = self.lock();
        if let Some(message) = state.fail_subscribe.clone() {
            return Err(BleError::SubscribeFailed(message));
        }
        state.operations.push("subscribe".to_string());
        state
            .subscribe_calls
            .push((device_id.to_string(), characteristic));
        let (tx, rx) = mpsc::channel(16);
        state.notify_tx = Some(tx);
        Ok(rx)
    }

    async fn unsubscribe(
        &self,
        device_id: &str,
        _service: Uuid,
        characteristic: Uuid,
    ) -> Result<()> {
        let mut state = self.lock();
        state.operations.push("unsubscribe".to_string());
        state
            .unsubscribe_calls
            .push((device_id.to_string(), characteristic));
        state.notify_tx = None;
        Ok(())
    }

    async fn shutdown(&self) -> Result<()> {
        let mut state = self.lock();
        state.shutdown_called = true;
        state.scan_tx = None;
        state.notify_tx = None;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queued_advertisements_are_delivered_on_start() {
        let mock = MockBackend::new();
        mock.queue_advertisement(Advertisement {
            id: "F4:65:0B:4A:8A:C6".into(),
            name: Some("PondBoard-01".into()),
            rssi: Some(-40),
        });

        let mut rx = mock.start_scan(None).await.unwrap();
        let event = rx.recv().await.unwrap().unwrap();
        assert_eq!(event.id, "F4:65:0B:4A:8A:C6");
    }

    #[tokio::test]
    async fn test_scripted_write_failure_by_index() {
        let mock = MockBackend::new();
        mock.fail_write_at(1);

        let ok = mock
            .write("dev", Uuid::nil(), Uuid::max(), b"a", WriteMode::Acknowledged)
            .await;
        assert!(ok.is_ok());

        let err = mock
            .write("dev", Uuid::nil(), Uuid::max(), b"b", WriteMode::Acknowledged)
            .await;
        assert!(matches!(err, Err(BleError::WriteFailed { .. })));
        assert_eq!(mock.writes().len(), 1);
    }

    #[tokio::test]
    async fn test_auto_notify_fires_after_counted_write() {
        let mock = MockBackend::new();
        let mut rx = mock.subscribe("dev", Uuid::nil(), Uuid::max()).await.unwrap();
        mock.auto_notify_after_writes(1, b"OK".to_vec());

        mock.write("dev", Uuid::nil(), Uuid::max(), b"a", WriteMode::Acknowledged)
            .await
            .unwrap();

        assert_eq!(rx.recv().await.unwrap(), b"OK".to_vec());
    }
}
