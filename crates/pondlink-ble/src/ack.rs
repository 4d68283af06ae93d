//! Acknowledgement waiter.
//!
//! Boards with completion-capable firmware report provisioning outcome
//! out-of-band: a UTF-8 notification starting with `OK` (success) or `ERROR`
//! plus a reason (failure). The waiter turns that callback-shaped protocol
//! into an awaitable result with a timeout fallback.
//!
//! The core piece is [`CompletionSlot`], a single-writer result slot created
//! before the notification subscription exists and completed exactly once;
//! a late notification after timeout is a no-op rather than a double
//! completion.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::{BleError, Result};

/// Token opening a success notification.
const TOKEN_OK: &str = "OK";
/// Token opening a failure notification.
const TOKEN_ERROR: &str = "ERROR";

/// A terminal signal parsed from a notification frame.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum AckSignal {
    /// Provisioning succeeded; carries the full notification text.
    Ok(String),
    /// The board rejected provisioning; carries the full notification text.
    Error(String),
}

/// Parse a notification frame against the completion protocol.
///
/// Frames that are not valid UTF-8 or do not start with a protocol token are
/// not terminal and are ignored by the waiter.
pub(crate) fn parse_notification(frame: &[u8]) -> Option<AckSignal> {
    let text = std::str::from_utf8(frame).ok()?;
    if text.starts_with(TOKEN_ERROR) {
        return Some(AckSignal::Error(text.to_string()));
    }
    if text.starts_with(TOKEN_OK) {
        return Some(AckSignal::Ok(text.to_string()));
    }
    None
}

/// A result slot that can be completed exactly once.
///
/// Cloned into whatever closure or task observes the platform callback;
/// completions after the first are dropped.
#[derive(Clone)]
pub(crate) struct CompletionSlot {
    tx: Arc<Mutex<Option<oneshot::Sender<Result<String>>>>>,
}

impl CompletionSlot {
    /// Create a slot and the receiver its outcome is consumed from.
    pub(crate) fn new() -> (Self, oneshot::Receiver<Result<String>>) {
        let (tx, rx) = oneshot::channel();
        (
            Self {
                tx: Arc::new(Mutex::new(Some(tx))),
            },
            rx,
        )
    }

    /// Complete the slot. Returns `false` if it was already completed.
    pub(crate) fn complete(&self, outcome: Result<String>) -> bool {
        let sender = self.tx.lock().expect("completion slot lock poisoned").take();
        match sender {
            Some(tx) => tx.send(outcome).is_ok(),
            None => false,
        }
    }
}

/// Consumes a notification stream and resolves once a terminal signal
/// arrives.
///
/// Created (and subscribed) before the payload write begins, so a board that
/// acknowledges faster than the write loop finishes cannot race past the
/// subscription.
pub(crate) struct AckWaiter {
    receiver: oneshot::Receiver<Result<String>>,
    parser: JoinHandle<()>,
}

impl AckWaiter {
    /// Attach a waiter to a notification stream.
    pub(crate) fn attach(mut notifications: mpsc::Receiver<Vec<u8>>) -> Self {
        let (slot, receiver) = CompletionSlot::new();
        let parser = tokio::spawn(async move {
            while let Some(frame) = notifications.recv().await {
                match parse_notification(&frame) {
                    Some(AckSignal::Ok(message)) => {
                        slot.complete(Ok(message));
                        return;
                    }
                    Some(AckSignal::Error(message)) => {
                        slot.complete(Err(BleError::AckRejected(message)));
                        return;
                    }
                    None => debug!(len = frame.len(), "ignoring non-terminal notification"),
                }
            }
            // Stream closed without a terminal signal; dropping the slot
            // wakes the waiter with NotificationsClosed.
        });
        Self { receiver, parser }
    }

    /// Wait for the terminal signal, up to `timeout` from now.
    ///
    /// # Errors
    ///
    /// - [`BleError::AckRejected`] when the board reports `ERROR …`
    /// - [`BleError::AckTimeout`] when no terminal signal arrives in time
    /// - [`BleError::NotificationsClosed`] when the stream ends first
    pub(crate) async fn wait(mut self, timeout: Duration) -> Result<String> {
        let outcome = tokio::time::timeout(timeout, &mut self.receiver).await;
        self.parser.abort();
        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(BleError::NotificationsClosed),
            Err(_) => Err(BleError::AckTimeout {
                ms: u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}

impl Drop for AckWaiter {
    fn drop(&mut self) {
        self.parser.abort();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ok_with_and_without_trailing_data() {
        assert_eq!(
            parse_notification(b"OK"),
            Some(AckSignal::Ok("OK".to_string()))
        );
        assert_eq!(
            parse_notification(b"OK connected 192.168.1.17"),
            Some(AckSignal::Ok("OK connected 192.168.1.17".to_string()))
        );
    }

    #[test]
    fn test_parse_error_keeps_full_message() {
        assert_eq!(
            parse_notification(b"ERROR bad_password"),
            Some(AckSignal::Error("ERROR bad_password".to_string()))
        );
    }

    #[test]
    fn test_parse_ignores_unrelated_frames() {
        assert_eq!(parse_notification(b"CONNECTING"), None);
        assert_eq!(parse_notification(b""), None);
        assert_eq!(parse_notification(&[0xFF, 0xFE]), None);
    }

    #[test]
    fn test_completion_slot_completes_exactly_once() {
        let (slot, mut rx) = CompletionSlot::new();

        assert!(slot.complete(Ok("OK".to_string())));
        // A late completion (e.g. a second notification) is a no-op.
        assert!(!slot.complete(Err(BleError::AckRejected("late".to_string()))));

        let outcome = rx.try_recv().unwrap();
        assert_eq!(outcome.unwrap(), "OK");
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_resolves_on_ok_before_timeout() {
        let (tx, rx) = mpsc::channel(4);
        let waiter = AckWaiter::attach(rx);

        tx.send(b"STATUS interim".to_vec()).await.unwrap();
        tx.send(b"OK".to_vec()).await.unwrap();

        let message = waiter.wait(Duration::from_secs(15)).await.unwrap();
        assert_eq!(message, "OK");
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_rejects_on_error_notification() {
        let (tx, rx) = mpsc::channel(4);
        let waiter = AckWaiter::attach(rx);

        tx.send(b"ERROR bad_password".to_vec()).await.unwrap();

        let err = waiter.wait(Duration::from_secs(15)).await.unwrap_err();
        assert!(matches!(&err, BleError::AckRejected(m) if m.contains("bad_password")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_times_out_at_deadline_not_earlier() {
        let (_tx, rx) = mpsc::channel::<Vec<u8>>(4);
        let waiter = AckWaiter::attach(rx);

        let start = tokio::time::Instant::now();
        let err = waiter.wait(Duration::from_millis(2500)).await.unwrap_err();

        assert_eq!(start.elapsed(), Duration::from_millis(2500));
        assert!(matches!(err, BleError::AckTimeout { ms: 2500 }));
    }

    #[tokio::test(start_paused = true)]
    async fn test_waiter_reports_closed_stream() {
        let (tx, rx) = mpsc::channel::<Vec<u8>>(4);
        let waiter = AckWaiter::attach(rx);
        drop(tx);

        let err = waiter.wait(Duration::from_secs(15)).await.unwrap_err();
        assert!(matches!(err, BleError::NotificationsClosed));
    }
}
