//! Chunked characteristic transport.
//!
//! Delivers an arbitrary-length UTF-8 payload to a write characteristic
//! despite single-write size limits: the payload is split into consecutive
//! fragments of the configured size, each fragment is base64-encoded (the
//! board decodes and concatenates fragments as they arrive), and fragments
//! are written strictly in order with a small pacing delay between writes.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use tracing::debug;
use uuid::Uuid;

use crate::backend::{BleBackend, WriteMode};
use crate::config::WRITE_PACING_DELAY;
use crate::error::{BleError, Result};

/// Split `payload` into fragments of at most `chunk_size` bytes and
/// base64-encode each fragment for the wire.
///
/// Decoding each fragment and concatenating in order reconstructs the
/// payload exactly.
///
/// # Panics
///
/// Panics if `chunk_size` is zero; [`crate::config::ProvisioningConfig`]
/// validation rejects that before transport runs.
#[must_use]
pub fn chunk_payload(payload: &[u8], chunk_size: usize) -> Vec<Vec<u8>> {
    assert!(chunk_size > 0, "fragment size must be non-zero");
    payload
        .chunks(chunk_size)
        .map(|fragment| BASE64.encode(fragment).into_bytes())
        .collect()
}

/// Write `payload` to the characteristic in paced, strictly ordered
/// fragments.
///
/// Returns the number of fragments written. A failed write aborts the
/// remaining sequence immediately; the payload must then be considered
/// undelivered as a whole.
pub(crate) async fn write_chunked(
    backend: &dyn BleBackend,
    device_id: &str,
    service: Uuid,
    characteristic: Uuid,
    payload: &[u8],
    chunk_size: usize,
    mode: WriteMode,
) -> Result<usize> {
    if chunk_size == 0 {
        return Err(BleError::InvalidConfig {
            field: "chunk_size".to_string(),
            message: "fragment size must be non-zero".to_string(),
        });
    }

    let fragments = chunk_payload(payload, chunk_size);
    debug!(
        fragments = fragments.len(),
        chunk_size,
        ?mode,
        "writing chunked payload"
    );

    for (index, fragment) in fragments.iter().enumerate() {
        if index > 0 {
            // Constrained firmware concatenates as fragments arrive; give its
            // receive buffer room between writes.
            tokio::time::sleep(WRITE_PACING_DELAY).await;
        }
        backend
            .write(device_id, service, characteristic, fragment, mode)
            .await?;
    }

    Ok(fragments.len())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::MockBackend;

    const DEVICE: &str = "F4:65:0B:4A:8A:C6";

    fn decode_concat(writes: &[crate::mock::RecordedWrite]) -> Vec<u8> {
        writes
            .iter()
            .flat_map(|w| BASE64.decode(&w.value).expect("valid base64 fragment"))
            .collect()
    }

    #[test]
    fn test_fragment_count_is_ceil_of_payload_over_chunk() {
        assert_eq!(chunk_payload(&[0u8; 41], 20).len(), 3);
        assert_eq!(chunk_payload(&[0u8; 40], 20).len(), 2);
        assert_eq!(chunk_payload(&[0u8; 1], 20).len(), 1);
        assert_eq!(chunk_payload(&[], 20).len(), 0);
    }

    #[test]
    fn test_fragments_roundtrip_to_original_payload() {
        let payload = br#"{"ssid":"HomeNet","pass":"secret123"}"#;
        for chunk_size in [1, 7, 20, 182, 4096] {
            let fragments = chunk_payload(payload, chunk_size);
            let decoded: Vec<u8> = fragments
                .iter()
                .flat_map(|f| BASE64.decode(f).unwrap())
                .collect();
            assert_eq!(decoded, payload.to_vec(), "chunk_size {chunk_size}");
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_writes_are_issued_in_order_and_complete() {
        let mock = MockBackend::new();
        let payload = b"0123456789abcdefghijklmnopqrstuvwxyz";

        let count = write_chunked(
            &mock,
            DEVICE,
            Uuid::nil(),
            Uuid::max(),
            payload,
            10,
            WriteMode::Acknowledged,
        )
        .await
        .unwrap();

        assert_eq!(count, 4);
        let writes = mock.writes();
        assert_eq!(writes.len(), 4);
        assert_eq!(decode_concat(&writes), payload.to_vec());
    }

    #[tokio::test(start_paused = true)]
    async fn test_acknowledged_flag_maps_directly_to_write_mode() {
        use crate::config::ProvisioningConfig;

        let acknowledged = ProvisioningConfig {
            use_acknowledged_writes: true,
            ..Default::default()
        };
        assert_eq!(acknowledged.write_mode(), WriteMode::Acknowledged);

        let unacknowledged = ProvisioningConfig {
            use_acknowledged_writes: false,
            ..Default::default()
        };
        assert_eq!(unacknowledged.write_mode(), WriteMode::Unacknowledged);

        // The mode reaches the platform write call unchanged.
        let mock = MockBackend::new();
        write_chunked(
            &mock,
            DEVICE,
            Uuid::nil(),
            Uuid::max(),
            b"payload",
            20,
            unacknowledged.write_mode(),
        )
        .await
        .unwrap();
        assert!(mock
            .writes()
            .iter()
            .all(|w| w.mode == WriteMode::Unacknowledged));
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_write_aborts_remaining_fragments() {
        let mock = MockBackend::new();
        mock.fail_write_at(1);

        let err = write_chunked(
            &mock,
            DEVICE,
            Uuid::nil(),
            Uuid::max(),
            &[0u8; 50],
            20,
            WriteMode::Acknowledged,
        )
        .await
        .unwrap_err();

        assert!(err.is_transport_error());
        assert_eq!(mock.writes().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_pacing_delay_between_fragments() {
        let mock = MockBackend::new();
        let start = tokio::time::Instant::now();

        write_chunked(
            &mock,
            DEVICE,
            Uuid::nil(),
            Uuid::max(),
            &[0u8; 60],
            20,
            WriteMode::Unacknowledged,
        )
        .await
        .unwrap();

        // Three fragments, two inter-fragment delays.
        assert_eq!(start.elapsed(), WRITE_PACING_DELAY * 2);
    }

    #[tokio::test]
    async fn test_zero_chunk_size_is_rejected() {
        let mock = MockBackend::new();
        let err = write_chunked(
            &mock,
            DEVICE,
            Uuid::nil(),
            Uuid::max(),
            b"x",
            0,
            WriteMode::Acknowledged,
        )
        .await
        .unwrap_err();
        assert!(err.is_config_error());
        assert!(mock.writes().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_empty_payload_issues_no_writes() {
        let mock = MockBackend::new();
        let count = write_chunked(
            &mock,
            DEVICE,
            Uuid::nil(),
            Uuid::max(),
            &[],
            20,
            WriteMode::Acknowledged,
        )
        .await
        .unwrap();
        assert_eq!(count, 0);
        assert!(mock.writes().is_empty());
    }

    #[test]
    #[should_panic(expected = "fragment size must be non-zero")]
    fn test_chunk_payload_panics_on_zero_chunk_size() {
        let _ = chunk_payload(b"x", 0);
    }
}
