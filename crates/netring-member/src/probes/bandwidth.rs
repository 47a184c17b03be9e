use std::time::{Duration, Instant};

use rand::RngCore;

/// Mbps for `bytes` transferred in `seconds`.
pub fn mbps(bytes: u64, seconds: f64) -> f64 {
    (bytes as f64 * 8.0) / (seconds * 1_000_000.0)
}

/// Upload a random payload to the peer's `/bandwidth_test` and derive
/// throughput from the wall clock between first byte sent and the ack.
/// Returns `None` on timeout, non-2xx, or transport error; the caller
/// keeps the last known value.
pub async fn measure(
    http: &reqwest::Client,
    ip: &str,
    port: u16,
    payload_bytes: usize,
    timeout: Duration,
) -> Option<f64> {
    let mut payload = vec![0u8; payload_bytes];
    rand::rng().fill_bytes(&mut payload);

    let url = format!("http://{ip}:{port}/bandwidth_test");
    let start = Instant::now();
    let resp = match http.post(&url).timeout(timeout).body(payload).send().await {
        Ok(resp) => resp,
        Err(e) => {
            tracing::debug!(url = %url, error = %e, "bandwidth test transport failure");
            return None;
        }
    };
    if !resp.status().is_success() {
        tracing::debug!(url = %url, status = %resp.status(), "bandwidth test rejected");
        return None;
    }
    // The ack body is part of the measured round trip.
    if resp.bytes().await.is_err() {
        return None;
    }

    let seconds = start.elapsed().as_secs_f64();
    if seconds <= 0.0 {
        return None;
    }
    Some(mbps(payload_bytes as u64, seconds))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mbps_formula() {
        // 1 MiB in one second is ~8.39 Mbps.
        let value = mbps(1_048_576, 1.0);
        assert!((value - 8.388608).abs() < 1e-9);
    }

    #[test]
    fn mbps_scales_inversely_with_time() {
        let fast = mbps(1_048_576, 0.1);
        let slow = mbps(1_048_576, 10.0);
        assert!((fast / slow - 100.0).abs() < 1e-6);
        assert!(fast > 0.0 && slow > 0.0);
    }

    #[test]
    fn mbps_within_tolerance_for_short_transfers() {
        // n bytes in t seconds must equal n*8 / (t * 10^6) within 1%.
        for (bytes, seconds) in [(10_485_760u64, 0.1f64), (1_048_576, 0.5), (524_288, 2.0)] {
            let reported = mbps(bytes, seconds);
            let expected = bytes as f64 * 8.0 / (seconds * 1e6);
            assert!((reported - expected).abs() / expected < 0.01);
        }
    }
}
