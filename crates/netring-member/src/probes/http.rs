use std::time::{Duration, Instant};

/// GET one endpoint on a peer's local server. Success iff the status is
/// in [200, 400); redirects count, server errors and timeouts do not.
pub async fn probe(
    http: &reqwest::Client,
    ip: &str,
    port: u16,
    endpoint: &str,
    timeout: Duration,
) -> (bool, Duration) {
    let url = format!("http://{ip}:{port}{endpoint}");
    let start = Instant::now();
    let ok = match http.get(&url).timeout(timeout).send().await {
        Ok(resp) => {
            let status = resp.status().as_u16();
            (200..400).contains(&status)
        }
        Err(_) => false,
    };
    (ok, start.elapsed())
}
