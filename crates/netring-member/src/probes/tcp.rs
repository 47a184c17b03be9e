use std::time::{Duration, Instant};

use tokio::net::TcpStream;

/// Success iff the connect completes within the timeout. The connection
/// is dropped immediately; only reachability is measured.
pub async fn probe(ip: &str, port: u16, timeout: Duration) -> (bool, Duration) {
    let start = Instant::now();
    let ok = matches!(
        tokio::time::timeout(timeout, TcpStream::connect((ip, port))).await,
        Ok(Ok(_))
    );
    (ok, start.elapsed())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn reachable_listener_succeeds() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();

        let (ok, elapsed) = probe("127.0.0.1", port, Duration::from_secs(1)).await;
        assert!(ok);
        assert!(elapsed < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn closed_port_fails() {
        // Bind then drop to get a port nothing is listening on.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let (ok, _) = probe("127.0.0.1", port, Duration::from_secs(1)).await;
        assert!(!ok);
    }
}
