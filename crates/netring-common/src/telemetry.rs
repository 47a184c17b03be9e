use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Initialize structured logging for a binary. Filtering comes from
/// `RUST_LOG`, defaulting to `info`.
pub fn init_tracing(service_name: &str) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(service_name, "logging initialized");
}

/// Gate for repetitive warnings: at most one log per `interval` per failure
/// kind. Callers check `allow(kind)` before emitting.
pub struct LogLimiter {
    interval: Duration,
    last: Mutex<HashMap<&'static str, Instant>>,
}

impl LogLimiter {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            last: Mutex::new(HashMap::new()),
        }
    }

    pub fn allow(&self, kind: &'static str) -> bool {
        let mut last = match self.last.lock() {
            Ok(guard) => guard,
            Err(_) => return true,
        };
        let now = Instant::now();
        match last.get(kind) {
            Some(prev) if now.duration_since(*prev) < self.interval => false,
            _ => {
                last.insert(kind, now);
                true
            }
        }
    }
}
