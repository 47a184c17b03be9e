use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;

/// Key-value persistence used by the registry. TTL-capable; safe under
/// concurrent access; read-your-writes within one process. A failed call
/// is a retriable error, converted to 5xx at the request boundary.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>>;
    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()>;
    async fn delete(&self, key: &str) -> Result<bool>;

    /// All `(key, value)` pairs whose key starts with `prefix`.
    async fn scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>>;

    async fn set_many(&self, entries: Vec<(String, Vec<u8>, Option<Duration>)>) -> Result<()> {
        for (key, value, ttl) in entries {
            self.set(&key, value, ttl).await?;
        }
        Ok(())
    }
}

pub type SharedStore = Arc<dyn Store>;
