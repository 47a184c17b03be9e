use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use crate::types::Store;

/// Redis-backed store. The connection manager reconnects on its own; a
/// command issued while the server is away surfaces as a retriable error.
#[derive(Clone)]
pub struct RedisStore {
    conn: ConnectionManager,
}

impl RedisStore {
    pub async fn connect(host: &str, port: u16, db: i64, password: Option<&str>) -> Result<Self> {
        let auth = match password {
            Some(p) if !p.is_empty() => format!(":{p}@"),
            _ => String::new(),
        };
        let url = format!("redis://{auth}{host}:{port}/{db}");
        let client = redis::Client::open(url).context("invalid redis address")?;
        let conn = client
            .get_connection_manager()
            .await
            .context("failed to connect to redis")?;
        Ok(Self { conn })
    }

    fn ttl_secs(ttl: Duration) -> u64 {
        ttl.as_secs().max(1)
    }
}

#[async_trait]
impl Store for RedisStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let mut conn = self.conn.clone();
        let value: Option<Vec<u8>> = conn.get(key).await?;
        Ok(value)
    }

    async fn set(&self, key: &str, value: Vec<u8>, ttl: Option<Duration>) -> Result<()> {
        let mut conn = self.conn.clone();
        match ttl {
            Some(ttl) => conn.set_ex::<_, _, ()>(key, value, Self::ttl_secs(ttl)).await?,
            None => conn.set::<_, _, ()>(key, value).await?,
        }
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        let mut conn = self.conn.clone();
        let removed: i64 = conn.del(key).await?;
        Ok(removed > 0)
    }

    async fn scan(&self, prefix: &str) -> Result<Vec<(String, Vec<u8>)>> {
        let mut scan_conn = self.conn.clone();
        let mut keys: Vec<String> = Vec::new();
        {
            let mut iter = scan_conn
                .scan_match::<_, String>(format!("{prefix}*"))
                .await?;
            while let Some(key) = iter.next_item().await {
                keys.push(key);
            }
        }
        keys.sort();

        let mut conn = self.conn.clone();
        let mut out = Vec::with_capacity(keys.len());
        for key in keys {
            // A key may expire between SCAN and GET; skip it.
            if let Some(value) = conn.get::<_, Option<Vec<u8>>>(&key).await? {
                out.push((key, value));
            }
        }
        Ok(out)
    }

    async fn set_many(&self, entries: Vec<(String, Vec<u8>, Option<Duration>)>) -> Result<()> {
        let mut conn = self.conn.clone();
        let mut pipe = redis::pipe();
        for (key, value, ttl) in entries {
            match ttl {
                Some(ttl) => {
                    pipe.cmd("SET")
                        .arg(key)
                        .arg(value)
                        .arg("EX")
                        .arg(Self::ttl_secs(ttl))
                        .ignore();
                }
                None => {
                    pipe.cmd("SET").arg(key).arg(value).ignore();
                }
            }
        }
        pipe.query_async::<()>(&mut conn).await?;
        Ok(())
    }
}
