use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use netring_common::time::now_ts;
use netring_common::{MemberRecord, MemberStatus, Supervisor};
use netring_store::SharedStore;

use crate::analysis::ExpectedMembersAnalyzer;
use crate::config::RegistryConfig;
use crate::error::ApiError;
use crate::keys;

#[derive(Clone)]
pub struct AppState {
    pub store: SharedStore,
    pub cfg: Arc<RegistryConfig>,
    pub analyzer: Option<Arc<ExpectedMembersAnalyzer>>,
    pub supervisor: Supervisor,
    pub started_at: i64,
    last_store_read_error: Arc<AtomicI64>,
}

impl AppState {
    pub fn new(
        store: SharedStore,
        cfg: RegistryConfig,
        analyzer: Option<ExpectedMembersAnalyzer>,
    ) -> Self {
        Self {
            store,
            cfg: Arc::new(cfg),
            analyzer: analyzer.map(Arc::new),
            supervisor: Supervisor::new(),
            started_at: now_ts(),
            last_store_read_error: Arc::new(AtomicI64::new(0)),
        }
    }

    pub fn note_store_read_error(&self) {
        self.last_store_read_error.store(now_ts(), Ordering::Relaxed);
    }

    pub fn store_read_failed_within(&self, window: Duration) -> bool {
        let at = self.last_store_read_error.load(Ordering::Relaxed);
        at != 0 && now_ts() - at <= window.as_secs() as i64
    }

    /// Active records plus recently deregistered ones; anything past the
    /// deregistered grace window is filtered even if the sweep has not
    /// run yet.
    pub async fn list_members(&self) -> Result<Vec<MemberRecord>, ApiError> {
        let entries = self.store.scan(keys::MEMBER_PREFIX).await.map_err(|e| {
            self.note_store_read_error();
            ApiError::StoreRead(e)
        })?;

        let now = now_ts();
        let grace = self.cfg.deregistered_grace as i64;
        let mut members = Vec::with_capacity(entries.len());
        for (key, value) in entries {
            match serde_json::from_slice::<MemberRecord>(&value) {
                Ok(record) => {
                    let keep = match record.status {
                        MemberStatus::Active => true,
                        MemberStatus::Deregistered => record
                            .deregistered_at
                            .is_some_and(|at| now - at <= grace),
                    };
                    if keep {
                        members.push(record);
                    }
                }
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "dropping unparseable member record");
                }
            }
        }
        Ok(members)
    }

    pub async fn load_member(&self, instance_id: &str) -> Result<Option<MemberRecord>, ApiError> {
        let bytes = self
            .store
            .get(&keys::member_key(instance_id))
            .await
            .map_err(|e| {
                self.note_store_read_error();
                ApiError::StoreRead(e)
            })?;
        match bytes {
            Some(bytes) => {
                let record = serde_json::from_slice(&bytes)
                    .map_err(|e| ApiError::StoreRead(anyhow::Error::new(e)))?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    pub async fn save_member(&self, record: &MemberRecord) -> Result<(), ApiError> {
        let bytes =
            serde_json::to_vec(record).map_err(|e| ApiError::StoreWrite(anyhow::Error::new(e)))?;
        self.store
            .set(
                &keys::member_key(&record.instance_id),
                bytes,
                Some(self.member_record_ttl(record.status)),
            )
            .await
            .map_err(ApiError::StoreWrite)
    }

    /// Store TTLs carry enough slack past the logical deadline for the
    /// cleanup sweep to observe the record and transition it.
    pub fn member_record_ttl(&self, status: MemberStatus) -> Duration {
        let slack = 2 * self.cfg.cleanup_interval;
        let secs = match status {
            MemberStatus::Active => self.cfg.member_ttl + self.cfg.deregistered_grace + slack,
            MemberStatus::Deregistered => self.cfg.deregistered_grace + slack,
        };
        Duration::from_secs(secs)
    }
}
