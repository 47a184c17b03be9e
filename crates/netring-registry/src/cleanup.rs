use netring_common::time::now_ts;
use netring_common::{MemberRecord, MemberStatus};

use crate::handlers::StoredSnapshot;
use crate::keys;
use crate::state::AppState;

/// One pass of the background sweep: silent active members become
/// deregistered (the record is kept as an audit trail), deregistered
/// records past the grace window are purged, and stale pushed snapshots
/// are dropped.
pub async fn run_cleanup_sweep(st: &AppState) -> anyhow::Result<()> {
    let now = now_ts();
    let member_ttl = st.cfg.member_ttl as i64;
    let grace = st.cfg.deregistered_grace as i64;

    for (key, value) in st.store.scan(keys::MEMBER_PREFIX).await? {
        let mut record: MemberRecord = match serde_json::from_slice(&value) {
            Ok(record) => record,
            Err(e) => {
                tracing::warn!(key = %key, error = %e, "deleting unparseable member record");
                let _ = st.store.delete(&key).await;
                continue;
            }
        };

        match record.status {
            MemberStatus::Active if now - record.last_seen > member_ttl => {
                record.status = MemberStatus::Deregistered;
                record.deregistered_at = Some(now);
                st.save_member(&record)
                    .await
                    .map_err(|e| anyhow::anyhow!("failed to mark member lost: {e}"))?;
                tracing::info!(
                    instance_id = %record.instance_id,
                    location = %record.location,
                    silent_for = now - record.last_seen,
                    "member lost, marked deregistered"
                );
            }
            MemberStatus::Deregistered
                if now - record.deregistered_at.unwrap_or(record.last_seen) > grace =>
            {
                st.store.delete(&key).await?;
                tracing::debug!(instance_id = %record.instance_id, "purged deregistered member");
            }
            _ => {}
        }
    }

    let metrics_ttl = st.cfg.metrics_ttl as i64;
    for (key, value) in st.store.scan(keys::METRICS_PREFIX).await? {
        let stale = match serde_json::from_slice::<StoredSnapshot>(&value) {
            Ok(stored) => now - stored.reported_at > metrics_ttl,
            Err(_) => true,
        };
        if stale {
            st.store.delete(&key).await?;
            tracing::debug!(key = %key, "purged stale metrics snapshot");
        }
    }

    Ok(())
}
