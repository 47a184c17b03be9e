use std::net::IpAddr;
use std::time::Duration;

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};
use serde_json::json;
use uuid::Uuid;

use netring_common::time::now_ts;
use netring_common::{
    ClearResponse, DeregisterRequest, HeartbeatRequest, MemberRecord, MemberStatus,
    MembersResponse, MetricsResponse, RegisterRequest, RegisterResponse, ReportMetricsRequest,
    StatusResponse,
};

use crate::analysis::MissingAnalysis;
use crate::error::ApiError;
use crate::keys;
use crate::state::AppState;

/// Envelope for a pushed snapshot at rest; `reported_at` drives the stale
/// sweep.
#[derive(Debug, Serialize, Deserialize)]
pub struct StoredSnapshot {
    pub snapshot: serde_json::Value,
    pub reported_at: i64,
}

#[derive(Debug, Serialize)]
pub struct MembersWithAnalysisResponse {
    pub members: Vec<MemberRecord>,
    pub missing_analysis: MissingAnalysis,
    pub timestamp: i64,
}

pub async fn register(
    State(st): State<AppState>,
    Json(req): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, ApiError> {
    if req.location.trim().is_empty() {
        return Err(ApiError::InvalidInput("location must not be empty".into()));
    }
    if req.port == 0 {
        return Err(ApiError::InvalidInput("port must be in [1, 65535]".into()));
    }
    if req.ip.parse::<IpAddr>().is_err() {
        return Err(ApiError::InvalidInput(format!(
            "ip '{}' is not a valid address",
            req.ip
        )));
    }

    let now = now_ts();
    let instance_id = req
        .instance_id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| Uuid::new_v4().to_string());

    let record = match st.load_member(&instance_id).await? {
        Some(mut existing) => {
            existing.location = req.location;
            existing.ip = req.ip;
            existing.port = req.port;
            existing.last_seen = now;
            existing.status = MemberStatus::Active;
            existing.deregistered_at = None;
            existing
        }
        None => MemberRecord {
            instance_id: instance_id.clone(),
            location: req.location,
            ip: req.ip,
            port: req.port,
            registered_at: now,
            last_seen: now,
            status: MemberStatus::Active,
            deregistered_at: None,
        },
    };

    st.save_member(&record).await?;
    tracing::info!(instance_id = %record.instance_id, location = %record.location, "registered member");

    Ok(Json(RegisterResponse {
        instance_id,
        status: "registered".to_string(),
    }))
}

pub async fn heartbeat(
    State(st): State<AppState>,
    Json(req): Json<HeartbeatRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let mut record = st
        .load_member(&req.instance_id)
        .await?
        .ok_or(ApiError::MemberNotFound)?;

    if record.status == MemberStatus::Deregistered {
        return Err(ApiError::MemberGone);
    }

    record.last_seen = now_ts();
    st.save_member(&record).await?;

    Ok(Json(StatusResponse {
        status: "ok".to_string(),
    }))
}

pub async fn deregister(
    State(st): State<AppState>,
    Json(req): Json<DeregisterRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    if let Some(mut record) = st.load_member(&req.instance_id).await? {
        // Repeat calls keep the first deregistration timestamp.
        if record.status == MemberStatus::Active {
            record.status = MemberStatus::Deregistered;
            record.deregistered_at = Some(now_ts());
            st.save_member(&record).await?;
            tracing::info!(instance_id = %record.instance_id, location = %record.location, "deregistered member");
        }
    }

    Ok(Json(StatusResponse {
        status: "deregistered".to_string(),
    }))
}

pub async fn members(State(st): State<AppState>) -> Result<Json<MembersResponse>, ApiError> {
    Ok(Json(MembersResponse {
        members: st.list_members().await?,
    }))
}

pub async fn members_with_analysis(
    State(st): State<AppState>,
) -> Result<Json<MembersWithAnalysisResponse>, ApiError> {
    let members = st.list_members().await?;
    let now = now_ts();

    let missing_analysis = match &st.analyzer {
        Some(analyzer) => analyzer
            .analyze(st.store.as_ref(), &members, now)
            .await
            .map_err(|e| {
                st.note_store_read_error();
                ApiError::StoreRead(e)
            })?,
        None => MissingAnalysis::disabled(),
    };

    Ok(Json(MembersWithAnalysisResponse {
        members,
        missing_analysis,
        timestamp: now,
    }))
}

pub async fn report_metrics(
    State(st): State<AppState>,
    Json(req): Json<ReportMetricsRequest>,
) -> Result<Json<StatusResponse>, ApiError> {
    let record = st
        .load_member(&req.instance_id)
        .await?
        .ok_or(ApiError::MemberNotFound)?;
    if record.status == MemberStatus::Deregistered {
        return Err(ApiError::MemberGone);
    }

    let stored = StoredSnapshot {
        snapshot: req.snapshot,
        reported_at: now_ts(),
    };
    let bytes =
        serde_json::to_vec(&stored).map_err(|e| ApiError::StoreWrite(anyhow::Error::new(e)))?;
    st.store
        .set(
            &keys::metrics_key(&req.instance_id),
            bytes,
            Some(Duration::from_secs(st.cfg.metrics_ttl)),
        )
        .await
        .map_err(ApiError::StoreWrite)?;

    tracing::debug!(instance_id = %req.instance_id, "stored metrics snapshot");
    Ok(Json(StatusResponse {
        status: "ok".to_string(),
    }))
}

pub async fn metrics(State(st): State<AppState>) -> Result<Json<MetricsResponse>, ApiError> {
    let entries = st.store.scan(keys::METRICS_PREFIX).await.map_err(|e| {
        st.note_store_read_error();
        ApiError::StoreRead(e)
    })?;

    let mut metrics = std::collections::BTreeMap::new();
    for (key, value) in entries {
        let Some(instance_id) = key.strip_prefix(keys::METRICS_PREFIX) else {
            continue;
        };
        match serde_json::from_slice::<StoredSnapshot>(&value) {
            Ok(stored) => {
                metrics.insert(instance_id.to_string(), stored.snapshot);
            }
            Err(e) => {
                tracing::warn!(instance_id, error = %e, "dropping unparseable snapshot");
            }
        }
    }

    Ok(Json(MetricsResponse { metrics }))
}

pub async fn health(State(st): State<AppState>) -> Json<serde_json::Value> {
    let degraded = st.store_read_failed_within(Duration::from_secs(60));
    Json(json!({
        "status": if degraded { "degraded" } else { "healthy" },
        "component": "registry",
        "version": netring_common::version::version(),
        "uptime_s": (now_ts() - st.started_at).max(0),
        "tasks": st.supervisor.health(),
        "timestamp": now_ts(),
    }))
}

pub async fn clear(State(st): State<AppState>) -> Result<Json<ClearResponse>, ApiError> {
    if !st.cfg.enable_admin {
        return Err(ApiError::AdminDisabled);
    }

    let entries = st.store.scan(keys::ROOT_PREFIX).await.map_err(|e| {
        st.note_store_read_error();
        ApiError::StoreRead(e)
    })?;

    let mut keys_deleted = 0u64;
    for (key, _) in entries {
        if st.store.delete(&key).await.map_err(ApiError::StoreWrite)? {
            keys_deleted += 1;
        }
    }

    tracing::info!(keys_deleted, "cleared store");
    Ok(Json(ClearResponse { keys_deleted }))
}
