use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::member::MemberRecord;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instance_id: Option<String>,
    pub location: String,
    pub ip: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterResponse {
    pub instance_id: String,
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub instance_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeregisterRequest {
    pub instance_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    pub status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembersResponse {
    pub members: Vec<MemberRecord>,
}

/// The snapshot travels as opaque JSON: the registry stores it wholesale
/// and never rewrites member-provided labels.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportMetricsRequest {
    pub instance_id: String,
    pub snapshot: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsResponse {
    pub metrics: BTreeMap<String, serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearResponse {
    pub keys_deleted: u64,
}

/// Reply from a member's `/bandwidth_test` after draining the uploaded
/// stream.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BandwidthAck {
    pub received_bytes: u64,
    pub elapsed_ms: u64,
}
