use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum MemberStatus {
    Active,
    Deregistered,
}

/// Authoritative membership record, owned by the registry and keyed by
/// `instance_id` in the store. Timestamps are Unix seconds.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MemberRecord {
    pub instance_id: String,
    pub location: String,
    pub ip: String,
    pub port: u16,
    pub registered_at: i64,
    pub last_seen: i64,
    pub status: MemberStatus,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deregistered_at: Option<i64>,
}

impl MemberRecord {
    pub fn is_active(&self) -> bool {
        self.status == MemberStatus::Active
    }
}
