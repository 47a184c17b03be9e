pub mod api;
pub mod member;
pub mod snapshot;
pub mod supervisor;
pub mod telemetry;
pub mod time;
pub mod version;

pub use api::{
    BandwidthAck, ClearResponse, DeregisterRequest, HeartbeatRequest, MembersResponse,
    MetricsResponse, RegisterRequest, RegisterResponse, ReportMetricsRequest, StatusResponse,
};
pub use member::{MemberRecord, MemberStatus};
pub use snapshot::{
    BandwidthSample, DurationStats, GaugeSample, GeneralStats, MetricsSnapshot, ProbeKey,
    ProbeLabels, TracerouteSample, DURATION_BUCKETS_S,
};
pub use supervisor::{Supervisor, TaskHealth};
