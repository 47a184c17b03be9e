//! Store key layout shared by handlers, cleanup, and the analysis grace
//! tracker.

pub const ROOT_PREFIX: &str = "netring:";
pub const MEMBER_PREFIX: &str = "netring:member:";
pub const METRICS_PREFIX: &str = "netring:metrics:";
pub const FIRST_BELOW_PREFIX: &str = "netring:location_first_below:";

pub fn member_key(instance_id: &str) -> String {
    format!("{MEMBER_PREFIX}{instance_id}")
}

pub fn metrics_key(instance_id: &str) -> String {
    format!("{METRICS_PREFIX}{instance_id}")
}

pub fn first_below_key(location: &str) -> String {
    format!("{FIRST_BELOW_PREFIX}{location}")
}
