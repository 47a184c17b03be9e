use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

/// Latency histogram buckets (seconds) shared by the member's local
/// exposition and the pushed `check_durations` bucket counts.
pub const DURATION_BUCKETS_S: &[f64] = &[0.01, 0.05, 0.1, 0.5, 1.0, 2.0, 5.0, 10.0];

/// Identifies one probe result within a snapshot map. The wire form is a
/// flat `location:instance[:endpoint]` string key; the typed form is used
/// everywhere inside the member.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProbeKey {
    pub target_location: String,
    pub target_instance: String,
    pub endpoint: Option<String>,
}

impl ProbeKey {
    pub fn new(target_location: &str, target_instance: &str) -> Self {
        Self {
            target_location: target_location.to_string(),
            target_instance: target_instance.to_string(),
            endpoint: None,
        }
    }

    pub fn with_endpoint(target_location: &str, target_instance: &str, endpoint: &str) -> Self {
        Self {
            target_location: target_location.to_string(),
            target_instance: target_instance.to_string(),
            endpoint: Some(endpoint.to_string()),
        }
    }

    pub fn wire_key(&self) -> String {
        match &self.endpoint {
            Some(ep) => format!("{}:{}:{}", self.target_location, self.target_instance, ep),
            None => format!("{}:{}", self.target_location, self.target_instance),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ProbeLabels {
    pub source_location: String,
    pub source_instance: String,
    pub target_location: String,
    pub target_instance: String,
    pub target_ip: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
}

/// A 0/1 connectivity observation (TCP connect or HTTP GET).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GaugeSample {
    pub labels: ProbeLabels,
    pub value: f64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BandwidthSample {
    pub labels: ProbeLabels,
    pub bandwidth_mbps: f64,
    pub timestamp: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TracerouteSample {
    pub labels: ProbeLabels,
    pub total_hops: u32,
    pub max_hop_latency_ms: f64,
    pub timestamp: i64,
}

/// Aggregated probe latency per (check type, target), pushed alongside the
/// raw gauges so the registry sees averages without replaying histograms.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DurationStats {
    pub labels: DurationLabels,
    pub count: u64,
    pub sum_ms: f64,
    pub avg_ms: f64,
    #[serde(rename = "p_bucket_counts")]
    pub bucket_counts: Vec<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DurationLabels {
    pub check_type: String,
    pub target_location: String,
    pub target_instance: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct GeneralStats {
    pub uptime_s: u64,
    pub version: String,
    pub members_total: u64,
}

/// One member's most recent probe results, pushed to the registry as a
/// whole. Map keys are `ProbeKey::wire_key()` strings.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct MetricsSnapshot {
    #[serde(default)]
    pub connectivity_tcp: BTreeMap<String, GaugeSample>,
    #[serde(default)]
    pub connectivity_http: BTreeMap<String, GaugeSample>,
    #[serde(default)]
    pub check_durations: BTreeMap<String, DurationStats>,
    #[serde(default)]
    pub bandwidth_tests: BTreeMap<String, BandwidthSample>,
    #[serde(default)]
    pub traceroute_tests: BTreeMap<String, TracerouteSample>,
    #[serde(default)]
    pub general: GeneralStats,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wire_key_without_endpoint() {
        let key = ProbeKey::new("eu1", "abc-123");
        assert_eq!(key.wire_key(), "eu1:abc-123");
    }

    #[test]
    fn wire_key_with_endpoint() {
        let key = ProbeKey::with_endpoint("eu1", "abc-123", "/health");
        assert_eq!(key.wire_key(), "eu1:abc-123:/health");
    }

    #[test]
    fn duration_stats_use_wire_field_names() {
        let stats = DurationStats {
            labels: DurationLabels {
                check_type: "tcp".to_string(),
                target_location: "eu1".to_string(),
                target_instance: "abc".to_string(),
            },
            count: 2,
            sum_ms: 60.0,
            avg_ms: 30.0,
            bucket_counts: vec![0; DURATION_BUCKETS_S.len()],
        };

        let wire = serde_json::to_value(&stats).unwrap();
        assert!(wire.get("p_bucket_counts").is_some());
        assert!(wire.get("bucket_counts").is_none());

        let back: DurationStats = serde_json::from_value(wire).unwrap();
        assert_eq!(back, stats);
    }

    #[test]
    fn snapshot_roundtrips_unknown_fields_ignored() {
        let raw = serde_json::json!({
            "connectivity_tcp": {
                "eu1:abc": {
                    "labels": {
                        "source_location": "us1",
                        "source_instance": "src",
                        "target_location": "eu1",
                        "target_instance": "abc",
                        "target_ip": "10.0.0.2",
                        "extra": "ignored"
                    },
                    "value": 1.0,
                    "timestamp": 1700000000
                }
            },
            "future_section": {"x": 1}
        });

        let snap: MetricsSnapshot = serde_json::from_value(raw).unwrap();
        assert_eq!(snap.connectivity_tcp.len(), 1);
        assert_eq!(snap.connectivity_tcp["eu1:abc"].value, 1.0);
        assert!(snap.bandwidth_tests.is_empty());
    }
}
