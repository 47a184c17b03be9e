use std::collections::{BTreeMap, HashMap};
use std::fmt::Write as _;
use std::sync::Mutex;
use std::time::Duration;

use netring_common::snapshot::DurationLabels;
use netring_common::time::now_ts;
use netring_common::{
    BandwidthSample, DurationStats, GaugeSample, GeneralStats, MetricsSnapshot, ProbeKey,
    ProbeLabels, TracerouteSample, DURATION_BUCKETS_S,
};

/// Owned probe-result state for one member. Updates and snapshot reads are
/// serialized by a single mutex, never held across an await.
#[derive(Default)]
pub struct MetricsStore {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    tcp: HashMap<ProbeKey, GaugeSample>,
    http: HashMap<ProbeKey, GaugeSample>,
    bandwidth: HashMap<ProbeKey, BandwidthSample>,
    traceroute: HashMap<ProbeKey, TracerouteSample>,
    durations: HashMap<DurationKey, DurationAgg>,
    members_total: u64,
    member_last_seen: BTreeMap<(String, String), i64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct DurationKey {
    check_type: &'static str,
    target_location: String,
    target_instance: String,
}

#[derive(Debug, Clone)]
struct DurationAgg {
    count: u64,
    sum_ms: f64,
    /// Cumulative counts aligned with `DURATION_BUCKETS_S`.
    buckets: Vec<u64>,
}

impl Default for DurationAgg {
    fn default() -> Self {
        Self {
            count: 0,
            sum_ms: 0.0,
            buckets: vec![0; DURATION_BUCKETS_S.len()],
        }
    }
}

impl DurationAgg {
    fn observe(&mut self, elapsed: Duration) {
        let seconds = elapsed.as_secs_f64();
        for (i, le) in DURATION_BUCKETS_S.iter().enumerate() {
            if seconds <= *le {
                self.buckets[i] += 1;
            }
        }
        self.count += 1;
        self.sum_ms += seconds * 1000.0;
    }

    fn merge(&mut self, other: &DurationAgg) {
        self.count += other.count;
        self.sum_ms += other.sum_ms;
        for (slot, add) in self.buckets.iter_mut().zip(&other.buckets) {
            *slot += add;
        }
    }
}

fn probe_key(labels: &ProbeLabels) -> ProbeKey {
    ProbeKey {
        target_location: labels.target_location.clone(),
        target_instance: labels.target_instance.clone(),
        endpoint: labels.endpoint.clone(),
    }
}

impl MetricsStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_tcp(&self, labels: ProbeLabels, success: bool, elapsed: Duration) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .durations
            .entry(DurationKey {
                check_type: "tcp",
                target_location: labels.target_location.clone(),
                target_instance: labels.target_instance.clone(),
            })
            .or_default()
            .observe(elapsed);
        inner.tcp.insert(
            probe_key(&labels),
            GaugeSample {
                labels,
                value: if success { 1.0 } else { 0.0 },
                timestamp: now_ts(),
            },
        );
    }

    pub fn record_http(&self, labels: ProbeLabels, success: bool, elapsed: Duration) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner
            .durations
            .entry(DurationKey {
                check_type: "http",
                target_location: labels.target_location.clone(),
                target_instance: labels.target_instance.clone(),
            })
            .or_default()
            .observe(elapsed);
        inner.http.insert(
            probe_key(&labels),
            GaugeSample {
                labels,
                value: if success { 1.0 } else { 0.0 },
                timestamp: now_ts(),
            },
        );
    }

    pub fn record_bandwidth(&self, labels: ProbeLabels, mbps: f64) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.bandwidth.insert(
            probe_key(&labels),
            BandwidthSample {
                labels,
                bandwidth_mbps: mbps,
                timestamp: now_ts(),
            },
        );
    }

    pub fn record_traceroute(&self, labels: ProbeLabels, total_hops: u32, max_hop_latency_ms: f64) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.traceroute.insert(
            probe_key(&labels),
            TracerouteSample {
                labels,
                total_hops,
                max_hop_latency_ms,
                timestamp: now_ts(),
            },
        );
    }

    /// Refresh the peer-derived gauges after a successful poll.
    pub fn set_peer_view(&self, peers: &[(String, String, i64)]) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.members_total = peers.len() as u64;
        inner.member_last_seen = peers
            .iter()
            .map(|(location, instance, last_seen)| {
                ((location.clone(), instance.clone()), *last_seen)
            })
            .collect();
    }

    /// Drop every probe result keyed by a target that left the ring.
    pub fn evict_target(&self, instance_id: &str) {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        inner.tcp.retain(|k, _| k.target_instance != instance_id);
        inner.http.retain(|k, _| k.target_instance != instance_id);
        inner.bandwidth.retain(|k, _| k.target_instance != instance_id);
        inner.traceroute.retain(|k, _| k.target_instance != instance_id);
        inner.durations.retain(|k, _| k.target_instance != instance_id);
    }

    pub fn snapshot(&self, uptime_s: u64, version: &str) -> MetricsSnapshot {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());

        let gauges = |map: &HashMap<ProbeKey, GaugeSample>| {
            map.iter()
                .map(|(k, v)| (k.wire_key(), v.clone()))
                .collect::<BTreeMap<_, _>>()
        };

        MetricsSnapshot {
            connectivity_tcp: gauges(&inner.tcp),
            connectivity_http: gauges(&inner.http),
            check_durations: inner
                .durations
                .iter()
                .map(|(k, agg)| {
                    let wire = format!("{}:{}:{}", k.check_type, k.target_location, k.target_instance);
                    let avg_ms = if agg.count > 0 {
                        agg.sum_ms / agg.count as f64
                    } else {
                        0.0
                    };
                    (
                        wire,
                        DurationStats {
                            labels: DurationLabels {
                                check_type: k.check_type.to_string(),
                                target_location: k.target_location.clone(),
                                target_instance: k.target_instance.clone(),
                            },
                            count: agg.count,
                            sum_ms: agg.sum_ms,
                            avg_ms,
                            bucket_counts: agg.buckets.clone(),
                        },
                    )
                })
                .collect(),
            bandwidth_tests: inner
                .bandwidth
                .iter()
                .map(|(k, v)| (k.wire_key(), v.clone()))
                .collect(),
            traceroute_tests: inner
                .traceroute
                .iter()
                .map(|(k, v)| (k.wire_key(), v.clone()))
                .collect(),
            general: GeneralStats {
                uptime_s,
                version: version.to_string(),
                members_total: inner.members_total,
            },
        }
    }

    /// Prometheus text exposition served at the member's `/metrics`.
    pub fn render_prometheus(&self) -> String {
        let inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        let mut out = String::new();

        out.push_str(
            "# HELP netring_connectivity_tcp TCP connectivity between ring members.\n\
             # TYPE netring_connectivity_tcp gauge\n",
        );
        let mut lines: BTreeMap<String, f64> = BTreeMap::new();
        for sample in inner.tcp.values() {
            let l = &sample.labels;
            lines.insert(
                format!(
                    "source_location=\"{}\",source_instance=\"{}\",target_location=\"{}\",target_instance=\"{}\",target_ip=\"{}\"",
                    l.source_location, l.source_instance, l.target_location, l.target_instance, l.target_ip
                ),
                sample.value,
            );
        }
        emit_gauges(&mut out, "netring_connectivity_tcp", &lines);

        out.push_str(
            "# HELP netring_connectivity_http HTTP connectivity between ring members.\n\
             # TYPE netring_connectivity_http gauge\n",
        );
        let mut lines: BTreeMap<String, f64> = BTreeMap::new();
        for sample in inner.http.values() {
            let l = &sample.labels;
            lines.insert(
                format!(
                    "source_location=\"{}\",source_instance=\"{}\",target_location=\"{}\",target_instance=\"{}\",target_ip=\"{}\",endpoint=\"{}\"",
                    l.source_location,
                    l.source_instance,
                    l.target_location,
                    l.target_instance,
                    l.target_ip,
                    l.endpoint.as_deref().unwrap_or("")
                ),
                sample.value,
            );
        }
        emit_gauges(&mut out, "netring_connectivity_http", &lines);

        out.push_str(
            "# HELP netring_bandwidth_mbps Measured throughput between ring members.\n\
             # TYPE netring_bandwidth_mbps gauge\n",
        );
        let mut lines: BTreeMap<String, f64> = BTreeMap::new();
        for sample in inner.bandwidth.values() {
            let l = &sample.labels;
            lines.insert(
                format!(
                    "source_location=\"{}\",target_location=\"{}\",target_ip=\"{}\"",
                    l.source_location, l.target_location, l.target_ip
                ),
                sample.bandwidth_mbps,
            );
        }
        emit_gauges(&mut out, "netring_bandwidth_mbps", &lines);

        out.push_str(
            "# HELP netring_traceroute_hops_total Hop count toward each target location.\n\
             # TYPE netring_traceroute_hops_total gauge\n",
        );
        let mut hop_lines: BTreeMap<String, f64> = BTreeMap::new();
        let mut latency_lines: BTreeMap<String, f64> = BTreeMap::new();
        for sample in inner.traceroute.values() {
            let l = &sample.labels;
            let labels = format!(
                "source_location=\"{}\",target_location=\"{}\"",
                l.source_location, l.target_location
            );
            hop_lines.insert(labels.clone(), sample.total_hops as f64);
            latency_lines.insert(labels, sample.max_hop_latency_ms);
        }
        emit_gauges(&mut out, "netring_traceroute_hops_total", &hop_lines);
        out.push_str(
            "# HELP netring_traceroute_max_hop_latency_ms Slowest hop toward each target location.\n\
             # TYPE netring_traceroute_max_hop_latency_ms gauge\n",
        );
        emit_gauges(&mut out, "netring_traceroute_max_hop_latency_ms", &latency_lines);

        out.push_str(
            "# HELP netring_check_duration_seconds Duration of connectivity checks.\n\
             # TYPE netring_check_duration_seconds histogram\n",
        );
        let mut merged: BTreeMap<(String, String), DurationAgg> = BTreeMap::new();
        for (key, agg) in &inner.durations {
            merged
                .entry((key.check_type.to_string(), key.target_location.clone()))
                .or_default()
                .merge(agg);
        }
        for ((check_type, target_location), agg) in &merged {
            let labels = format!("check_type=\"{check_type}\",target_location=\"{target_location}\"");
            for (le, count) in DURATION_BUCKETS_S.iter().zip(&agg.buckets) {
                let _ = writeln!(
                    out,
                    "netring_check_duration_seconds_bucket{{{labels},le=\"{le}\"}} {count}"
                );
            }
            let _ = writeln!(
                out,
                "netring_check_duration_seconds_bucket{{{labels},le=\"+Inf\"}} {}",
                agg.count
            );
            let _ = writeln!(
                out,
                "netring_check_duration_seconds_sum{{{labels}}} {}",
                agg.sum_ms / 1000.0
            );
            let _ = writeln!(
                out,
                "netring_check_duration_seconds_count{{{labels}}} {}",
                agg.count
            );
        }

        out.push_str(
            "# HELP netring_members_total Ring members currently discovered.\n\
             # TYPE netring_members_total gauge\n",
        );
        let _ = writeln!(out, "netring_members_total {}", inner.members_total);

        out.push_str(
            "# HELP netring_member_last_seen_timestamp Last heartbeat observed for each peer.\n\
             # TYPE netring_member_last_seen_timestamp gauge\n",
        );
        for ((location, instance_id), last_seen) in &inner.member_last_seen {
            let _ = writeln!(
                out,
                "netring_member_last_seen_timestamp{{location=\"{location}\",instance_id=\"{instance_id}\"}} {last_seen}"
            );
        }

        out
    }
}

fn emit_gauges(out: &mut String, name: &str, lines: &BTreeMap<String, f64>) {
    for (labels, value) in lines {
        let _ = writeln!(out, "{name}{{{labels}}} {value}");
    }
}
