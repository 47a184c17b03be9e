use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use tokio::sync::{Notify, RwLock, Semaphore};

use netring_common::telemetry::LogLimiter;
use netring_common::time::now_ts;
use netring_common::{MemberRecord, ProbeLabels, RegisterRequest, Supervisor};

use crate::config::MemberConfig;
use crate::metrics::MetricsStore;
use crate::probes::Tracer;
use crate::registry::RegistryClient;

pub type SharedMember = Arc<MemberState>;

pub struct MemberState {
    pub cfg: MemberConfig,
    pub instance_id: String,
    pub advertise_ip: String,
    pub started_at: i64,

    /// Current peers from the last successful poll, keyed by instance id.
    pub peers: RwLock<HashMap<String, MemberRecord>>,
    pub metrics: MetricsStore,
    pub registry: RegistryClient,
    /// Pooled client for outbound probes; the registry client shares it.
    pub probe_http: reqwest::Client,
    pub supervisor: Supervisor,

    pub tracer: Box<dyn Tracer>,
    /// One traceroute subprocess at a time.
    pub traceroute_slot: Semaphore,

    /// Woken when the registry answers Gone/NotFound.
    pub reregister: Notify,
    pub registered: AtomicBool,
    last_registry_ok: AtomicI64,
    pub warn_limiter: LogLimiter,

    /// Poll cycles a vanished peer has been absent; evicted at two.
    pub gone_counts: Mutex<HashMap<String, u32>>,
    /// Per-target next bandwidth test, jittered.
    pub bandwidth_due: Mutex<HashMap<String, Instant>>,
}

impl MemberState {
    pub fn new(
        cfg: MemberConfig,
        instance_id: String,
        advertise_ip: String,
        tracer: Box<dyn Tracer>,
    ) -> SharedMember {
        let probe_http = build_http_client();
        let registry = RegistryClient::new(&cfg.registry.url, probe_http.clone());
        Arc::new(Self {
            cfg,
            instance_id,
            advertise_ip,
            started_at: now_ts(),
            peers: RwLock::new(HashMap::new()),
            metrics: MetricsStore::new(),
            registry,
            probe_http,
            supervisor: Supervisor::new(),
            tracer,
            traceroute_slot: Semaphore::new(1),
            reregister: Notify::new(),
            registered: AtomicBool::new(false),
            last_registry_ok: AtomicI64::new(now_ts()),
            warn_limiter: LogLimiter::new(Duration::from_secs(60)),
            gone_counts: Mutex::new(HashMap::new()),
            bandwidth_due: Mutex::new(HashMap::new()),
        })
    }

    pub fn register_request(&self) -> RegisterRequest {
        RegisterRequest {
            instance_id: Some(self.instance_id.clone()),
            location: self.cfg.location.clone(),
            ip: self.advertise_ip.clone(),
            port: self.cfg.server.port,
        }
    }

    pub fn labels_for(&self, peer: &MemberRecord, endpoint: Option<&str>) -> ProbeLabels {
        ProbeLabels {
            source_location: self.cfg.location.clone(),
            source_instance: self.instance_id.clone(),
            target_location: peer.location.clone(),
            target_instance: peer.instance_id.clone(),
            target_ip: peer.ip.clone(),
            endpoint: endpoint.map(|s| s.to_string()),
        }
    }

    pub async fn peers_snapshot(&self) -> Vec<MemberRecord> {
        self.peers.read().await.values().cloned().collect()
    }

    pub fn uptime_s(&self) -> u64 {
        (now_ts() - self.started_at).max(0) as u64
    }

    pub fn note_registry_ok(&self) {
        self.last_registry_ok.store(now_ts(), Ordering::Relaxed);
    }

    pub fn registry_unreachable_for(&self) -> i64 {
        (now_ts() - self.last_registry_ok.load(Ordering::Relaxed)).max(0)
    }

    /// Degraded when a supervised task restarted within the last hour or
    /// the registry has been unreachable longer than two heartbeat
    /// intervals.
    pub fn health_status(&self) -> &'static str {
        let registry_lost =
            self.registry_unreachable_for() > 2 * self.cfg.intervals.heartbeat as i64;
        if registry_lost || self.supervisor.restarted_within(Duration::from_secs(3600)) {
            "degraded"
        } else {
            "healthy"
        }
    }
}

fn build_http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(Duration::from_secs(3))
        .timeout(Duration::from_secs(30))
        .pool_max_idle_per_host(5)
        .pool_idle_timeout(Duration::from_secs(30))
        .build()
        .unwrap_or_default()
}
