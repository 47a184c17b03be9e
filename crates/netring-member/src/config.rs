use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemberConfig {
    /// Logical site name ("us1-k8s"); not unique across members.
    pub location: String,
    /// Fixed instance id; when unset, one is generated and persisted to
    /// the identity file.
    pub instance_id: Option<String>,
    pub registry: RegistryTarget,
    pub intervals: Intervals,
    pub server: ServerConfig,
    pub checks: Checks,
    /// Overrides auto-detected address in the registration payload.
    pub host_ip: Option<String>,
    pub identity_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryTarget {
    pub url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Intervals {
    pub poll: u64,
    pub check: u64,
    pub heartbeat: u64,
    pub bandwidth_test: u64,
    pub traceroute: u64,
    pub report: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Checks {
    pub tcp_timeout: u64,
    pub http_timeout: u64,
    pub http_endpoints: Vec<String>,
    pub bandwidth_test_size_mb: u64,
    pub traceroute_timeout: u64,
    pub max_bandwidth_body_mb: u64,
}

impl Default for MemberConfig {
    fn default() -> Self {
        Self {
            location: "unknown".to_string(),
            instance_id: None,
            registry: RegistryTarget::default(),
            intervals: Intervals::default(),
            server: ServerConfig::default(),
            checks: Checks::default(),
            host_ip: None,
            identity_file: ".netring_instance_id".to_string(),
        }
    }
}

impl Default for RegistryTarget {
    fn default() -> Self {
        Self {
            url: "http://localhost:8756".to_string(),
        }
    }
}

impl Default for Intervals {
    fn default() -> Self {
        Self {
            poll: 30,
            check: 60,
            heartbeat: 45,
            bandwidth_test: 300,
            traceroute: 300,
            report: 30,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8757,
        }
    }
}

impl Default for Checks {
    fn default() -> Self {
        Self {
            tcp_timeout: 5,
            http_timeout: 10,
            http_endpoints: vec!["/health".to_string(), "/metrics".to_string()],
            bandwidth_test_size_mb: 1,
            traceroute_timeout: 60,
            max_bandwidth_body_mb: 16,
        }
    }
}

impl Checks {
    pub fn tcp_timeout(&self) -> Duration {
        Duration::from_secs(self.tcp_timeout)
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_secs(self.http_timeout)
    }

    pub fn traceroute_timeout(&self) -> Duration {
        Duration::from_secs(self.traceroute_timeout)
    }

    pub fn bandwidth_payload_bytes(&self) -> usize {
        (self.bandwidth_test_size_mb as usize) * 1024 * 1024
    }

    pub fn max_bandwidth_body_bytes(&self) -> usize {
        (self.max_bandwidth_body_mb as usize) * 1024 * 1024
    }
}

impl MemberConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut cfg = match path {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("failed to read config {}", path.display()))?;
                serde_yaml::from_str(&text)
                    .with_context(|| format!("failed to parse config {}", path.display()))?
            }
            None => Self::default(),
        };
        cfg.apply_overrides(|name| std::env::var(name).ok());
        Ok(cfg)
    }

    /// Environment variables override file values.
    pub fn apply_overrides(&mut self, get: impl Fn(&str) -> Option<String>) {
        override_string(&get, "NETRING_LOCATION", &mut self.location);
        if let Some(v) = get("NETRING_INSTANCE_ID") {
            self.instance_id = Some(v);
        }
        override_string(&get, "NETRING_REGISTRY_URL", &mut self.registry.url);

        override_parse(&get, "NETRING_POLL_INTERVAL", &mut self.intervals.poll);
        override_parse(&get, "NETRING_CHECK_INTERVAL", &mut self.intervals.check);
        override_parse(&get, "NETRING_HEARTBEAT_INTERVAL", &mut self.intervals.heartbeat);
        override_parse(
            &get,
            "NETRING_BANDWIDTH_TEST_INTERVAL",
            &mut self.intervals.bandwidth_test,
        );
        override_parse(&get, "NETRING_TRACEROUTE_INTERVAL", &mut self.intervals.traceroute);
        override_parse(&get, "NETRING_REPORT_INTERVAL", &mut self.intervals.report);

        override_string(&get, "NETRING_SERVER_HOST", &mut self.server.host);
        override_parse(&get, "NETRING_SERVER_PORT", &mut self.server.port);

        override_parse(&get, "NETRING_TCP_TIMEOUT", &mut self.checks.tcp_timeout);
        override_parse(&get, "NETRING_HTTP_TIMEOUT", &mut self.checks.http_timeout);
        if let Some(v) = get("NETRING_HTTP_ENDPOINTS") {
            self.checks.http_endpoints = v
                .split(',')
                .map(|ep| ep.trim().to_string())
                .filter(|ep| !ep.is_empty())
                .collect();
        }
        override_parse(
            &get,
            "NETRING_BANDWIDTH_TEST_SIZE_MB",
            &mut self.checks.bandwidth_test_size_mb,
        );
        override_parse(
            &get,
            "NETRING_TRACEROUTE_TIMEOUT",
            &mut self.checks.traceroute_timeout,
        );

        if let Some(v) = get("NETRING_HOST_IP") {
            self.host_ip = Some(v);
        }
        override_string(&get, "NETRING_IDENTITY_FILE", &mut self.identity_file);
    }
}

fn override_string(get: &impl Fn(&str) -> Option<String>, name: &str, slot: &mut String) {
    if let Some(v) = get(name) {
        *slot = v;
    }
}

fn override_parse<T: std::str::FromStr>(
    get: &impl Fn(&str) -> Option<String>,
    name: &str,
    slot: &mut T,
) {
    if let Some(v) = get(name) {
        match v.parse() {
            Ok(parsed) => *slot = parsed,
            Err(_) => tracing::warn!(var = name, value = %v, "ignoring unparseable override"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_contract() {
        let cfg = MemberConfig::default();
        assert_eq!(cfg.intervals.heartbeat, 45);
        assert_eq!(cfg.intervals.poll, 30);
        assert_eq!(cfg.intervals.check, 60);
        assert_eq!(cfg.intervals.bandwidth_test, 300);
        assert_eq!(cfg.checks.tcp_timeout, 5);
        assert_eq!(cfg.checks.http_endpoints, vec!["/health", "/metrics"]);
        assert_eq!(cfg.checks.bandwidth_payload_bytes(), 1_048_576);
        assert_eq!(cfg.checks.max_bandwidth_body_bytes(), 16 * 1024 * 1024);
    }

    #[test]
    fn yaml_overlays_defaults() {
        let yaml = r#"
location: eu1-docker
registry:
  url: http://registry.internal:8756
intervals:
  heartbeat: 20
checks:
  http_endpoints: ["/health"]
"#;
        let cfg: MemberConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.location, "eu1-docker");
        assert_eq!(cfg.registry.url, "http://registry.internal:8756");
        assert_eq!(cfg.intervals.heartbeat, 20);
        assert_eq!(cfg.intervals.poll, 30);
        assert_eq!(cfg.checks.http_endpoints, vec!["/health"]);
    }

    #[test]
    fn env_overrides_file() {
        let mut cfg = MemberConfig::default();
        cfg.apply_overrides(|name| match name {
            "NETRING_LOCATION" => Some("ap1".to_string()),
            "NETRING_HTTP_ENDPOINTS" => Some("/health, /ready".to_string()),
            "NETRING_HOST_IP" => Some("203.0.113.9".to_string()),
            _ => None,
        });
        assert_eq!(cfg.location, "ap1");
        assert_eq!(cfg.checks.http_endpoints, vec!["/health", "/ready"]);
        assert_eq!(cfg.host_ip.as_deref(), Some("203.0.113.9"));
    }
}
