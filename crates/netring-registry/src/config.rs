use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistryConfig {
    pub store: StoreConfig,
    pub server: ServerConfig,

    /// Seconds without a heartbeat before an active member is considered
    /// lost by the cleanup sweep.
    pub member_ttl: u64,
    pub cleanup_interval: u64,
    /// Seconds a deregistered record is retained before being purged.
    pub deregistered_grace: u64,
    /// Seconds a pushed snapshot stays readable without a refresh.
    pub metrics_ttl: u64,
    pub max_snapshot_bytes: usize,
    /// Gates `/clear`.
    pub enable_admin: bool,

    pub expected_members: ExpectedMembersConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// `redis` or `memory`.
    pub backend: String,
    pub host: String,
    pub port: u16,
    pub db: i64,
    pub password: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpectedMembersConfig {
    pub enable_missing_detection: bool,
    pub config_file: String,
    pub missing_check_interval: u64,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            store: StoreConfig::default(),
            server: ServerConfig::default(),
            member_ttl: 300,
            cleanup_interval: 60,
            deregistered_grace: 3600,
            metrics_ttl: 300,
            max_snapshot_bytes: 4 * 1024 * 1024,
            enable_admin: false,
            expected_members: ExpectedMembersConfig::default(),
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: "redis".to_string(),
            host: "127.0.0.1".to_string(),
            port: 6379,
            db: 0,
            password: None,
        }
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8756,
        }
    }
}

impl Default for ExpectedMembersConfig {
    fn default() -> Self {
        Self {
            enable_missing_detection: false,
            config_file: "config/expected-members.yaml".to_string(),
            missing_check_interval: 60,
        }
    }
}

impl RegistryConfig {
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
        override_parse(&get, "NETRING_MEMBER_TTL", &mut self.member_ttl);
        override_parse(&get, "NETRING_CLEANUP_INTERVAL", &mut self.cleanup_interval);
        override_parse(&get, "NETRING_DEREGISTERED_GRACE", &mut self.deregistered_grace);
        override_parse(&get, "NETRING_METRICS_TTL", &mut self.metrics_ttl);
        override_parse(&get, "NETRING_ENABLE_ADMIN", &mut self.enable_admin);

        override_string(&get, "NETRING_STORE_BACKEND", &mut self.store.backend);
        override_string(&get, "NETRING_STORE_HOST", &mut self.store.host);
        override_parse(&get, "NETRING_STORE_PORT", &mut self.store.port);
        override_parse(&get, "NETRING_STORE_DB", &mut self.store.db);
        if let Some(v) = get("NETRING_STORE_PASSWORD") {
            self.store.password = Some(v);
        }

        override_string(&get, "NETRING_SERVER_HOST", &mut self.server.host);
        override_parse(&get, "NETRING_SERVER_PORT", &mut self.server.port);

        override_parse(
            &get,
            "NETRING_ENABLE_MISSING_DETECTION",
            &mut self.expected_members.enable_missing_detection,
        );
        override_string(
            &get,
            "NETRING_EXPECTED_MEMBERS_FILE",
            &mut self.expected_members.config_file,
        );
        override_parse(
            &get,
            "NETRING_MISSING_CHECK_INTERVAL",
            &mut self.expected_members.missing_check_interval,
        );
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
        let cfg = RegistryConfig::default();
        assert_eq!(cfg.member_ttl, 300);
        assert_eq!(cfg.cleanup_interval, 60);
        assert_eq!(cfg.deregistered_grace, 3600);
        assert_eq!(cfg.server.port, 8756);
        assert!(!cfg.enable_admin);
    }

    #[test]
    fn yaml_round_trip() {
        let yaml = r#"
store:
  host: redis.internal
  port: 6380
  db: 2
server:
  port: 9000
member_ttl: 120
expected_members:
  enable_missing_detection: true
  config_file: /etc/netring/expected.yaml
"#;
        let cfg: RegistryConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(cfg.store.host, "redis.internal");
        assert_eq!(cfg.store.port, 6380);
        assert_eq!(cfg.member_ttl, 120);
        // Untouched fields keep their defaults.
        assert_eq!(cfg.cleanup_interval, 60);
        assert!(cfg.expected_members.enable_missing_detection);
    }

    #[test]
    fn env_overrides_file() {
        let mut cfg = RegistryConfig::default();
        cfg.apply_overrides(|name| match name {
            "NETRING_MEMBER_TTL" => Some("42".to_string()),
            "NETRING_STORE_HOST" => Some("other".to_string()),
            "NETRING_SERVER_PORT" => Some("not-a-port".to_string()),
            _ => None,
        });
        assert_eq!(cfg.member_ttl, 42);
        assert_eq!(cfg.store.host, "other");
        // Unparseable override is ignored, not fatal.
        assert_eq!(cfg.server.port, 8756);
    }
}
