use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use netring_common::MemberRecord;
use netring_store::Store;

use crate::keys;

// ---------------------------------------------------------------------------
// Declared expectations (loaded from the expected-members YAML file)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Deserialize)]
pub struct ExpectedMembersFile {
    pub expected_members: ExpectedMembersSpec,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExpectedMembersSpec {
    pub locations: BTreeMap<String, LocationSpec>,
    #[serde(default)]
    pub settings: AnalysisSettings,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LocationSpec {
    pub expected_count: u32,
    pub criticality: Criticality,
    /// Seconds a location may sit below its expected count before it is
    /// reported as missing.
    #[serde(default, alias = "grace_period")]
    pub grace_period_s: u64,
    #[serde(default)]
    pub description: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Criticality {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AnalysisSettings {
    #[serde(default)]
    pub alerts: AlertThresholds,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AlertThresholds {
    pub critical_missing_threshold: u32,
    pub total_missing_threshold: u32,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            critical_missing_threshold: 1,
            total_missing_threshold: 3,
        }
    }
}

// ---------------------------------------------------------------------------
// Analysis output (returned by /members_with_analysis)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize)]
pub struct MissingAnalysis {
    pub enabled: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<i64>,
    pub locations: BTreeMap<String, LocationAnalysis>,
    pub alerts: Vec<Alert>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<AnalysisSummary>,
}

impl MissingAnalysis {
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            timestamp: None,
            locations: BTreeMap::new(),
            alerts: Vec::new(),
            summary: None,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct LocationAnalysis {
    pub expected_count: u32,
    pub actual_count: u32,
    pub missing_count: u32,
    pub status: LocationStatus,
    pub criticality: String,
    pub grace_period_s: u64,
    pub description: String,
    pub current_members: Vec<CurrentMember>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LocationStatus {
    Healthy,
    MissingMembers,
    ExtraMembers,
    UnexpectedLocation,
}

#[derive(Debug, Clone, Serialize)]
pub struct CurrentMember {
    pub instance_id: String,
    pub last_seen: i64,
    pub ip: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    pub level: AlertLevel,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub location: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub missing_count: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub total_missing: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub critical_locations: Option<u32>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertLevel {
    Error,
    Warning,
}

#[derive(Debug, Clone, Serialize)]
pub struct AnalysisSummary {
    pub total_expected_locations: u32,
    pub total_missing_members: u32,
    pub critical_locations_missing: u32,
    pub unexpected_locations: u32,
}

// ---------------------------------------------------------------------------
// Analyzer
// ---------------------------------------------------------------------------

/// Compares actual per-location membership against the declared targets.
/// Grace tracking lives in the store (`netring:location_first_below:*`) so
/// a registry restart does not reset the below-expected clocks.
pub struct ExpectedMembersAnalyzer {
    spec: ExpectedMembersSpec,
}

impl ExpectedMembersAnalyzer {
    pub fn new(spec: ExpectedMembersSpec) -> Self {
        Self { spec }
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read expected members file {}", path.display()))?;
        let file: ExpectedMembersFile = serde_yaml::from_str(&text)
            .with_context(|| format!("failed to parse expected members file {}", path.display()))?;
        Ok(Self::new(file.expected_members))
    }

    pub async fn analyze(
        &self,
        store: &dyn Store,
        members: &[MemberRecord],
        now: i64,
    ) -> Result<MissingAnalysis> {
        let mut by_location: BTreeMap<&str, Vec<&MemberRecord>> = BTreeMap::new();
        for member in members.iter().filter(|m| m.is_active()) {
            by_location.entry(&member.location).or_default().push(member);
        }

        let mut locations = BTreeMap::new();
        let mut alerts = Vec::new();
        let mut total_missing = 0u32;
        let mut critical_missing = 0u32;

        for (location, spec) in &self.spec.locations {
            let current = by_location.remove(location.as_str()).unwrap_or_default();
            let actual_count = current.len() as u32;
            let raw_missing = spec.expected_count.saturating_sub(actual_count);

            let status = if raw_missing > 0 {
                if self.below_expected_past_grace(store, location, spec, now).await? {
                    LocationStatus::MissingMembers
                } else {
                    LocationStatus::Healthy
                }
            } else {
                store.delete(&keys::first_below_key(location)).await?;
                if actual_count > spec.expected_count {
                    LocationStatus::ExtraMembers
                } else {
                    LocationStatus::Healthy
                }
            };

            if status == LocationStatus::MissingMembers {
                total_missing += raw_missing;
                let criticality = format!("{:?}", spec.criticality).to_lowercase();
                match spec.criticality {
                    Criticality::High => {
                        critical_missing += 1;
                        alerts.push(Alert {
                            level: AlertLevel::Error,
                            message: format!(
                                "High criticality location '{location}' missing {raw_missing} member(s)"
                            ),
                            location: Some(location.clone()),
                            missing_count: Some(raw_missing),
                            total_missing: None,
                            critical_locations: None,
                        });
                    }
                    Criticality::Medium | Criticality::Low => {
                        alerts.push(Alert {
                            level: AlertLevel::Warning,
                            message: format!(
                                "{criticality} criticality location '{location}' missing {raw_missing} member(s)"
                            ),
                            location: Some(location.clone()),
                            missing_count: Some(raw_missing),
                            total_missing: None,
                            critical_locations: None,
                        });
                    }
                }
            }

            locations.insert(
                location.clone(),
                LocationAnalysis {
                    expected_count: spec.expected_count,
                    actual_count,
                    missing_count: raw_missing,
                    status,
                    criticality: format!("{:?}", spec.criticality).to_lowercase(),
                    grace_period_s: spec.grace_period_s,
                    description: spec
                        .description
                        .clone()
                        .unwrap_or_else(|| location.clone()),
                    current_members: current
                        .iter()
                        .map(|m| CurrentMember {
                            instance_id: m.instance_id.clone(),
                            last_seen: m.last_seen,
                            ip: m.ip.clone(),
                        })
                        .collect(),
                },
            );
        }

        // Members in locations nobody declared.
        let mut unexpected = 0u32;
        for (location, current) in by_location {
            unexpected += 1;
            locations.insert(
                location.to_string(),
                LocationAnalysis {
                    expected_count: 0,
                    actual_count: current.len() as u32,
                    missing_count: 0,
                    status: LocationStatus::UnexpectedLocation,
                    criticality: "unknown".to_string(),
                    grace_period_s: 0,
                    description: format!("Unexpected location: {location}"),
                    current_members: current
                        .iter()
                        .map(|m| CurrentMember {
                            instance_id: m.instance_id.clone(),
                            last_seen: m.last_seen,
                            ip: m.ip.clone(),
                        })
                        .collect(),
                },
            );
        }

        let thresholds = &self.spec.settings.alerts;
        if critical_missing >= thresholds.critical_missing_threshold && critical_missing > 0 {
            alerts.push(Alert {
                level: AlertLevel::Error,
                message: format!(
                    "Critical: {critical_missing} high-priority location(s) missing members"
                ),
                location: None,
                missing_count: None,
                total_missing: Some(total_missing),
                critical_locations: Some(critical_missing),
            });
        } else if total_missing >= thresholds.total_missing_threshold {
            alerts.push(Alert {
                level: AlertLevel::Warning,
                message: format!(
                    "Warning: {total_missing} total members missing across all locations"
                ),
                location: None,
                missing_count: None,
                total_missing: Some(total_missing),
                critical_locations: None,
            });
        }
        if unexpected > 0 {
            alerts.push(Alert {
                level: AlertLevel::Warning,
                message: format!("{unexpected} unexpected location(s) present"),
                location: None,
                missing_count: None,
                total_missing: None,
                critical_locations: None,
            });
        }

        Ok(MissingAnalysis {
            enabled: true,
            timestamp: Some(now),
            locations,
            alerts,
            summary: Some(AnalysisSummary {
                total_expected_locations: self.spec.locations.len() as u32,
                total_missing_members: total_missing,
                critical_locations_missing: critical_missing,
                unexpected_locations: unexpected,
            }),
        })
    }

    /// A location only counts as missing once it has been below expected
    /// for its whole grace period. The first-below timestamp resets as
    /// soon as the location recovers.
    async fn below_expected_past_grace(
        &self,
        store: &dyn Store,
        location: &str,
        spec: &LocationSpec,
        now: i64,
    ) -> Result<bool> {
        let key = keys::first_below_key(location);
        let below_since = match store.get(&key).await? {
            Some(bytes) => String::from_utf8_lossy(&bytes).parse::<i64>().unwrap_or(now),
            None => {
                store
                    .set(&key, now.to_string().into_bytes(), None)
                    .await?;
                now
            }
        };
        Ok(now - below_since >= spec.grace_period_s as i64)
    }
}

/// Periodic alert pass so missing-member conditions reach the log stream,
/// not only `/members_with_analysis` callers.
pub async fn run_missing_check(st: &crate::state::AppState) -> anyhow::Result<()> {
    let Some(analyzer) = &st.analyzer else {
        return Ok(());
    };
    let members = st.list_members().await.map_err(anyhow::Error::new)?;
    let analysis = analyzer
        .analyze(st.store.as_ref(), &members, netring_common::time::now_ts())
        .await?;
    for alert in &analysis.alerts {
        match alert.level {
            AlertLevel::Error => tracing::error!(message = %alert.message, "missing-members alert"),
            AlertLevel::Warning => tracing::warn!(message = %alert.message, "missing-members alert"),
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use netring_common::{MemberRecord, MemberStatus};
    use netring_store::MemoryStore;

    fn member(location: &str, id: &str) -> MemberRecord {
        MemberRecord {
            instance_id: id.to_string(),
            location: location.to_string(),
            ip: "10.0.0.1".to_string(),
            port: 8757,
            registered_at: 1_700_000_000,
            last_seen: 1_700_000_100,
            status: MemberStatus::Active,
            deregistered_at: None,
        }
    }

    fn spec() -> ExpectedMembersSpec {
        serde_yaml::from_str(
            r#"
locations:
  us1:
    expected_count: 1
    criticality: high
    grace_period_s: 2
  eu1:
    expected_count: 2
    criticality: medium
    grace_period_s: 2
settings:
  alerts:
    critical_missing_threshold: 1
    total_missing_threshold: 3
"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn healthy_within_grace_then_missing() {
        let store = MemoryStore::new();
        let analyzer = ExpectedMembersAnalyzer::new(spec());
        let members = vec![member("us1", "a"), member("eu1", "b")];
        let now = 1_700_000_200;

        let first = analyzer.analyze(&store, &members, now).await.unwrap();
        assert_eq!(first.locations["eu1"].status, LocationStatus::Healthy);
        assert_eq!(first.locations["eu1"].missing_count, 1);
        assert_eq!(first.summary.as_ref().unwrap().total_missing_members, 0);
        assert!(first.alerts.is_empty());

        let later = analyzer.analyze(&store, &members, now + 3).await.unwrap();
        assert_eq!(later.locations["eu1"].status, LocationStatus::MissingMembers);
        assert_eq!(later.summary.as_ref().unwrap().total_missing_members, 1);
        assert_eq!(later.summary.as_ref().unwrap().critical_locations_missing, 0);
        // Exactly one warning (medium location), no error alerts.
        assert_eq!(later.alerts.len(), 1);
        assert_eq!(later.alerts[0].level, AlertLevel::Warning);
    }

    #[tokio::test]
    async fn recovery_flips_back_without_hysteresis() {
        let store = MemoryStore::new();
        let analyzer = ExpectedMembersAnalyzer::new(spec());
        let now = 1_700_000_200;

        let short = vec![member("us1", "a"), member("eu1", "b")];
        analyzer.analyze(&store, &short, now).await.unwrap();
        analyzer.analyze(&store, &short, now + 5).await.unwrap();

        let full = vec![member("us1", "a"), member("eu1", "b"), member("eu1", "c")];
        let healed = analyzer.analyze(&store, &full, now + 6).await.unwrap();
        assert_eq!(healed.locations["eu1"].status, LocationStatus::Healthy);

        // Dropping below again restarts the grace clock from scratch.
        let again = analyzer.analyze(&store, &short, now + 7).await.unwrap();
        assert_eq!(again.locations["eu1"].status, LocationStatus::Healthy);
    }

    #[tokio::test]
    async fn high_criticality_missing_raises_error_alerts() {
        let store = MemoryStore::new();
        let analyzer = ExpectedMembersAnalyzer::new(spec());
        let members = vec![member("eu1", "b"), member("eu1", "c")];
        let now = 1_700_000_200;

        analyzer.analyze(&store, &members, now).await.unwrap();
        let out = analyzer.analyze(&store, &members, now + 3).await.unwrap();
        assert_eq!(out.locations["us1"].status, LocationStatus::MissingMembers);
        let errors: Vec<_> = out
            .alerts
            .iter()
            .filter(|a| a.level == AlertLevel::Error)
            .collect();
        // Per-location error plus the global critical alert.
        assert_eq!(errors.len(), 2);
        assert_eq!(out.summary.as_ref().unwrap().critical_locations_missing, 1);
    }

    #[tokio::test]
    async fn undeclared_location_is_flagged() {
        let store = MemoryStore::new();
        let analyzer = ExpectedMembersAnalyzer::new(spec());
        let members = vec![
            member("us1", "a"),
            member("eu1", "b"),
            member("eu1", "c"),
            member("ap1", "d"),
        ];

        let out = analyzer.analyze(&store, &members, 1_700_000_200).await.unwrap();
        assert_eq!(
            out.locations["ap1"].status,
            LocationStatus::UnexpectedLocation
        );
        assert_eq!(out.summary.as_ref().unwrap().unexpected_locations, 1);
        assert!(out
            .alerts
            .iter()
            .any(|a| a.level == AlertLevel::Warning && a.message.contains("unexpected")));
    }

    #[tokio::test]
    async fn extra_members_reported() {
        let store = MemoryStore::new();
        let analyzer = ExpectedMembersAnalyzer::new(spec());
        let members = vec![
            member("us1", "a"),
            member("us1", "a2"),
            member("eu1", "b"),
            member("eu1", "c"),
        ];

        let out = analyzer.analyze(&store, &members, 1_700_000_200).await.unwrap();
        assert_eq!(out.locations["us1"].status, LocationStatus::ExtraMembers);
        assert!(out.alerts.is_empty());
    }
}
