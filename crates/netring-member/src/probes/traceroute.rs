use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::Command;

#[derive(Debug, Clone, PartialEq)]
pub struct Hop {
    pub hop: u32,
    pub ip: Option<String>,
    pub rtt_ms: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TraceResult {
    pub total_hops: u32,
    pub max_hop_latency_ms: f64,
    pub hops: Vec<Hop>,
}

/// Seam for the external traceroute dependency; the probe loop only sees
/// this trait, so tests run against a fake.
#[async_trait]
pub trait Tracer: Send + Sync {
    /// `Ok(None)` covers every expected failure: spawn error, timeout,
    /// non-zero exit, unparseable or all-timeout output.
    async fn trace(&self, target: &str, deadline: Duration) -> anyhow::Result<Option<TraceResult>>;
}

/// Spawns the platform `traceroute` with one probe per hop. The subprocess
/// is killed when the deadline expires.
pub struct SystemTracer;

#[async_trait]
impl Tracer for SystemTracer {
    async fn trace(&self, target: &str, deadline: Duration) -> anyhow::Result<Option<TraceResult>> {
        let child = Command::new("traceroute")
            .args(["-n", "-w", "3", "-q", "1", target])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn();
        let child = match child {
            Ok(child) => child,
            Err(e) => {
                tracing::warn!(target, error = %e, "failed to spawn traceroute");
                return Ok(None);
            }
        };

        let output = match tokio::time::timeout(deadline, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                tracing::warn!(target, error = %e, "failed to read traceroute output");
                return Ok(None);
            }
            Err(_) => {
                tracing::warn!(target, timeout_s = deadline.as_secs(), "traceroute timed out, killed");
                return Ok(None);
            }
        };

        if !output.status.success() {
            tracing::debug!(
                target,
                status = %output.status,
                stderr = %String::from_utf8_lossy(&output.stderr),
                "traceroute exited non-zero"
            );
            return Ok(None);
        }

        let text = String::from_utf8_lossy(&output.stdout);
        match parse(&text) {
            Some(result) => Ok(Some(result)),
            None => {
                let sample: String = text.lines().take(3).collect::<Vec<_>>().join(" | ");
                tracing::warn!(target, sample = %sample, "unusable traceroute output");
                Ok(None)
            }
        }
    }
}

/// Parse traceroute output line by line. Each hop line yields
/// `(hop, ip?, rtt?)`; `*` hops carry no rtt. The whole result is
/// discarded when no hop answered.
pub fn parse(output: &str) -> Option<TraceResult> {
    let mut hops: Vec<Hop> = Vec::new();

    for line in output.lines().skip(1) {
        let parts: Vec<&str> = line.split_whitespace().collect();
        if parts.len() < 2 {
            continue;
        }
        let Ok(hop) = parts[0].parse::<u32>() else {
            continue;
        };

        if parts.len() >= 4 && parts[parts.len() - 1] == "ms" {
            if let Ok(rtt) = parts[parts.len() - 2].parse::<f64>() {
                hops.push(Hop {
                    hop,
                    ip: Some(parts[1].to_string()),
                    rtt_ms: Some(rtt),
                });
                continue;
            }
        }
        if parts.contains(&"*") {
            hops.push(Hop {
                hop,
                ip: None,
                rtt_ms: None,
            });
        }
    }

    if hops.is_empty() || hops.iter().all(|h| h.rtt_ms.is_none()) {
        return None;
    }

    let max_hop_latency_ms = hops
        .iter()
        .filter_map(|h| h.rtt_ms)
        .fold(0.0f64, f64::max);

    Some(TraceResult {
        total_hops: hops.len() as u32,
        max_hop_latency_ms,
        hops,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = "\
traceroute to 203.0.113.9 (203.0.113.9), 30 hops max, 60 byte packets
 1  10.0.1.1  1.234 ms
 2  172.16.0.1  4.911 ms
 3  *
 4  198.51.100.4  23.602 ms
 5  203.0.113.9  24.180 ms
";

    #[test]
    fn parses_hops_and_max_latency() {
        let result = parse(SAMPLE).unwrap();
        assert_eq!(result.total_hops, 5);
        assert!((result.max_hop_latency_ms - 24.180).abs() < 1e-9);

        assert_eq!(result.hops[0].ip.as_deref(), Some("10.0.1.1"));
        assert_eq!(result.hops[0].rtt_ms, Some(1.234));
        // The starred hop counts toward the total but has no rtt.
        assert_eq!(result.hops[2].ip, None);
        assert_eq!(result.hops[2].rtt_ms, None);
    }

    #[test]
    fn all_starred_hops_discard_the_result() {
        let output = "\
traceroute to 203.0.113.9 (203.0.113.9), 30 hops max, 60 byte packets
 1  *
 2  *
 3  *
";
        assert!(parse(output).is_none());
    }

    #[test]
    fn garbage_output_is_discarded() {
        assert!(parse("command not found\n").is_none());
        assert!(parse("").is_none());
    }

    #[test]
    fn malformed_lines_are_skipped() {
        let output = "\
traceroute to 203.0.113.9 (203.0.113.9), 30 hops max, 60 byte packets
 1  10.0.1.1  1.234 ms
not a hop line at all
 x  10.0.0.1  9.9 ms
 2  10.0.2.1  2.5 ms
";
        let result = parse(output).unwrap();
        assert_eq!(result.total_hops, 2);
        assert!((result.max_hop_latency_ms - 2.5).abs() < 1e-9);
    }
}
